use crate::{
    error::{PipelineError, ValidationError},
    server::SharedState,
    validation::PredictionForm,
};
use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub message: String,
    pub original_image_url: String,
    pub mask_image_url: String,
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PipelineError> {
    state.metrics.record_request("/predict");

    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => return Err(state.pipeline.reject(e.into())),
    };
    let record = state.pipeline.run(form).await?;

    Ok(Json(PredictionResponse {
        message: "Prediction successful and images stored".into(),
        original_image_url: record.original_image_url,
        mask_image_url: record.mask_image_url,
    }))
}

async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<PredictionForm, ValidationError> {
    let mut multipart =
        multipart.map_err(|e| ValidationError::MalformedForm(e.body_text()))?;
    let mut form = PredictionForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "user_id" => form.user_id = Some(read_text(field).await?),
            "firebase_token" => form.credential_token = Some(read_text(field).await?),
            "image" => {
                form.file_name = field.file_name().map(str::to_string);
                form.image = Some(field.bytes().await.map_err(form_error)?);
            }
            other => tracing::debug!("Ignoring unexpected form field {:?}", other),
        }
    }

    Ok(form)
}

async fn read_text(field: Field<'_>) -> Result<String, ValidationError> {
    field.text().await.map_err(form_error)
}

/// Body limit violations keep their 413, everything else is a bad form.
fn form_error(e: MultipartError) -> ValidationError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ValidationError::PayloadTooLarge(e.body_text())
    } else {
        ValidationError::MalformedForm(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        server::build_router,
        testing::{jpeg_bytes, Call, Harness, ModelBehavior},
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "mri-test-boundary";

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        data: Vec<u8>,
    }

    fn text(name: &'static str, value: &str) -> Part<'static> {
        Part {
            name,
            file_name: None,
            data: value.as_bytes().to_vec(),
        }
    }

    fn image<'a>(file_name: &'a str, data: Vec<u8>) -> Part<'a> {
        Part {
            name: "image",
            file_name: Some(file_name),
            data,
        }
    }

    fn multipart_request(parts: Vec<Part<'_>>) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part.file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(&part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn valid_parts() -> Vec<Part<'static>> {
        vec![
            text("user_id", "user-1"),
            text("firebase_token", "valid-token"),
            image("slice.jpg", jpeg_bytes(24, 16)),
        ]
    }

    fn router(harness: &Harness) -> Router {
        build_router(harness.state(), 1024 * 1024)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_successful_prediction() {
        let harness = Harness::new();

        let (status, body) = send(router(&harness), multipart_request(valid_parts())).await;

        assert_eq!(status, StatusCode::OK);
        let response: PredictionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            response.original_image_url,
            "https://storage.test/original_images/user-1_1700000000.jpg"
        );
        assert_eq!(
            response.mask_image_url,
            "https://storage.test/mask_images/user-1_1700000000.jpg"
        );

        let records = harness.log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "user-1");
        assert_eq!(records[0].original_image_url, response.original_image_url);
        assert_eq!(records[0].mask_image_url, response.mask_image_url);

        let storage_calls: Vec<&'static str> = harness
            .log
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::Upload { .. } => Some("upload"),
                Call::Record(_) => Some("record"),
                _ => None,
            })
            .collect();
        assert_eq!(storage_calls, vec!["upload", "upload", "record"]);
    }

    #[tokio::test]
    async fn test_wrong_extension_is_bad_request() {
        let harness = Harness::new();
        let parts = vec![
            text("user_id", "user-1"),
            text("firebase_token", "forged-token"),
            image("slice.png", jpeg_bytes(8, 8)),
        ];

        let (status, body) = send(router(&harness), multipart_request(parts)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("slice.png"));
        assert!(harness.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_image_is_bad_request() {
        let harness = Harness::new();
        let parts = vec![
            text("user_id", "user-1"),
            text("firebase_token", "valid-token"),
            image("slice.JPEG", b"\xff\xd8 broken".to_vec()),
        ];

        let (status, body) = send(router(&harness), multipart_request(parts)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Invalid image file"));
        assert_eq!(harness.log.uploads(), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthorized() {
        let harness = Harness::new();
        let parts = vec![
            text("user_id", "user-1"),
            text("firebase_token", "forged-token"),
            image("slice.jpg", b"garbage".to_vec()),
        ];

        let (status, body) = send(router(&harness), multipart_request(parts)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].as_str().unwrap().contains("Invalid or expired token"));
        assert_eq!(
            harness.log.calls(),
            vec![Call::Verify("forged-token".into())]
        );
    }

    #[tokio::test]
    async fn test_missing_image_is_bad_request() {
        let harness = Harness::new();
        let parts = vec![
            text("user_id", "user-1"),
            text("firebase_token", "valid-token"),
        ];

        let (status, body) = send(router(&harness), multipart_request(parts)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing form field: image");
    }

    #[tokio::test]
    async fn test_inference_failure_is_internal_error() {
        let harness = Harness::new().model(ModelBehavior::Fail("CUDA out of memory".into()));

        let (status, body) = send(router(&harness), multipart_request(valid_parts())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            "Internal Server Error: Model prediction failed: CUDA out of memory"
        );
        assert_eq!(harness.log.uploads(), 0);
    }

    #[tokio::test]
    async fn test_mask_upload_failure_is_internal_error() {
        let harness = Harness::new().fail_uploads_to("mask_images");

        let (status, body) = send(router(&harness), multipart_request(valid_parts())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("bucket unreachable"));
        assert!(harness.log.records().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let harness = Harness::new();
        let parts = vec![
            text("user_id", "user-1"),
            text("firebase_token", "valid-token"),
            image("slice.jpg", jpeg_bytes(200, 200)),
        ];

        let (status, body) = send(
            build_router(harness.state(), 1024),
            multipart_request(parts),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Upload too large"));
        assert!(harness.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request_with_detail() {
        let harness = Harness::new();
        let router = router(&harness);
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"user_id":"user-1"}"#))
            .unwrap();

        let (status, body) = send(router.clone(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Malformed multipart request"));
        assert!(harness.log.calls().is_empty());

        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let exported = String::from_utf8(bytes.to_vec()).unwrap();
        let outcome = exported
            .lines()
            .find(|line| line.starts_with("prediction_outcomes_total"))
            .unwrap_or_default();
        assert!(outcome.contains(r#"outcome="validation_error""#), "{}", exported);
        assert!(outcome.contains(r#"stage="received""#), "{}", exported);
    }

    #[tokio::test]
    async fn test_home_and_health_routes() {
        let harness = Harness::new();

        let (status, body) = send(
            router(&harness),
            Request::builder().uri("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().starts_with("Welcome"));

        let (status, body) = send(
            router(&harness),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Available");
    }
}
