use axum::{response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Welcome {
    message: &'static str,
}

pub async fn welcome() -> impl IntoResponse {
    Json(Welcome {
        message: "Welcome to the MRI segmentation prediction service!",
    })
}
