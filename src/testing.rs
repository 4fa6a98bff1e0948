//! Fakes and fixtures shared by the unit tests.

use crate::{
    auth::{Authenticator, Identity, IdentityVerifier},
    config::{ArtifactFormat, ArtifactsConfig, AuthConfig, AuthProvider},
    error::{AuthError, InferenceError, StorageError},
    inference::InferenceOrchestrator,
    model_service::SegmentationModel,
    persistence::PersistenceCoordinator,
    pipeline::{Clock, PredictionPipeline},
    server::SharedState,
    storage::{ArtifactRecord, ArtifactStore, MetadataStore},
    telemetry::Metrics,
};
use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, Rgb};
use ndarray::{Array2, Array4};
use parking_lot::Mutex;
use std::{collections::HashMap, io::Cursor, sync::Arc, time::Duration};
use tokio::net::TcpListener;

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_http(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Verify(String),
    Preprocess,
    Predict,
    Upload {
        namespace: String,
        key: String,
        content_type: String,
    },
    Record(ArtifactRecord),
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn uploads(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Upload { .. }))
            .count()
    }

    pub fn records(&self) -> Vec<ArtifactRecord> {
        self.0
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Record(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Accepts `valid-token` as `user-1`.
pub struct FakeVerifier {
    log: CallLog,
}

impl FakeVerifier {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }
}

#[async_trait]
impl IdentityVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.log.push(Call::Verify(token.to_string()));
        match token {
            "valid-token" => Ok(Identity {
                uid: "user-1".into(),
                email: None,
            }),
            _ => Err(AuthError::InvalidToken("signature mismatch".into())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelBehavior {
    ZeroMask,
    Fail(String),
    Panic,
}

pub struct FakeModel {
    log: CallLog,
    behavior: ModelBehavior,
}

impl FakeModel {
    pub fn new(log: &CallLog, behavior: ModelBehavior) -> Self {
        Self {
            log: log.clone(),
            behavior,
        }
    }
}

impl SegmentationModel for FakeModel {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, InferenceError> {
        self.log.push(Call::Preprocess);
        Ok(Array4::zeros((
            1,
            1,
            image.height() as usize,
            image.width() as usize,
        )))
    }

    fn predict(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        self.log.push(Call::Predict);
        match &self.behavior {
            ModelBehavior::ZeroMask => {
                let (_, _, height, width) = input.dim();
                Ok(Array2::zeros((height, width)))
            }
            ModelBehavior::Fail(cause) => Err(InferenceError::Predict(cause.clone())),
            ModelBehavior::Panic => panic!("weights corrupted"),
        }
    }
}

pub struct FakeArtifactStore {
    log: CallLog,
    fail_namespace: Option<String>,
    stored: Mutex<Vec<String>>,
}

impl FakeArtifactStore {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_namespace: None,
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(log: &CallLog, namespace: &str) -> Self {
        Self {
            fail_namespace: Some(namespace.to_string()),
            ..Self::new(log)
        }
    }

    pub fn stored(&self) -> Vec<String> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn upload(
        &self,
        namespace: &str,
        key: &str,
        _bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.log.push(Call::Upload {
            namespace: namespace.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
        });
        if self.fail_namespace.as_deref() == Some(namespace) {
            return Err(StorageError::Upload {
                key: format!("{}/{}", namespace, key),
                reason: "bucket unreachable".into(),
            });
        }
        self.stored.lock().push(format!("{}/{}", namespace, key));
        Ok(format!("https://storage.test/{}/{}", namespace, key))
    }
}

pub struct FakeMetadataStore {
    log: CallLog,
    fail: bool,
}

impl FakeMetadataStore {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail: false,
        }
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn record(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::Metadata("permission denied".into()));
        }
        self.log.push(Call::Record(record.clone()));
        Ok(())
    }
}

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_seconds(&self) -> u64 {
        self.0
    }
}

/// Wires a pipeline out of fakes that all write to one call log.
pub struct Harness {
    pub log: CallLog,
    pub artifacts: Arc<FakeArtifactStore>,
    metadata_fails: bool,
    behavior: ModelBehavior,
}

impl Harness {
    pub const NOW: u64 = 1_700_000_000;

    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            artifacts: Arc::new(FakeArtifactStore::new(&log)),
            log,
            metadata_fails: false,
            behavior: ModelBehavior::ZeroMask,
        }
    }

    pub fn fail_uploads_to(mut self, namespace: &str) -> Self {
        self.artifacts = Arc::new(FakeArtifactStore::failing_on(&self.log, namespace));
        self
    }

    pub fn fail_metadata(mut self) -> Self {
        self.metadata_fails = true;
        self
    }

    pub fn model(mut self, behavior: ModelBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn pipeline(&self) -> PredictionPipeline {
        self.pipeline_with_metrics(Arc::new(Metrics::new().unwrap()))
    }

    fn pipeline_with_metrics(&self, metrics: Arc<Metrics>) -> PredictionPipeline {
        let auth_config = AuthConfig {
            enforce_user_match: false,
            timeout_secs: 1,
            provider: AuthProvider::Static {
                tokens: HashMap::new(),
            },
        };
        let metadata_store = FakeMetadataStore {
            log: self.log.clone(),
            fail: self.metadata_fails,
        };

        PredictionPipeline::new(
            Authenticator::new(Arc::new(FakeVerifier::new(&self.log)), &auth_config),
            InferenceOrchestrator::new(
                Arc::new(FakeModel::new(&self.log, self.behavior.clone())),
                ArtifactFormat::Jpeg,
            ),
            PersistenceCoordinator::new(
                self.artifacts.clone(),
                Arc::new(metadata_store),
                &ArtifactsConfig::default(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
            Arc::new(FixedClock(Self::NOW)),
            metrics,
        )
    }

    pub fn state(&self) -> SharedState {
        let metrics = Arc::new(Metrics::new().unwrap());
        SharedState {
            pipeline: Arc::new(self.pipeline_with_metrics(metrics.clone())),
            metrics,
        }
    }
}
