use crate::{
    auth::Authenticator,
    error::PipelineError,
    inference::InferenceOrchestrator,
    persistence::PersistenceCoordinator,
    storage::{ArtifactKey, ArtifactRecord},
    telemetry::Metrics,
    validation::{decode_image, validate_extension, validate_form, PredictionForm},
};
use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tracing::instrument;

pub trait Clock: Send + Sync + 'static {
    fn now_seconds(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Last stage a request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Authenticated,
    Inferred,
    OriginalUploaded,
    MaskUploaded,
    RecordPersisted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Authenticated => "authenticated",
            Stage::Inferred => "inferred",
            Stage::OriginalUploaded => "original_uploaded",
            Stage::MaskUploaded => "mask_uploaded",
            Stage::RecordPersisted => "record_persisted",
        }
    }
}

/// validate -> authenticate -> decode/infer/encode -> upload original ->
/// upload mask -> write record. The first failing stage ends the run.
pub struct PredictionPipeline {
    authenticator: Authenticator,
    inference: InferenceOrchestrator,
    persistence: PersistenceCoordinator,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl PredictionPipeline {
    pub fn new(
        authenticator: Authenticator,
        inference: InferenceOrchestrator,
        persistence: PersistenceCoordinator,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            authenticator,
            inference,
            persistence,
            clock,
            metrics,
        }
    }

    #[instrument(skip(self, form))]
    pub async fn run(&self, form: PredictionForm) -> Result<ArtifactRecord, PipelineError> {
        let mut stage = Stage::Received;
        let result = self.execute(form, &mut stage).await;

        match &result {
            Ok(record) => {
                tracing::info!(
                    user_id = %record.user_id,
                    timestamp = record.timestamp,
                    "Prediction stored"
                );
                self.metrics.record_outcome("success", stage.as_str());
            }
            Err(e) => self.report_failure(stage, e),
        }

        result
    }

    /// Accounts for a request refused before its form could be read.
    pub fn reject(&self, error: PipelineError) -> PipelineError {
        self.report_failure(Stage::Received, &error);
        error
    }

    fn report_failure(&self, stage: Stage, error: &PipelineError) {
        tracing::info!(
            stage = stage.as_str(),
            kind = error.kind(),
            "Prediction pipeline stopped"
        );
        self.metrics.record_outcome(error.kind(), stage.as_str());
    }

    async fn execute(
        &self,
        form: PredictionForm,
        stage: &mut Stage,
    ) -> Result<ArtifactRecord, PipelineError> {
        let request = validate_form(form)?;
        validate_extension(&request.file_name)?;
        *stage = Stage::Validated;

        self.authenticator
            .authenticate(&request.user_id, &request.credential_token)
            .await?;
        *stage = Stage::Authenticated;

        let image = decode_image(&request.image_bytes)?;
        let started = Instant::now();
        let artifacts = self.inference.run(image).await?;
        self.metrics
            .record_inference_duration(started.elapsed().as_millis() as u64);
        *stage = Stage::Inferred;

        let timestamp = self.clock.now_seconds();
        let key = ArtifactKey::new(&request.user_id, timestamp);

        let original_image_url = self
            .persistence
            .upload_original(&key, artifacts.original)
            .await?;
        *stage = Stage::OriginalUploaded;

        let mask_image_url = self.persistence.upload_mask(&key, artifacts.mask).await?;
        *stage = Stage::MaskUploaded;

        let record = ArtifactRecord {
            user_id: request.user_id,
            timestamp,
            original_image_url,
            mask_image_url,
        };
        self.persistence.write_record(&record).await?;
        *stage = Stage::RecordPersisted;

        Ok(record)
    }
}
