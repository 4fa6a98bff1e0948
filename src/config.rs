use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelConfig {
    Onnx(OnnxModelConfig),
    Passthrough,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OnnxModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_side")]
    pub input_width: u32,
    #[serde(default = "default_input_side")]
    pub input_height: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_input_side() -> u32 {
    256
}

fn default_channels() -> usize {
    3
}

fn default_output_name() -> String {
    "output".into()
}

impl OnnxModelConfig {
    pub fn get_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_model_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_model_path()));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(format!(
                "Unsupported model channel count {}. Use either 1 or 3.",
                self.channels
            ));
        }
        if self.num_instances == 0 {
            return Err("At least one model instance is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Jpeg,
    Png,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Jpeg => "jpg",
            ArtifactFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Jpeg => "image/jpeg",
            ArtifactFormat::Png => "image/png",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            ArtifactFormat::Jpeg => image::ImageFormat::Jpeg,
            ArtifactFormat::Png => image::ImageFormat::Png,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub format: ArtifactFormat,
    #[serde(default = "default_originals_namespace")]
    pub originals_namespace: String,
    #[serde(default = "default_masks_namespace")]
    pub masks_namespace: String,
}

fn default_originals_namespace() -> String {
    "original_images".into()
}

fn default_masks_namespace() -> String {
    "mask_images".into()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            format: ArtifactFormat::default(),
            originals_namespace: default_originals_namespace(),
            masks_namespace: default_masks_namespace(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub enforce_user_match: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub provider: AuthProvider,
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AuthProvider {
    Firebase {
        #[serde(default = "default_identity_url")]
        identity_url: String,
        api_key: String,
    },
    Static {
        #[serde(default)]
        tokens: HashMap<String, String>,
    },
}

fn default_identity_url() -> String {
    "https://identitytoolkit.googleapis.com".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub provider: StorageProvider,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageProvider {
    Gcs {
        bucket: String,
        #[serde(default = "default_gcs_url")]
        upload_url: String,
        #[serde(default = "default_gcs_url")]
        public_url: String,
        #[serde(default)]
        access_token: Option<String>,
    },
    Local {
        root_dir: PathBuf,
    },
}

fn default_gcs_url() -> String {
    "https://storage.googleapis.com".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub provider: MetadataProvider,
}

impl MetadataConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum MetadataProvider {
    Firestore {
        project_id: String,
        #[serde(default = "default_firestore_url")]
        base_url: String,
        #[serde(default = "default_collection")]
        collection: String,
        #[serde(default)]
        access_token: Option<String>,
    },
    JsonLines {
        path: PathBuf,
    },
}

fn default_firestore_url() -> String {
    "https://firestore.googleapis.com".into()
}

fn default_collection() -> String {
    "predictions".into()
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("MRI")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}

impl Config {
    /// Runs before any subscriber is installed, so problems are only
    /// reported through the returned error.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if let ModelConfig::Onnx(model) = &self.model {
            model.validate().map_err(config::ConfigError::Message)?;
        }
        Ok(())
    }
}
