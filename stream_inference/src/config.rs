use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
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
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_max_message_bytes() -> usize {
    1_000_000_000
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

fn default_output_name() -> String {
    "output".to_string()
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.num_instances == 0 {
            return Err("model.num_instances must be at least 1".to_string());
        }
        if !self.get_path().exists() {
            return Err(format!("model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl LabelsConfig {
    pub fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Validatable for LabelsConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmoothingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

fn default_window_size() -> usize {
    5
}

impl Validatable for SmoothingConfig {
    fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("smoothing.window_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Session eviction knobs. Both default to off, which reproduces the
/// original unbounded-registry behavior.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub max_clients: Option<usize>,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Validatable for SessionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_clients == Some(0) {
            return Err(
                "session.max_clients must be at least 1 when set; omit it to disable eviction"
                    .to_string(),
            );
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(
                "session.idle_timeout_secs must be at least 1 when set; omit it to disable reaping"
                    .to_string(),
            );
        }
        Ok(())
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

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_size_fails_validation() {
        let smoothing = SmoothingConfig { window_size: 0 };
        assert!(smoothing.validate().is_err());
        assert!(SmoothingConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_model_file_fails_validation() {
        let model = ModelConfig {
            model_file: "does_not_exist.onnx".to_string(),
            model_dir: PathBuf::from("/nonexistent"),
            num_instances: 1,
            output_name: default_output_name(),
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn session_config_defaults_to_no_eviction() {
        let session = SessionConfig::default();
        assert!(session.max_clients.is_none());
        assert!(session.idle_timeout_secs.is_none());
        assert!(session.validate().is_ok());
    }

    #[test]
    fn zero_eviction_settings_fail_validation() {
        let session = SessionConfig {
            max_clients: Some(0),
            idle_timeout_secs: None,
        };
        assert!(session.validate().is_err());

        let session = SessionConfig {
            max_clients: None,
            idle_timeout_secs: Some(0),
        };
        assert!(session.validate().is_err());

        let session = SessionConfig {
            max_clients: Some(1),
            idle_timeout_secs: Some(60),
        };
        assert!(session.validate().is_ok());
    }
}
