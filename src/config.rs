use serde::Deserialize;
use std::{collections::HashSet, fmt::Display, path::PathBuf, str::FromStr};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_parsed")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

fn deserialize_parsed<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a request body in bytes. Unset means unlimited, since
    /// base64 screenshots easily exceed axum's 2 MiB default.
    pub max_body_bytes: Option<usize>,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VariantConfig {
    pub name: String,
    pub onnx_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub variants: Vec<VariantConfig>,
    #[serde(default = "default_preload")]
    pub preload: bool,
    pub intra_threads: Option<usize>,
}

fn default_preload() -> bool {
    true
}

impl ModelConfig {
    pub fn get_variant_path(&self, variant: &VariantConfig) -> PathBuf {
        self.model_dir.join(&variant.onnx_file)
    }

    /// Missing model files are not an error here: a variant whose artifact
    /// cannot be loaded stays unavailable without stopping the service.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.trim().is_empty() {
                return Err("Variant names must not be empty".to_string());
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(format!("Duplicate variant: {}", variant.name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_color_jitter")]
    pub color_jitter: bool,
    pub jitter_seed: Option<u64>,
}

fn default_color_jitter() -> bool {
    true
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            color_jitter: default_color_jitter(),
            jitter_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn file_name(self) -> &'static str {
        match self {
            Environment::Local => "local.yaml",
            Environment::Production => "production.yaml",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(unsupported("APP_ENVIRONMENT", other, &["local", "production"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }

    /// Default `EnvFilter` directive. ONNX Runtime is chatty below info.
    pub fn filter_directive(self) -> String {
        format!("{},ort=info", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(unsupported("log_level", other, &["debug", "info"])),
        }
    }
}

fn unsupported(setting: &str, value: &str, allowed: &[&str]) -> String {
    format!(
        "unsupported {} `{}`, expected one of: {}",
        setting,
        value,
        allowed.join(", ")
    )
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .parse()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment.file_name()),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.model.validate().map_err(config::ConfigError::Message)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    const BASE: &str = r#"
server:
  host: 0.0.0.0
  port: 5000
log_level: info
model:
  model_dir: models
  variants:
    - name: waterIconCup
      onnx_file: waterIconCup.onnx
"#;

    fn parse(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(BASE);

        assert_eq!(config.server.get_address(), "0.0.0.0:5000");
        assert!(config.model.preload);
        assert!(config.model.intra_threads.is_none());
        assert!(config.scoring.color_jitter);
        assert!(config.scoring.jitter_seed.is_none());
        assert!(config.server.max_body_bytes.is_none());
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_body_limit_is_read() {
        let yaml = BASE.replace("port: 5000", "port: 5000\n  max_body_bytes: 1048576");
        let config = parse(&yaml);

        assert_eq!(config.server.max_body_bytes, Some(1024 * 1024));
    }

    #[test]
    fn test_unsupported_log_level_fails_deserialization() {
        let yaml = BASE.replace("log_level: info", "log_level: trace");
        let err = config::Config::builder()
            .add_source(File::from_str(&yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap_err();

        assert!(err.to_string().contains("unsupported log_level `trace`"));
    }

    #[test]
    fn test_variant_name_keeps_case() {
        let config = parse(BASE);
        let variant = &config.model.variants[0];

        assert_eq!(variant.name, "waterIconCup");
        assert_eq!(
            config.model.get_variant_path(variant),
            PathBuf::from("models/waterIconCup.onnx")
        );
    }

    #[test]
    fn test_validate_allows_missing_model_file() {
        let config = parse(BASE);
        assert!(config.model.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = parse(BASE);
        let duplicate = config.model.variants[0].clone();
        config.model.variants.push(duplicate);

        let err = config.model.validate().unwrap_err();
        assert!(err.contains("waterIconCup"));
    }

    #[test]
    fn test_log_level_and_environment_parsing() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::Debug.filter_directive(), "debug,ort=info");
        assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(Environment::Production.file_name(), "production.yaml");

        let err = "staging".parse::<Environment>().unwrap_err();
        assert!(err.contains("local, production"));
    }
}
