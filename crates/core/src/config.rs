use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CHURN_INSIGHTS__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// An empty record set yields empty tables when true, `EmptyInput` otherwise.
    #[serde(default = "default_allow_empty")]
    pub allow_empty: bool,
    #[serde(default = "default_validate")]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Record count at which aggregation switches to sharded parallel execution.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,
}

// Default functions
fn default_allow_empty() -> bool {
    true
}
fn default_validate() -> bool {
    true
}
fn default_parallel_threshold() -> usize {
    50_000
}
fn default_shard_size() -> usize {
    8192
}
fn default_format() -> String {
    "table".to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            allow_empty: default_allow_empty(),
            validate: default_validate(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: default_parallel_threshold(),
            shard_size: default_shard_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CHURN_INSIGHTS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.input.allow_empty);
        assert!(config.input.validate);
        assert_eq!(config.analysis.shard_size, 8192);
        assert_eq!(config.output.format, "table");
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"analysis": {"shard_size": 64}}"#).unwrap();
        assert_eq!(config.analysis.shard_size, 64);
        assert_eq!(config.analysis.parallel_threshold, 50_000);
        assert!(config.input.allow_empty);
    }
}
