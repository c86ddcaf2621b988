use super::loader::config_key_to_env_key;
use super::typed::ConfigProperties;
use super::{ConfigError, DbscopeConfig};

/// A single missing or malformed config key.
#[derive(Debug)]
pub struct MissingKeyError {
    /// Section prefix that requires this key.
    pub source: String,
    pub key: String,
    pub expected_type: String,
    /// Environment variable that sets this key.
    pub env_hint: String,
    pub description: Option<String>,
}

impl std::fmt::Display for MissingKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "  - `{}`: key '{}' ({}), set env var `{}`",
            self.source, self.key, self.expected_type, self.env_hint
        )?;
        if let Some(desc) = &self.description {
            write!(f, " -- {desc}")?;
        }
        Ok(())
    }
}

/// Aggregated config validation error.
#[derive(Debug)]
pub struct ConfigValidationError {
    pub errors: Vec<MissingKeyError>,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid configuration:")?;
        for err in &self.errors {
            write!(f, "\n{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Check a section against a configuration.
///
/// Reports every required key that is absent. When nothing is missing, the
/// section is constructed once to surface type mismatches too.
pub fn validate_section<C: ConfigProperties>(config: &DbscopeConfig) -> Vec<MissingKeyError> {
    let prefix = C::prefix();

    let mut errors: Vec<MissingKeyError> = C::properties_metadata()
        .into_iter()
        .filter(|prop| prop.required && !config.contains_key(&prop.full_key))
        .map(|prop| MissingKeyError {
            source: prefix.to_string(),
            env_hint: config_key_to_env_key(&prop.full_key),
            key: prop.full_key,
            expected_type: prop.type_name.to_string(),
            description: prop.description.map(str::to_string),
        })
        .collect();

    if errors.is_empty() {
        if let Err(ConfigError::TypeMismatch { key, expected }) = C::from_config(config) {
            errors.push(MissingKeyError {
                source: prefix.to_string(),
                env_hint: config_key_to_env_key(&key),
                key,
                expected_type: expected.to_string(),
                description: Some(format!("type mismatch: expected {expected}")),
            });
        }
    }

    errors
}
