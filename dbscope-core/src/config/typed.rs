use super::{ConfigError, DbscopeConfig};

/// Metadata about a single configuration property.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    /// Absolute key (e.g., `"pg.ssl.mode"`).
    pub full_key: String,
    /// Rust type name (e.g., `"u16"`).
    pub type_name: &'static str,
    /// Whether the property must be present.
    pub required: bool,
    /// Human readable description, shown in validation reports.
    pub description: Option<&'static str>,
}

impl PropertyMeta {
    pub fn required(full_key: &str, type_name: &'static str, description: &'static str) -> Self {
        Self {
            full_key: full_key.to_string(),
            type_name,
            required: true,
            description: Some(description),
        }
    }

    pub fn optional(full_key: &str, type_name: &'static str, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(full_key, type_name, description)
        }
    }
}

/// A strongly-typed configuration section.
pub trait ConfigProperties: Sized {
    /// The configuration key prefix (e.g., `"pg"`).
    fn prefix() -> &'static str;

    /// Metadata about all expected properties.
    fn properties_metadata() -> Vec<PropertyMeta>;

    /// Construct from a loaded configuration.
    fn from_config(config: &DbscopeConfig) -> Result<Self, ConfigError>;
}
