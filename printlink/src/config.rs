//! Engine parameters.

use crate::error::{Error, Result};
use crate::sansio::Dialect;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of one [`Device`](crate::Device).
///
/// Every field has a default, so a configuration file only needs to name the
/// values it changes:
///
/// ```
/// use printlink::{Config, Dialect};
///
/// let config = Config::from_json(r#"{ "dialect": "tonokip", "pipeline_depth": 8 }"#).unwrap();
/// assert_eq!(config.dialect, Dialect::Tonokip);
/// assert_eq!(config.history_capacity(), 8 * 4 + 64);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dialect: Dialect,
    /// How many commands the controller can buffer before it must ack.
    pub pipeline_depth: usize,
    /// Sent blocks kept for resend requests. Derived from the pipeline
    /// depth when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
    /// Initial receive buffer size; the buffer grows as needed.
    pub recv_buffer_size: usize,
    /// Surface raw wire traffic as [`Event::Traffic`](crate::Event::Traffic).
    pub log_traffic: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dialect: Dialect::default(),
            pipeline_depth: 4,
            history_capacity: None,
            recv_buffer_size: 256,
            log_traffic: false,
        }
    }
}

impl Config {
    pub fn new(dialect: Dialect, pipeline_depth: usize) -> Self {
        Config {
            dialect,
            pipeline_depth,
            ..Config::default()
        }
    }

    /// Load a configuration from JSON and validate it.
    ///
    /// An unknown dialect name fails with [`Error::UnsupportedProtocol`],
    /// anything else that does not fit with [`Error::InvalidConfig`].
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(name) = value.get("dialect").and_then(Value::as_str) {
            name.parse::<Dialect>()?;
        }
        let config: Config =
            serde_json::from_value(value).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.unwrap_or(self.pipeline_depth * 4 + 64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_depth == 0 {
            return Err(Error::InvalidConfig("pipeline_depth must be at least 1".into()));
        }
        if self.history_capacity() == 0 {
            return Err(Error::InvalidConfig("history_capacity must be at least 1".into()));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::InvalidConfig("recv_buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}
