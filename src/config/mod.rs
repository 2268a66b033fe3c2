use std::fs;
use std::str::FromStr;

use log::{debug, trace, LevelFilter};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::config_error;
use crate::core::error::RuntimeResult;
use crate::request::Charset;

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_charset"))]
pub struct Config {
    /// Encoding applied to every request before parameters are read
    #[serde(default)]
    pub charset: Option<String>,

    /// Fallback locale when the session does not carry one
    #[serde(default)]
    pub locale: Option<String>,

    #[validate(nested)]
    #[serde(default)]
    pub log: Log,

    #[validate(nested)]
    #[serde(default)]
    pub upload: Upload,

    #[validate(nested)]
    #[serde(default)]
    pub property_cache: PropertyCache,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> RuntimeResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {}: {}", path, e))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> RuntimeResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {}", e))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| config_error!("Conf file validation failed: {}", e))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> RuntimeResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to serialize conf: {}", e))
    }

    fn validate_charset(&self) -> Result<(), ValidationError> {
        match &self.charset {
            Some(charset) if Charset::from_label(charset).is_none() => {
                Err(ValidationError::new("unsupported_charset"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Log::validate_level"))]
pub struct Log {
    #[serde(default = "Log::default_level")]
    pub level: String,
    /// Append log lines to this file instead of stderr
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::Info)
    }

    fn validate_level(&self) -> Result<(), ValidationError> {
        LevelFilter::from_str(&self.level)
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }
}

/// Multipart limits, 0 means unlimited
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct Upload {
    #[serde(default)]
    pub size_max: u64,
    #[serde(default)]
    pub file_size_max: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct PropertyCache {
    #[validate(range(min = 1))]
    #[serde(default = "PropertyCache::default_max_capacity")]
    pub max_capacity: usize,
    /// Seconds an accessor may stay unused before it is dropped
    #[validate(range(min = 1))]
    #[serde(default = "PropertyCache::default_time_to_idle")]
    pub time_to_idle: u64,
}

impl Default for PropertyCache {
    fn default() -> Self {
        Self {
            max_capacity: Self::default_max_capacity(),
            time_to_idle: Self::default_time_to_idle(),
        }
    }
}

impl PropertyCache {
    fn default_max_capacity() -> usize {
        10_000
    }

    fn default_time_to_idle() -> u64 {
        3600
    }
}
