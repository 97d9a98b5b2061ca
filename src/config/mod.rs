//! Configuration for the recovery layer.
//!
//! Values can come from a deserialized application config (`RecoveryConfig`
//! implements `Deserialize`) or from the environment through [`ConfigService`].

use crate::error::{Result, SalvageError};
use crate::trace::Traceback;
use dashmap::DashMap;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

pub const MAX_FRAMES_KEY: &str = "SALVAGE_MAX_FRAMES";
pub const CAPTURE_TRACEBACK_KEY: &str = "SALVAGE_CAPTURE_TRACEBACK";
pub const EXPOSE_FAULT_ID_KEY: &str = "SALVAGE_EXPOSE_FAULT_ID";

/// Key/value configuration store, seeded from the process environment
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Create a store holding every environment variable of the process
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| SalvageError::invalid_config(key, format!("{raw:?}: {e}"))),
        }
    }
}

/// Tunables for fault interception
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Upper bound on call-site records per diagnostic report
    pub max_frames: usize,

    /// When false, only the panic location is recorded
    pub capture_traceback: bool,

    /// Adds an `x-fault-id` header to responses produced by the default resolver
    pub expose_fault_id: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_frames: Traceback::DEFAULT_MAX_FRAMES,
            capture_traceback: true,
            expose_fault_id: false,
        }
    }
}

impl RecoveryConfig {
    /// Build a configuration from `SALVAGE_*` keys, falling back to defaults
    pub fn from_config_service(config: &ConfigService) -> Result<Self> {
        let defaults = Self::default();
        let built = Self {
            max_frames: config.parse(MAX_FRAMES_KEY)?.unwrap_or(defaults.max_frames),
            capture_traceback: config
                .parse(CAPTURE_TRACEBACK_KEY)?
                .unwrap_or(defaults.capture_traceback),
            expose_fault_id: config
                .parse(EXPOSE_FAULT_ID_KEY)?
                .unwrap_or(defaults.expose_fault_id),
        };
        built.validate()?;
        Ok(built)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frames == 0 || self.max_frames > Traceback::FRAME_LIMIT {
            return Err(SalvageError::invalid_config(
                "max_frames",
                format!(
                    "must be between 1 and {}, got {}",
                    Traceback::FRAME_LIMIT,
                    self.max_frames
                ),
            ));
        }
        Ok(())
    }
}
