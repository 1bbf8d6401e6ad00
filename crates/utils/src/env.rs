//! Typed reads of environment variables.

use std::{env, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Non-empty value of `name`, if set
pub fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn required(name: &'static str) -> Result<String, EnvError> {
    optional(name).ok_or(EnvError::Missing(name))
}

/// Parse `name` as `T`, falling back to `default` when unset.
pub fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, EnvError> {
    match optional(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| EnvError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Comma-separated list, trimmed, empty entries dropped
pub fn list(name: &'static str) -> Vec<String> {
    optional(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
