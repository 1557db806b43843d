//! Typed environment variable lookups
//!
//! Unset or empty variables fall back to the supplied default; set but
//! unparsable variables are reported instead of being silently ignored.

use crate::error::{CommonError, Result};
use std::str::FromStr;

/// Read `key` and parse it, returning `None` when the variable is unset or empty.
pub fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::invalid_env(key, raw, e)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => Err(CommonError::invalid_env(
            key,
            raw.to_string_lossy(),
            "not valid unicode",
        )),
    }
}

/// Read `key` and parse it, falling back to `default`.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Read a required variable.
pub fn env_required(key: &str) -> Result<String> {
    env_opt::<String>(key)?.ok_or_else(|| CommonError::MissingEnv(key.to_string()))
}

/// Read a comma-separated list, trimming entries and dropping empty ones.
pub fn env_list(key: &str) -> Result<Option<Vec<String>>> {
    Ok(env_opt::<String>(key)?.map(|raw| split_list(&raw)))
}

/// Split a comma-separated list the same way [`env_list`] does.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
