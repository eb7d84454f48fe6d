//! API key lookup for chat workers
//!
//! The key never lives in the config file. The config names the environment
//! variable that holds it (`OPENAI_API_KEY` unless overridden).

use ensemble_core::{EnsembleError, Result};
use std::env;

/// Read the API key from `env_var`
///
/// Empty values count as missing.
pub fn get_api_key(env_var: &str) -> Result<String> {
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_var);
            Ok(key.trim().to_string())
        }
        _ => Err(EnsembleError::Auth(format!(
            "No API key found. Set {}=sk-... or use --dry-run for scripted workers",
            env_var
        ))),
    }
}
