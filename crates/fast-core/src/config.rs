//! API key resolution and environment switches.

use crate::paths::FastPaths;
use crate::{CoreError, Result};
use secrecy::SecretString;
use std::path::Path;
use tracing::debug;

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Set to `true` to replace the generation provider with an offline echo
pub const MOCK_ENV: &str = "MOCK_FLOW";

/// Whether `MOCK_FLOW=true`
pub fn mock_enabled() -> bool {
    std::env::var(MOCK_ENV).is_ok_and(|v| v == "true")
}

/// API key from `GEMINI_API_KEY`, else from the key file.
pub fn resolve_api_key(paths: &FastPaths) -> Result<SecretString> {
    api_key_from(std::env::var(API_KEY_ENV).ok(), &paths.key_file)
}

/// API key from an explicit environment value, else from `key_file`.
///
/// Blank values count as missing. The file content is trimmed.
pub fn api_key_from(env_value: Option<String>, key_file: &Path) -> Result<SecretString> {
    if let Some(key) = env_value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        debug!("Using API key from environment");
        return Ok(SecretString::from(key));
    }

    match std::fs::read_to_string(key_file) {
        Ok(content) if !content.trim().is_empty() => {
            debug!(file = %key_file.display(), "Using API key from key file");
            Ok(SecretString::from(content.trim().to_string()))
        }
        _ => Err(CoreError::MissingApiKey {
            env: API_KEY_ENV,
            file: key_file.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_environment_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join(".fast_key");
        std::fs::write(&file, "from-file").expect("write");

        let key = api_key_from(Some("from-env".into()), &file).expect("key");
        assert_eq!(key.expose_secret(), "from-env");
    }

    #[test]
    fn test_key_file_is_trimmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join(".fast_key");
        std::fs::write(&file, "  abc123\n").expect("write");

        let key = api_key_from(Some("   ".into()), &file).expect("key");
        assert_eq!(key.expose_secret(), "abc123");
    }

    #[test]
    fn test_missing_key_names_both_locations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join(".fast_key");
        let err = api_key_from(None, &file).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(API_KEY_ENV));
        assert!(message.contains(".fast_key"));
    }
}
