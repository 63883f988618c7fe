//! Credential and transport configuration shared by provider adapters.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::InferenceError;

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Transport configuration applied when building a backend HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Request timeout.
    pub timeout: Option<Duration>,

    /// HTTP proxy URL.
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests.
    pub extra_headers: Option<HashMap<String, String>>,
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Credential material supplied per request rather than in static config.
#[derive(Debug, Clone, Default)]
pub struct ProviderData {
    pub api_key: Option<SecretString>,
}

impl ProviderData {
    pub fn with_api_key(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }
}

/// Resolve a credential from static config first, then per-request provider
/// data. Fails with `MissingCredential` carrying the adapter's instructions
/// when neither is present.
pub fn resolve_api_key<'a>(
    configured: Option<&'a SecretString>,
    provider_data: Option<&'a ProviderData>,
    instructions: &str,
) -> Result<&'a SecretString, InferenceError> {
    configured
        .or_else(|| provider_data.and_then(|data| data.api_key.as_ref()))
        .ok_or_else(|| InferenceError::MissingCredential(instructions.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_debug_is_redacted() {
        let secret = SecretString::from("gsk_live_abc123");
        assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
    }

    #[test]
    fn api_key_prefers_static_config() {
        let configured = SecretString::from("from-config");
        let data = ProviderData::with_api_key("from-request");
        let resolved = resolve_api_key(Some(&configured), Some(&data), "set api_key").unwrap();
        assert_eq!(resolved.expose_secret(), "from-config");
    }

    #[test]
    fn api_key_falls_back_to_provider_data() {
        let data = ProviderData::with_api_key("from-request");
        let resolved = resolve_api_key(None, Some(&data), "set api_key").unwrap();
        assert_eq!(resolved.expose_secret(), "from-request");
    }

    #[test]
    fn missing_credential_carries_instructions() {
        let err = resolve_api_key(None, None, "pass api_key in GroqConfig").unwrap_err();
        match err {
            InferenceError::MissingCredential(message) => {
                assert!(message.contains("GroqConfig"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
