//! HTTP client construction and request/response helpers shared by
//! provider adapters.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::InferenceError;

/// Build a configured HTTP client from transport configuration.
///
/// A proxy URL that does not parse is a configuration error, not a request
/// to go direct.
pub fn build_http_client(transport: &TransportConfig) -> Result<Client, InferenceError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport.proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            InferenceError::InvalidConfig(format!("invalid proxy URL '{proxy_url}': {e}"))
        })?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport configuration.
pub fn add_extra_headers(mut request: RequestBuilder, transport: &TransportConfig) -> RequestBuilder {
    if let Some(headers) = &transport.extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Attach a JSON body, logging it at debug level first.
pub trait RequestBuilderExt {
    fn json_logged<T: Serialize + ?Sized>(self, body: &T) -> RequestBuilder;
}

impl RequestBuilderExt for RequestBuilder {
    fn json_logged<T: Serialize + ?Sized>(self, body: &T) -> RequestBuilder {
        if let Ok(rendered) = serde_json::to_string(body) {
            debug!(body = %rendered, "sending request body");
        }
        self.json(body)
    }
}

/// Read a response body as text, logging it at debug level.
#[async_trait]
pub trait ResponseExt: Sized {
    async fn text_logged(self) -> Result<String, reqwest::Error>;
}

#[async_trait]
impl ResponseExt for reqwest::Response {
    async fn text_logged(self) -> Result<String, reqwest::Error> {
        let body = self.text().await?;
        debug!(body = %body, "received response body");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builds_client_with_timeout() {
        let transport = TransportConfig::default().with_timeout(Duration::from_secs(30));
        assert!(build_http_client(&transport).is_ok());
    }

    #[test]
    fn builds_client_with_proxy() {
        let transport = TransportConfig::default().with_proxy("http://proxy.example.com:8080");
        assert!(build_http_client(&transport).is_ok());
    }

    #[test]
    fn invalid_proxy_url_is_a_configuration_error() {
        let transport = TransportConfig::default().with_proxy("http://[not-a-proxy");
        assert!(matches!(
            build_http_client(&transport),
            Err(InferenceError::InvalidConfig(_))
        ));
    }
}
