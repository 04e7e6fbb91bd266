//! Handler configuration.
//!
//! # Design
//! `HandlerConfig` deserializes with serde; every field has a default, so an
//! empty JSON object yields the stock configuration. Durations travel as
//! milliseconds. Values the native layer cannot represent are rejected by
//! [`HandlerConfig::validate`], never truncated.
//!
//! The TLS policy fields are carried for callers and TLS hook
//! implementations; the native configuration layout has no slot for them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HttpError;

/// How a client certificate is chosen during the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientCertificateOption {
    #[default]
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslProtocol {
    Tls12,
    Tls13,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub use_cookies: bool,
    pub use_proxy: bool,
    /// Fixed proxy used when no resolver is supplied.
    pub proxy: Option<Url>,
    /// Hosts that bypass `proxy`, comma separated.
    pub proxy_bypass: Option<String>,
    #[serde(with = "millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "millis", rename = "read_timeout_ms")]
    pub read_timeout: Duration,
    pub allow_auto_redirect: bool,
    pub max_automatic_redirections: i32,
    /// In KiB.
    pub max_response_headers_length: i32,
    pub client_certificate_options: ClientCertificateOption,
    pub check_certificate_revocation_list: bool,
    pub ssl_protocols: Vec<SslProtocol>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            use_cookies: true,
            use_proxy: true,
            proxy: None,
            proxy_bypass: None,
            connect_timeout: Duration::from_secs(24 * 60 * 60),
            read_timeout: Duration::from_secs(24 * 60 * 60),
            allow_auto_redirect: false,
            max_automatic_redirections: 50,
            max_response_headers_length: 64,
            client_certificate_options: ClientCertificateOption::Manual,
            check_certificate_revocation_list: false,
            ssl_protocols: vec![SslProtocol::Tls12, SslProtocol::Tls13],
        }
    }
}

impl HandlerConfig {
    pub fn from_json(json: &str) -> Result<Self, HttpError> {
        let config: HandlerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HttpError> {
        if self.max_automatic_redirections < 0 {
            return Err(HttpError::Argument(format!(
                "max_automatic_redirections must not be negative, got {}",
                self.max_automatic_redirections
            )));
        }
        if self.max_response_headers_length <= 0 {
            return Err(HttpError::Argument(format!(
                "max_response_headers_length must be positive, got {}",
                self.max_response_headers_length
            )));
        }
        timeout_millis(self.connect_timeout)?;
        timeout_millis(self.read_timeout)?;
        Ok(())
    }

    pub fn set_max_automatic_redirections(&mut self, value: i32) -> Result<(), HttpError> {
        if value < 0 {
            return Err(HttpError::Argument(format!(
                "max_automatic_redirections must not be negative, got {value}"
            )));
        }
        self.max_automatic_redirections = value;
        Ok(())
    }
}

/// A timeout in whole milliseconds as the native layer expects it.
pub fn timeout_millis(timeout: Duration) -> Result<i32, HttpError> {
    i32::try_from(timeout.as_millis()).map_err(|_| {
        HttpError::Argument(format!(
            "timeout of {} ms exceeds {} ms",
            timeout.as_millis(),
            i32::MAX
        ))
    })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
