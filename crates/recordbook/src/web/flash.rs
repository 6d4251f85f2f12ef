//! One-shot notifications carried across a redirect.
//!
//! A flash travels in a cookie whose value is `base64url(json).mac`, where the
//! MAC is a keyed BLAKE3 hash under a key derived from the configured secret.
//! Cookies that fail verification are ignored.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the cookie holding the pending flash.
pub const FLASH_COOKIE: &str = "recordbook_flash";

const KEY_CONTEXT: &str = "recordbook 2024-01-01 flash cookie signing";

/// Severity of a flash message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    /// The operation succeeded.
    Success,
    /// The operation could not be carried out.
    Error,
}

impl FlashLevel {
    /// CSS class used when rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A message shown once on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    /// Severity.
    pub level: FlashLevel,
    /// Text shown to the user.
    pub message: String,
}

impl Flash {
    /// A success notification.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    /// An error notification.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }
}

/// Signs and verifies flash cookies.
#[derive(Clone)]
pub struct FlashSigner {
    key: [u8; 32],
}

impl std::fmt::Debug for FlashSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashSigner").finish_non_exhaustive()
    }
}

impl FlashSigner {
    /// Derive a signing key from the application's secret key.
    #[must_use]
    pub fn new(secret_key: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret_key.as_bytes()),
        }
    }

    /// Encode a flash as a signed cookie value.
    ///
    /// # Errors
    ///
    /// Returns an error if the flash cannot be serialized.
    pub fn encode(&self, flash: &Flash) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(flash)?);
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());
        Ok(format!("{payload}.{}", mac.to_hex()))
    }

    /// Decode a signed cookie value, returning `None` if it was tampered with
    /// or is malformed.
    #[must_use]
    pub fn decode(&self, value: &str) -> Option<Flash> {
        let (payload, mac) = value.split_once('.')?;
        let mac = blake3::Hash::from_hex(mac).ok()?;

        // Hash equality is constant time.
        if blake3::keyed_hash(&self.key, payload.as_bytes()) != mac {
            debug!("Ignoring flash cookie with bad signature");
            return None;
        }

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// Build the `Set-Cookie` header value that stores `flash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the flash cannot be encoded.
    pub fn set_cookie(&self, flash: &Flash) -> Result<HeaderValue> {
        let value = self.encode(flash)?;
        HeaderValue::from_str(&format!(
            "{FLASH_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax"
        ))
        .map_err(|e| Error::internal(format!("invalid flash cookie: {e}")))
    }

    /// Read the pending flash from request headers, if any.
    #[must_use]
    pub fn take(&self, headers: &HeaderMap) -> Option<Flash> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == FLASH_COOKIE)
            .and_then(|(_, value)| self.decode(value))
    }
}

/// `Set-Cookie` value that removes a consumed flash.
#[must_use]
pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("recordbook_flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

/// Check whether a response header map clears the flash cookie.
#[cfg(test)]
pub(crate) fn is_cleared(headers: &HeaderMap) -> bool {
    headers
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .any(|h| h.starts_with(&format!("{FLASH_COOKIE}=;")))
}
