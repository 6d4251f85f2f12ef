//! Cross-site request forgery protection for the record forms.
//!
//! A random nonce lives in an `HttpOnly` cookie and every rendered form
//! carries `issued.mac` in a hidden [`CSRF_FIELD`], where the MAC is a keyed
//! BLAKE3 hash of the nonce and the issue time. A submission passes only when
//! its token was signed for the nonce in the cookie sent with it and is no
//! older than [`TOKEN_TTL_SECS`].

use std::fmt;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Name of the cookie holding the client's nonce.
pub const CSRF_COOKIE: &str = "recordbook_csrf";

/// Name of the hidden form field carrying the token.
pub const CSRF_FIELD: &str = "csrf_token";

/// How long a rendered form stays valid, in seconds.
pub const TOKEN_TTL_SECS: i64 = 3600;

const KEY_CONTEXT: &str = "recordbook 2024-01-01 csrf token signing";

/// Why a submission's token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// The form carried no token.
    MissingToken,
    /// The request carried no nonce cookie.
    MissingCookie,
    /// The token is malformed or was not signed for this nonce.
    Invalid,
    /// The token is older than [`TOKEN_TTL_SECS`].
    Expired,
}

impl CsrfFailure {
    /// Message shown next to the form.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingToken => "The CSRF token is missing.",
            Self::MissingCookie => "The CSRF session token is missing.",
            Self::Invalid => "The CSRF token is invalid.",
            Self::Expired => "The CSRF token has expired.",
        }
    }
}

impl fmt::Display for CsrfFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A token to embed in a form.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Value of the hidden field.
    pub token: String,
    /// `Set-Cookie` value, present when a new nonce was minted for this client.
    pub cookie: Option<HeaderValue>,
}

/// Issues and checks form tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    key: [u8; 32],
}

impl fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfGuard").finish_non_exhaustive()
    }
}

impl CsrfGuard {
    /// Derive a signing key from the application's secret key.
    #[must_use]
    pub fn new(secret_key: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret_key.as_bytes()),
        }
    }

    /// Issue a token for the client that sent `headers`.
    ///
    /// Reuses the client's nonce cookie when it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the nonce cookie header cannot be built.
    pub fn issue(&self, headers: &HeaderMap) -> Result<IssuedToken> {
        let now = Utc::now().timestamp();

        if let Some(nonce) = nonce_from(headers) {
            return Ok(IssuedToken {
                token: self.sign(&nonce, now),
                cookie: None,
            });
        }

        let nonce = Uuid::new_v4().simple().to_string();
        let cookie = HeaderValue::from_str(&format!(
            "{CSRF_COOKIE}={nonce}; Path=/; HttpOnly; SameSite=Lax"
        ))
        .map_err(|e| Error::internal(format!("invalid csrf cookie: {e}")))?;

        Ok(IssuedToken {
            token: self.sign(&nonce, now),
            cookie: Some(cookie),
        })
    }

    /// Check a submitted token against the request's nonce cookie.
    ///
    /// # Errors
    ///
    /// Returns the reason the token was refused.
    pub fn verify(
        &self,
        headers: &HeaderMap,
        token: &str,
    ) -> std::result::Result<(), CsrfFailure> {
        self.verify_at(headers, token, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        headers: &HeaderMap,
        token: &str,
        now: i64,
    ) -> std::result::Result<(), CsrfFailure> {
        if token.is_empty() {
            return Err(CsrfFailure::MissingToken);
        }
        let nonce = nonce_from(headers).ok_or(CsrfFailure::MissingCookie)?;

        let (issued, mac) = token.split_once('.').ok_or(CsrfFailure::Invalid)?;
        let issued: i64 = issued.parse().map_err(|_| CsrfFailure::Invalid)?;
        let mac = blake3::Hash::from_hex(mac).map_err(|_| CsrfFailure::Invalid)?;

        // Hash equality is constant time.
        if self.mac(&nonce, issued) != mac {
            debug!("CSRF token does not match nonce cookie");
            return Err(CsrfFailure::Invalid);
        }

        if now - issued > TOKEN_TTL_SECS {
            return Err(CsrfFailure::Expired);
        }

        Ok(())
    }

    fn sign(&self, nonce: &str, issued: i64) -> String {
        format!("{issued}.{}", self.mac(nonce, issued).to_hex())
    }

    fn mac(&self, nonce: &str, issued: i64) -> blake3::Hash {
        blake3::keyed_hash(&self.key, format!("{nonce}:{issued}").as_bytes())
    }
}

/// The client's nonce, if its cookie holds a well-formed one.
fn nonce_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CSRF_COOKIE)
        .and_then(|(_, value)| Uuid::try_parse(value).ok())
        .map(|nonce| nonce.simple().to_string())
}
