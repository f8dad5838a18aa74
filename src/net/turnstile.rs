//! Cloudflare Turnstile challenge verification.
//!
//! The verifier POSTs the client-supplied token to the provider's
//! `siteverify` endpoint over the SSRF-safe client and reports the
//! boolean verdict. A transport failure is a distinct outcome from a
//! `success: false` verdict; the HTTP layer maps the former to 500 and
//! the latter to 403.

use std::time::Duration;

use serde::Deserialize;
use tracing::{instrument, warn};
use url::Url;

use super::safe::{safe_client, NetError};

/// Provider verification endpoint.
const VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Wall-clock bound for the entire verification call.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the challenge token on download requests.
pub const TOKEN_HEADER: &str = "x-turnstile-token";

/// Errors from challenge verification. All of these are transport-class;
/// a failed challenge is the `Ok(false)` verdict, not an error.
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    /// Request could not be sent or the response body was unreadable.
    #[error("turnstile verification transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with a non-success HTTP status.
    #[error("turnstile provider returned HTTP {0}")]
    BadStatus(u16),
}

/// Provider response shape.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
    #[serde(default)]
    hostname: Option<String>,
}

/// Challenge verifier bound to one secret key.
#[derive(Debug, Clone)]
pub struct TurnstileVerifier {
    client: reqwest::Client,
    secret: String,
    endpoint: Url,
}

impl TurnstileVerifier {
    /// Creates a verifier against the production endpoint, using the
    /// SSRF-safe outbound client.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Build`] if the HTTP client cannot be built.
    pub fn new(secret: String) -> Result<Self, NetError> {
        let endpoint = Url::parse(VERIFY_URL).unwrap_or_else(|_| unreachable!("const endpoint"));
        Ok(Self {
            client: safe_client(VERIFY_TIMEOUT)?,
            secret,
            endpoint,
        })
    }

    /// Creates a verifier with an explicit client and endpoint.
    ///
    /// Used by tests to point at a mock provider.
    #[must_use]
    pub fn with_endpoint(client: reqwest::Client, secret: String, endpoint: Url) -> Self {
        Self {
            client,
            secret,
            endpoint,
        }
    }

    /// Verifies a challenge token for the given client IP.
    ///
    /// Returns `Ok(true)` iff the provider reports `success: true`.
    ///
    /// # Errors
    ///
    /// Returns [`TurnstileError`] when the provider cannot be reached or
    /// answers with garbage; never for a mere failed challenge.
    #[instrument(skip(self, token), fields(remote_ip))]
    pub async fn verify(&self, token: &str, remote_ip: &str) -> Result<bool, TurnstileError> {
        let form = [
            ("secret", self.secret.as_str()),
            ("response", token),
            ("remoteip", remote_ip),
        ];

        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TurnstileError::BadStatus(status.as_u16()));
        }

        let verdict: VerifyResponse = response.json().await?;

        if !verdict.success {
            warn!(
                error_codes = ?verdict.error_codes,
                hostname = ?verdict.hostname,
                "turnstile verification rejected"
            );
        }

        Ok(verdict.success)
    }
}
