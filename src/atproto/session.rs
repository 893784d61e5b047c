//! PDS session lifecycle: login, proactive token refresh, and recovery from
//! invalid-token rejection.
//!
//! The session holds an access JWT (hours) and a refresh JWT (months) and
//! decodes the expiry instant out of each. `check_refresh` runs before every
//! write; it rotates the pair via `refreshSession` once the access token is
//! inside the expiry buffer, and falls back to a full `createSession` with
//! the stored credentials when the server reports the refresh token can no
//! longer be verified.

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::xrpc::{PostOptions, XrpcTransport};
use super::{CREATE_SESSION, LoginCredentials, REFRESH_SESSION, SessionTokens};
use crate::errors::AuthError;

/// Refresh the access token once it is this close to expiry.
pub const ACCESS_EXPIRY_BUFFER_MS: i64 = 2 * 60 * 1000;

/// The refresh token lives for months; this buffer only matters if the
/// process outlives it, at which point refresh fails and we reconnect.
pub const REFRESH_EXPIRY_BUFFER_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone)]
struct SessionState {
    tokens: SessionTokens,
    access_expiry: DateTime<Utc>,
    refresh_expiry: DateTime<Utc>,
}

/// Self-managed bearer session against a PDS.
///
/// The session borrows the shared [`XrpcTransport`]; the client facade owns
/// both, so neither half holds the other.
pub struct PdsSession {
    transport: Arc<XrpcTransport>,
    credentials: LoginCredentials,
    state: RwLock<Option<SessionState>>,
    /// Serializes refreshes; writers double-check after acquisition
    refresh_lock: Mutex<()>,
    access_buffer: Duration,
}

impl PdsSession {
    pub fn new(transport: Arc<XrpcTransport>, credentials: LoginCredentials) -> Self {
        Self::with_access_buffer(
            transport,
            credentials,
            Duration::milliseconds(ACCESS_EXPIRY_BUFFER_MS),
        )
    }

    /// Construct with a custom proactive-refresh window.
    pub fn with_access_buffer(
        transport: Arc<XrpcTransport>,
        credentials: LoginCredentials,
        access_buffer: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            access_buffer,
        }
    }

    /// Establish the session with the stored credentials.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.internal_connect().await
    }

    async fn internal_connect(&self) -> Result<()> {
        let tokens: SessionTokens = self
            .transport
            .post_json(
                CREATE_SESSION,
                &self.credentials,
                PostOptions {
                    no_log_body: true,
                    ..Default::default()
                },
            )
            .await?;
        self.adopt_tokens(tokens).await
    }

    async fn adopt_tokens(&self, tokens: SessionTokens) -> Result<()> {
        let access_expiry = jwt_expiry(&tokens.access_jwt)?;
        let refresh_expiry = jwt_expiry(&tokens.refresh_jwt)?;
        info!(%access_expiry, "session access token expires");
        info!(%refresh_expiry, "session refresh token expires");

        let mut state = self.state.write().await;
        *state = Some(SessionState {
            tokens,
            access_expiry,
            refresh_expiry,
        });
        Ok(())
    }

    /// Called before every write. Refreshes when the access token has
    /// expired or is inside the expiry buffer; reconnects from scratch when
    /// the server rejects the refresh token as unverifiable.
    pub async fn check_refresh(&self) -> Result<()> {
        if !self.needs_refresh().await? {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        // Another writer may have refreshed while we waited for the lock
        if !self.needs_refresh().await? {
            return Ok(());
        }

        let (time_to_expiry, refresh_expiry) = {
            let state = self.state.read().await;
            let state = state.as_ref().ok_or(AuthError::NotConnected)?;
            (
                (state.access_expiry - Utc::now()).num_milliseconds(),
                state.refresh_expiry,
            )
        };
        info!(time_to_expiry_ms = time_to_expiry, "refreshing access token");
        if refresh_expiry - Utc::now() < Duration::milliseconds(REFRESH_EXPIRY_BUFFER_MS) {
            warn!(%refresh_expiry, "refresh token is close to expiry");
        }

        let refresh_jwt = self.refresh_token().await?;

        let refreshed = self
            .transport
            .post_empty::<SessionTokens>(
                REFRESH_SESSION,
                PostOptions {
                    bearer: Some(&refresh_jwt),
                    no_log_body: true,
                    ..Default::default()
                },
            )
            .await;
        match refreshed {
            Ok(tokens) => self.adopt_tokens(tokens).await,
            Err(err) if err.is_invalid_token() => {
                warn!("session token refresh rejected, reconnecting");
                self.internal_connect().await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn needs_refresh(&self) -> Result<bool, AuthError> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(AuthError::NotConnected)?;
        let now = Utc::now();
        Ok(state.access_expiry < now || state.access_expiry - now < self.access_buffer)
    }

    /// Snapshot of the current access token.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.tokens.access_jwt.clone())
            .ok_or(AuthError::NotConnected)
    }

    /// Snapshot of the current refresh token; only the refresh call uses it.
    pub async fn refresh_token(&self) -> Result<String, AuthError> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.tokens.refresh_jwt.clone())
            .ok_or(AuthError::NotConnected)
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Pull the expiry instant out of a JWT without verifying the signature.
/// The tokens come straight from the PDS over TLS; we only need the clock.
fn jwt_expiry(token: &str) -> Result<DateTime<Utc>, AuthError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::TokenDecodeFailed {
            details: "token is not a three-part JWT".to_string(),
        })?;
    let bytes =
        URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| AuthError::TokenDecodeFailed {
                details: format!("payload base64: {err}"),
            })?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|err| AuthError::TokenDecodeFailed {
            details: format!("payload json: {err}"),
        })?;
    DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| AuthError::TokenDecodeFailed {
        details: format!("exp out of range: {}", claims.exp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::json!({ "exp": exp }).to_string().as_bytes());
        format!("{header}.{payload}.untrusted-signature")
    }

    #[test]
    fn decodes_expiry_from_payload() {
        let exp = Utc::now().timestamp() + 7200;
        let token = make_jwt(exp);
        let expiry = jwt_expiry(&token).expect("well-formed token decodes");
        assert_eq!(expiry.timestamp(), exp);
    }

    #[test]
    fn rejects_token_without_payload() {
        let err = jwt_expiry("not-a-jwt").unwrap_err();
        assert!(matches!(err, AuthError::TokenDecodeFailed { .. }));
    }

    #[test]
    fn rejects_payload_without_exp() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"did:plc:x"}"#);
        let err = jwt_expiry(&format!("{header}.{payload}.sig")).unwrap_err();
        assert!(matches!(err, AuthError::TokenDecodeFailed { .. }));
    }
}
