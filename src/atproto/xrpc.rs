//! The REST executor: one request policy applied uniformly to every XRPC
//! call.
//!
//! Every request goes through the same path here — bearer selection, the
//! labeler routing headers, JSON (de)serialization, and a bounded retry loop
//! for transient read-EOF faults. HTTP application errors (4xx/5xx) are
//! fatal for the call and keep their response body, which the session
//! manager inspects for the invalid-token marker.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::PROXY_LABELER_SUFFIX;
use crate::errors::ClientError;

/// Transient read-EOF faults are retried this many times per call before
/// surfacing.
pub const MAX_EOF_RETRIES: usize = 5;

/// Per-request knobs for [`XrpcTransport::post_json`].
#[derive(Debug, Default)]
pub struct PostOptions<'a> {
    /// Bearer token to attach; callers pick access or refresh
    pub bearer: Option<&'a str>,
    /// When set, adds `Atproto-Accept-Labelers` and `Atproto-Proxy` routing
    /// to this labeler
    pub labeler_did: Option<&'a str>,
    /// Suppress request/response bodies in logs (credential-bearing calls)
    pub no_log_body: bool,
}

/// Shared HTTP handle for XRPC calls.
///
/// Both the session manager and the client facade post through this handle;
/// neither owns the other.
pub struct XrpcTransport {
    http: reqwest::Client,
    base_url: String,
}

impl XrpcTransport {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and deserialize the JSON response.
    pub async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        options: PostOptions<'_>,
    ) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body_text =
            serde_json::to_string(body).map_err(|source| ClientError::Serialize {
                path: path.to_string(),
                source,
            })?;
        self.post_body(path, Some(body_text), options).await
    }

    /// POST with an empty body; used by `refreshSession`, where the bearer
    /// token carries everything.
    pub async fn post_empty<R>(&self, path: &str, options: PostOptions<'_>) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        self.post_body(path, None, options).await
    }

    async fn post_body<R>(
        &self,
        path: &str,
        body_text: Option<String>,
        options: PostOptions<'_>,
    ) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        if options.no_log_body {
            info!(path, "POST, body hidden");
        } else {
            info!(path, body = body_text.as_deref().unwrap_or(""), "POST");
        }

        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            let mut request = self.http.post(&url);
            if let Some(text) = &body_text {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(text.clone());
            }
            if let Some(did) = options.labeler_did {
                request = request
                    .header("Atproto-Accept-Labelers", did)
                    .header("Atproto-Proxy", format!("{did}{PROXY_LABELER_SUFFIX}"));
            }
            if let Some(token) = options.bearer {
                request = request.bearer_auth(token);
            }

            match execute(path, request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) && attempt + 1 < MAX_EOF_RETRIES => {
                    attempt += 1;
                    warn!(path, attempt, "read EOF on POST, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET with query arguments and deserialize the JSON response.
    pub async fn get_json<R>(
        &self,
        path: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            let mut request = self
                .http
                .get(&url)
                .header(ACCEPT, "application/json")
                .query(query);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match execute(path, request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) && attempt + 1 < MAX_EOF_RETRIES => {
                    attempt += 1;
                    warn!(path, attempt, "read EOF on GET, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn execute<R>(path: &str, request: reqwest::RequestBuilder) -> Result<R, ClientError>
where
    R: DeserializeOwned,
{
    let response = request.send().await.map_err(|source| ClientError::Http {
        path: path.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response.json::<R>().await.map_err(|source| ClientError::Json {
        path: path.to_string(),
        source,
    })
}

/// Connection-reset style faults worth one more attempt. Anything else —
/// including HTTP application errors — is fatal for the call.
fn is_transient(err: &ClientError) -> bool {
    match err {
        // A decode failure only qualifies when the connection died mid-body,
        // never when the payload shape is wrong
        ClientError::Http { source, .. } | ClientError::Json { source, .. } => {
            chain_mentions_eof(source)
        }
        _ => false,
    }
}

/// Shared with the redirect follower, which drives its own reqwest client.
pub(crate) fn chain_mentions_eof(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if text.contains("IncompleteMessage")
            || text.contains("connection reset")
            || text.contains("unexpected end of file")
            || text.contains("unexpected EOF")
        {
            return true;
        }
        source = cause.source();
    }
    false
}
