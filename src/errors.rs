use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-palisade-config-1 Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error-palisade-config-2 Failed to parse settings: {source}")]
    ParseFailed {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("error-palisade-config-3 Invalid option {option}: {details}")]
    InvalidOption { option: String, details: String },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("error-palisade-auth-1 Session not established")]
    NotConnected,

    #[error("error-palisade-auth-2 Token decode failed: {details}")]
    TokenDecodeFailed { details: String },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("error-palisade-client-1 HTTP request failed: {path}: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error-palisade-client-2 {path} returned HTTP {status}: {body}")]
    Api {
        path: String,
        status: u16,
        body: String,
    },

    #[error("error-palisade-client-3 Response deserialization failed: {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error-palisade-client-4 Request serialization failed: {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// True when the remote rejected the call because the presented token
    /// could not be verified. The session manager reconnects on this.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, ClientError::Api { body, .. } if body.contains("\"error\":\"InvalidToken\""))
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("error-palisade-queue-1 MPSC queue operation failed: {operation}: {details}")]
    MpscOperationFailed { operation: String, details: String },
}

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("error-palisade-embed-1 HTTP client creation failed: {details}")]
    HttpClientFailed { details: String },
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("error-palisade-metrics-1 Failed to create metrics publisher: {0}")]
    CreationFailed(String),

    #[error("error-palisade-metrics-2 Invalid metrics configuration: {0}")]
    InvalidConfig(String),
}
