//! Shared AT Protocol vocabulary: XRPC endpoints, lexicon type strings, and
//! the wire types used by more than one component.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod session;
pub mod xrpc;

// XRPC endpoints, relative to the transport base URL
pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
pub const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";
pub const CREATE_RECORD: &str = "com.atproto.repo.createRecord";
pub const GET_RECORD: &str = "com.atproto.repo.getRecord";
pub const PUT_RECORD: &str = "com.atproto.repo.putRecord";
pub const CREATE_REPORT: &str = "com.atproto.moderation.createReport";
pub const EMIT_EVENT: &str = "tools.ozone.moderation.emitEvent";
pub const GET_PROFILE: &str = "app.bsky.actor.getProfile";
pub const GET_PROFILES: &str = "app.bsky.actor.getProfiles";

// Lexicon type identifiers
pub const ADMIN_REPO_REF: &str = "com.atproto.admin.defs#repoRef";
pub const REASON_OTHER: &str = "com.atproto.moderation.defs#reasonOther";
pub const EVENT_LABEL: &str = "tools.ozone.moderation.defs#modEventLabel";
pub const EVENT_ACKNOWLEDGE: &str = "tools.ozone.moderation.defs#modEventAcknowledge";
pub const EVENT_TAG: &str = "tools.ozone.moderation.defs#modEventTag";
pub const EVENT_COMMENT: &str = "tools.ozone.moderation.defs#modEventComment";

/// Suffix appended to the service DID in the `Atproto-Proxy` header
pub const PROXY_LABELER_SUFFIX: &str = "#atproto_labeler";

/// Platform cap on actors per `getProfiles` call
pub const GET_PROFILES_MAX: usize = 25;

/// Login identity for `com.atproto.server.createSession`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub identifier: String,
    pub password: String,
}

/// Token pair returned by `createSession` and `refreshSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// The slice of `app.bsky.actor.defs#profileViewDetailed` we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileViewDetailed {
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub struct GetProfilesResponse {
    pub profiles: Vec<ProfileViewDetailed>,
}
