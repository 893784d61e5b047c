//! Authenticated Bluesky client: typed moderation operations over the shared
//! XRPC transport.
//!
//! The client owns the session manager and the transport and exposes the
//! operations the pipeline emits through: account labels, moderation
//! reports, acknowledge/tag/comment events, repo record CRUD, and profile
//! reads. Every write calls `check_refresh` before the wire send. In dry-run
//! mode emissions are logged and counted as successful no-ops.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

use super::session::PdsSession;
use super::xrpc::{PostOptions, XrpcTransport};
use super::{
    ADMIN_REPO_REF, CREATE_RECORD, CREATE_REPORT, EMIT_EVENT, EVENT_ACKNOWLEDGE, EVENT_COMMENT,
    EVENT_LABEL, EVENT_TAG, GET_PROFILE, GET_PROFILES, GET_PROFILES_MAX, GET_RECORD,
    LoginCredentials, ProfileViewDetailed, PUT_RECORD, REASON_OTHER,
};
use crate::config::ClientSettings;
use crate::metrics::SharedMetricsPublisher;

/// Reason payload attached to an account report. Serialized into the
/// report's `reason` string; `name` keys the automation metrics.
pub trait ReportReason: Serialize + Send + Sync {
    fn name(&self) -> &'static str;
}

/// Subject of a report or moderation event. Always an account reference;
/// content-level subjects are a noted extension point.
#[derive(Debug, Serialize)]
pub struct ReportSubject {
    #[serde(rename = "$type")]
    pub kind: String,
    pub did: String,
}

impl ReportSubject {
    pub fn account(did: &str) -> Self {
        Self {
            kind: ADMIN_REPO_REF.to_string(),
            did: did.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub reason_type: String,
    pub reason: String,
    pub subject: ReportSubject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub created_at: String,
    pub id: i64,
    pub reported_by: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEvent {
    #[serde(rename = "$type")]
    pub kind: String,
    pub create_label_vals: Vec<String>,
    /// Mandatory on the wire even when empty; must not be dropped
    pub negate_label_vals: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeEvent {
    #[serde(rename = "$type")]
    pub kind: String,
    pub comment: String,
    pub acknowledge_account_subjects: bool,
}

#[derive(Debug, Serialize)]
pub struct TagEvent {
    #[serde(rename = "$type")]
    pub kind: String,
    pub comment: String,
    /// Both lists are mandatory on the wire
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentEvent {
    #[serde(rename = "$type")]
    pub kind: String,
    pub comment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventRequest<E: Serialize> {
    pub event: E,
    pub subject: ReportSubject,
    pub created_by: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventResponse {
    pub created_at: String,
    pub id: i64,
    pub created_by: String,
}

/// Structured comment serialized into acknowledge events.
#[derive(Debug, Serialize)]
pub struct AcknowledgeEventComment {
    pub descriptor: String,
    pub context: String,
    pub did: String,
    pub path: String,
}

/// Structured comment serialized into tag events.
#[derive(Debug, Serialize)]
pub struct TagEventComment {
    pub descriptor: String,
}

/// Structured comment serialized into comment events.
#[derive(Debug, Serialize)]
pub struct CommentEventComment {
    pub descriptor: String,
    pub context: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Deserialize)]
pub struct PutRecordResponse {
    pub uri: String,
    pub cid: String,
}

/// Authenticated entry point for all remote moderation operations.
pub struct Client {
    transport: Arc<XrpcTransport>,
    session: OnceLock<Arc<PdsSession>>,
    settings: ClientSettings,
    metrics: SharedMetricsPublisher,
    ready: AtomicBool,
}

impl Client {
    /// Build an unconnected client. Emissions attempted before
    /// [`Client::connect`] completes are logged and dropped.
    pub fn new(settings: ClientSettings, metrics: SharedMetricsPublisher) -> Self {
        let transport = Arc::new(XrpcTransport::new(settings.base_url()));
        Self {
            transport,
            session: OnceLock::new(),
            settings,
            metrics,
            ready: AtomicBool::new(false),
        }
    }

    /// Establish the session. A client configured without a password stays
    /// unauthenticated and never becomes ready for emissions.
    pub async fn connect(&self) -> Result<()> {
        if !self.settings.password.is_empty() {
            let session = Arc::new(PdsSession::new(
                self.transport.clone(),
                LoginCredentials {
                    identifier: self.settings.handle.clone(),
                    password: self.settings.password.clone(),
                },
            ));
            session.connect().await?;
            let _ = self.session.set(session);
            self.ready.store(true, Ordering::Release);
        } else {
            info!("no password configured, client stays unauthenticated");
        }
        Ok(())
    }

    /// Whether configuration completed and a session is established.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.session.get().is_some()
    }

    pub fn service_did(&self) -> &str {
        &self.settings.service_did
    }

    pub fn dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Gate for every emission path; logs and counts the drop.
    async fn ensure_ready(&self, operation: &str) -> bool {
        if self.is_ready() {
            return true;
        }
        error!(operation, "client not ready, emission dropped");
        self.metrics
            .incr_with_tags("automation.dropped_not_ready", &[("operation", operation)])
            .await;
        false
    }

    /// Refresh if needed and snapshot the access token for a write.
    async fn write_token(&self) -> Result<String> {
        let session = self
            .session
            .get()
            .ok_or(crate::errors::AuthError::NotConnected)?;
        session.check_refresh().await?;
        Ok(session.access_token().await?)
    }

    /// Bearer attached to reads when `use_token` is configured.
    async fn read_token(&self) -> Option<String> {
        if !self.settings.use_token {
            return None;
        }
        match self.session.get() {
            Some(session) => session.access_token().await.ok(),
            None => None,
        }
    }

    async fn emit_event<E: Serialize>(
        &self,
        request: &EmitEventRequest<E>,
    ) -> Result<EmitEventResponse> {
        let token = self.write_token().await?;
        let response: EmitEventResponse = self
            .transport
            .post_json(
                EMIT_EVENT,
                request,
                PostOptions {
                    bearer: Some(&token),
                    labeler_did: Some(&self.settings.service_did),
                    no_log_body: false,
                },
            )
            .await?;
        info!(
            id = response.id,
            created_at = %response.created_at,
            created_by = %response.created_by,
            "emit-event recorded"
        );
        Ok(response)
    }

    /// Apply labels to an account.
    pub async fn label_account(&self, did: &str, labels: Vec<String>) -> Result<()> {
        if !self.ensure_ready("label").await {
            return Ok(());
        }
        if self.settings.dry_run {
            info!(did, labels = ?labels, "dry-run label of account");
            return Ok(());
        }
        let request = EmitEventRequest {
            event: LabelEvent {
                kind: EVENT_LABEL.to_string(),
                create_label_vals: labels.clone(),
                negate_label_vals: Vec::new(),
            },
            subject: ReportSubject::account(did),
            created_by: self.settings.did.clone(),
        };
        let response = self.emit_event(&request).await?;
        info!(did, labels = ?labels, created_at = %response.created_at, "labeled account");
        Ok(())
    }

    /// Acknowledge an account subject with a structured comment. The
    /// record path travels inside the comment; content-level subjects are
    /// an extension point.
    pub async fn acknowledge_subject(
        &self,
        did: &str,
        comment: &AcknowledgeEventComment,
    ) -> Result<()> {
        if !self.ensure_ready("acknowledge").await {
            return Ok(());
        }
        let comment_text = serde_json::to_string(comment)?;
        if self.settings.dry_run {
            info!(did, comment = %comment_text, "dry-run acknowledge of subject");
            return Ok(());
        }
        if comment.context.is_empty() {
            error!(did, "acknowledge of moderation subject must have comment context");
            return Ok(());
        }
        let request = EmitEventRequest {
            event: AcknowledgeEvent {
                kind: EVENT_ACKNOWLEDGE.to_string(),
                comment: comment_text.clone(),
                acknowledge_account_subjects: false,
            },
            subject: ReportSubject::account(did),
            created_by: self.settings.did.clone(),
        };
        let response = self.emit_event(&request).await?;
        info!(did, comment = %comment_text, created_at = %response.created_at, "acknowledged subject");
        Ok(())
    }

    /// Add and remove moderation tags on an account subject.
    pub async fn tag_report_subject(
        &self,
        did: &str,
        comment: &TagEventComment,
        add_tags: Vec<String>,
        remove_tags: Vec<String>,
    ) -> Result<()> {
        if !self.ensure_ready("tag").await {
            return Ok(());
        }
        let comment_text = serde_json::to_string(comment)?;
        if self.settings.dry_run {
            info!(did, add = ?add_tags, remove = ?remove_tags, "dry-run tag of subject");
            return Ok(());
        }
        let request = EmitEventRequest {
            event: TagEvent {
                kind: EVENT_TAG.to_string(),
                comment: comment_text,
                add: add_tags.clone(),
                remove: remove_tags.clone(),
            },
            subject: ReportSubject::account(did),
            created_by: self.settings.did.clone(),
        };
        let response = self.emit_event(&request).await?;
        info!(did, add = ?add_tags, remove = ?remove_tags, created_at = %response.created_at, "tagged subject");
        Ok(())
    }

    /// Attach a free-form moderation comment to an account subject.
    pub async fn add_comment_for_subject(
        &self,
        did: &str,
        comment: &CommentEventComment,
    ) -> Result<()> {
        if !self.ensure_ready("comment").await {
            return Ok(());
        }
        let comment_text = serde_json::to_string(comment)?;
        if self.settings.dry_run {
            info!(did, comment = %comment_text, "dry-run comment on subject");
            return Ok(());
        }
        let request = EmitEventRequest {
            event: CommentEvent {
                kind: EVENT_COMMENT.to_string(),
                comment: comment_text.clone(),
            },
            subject: ReportSubject::account(did),
            created_by: self.settings.did.clone(),
        };
        let response = self.emit_event(&request).await?;
        info!(did, comment = %comment_text, created_at = %response.created_at, "commented on subject");
        Ok(())
    }

    /// File an account-level report with a structured reason.
    pub async fn send_report<R: ReportReason>(&self, did: &str, reason: &R) -> Result<()> {
        if !self.ensure_ready("report").await {
            return Ok(());
        }
        let reason_text = serde_json::to_string(reason)?;
        if self.settings.dry_run {
            info!(did, reason = %reason_text, "dry-run report of account");
            return Ok(());
        }
        let request = ReportRequest {
            reason_type: REASON_OTHER.to_string(),
            reason: reason_text.clone(),
            subject: ReportSubject::account(did),
        };
        let token = self.write_token().await?;
        let sent = self
            .transport
            .post_json::<_, ReportResponse>(
                CREATE_REPORT,
                &request,
                PostOptions {
                    bearer: Some(&token),
                    labeler_did: Some(&self.settings.service_did),
                    no_log_body: false,
                },
            )
            .await;
        match sent {
            Ok(response) => {
                info!(
                    did,
                    reason = %reason_text,
                    created_at = %response.created_at,
                    reported_by = %response.reported_by,
                    id = response.id,
                    "report recorded"
                );
                self.metrics
                    .incr_with_tags("automation.report", &[("reason", reason.name())])
                    .await;
                Ok(())
            }
            Err(err) => {
                self.metrics
                    .incr_with_tags("automation.report_error", &[("reason", reason.name())])
                    .await;
                Err(err.into())
            }
        }
    }

    /// Create a repo record; the request carries repo, collection, and the
    /// record body per the lexicon.
    pub async fn create_record<REQ: Serialize>(&self, request: &REQ) -> Result<CreateRecordResponse> {
        let token = self.write_token().await?;
        let response: CreateRecordResponse = self
            .transport
            .post_json(
                CREATE_RECORD,
                request,
                PostOptions {
                    bearer: Some(&token),
                    ..Default::default()
                },
            )
            .await?;
        info!(uri = %response.uri, "createRecord succeeded");
        Ok(response)
    }

    /// Fetch a repo record into the caller-provided shape.
    pub async fn get_record<R: DeserializeOwned>(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<R> {
        let token = self.read_token().await;
        let response = self
            .transport
            .get_json(
                GET_RECORD,
                &[
                    ("repo", repo.to_string()),
                    ("collection", collection.to_string()),
                    ("rkey", rkey.to_string()),
                ],
                token.as_deref(),
            )
            .await?;
        info!(repo, collection, rkey, "getRecord succeeded");
        Ok(response)
    }

    /// Replace a repo record; the request carries repo, collection, rkey,
    /// and the record body per the lexicon.
    pub async fn put_record<REQ: Serialize>(&self, request: &REQ) -> Result<PutRecordResponse> {
        let token = self.write_token().await?;
        let response: PutRecordResponse = self
            .transport
            .post_json(
                PUT_RECORD,
                request,
                PostOptions {
                    bearer: Some(&token),
                    ..Default::default()
                },
            )
            .await?;
        info!(uri = %response.uri, "putRecord succeeded");
        Ok(response)
    }

    /// Fetch a single profile.
    pub async fn get_profile(&self, did: &str) -> Result<ProfileViewDetailed> {
        let token = self.read_token().await;
        let profile = self
            .transport
            .get_json(
                GET_PROFILE,
                &[("actor", did.to_string())],
                token.as_deref(),
            )
            .await?;
        Ok(profile)
    }

    /// Fetch profiles in platform-sized batches.
    pub async fn get_profiles(&self, dids: &[String]) -> Result<Vec<ProfileViewDetailed>> {
        let token = self.read_token().await;
        let mut profiles = Vec::with_capacity(dids.len());
        for batch in dids.chunks(GET_PROFILES_MAX) {
            let query: Vec<(&str, String)> =
                batch.iter().map(|did| ("actors[]", did.clone())).collect();
            let response: super::GetProfilesResponse = self
                .transport
                .get_json(GET_PROFILES, &query, token.as_deref())
                .await?;
            info!(
                requested = batch.len(),
                returned = response.profiles.len(),
                "getProfiles batch"
            );
            profiles.extend(response.profiles);
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoOpMetricsPublisher;

    fn offline_settings() -> ClientSettings {
        ClientSettings {
            host: "pds.invalid".to_string(),
            port: 443,
            handle: "bot.example.com".to_string(),
            password: String::new(),
            did: "did:plc:operator".to_string(),
            service_did: "did:plc:labeler".to_string(),
            dry_run: false,
            use_token: false,
        }
    }

    #[test]
    fn label_request_serializes_empty_negations() {
        let request = EmitEventRequest {
            event: LabelEvent {
                kind: EVENT_LABEL.to_string(),
                create_label_vals: vec!["spam".to_string()],
                negate_label_vals: Vec::new(),
            },
            subject: ReportSubject::account("did:plc:subject"),
            created_by: "did:plc:operator".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["event"]["$type"],
            "tools.ozone.moderation.defs#modEventLabel"
        );
        assert_eq!(json["event"]["createLabelVals"][0], "spam");
        // the empty list must still reach the wire
        assert!(json["event"]["negateLabelVals"].as_array().unwrap().is_empty());
        assert_eq!(json["subject"]["$type"], "com.atproto.admin.defs#repoRef");
        assert_eq!(json["subject"]["did"], "did:plc:subject");
        assert_eq!(json["createdBy"], "did:plc:operator");
    }

    #[test]
    fn report_request_shape() {
        let request = ReportRequest {
            reason_type: REASON_OTHER.to_string(),
            reason: "{\"descriptor\":\"link_redirection\"}".to_string(),
            subject: ReportSubject::account("did:plc:subject"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["reasonType"], "com.atproto.moderation.defs#reasonOther");
        assert!(json["reason"].as_str().unwrap().contains("link_redirection"));
        assert_eq!(json["subject"]["did"], "did:plc:subject");
    }

    #[tokio::test]
    async fn unconnected_client_drops_emissions() {
        let client = Client::new(offline_settings(), Arc::new(NoOpMetricsPublisher::new()));
        assert!(!client.is_ready());
        // dropped, not errored: no HTTP happens against pds.invalid
        client
            .label_account("did:plc:subject", vec!["spam".to_string()])
            .await
            .unwrap();
    }
}
