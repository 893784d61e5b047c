//! The action router: a bounded-queue worker that turns matcher decisions
//! and account reports into moderation API calls.
//!
//! Producers (the embed workers and redirect follower) block when the queue
//! is full. Each queued decision maps onto exactly one call per match —
//! report, label, acknowledge, tag, or comment — chosen by the decision
//! content. Emission failures are logged with their context and the unit of
//! work is dropped; nothing is retried here beyond the transport's own
//! read-EOF policy.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::atproto::client::{
    AcknowledgeEventComment, Client, CommentEventComment, ReportReason, TagEventComment,
};
use crate::matcher::{MatchResult, RuleAction};
use crate::metrics::SharedMetricsPublisher;
use crate::queue_adapter::{MpscQueueAdapter, QueueAdapter};

/// Descriptor carried in report reasons and event comments so moderators
/// can tell which automation filed them.
pub const PROJECT_DESCRIPTOR: &str = "palisade";

/// Structured reason attached to account-level reports.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "descriptor", rename_all = "snake_case")]
pub enum AutomationReason {
    /// An external link exceeded the redirect hop limit; the chain records
    /// every URL observed
    LinkRedirection { path: String, chain: Vec<String> },
    /// One or more rules matched during link processing
    RuleMatch {
        path: String,
        rules: Vec<String>,
        context: String,
    },
}

impl ReportReason for AutomationReason {
    fn name(&self) -> &'static str {
        match self {
            AutomationReason::LinkRedirection { .. } => "link_redirection",
            AutomationReason::RuleMatch { .. } => "rule_match",
        }
    }
}

/// One unit of work for the router.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Rule matches gathered for an account, keyed by record path
    Matches {
        did: String,
        matches: HashMap<String, Vec<MatchResult>>,
    },
    /// Direct account-level report
    AccountReport { did: String, reason: AutomationReason },
}

/// Producer side of the router queue.
#[derive(Clone)]
pub struct ActionRouterHandle {
    queue: Arc<MpscQueueAdapter<Decision>>,
    metrics: SharedMetricsPublisher,
}

impl ActionRouterHandle {
    /// Enqueue a decision, waiting while the queue is at capacity.
    pub async fn wait_enqueue(&self, decision: Decision) -> anyhow::Result<()> {
        self.queue.push(decision).await?;
        if let Some(depth) = self.queue.depth().await {
            self.metrics.gauge("action_router.backlog", depth as u64).await;
        }
        Ok(())
    }
}

/// Worker that drains the decision queue into the client facade.
pub struct ActionRouter {
    queue: Arc<MpscQueueAdapter<Decision>>,
    client: Arc<Client>,
    metrics: SharedMetricsPublisher,
}

impl ActionRouter {
    pub fn new(queue_limit: usize, client: Arc<Client>, metrics: SharedMetricsPublisher) -> Self {
        Self {
            queue: Arc::new(MpscQueueAdapter::new(queue_limit)),
            client,
            metrics,
        }
    }

    pub fn handle(&self) -> ActionRouterHandle {
        ActionRouterHandle {
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Run until cancelled. FIFO across all producers.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!("action router started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                decision = self.queue.pull() => {
                    let Some(decision) = decision else { break };
                    if let Some(depth) = self.queue.depth().await {
                        self.metrics.gauge("action_router.backlog", depth as u64).await;
                    }
                    self.dispatch(decision).await;
                }
            }
        }
        info!("action router stopped");
    }

    async fn dispatch(&self, decision: Decision) {
        match decision {
            Decision::AccountReport { did, reason } => {
                if let Err(err) = self.client.send_report(&did, &reason).await {
                    error!(did, reason = reason.name(), error = ?err, "report emission failed");
                }
            }
            Decision::Matches { did, matches } => {
                for (path, results) in matches {
                    for result in results {
                        self.apply_match(&did, &path, result).await;
                    }
                }
            }
        }
    }

    async fn apply_match(&self, did: &str, path: &str, result: MatchResult) {
        let rule = result.rule.clone();
        let outcome = match result.action {
            RuleAction::Report { reason } => {
                let reason = AutomationReason::RuleMatch {
                    path: path.to_string(),
                    rules: vec![result.rule],
                    context: reason,
                };
                self.client.send_report(did, &reason).await
            }
            RuleAction::Label { labels } => self.client.label_account(did, labels).await,
            RuleAction::Acknowledge { context } => {
                let comment = AcknowledgeEventComment {
                    descriptor: PROJECT_DESCRIPTOR.to_string(),
                    context,
                    did: did.to_string(),
                    path: path.to_string(),
                };
                self.client.acknowledge_subject(did, &comment).await
            }
            RuleAction::Tag { add, remove } => {
                let comment = TagEventComment {
                    descriptor: PROJECT_DESCRIPTOR.to_string(),
                };
                self.client
                    .tag_report_subject(did, &comment, add, remove)
                    .await
            }
            RuleAction::Comment { context, reason } => {
                let comment = CommentEventComment {
                    descriptor: PROJECT_DESCRIPTOR.to_string(),
                    context,
                    reason,
                };
                self.client.add_comment_for_subject(did, &comment).await
            }
        };
        if let Err(err) = outcome {
            error!(did, path, rule, error = ?err, "moderation emission failed");
        }
    }
}
