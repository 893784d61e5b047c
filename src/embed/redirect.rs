//! Redirect follower for external link embeds.
//!
//! Link shorteners and ad chains hide their destination behind several
//! hops, so each hop is fetched and judged individually: the chain is
//! recorded, every next URL goes through the same counter/whitelist
//! admission as a top-level link, and each hop is offered to the rule
//! matcher. A chain that exceeds the hop limit is itself a signal and
//! produces an account-level report carrying the observed chain.
//!
//! The follower drives its own client with redirects disabled and a
//! short-lived connection pool: endpoints here are promiscuous — many
//! distinct hosts, rarely revisited. The initial GET masquerades as a
//! mainstream browser the way the web app's link cards are fetched.

use reqwest::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, LOCATION, USER_AGENT};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use super::checker::EmbedChecker;
use crate::atproto::xrpc::{MAX_EOF_RETRIES, chain_mentions_eof};
use crate::errors::EmbedError;
use crate::matcher::Candidate;
use crate::metrics::SharedMetricsPublisher;
use crate::moderation::{AutomationReason, Decision};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// How a redirect chain ended. Each variant is counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Chain terminated naturally within the hop limit
    Completed,
    /// Hop limit exceeded; one account report was enqueued
    Overflow,
    /// Any other failure; logged, no action
    Error,
}

/// Per-external-URL redirect chaser.
pub struct RedirectFollower {
    http: reqwest::Client,
    limit: usize,
    metrics: SharedMetricsPublisher,
}

impl RedirectFollower {
    pub fn new(limit: usize, metrics: SharedMetricsPublisher) -> Result<Self, EmbedError> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .pool_idle_timeout(Duration::from_secs(4))
            .pool_max_idle_per_host(1)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| EmbedError::HttpClientFailed {
                details: err.to_string(),
            })?;
        Ok(Self {
            http,
            limit,
            metrics,
        })
    }

    /// Chase the chain rooted at `root` and record the outcome.
    pub async fn follow(
        &self,
        checker: &EmbedChecker,
        repo: &str,
        path: &str,
        root: &str,
    ) -> RedirectOutcome {
        info!(url = root, "redirect check starting");
        let mut chain = vec![root.to_string()];
        let outcome = self.follow_chain(checker, repo, path, root, &mut chain).await;
        match outcome {
            RedirectOutcome::Completed => self.metrics.incr("link.redirect_ok").await,
            RedirectOutcome::Overflow => self.metrics.incr("link.redirect_limit_exceeded").await,
            RedirectOutcome::Error => self.metrics.incr("link.redirect_error").await,
        }
        self.metrics
            .histogram("link.redirection.hops", chain.len() as u64)
            .await;
        info!(hops = chain.len(), chain = ?chain, "redirect check complete");
        outcome
    }

    async fn follow_chain(
        &self,
        checker: &EmbedChecker,
        repo: &str,
        path: &str,
        root: &str,
        chain: &mut Vec<String>,
    ) -> RedirectOutcome {
        let mut current = match Url::parse(root) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = root, error = %err, "redirect root failed to parse");
                return RedirectOutcome::Error;
            }
        };
        loop {
            let response = match self.fetch(current.as_str()).await {
                Ok(response) => response,
                Err(err) => {
                    error!(url = %current, error = %err, "redirect check failed");
                    return RedirectOutcome::Error;
                }
            };
            let status = response.status();
            if !status.is_redirection() {
                return RedirectOutcome::Completed;
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok());
            let Some(location) = location else {
                warn!(url = %current, code = status.as_u16(), "redirect without Location header");
                return RedirectOutcome::Error;
            };
            let next = match current.join(location) {
                Ok(url) => url,
                Err(err) => {
                    warn!(location, error = %err, "malformed redirect target");
                    return RedirectOutcome::Error;
                }
            };
            info!(code = status.as_u16(), url = %next, "redirect");
            chain.push(next.to_string());

            if chain.len() - 1 > self.limit {
                error!(url = root, limit = self.limit, "redirect limit exceeded");
                let report = Decision::AccountReport {
                    did: repo.to_string(),
                    reason: AutomationReason::LinkRedirection {
                        path: path.to_string(),
                        chain: chain.clone(),
                    },
                };
                if let Err(err) = checker.router().wait_enqueue(report).await {
                    error!(error = ?err, "failed to enqueue redirect overflow report");
                }
                return RedirectOutcome::Overflow;
            }

            // Already counted, whitelisted, or unparseable: stop following
            if checker.uri_seen(repo, path, next.as_str()).await
                || !checker.should_process_uri(next.as_str()).await
            {
                return RedirectOutcome::Completed;
            }

            self.metrics.incr("link.redirections").await;
            let candidates = [Candidate {
                subject: root.to_string(),
                field: "redirected_url".to_string(),
                value: next.to_string(),
            }];
            let results = checker.matcher().all_matches_for_candidates(&candidates);
            if !results.is_empty() {
                self.metrics.incr("link.redirect_matched_rule").await;
                info!(url = %next, "redirect matched rules");
                let decision = Decision::Matches {
                    did: repo.to_string(),
                    matches: HashMap::from([(path.to_string(), results)]),
                };
                if let Err(err) = checker.router().wait_enqueue(decision).await {
                    error!(error = ?err, "failed to enqueue redirect match decision");
                }
            }
            current = next;
        }
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .get(url)
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(ACCEPT, BROWSER_ACCEPT)
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .header(ACCEPT_ENCODING, "gzip, deflate")
                .header("Referrer-Policy", "strict-origin-when-cross-origin")
                .send()
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) if chain_mentions_eof(&err) && attempt + 1 < MAX_EOF_RETRIES => {
                    attempt += 1;
                    warn!(url, attempt, "read EOF on redirect check, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
