//! The embed checker: a bounded queue and worker pool that watches embedded
//! media and links for repetition and abusive redirection.
//!
//! Four disjoint frequency maps (image CIDs, video CIDs, record URIs,
//! external URIs) live under one coarse lock. Repetition alerts fire at
//! geometric milestones so a popular item does not flood the logs. External
//! links additionally go through whitelist admission and the redirect
//! follower.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use url::Url;

use super::redirect::RedirectFollower;
use super::{Embed, EmbedInfoList};
use crate::config::EmbedSettings;
use crate::errors::EmbedError;
use crate::matcher::RuleMatcher;
use crate::metrics::SharedMetricsPublisher;
use crate::moderation::ActionRouterHandle;
use crate::queue_adapter::{MpscQueueAdapter, QueueAdapter};

/// Posts mark truncated link text with a trailing horizontal ellipsis.
const URL_TRUNCATION_SUFFIX: &str = "\u{2026}";

/// True when `count` sits exactly on a geometric milestone: factor,
/// factor², factor³, … Requires factor >= 2.
pub fn alert_needed(count: u64, factor: u64) -> bool {
    if factor < 2 || count < factor {
        return false;
    }
    let mut milestone = factor;
    while milestone < count {
        match milestone.checked_mul(factor) {
            Some(next) => milestone = next,
            None => return false,
        }
    }
    milestone == count
}

#[derive(Default)]
struct CheckedCounters {
    images: HashMap<String, u64>,
    videos: HashMap<String, u64>,
    records: HashMap<String, u64>,
    uris: HashMap<String, u64>,
}

struct Observation {
    first: bool,
    count: u64,
}

fn observe(map: &mut HashMap<String, u64>, key: &str) -> Observation {
    match map.get_mut(key) {
        Some(count) => {
            *count += 1;
            Observation {
                first: false,
                count: *count,
            }
        }
        None => {
            map.insert(key.to_string(), 1);
            Observation {
                first: true,
                count: 1,
            }
        }
    }
}

/// Worker pool watching embed repetition and link redirection.
pub struct EmbedChecker {
    queue: MpscQueueAdapter<EmbedInfoList>,
    counters: Mutex<CheckedCounters>,
    settings: EmbedSettings,
    matcher: Arc<dyn RuleMatcher>,
    router: ActionRouterHandle,
    follower: RedirectFollower,
    metrics: SharedMetricsPublisher,
}

impl EmbedChecker {
    pub fn new(
        settings: EmbedSettings,
        matcher: Arc<dyn RuleMatcher>,
        router: ActionRouterHandle,
        metrics: SharedMetricsPublisher,
    ) -> Result<Self, EmbedError> {
        let follower = RedirectFollower::new(settings.url_redirect_limit, metrics.clone())?;
        Ok(Self {
            queue: MpscQueueAdapter::new(settings.queue_limit),
            counters: Mutex::new(CheckedCounters::default()),
            settings,
            matcher,
            router,
            follower,
            metrics,
        })
    }

    pub(crate) fn matcher(&self) -> &dyn RuleMatcher {
        self.matcher.as_ref()
    }

    pub(crate) fn router(&self) -> &ActionRouterHandle {
        &self.router
    }

    /// Enqueue one post's embeds, waiting while the queue is at capacity.
    pub async fn wait_enqueue(&self, list: EmbedInfoList) -> anyhow::Result<()> {
        self.queue.push(list).await?;
        self.emit_backlog().await;
        Ok(())
    }

    async fn emit_backlog(&self) {
        if let Some(depth) = self.queue.depth().await {
            self.metrics.gauge("embed_checker.backlog", depth as u64).await;
        }
    }

    /// Start the worker pool on the tracker.
    pub fn spawn_workers(self: &Arc<Self>, tracker: &TaskTracker, token: CancellationToken) {
        for worker in 0..self.settings.number_of_threads {
            let checker = self.clone();
            let token = token.clone();
            tracker.spawn(async move { checker.run_worker(worker, token).await });
        }
    }

    async fn run_worker(self: Arc<Self>, worker: usize, token: CancellationToken) {
        info!(worker, "embed worker started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                list = self.queue.pull() => {
                    let Some(list) = list else { break };
                    self.emit_backlog().await;
                    self.process(list).await;
                }
            }
        }
        info!(worker, "embed worker stopped");
    }

    async fn process(&self, list: EmbedInfoList) {
        for embed in &list.embeds {
            match embed {
                Embed::Image { cid } => self.image_seen(&list.did, &list.path, cid).await,
                Embed::Video { cid } => self.video_seen(&list.did, &list.path, cid).await,
                Embed::Record { uri } => self.record_seen(&list.did, &list.path, uri).await,
                Embed::External { uri } => self.external_seen(&list.did, &list.path, uri).await,
            }
        }
    }

    pub async fn image_seen(&self, repo: &str, path: &str, cid: &str) {
        self.metrics.incr("embed_checker.image_checks").await;
        let seen = {
            let mut counters = self.counters.lock().await;
            observe(&mut counters.images, cid)
        };
        if !seen.first && alert_needed(seen.count, self.settings.image_factor) {
            info!(count = seen.count, cid, repo, path, "image repetition");
            self.metrics.incr("images.repetition").await;
        }
    }

    pub async fn video_seen(&self, repo: &str, path: &str, cid: &str) {
        self.metrics.incr("embed_checker.video_checks").await;
        let seen = {
            let mut counters = self.counters.lock().await;
            observe(&mut counters.videos, cid)
        };
        if !seen.first && alert_needed(seen.count, self.settings.video_factor) {
            info!(count = seen.count, cid, repo, path, "video repetition");
            self.metrics.incr("videos.repetition").await;
        }
    }

    pub async fn record_seen(&self, repo: &str, path: &str, uri: &str) {
        self.metrics.incr("embed_checker.record_checks").await;
        let seen = {
            let mut counters = self.counters.lock().await;
            observe(&mut counters.records, uri)
        };
        if !seen.first && alert_needed(seen.count, self.settings.record_factor) {
            info!(count = seen.count, uri, repo, path, "record repetition");
            self.metrics.incr("records.repetition").await;
        }
    }

    /// Count an external URI. Returns true when it was already known.
    pub async fn uri_seen(&self, repo: &str, path: &str, uri: &str) -> bool {
        self.metrics.incr("embed_checker.link_checks").await;
        let seen = {
            let mut counters = self.counters.lock().await;
            observe(&mut counters.uris, uri)
        };
        if !seen.first {
            if alert_needed(seen.count, self.settings.link_factor) {
                info!(count = seen.count, uri, repo, path, "link repetition");
                self.metrics.incr("links.repetition").await;
            }
            return true;
        }
        false
    }

    /// Admission check for external URIs: strip the truncation suffix,
    /// require a well-formed URL, trim the configured host prefix, and skip
    /// whitelisted hosts. Malformed URIs are logged, counted, and dropped.
    pub async fn should_process_uri(&self, uri: &str) -> bool {
        let target = uri.strip_suffix(URL_TRUNCATION_SUFFIX).unwrap_or(uri);
        let parsed = match Url::parse(target) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(uri, error = %err, "skipping malformed URI");
                self.metrics.incr("links.malformed").await;
                return false;
            }
        };
        let Some(host) = parsed.host_str() else {
            warn!(uri, "skipping URI without host");
            self.metrics.incr("links.malformed").await;
            return false;
        };
        let host = host
            .strip_prefix(self.settings.uri_host_prefix.as_str())
            .unwrap_or(host);
        if self.settings.whitelist_uris.contains(host) {
            self.metrics.incr("links.whitelist_skipped").await;
            return false;
        }
        true
    }

    /// Handle one external link embed: admission, then the redirect chain.
    pub async fn external_seen(&self, repo: &str, path: &str, uri: &str) {
        if self.uri_seen(repo, path, uri).await || !self.should_process_uri(uri).await {
            return;
        }
        self.follower.follow(self, repo, path, uri).await;
    }

    /// Current count for an external URI, if it has been observed.
    pub async fn checked_uri_count(&self, uri: &str) -> Option<u64> {
        let counters = self.counters.lock().await;
        counters.uris.get(uri).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atproto::client::Client;
    use crate::config::ClientSettings;
    use crate::matcher::SubstringMatcher;
    use crate::metrics::NoOpMetricsPublisher;
    use crate::moderation::ActionRouter;
    use std::collections::HashSet;

    #[test]
    fn alert_cadence_factor_four() {
        // counts 1..=17 with factor 4 alert at 4 and 16 only
        let fired: Vec<u64> = (1..=17).filter(|&count| alert_needed(count, 4)).collect();
        assert_eq!(fired, vec![4, 16]);
    }

    #[test]
    fn alert_cadence_matches_log_count() {
        for factor in [2u64, 3, 10] {
            for limit in [10u64, 100, 1000] {
                let fired = (1..=limit).filter(|&count| alert_needed(count, factor)).count();
                let expected = {
                    let mut milestones = 0usize;
                    let mut milestone = factor;
                    while milestone <= limit {
                        milestones += 1;
                        match milestone.checked_mul(factor) {
                            Some(next) => milestone = next,
                            None => break,
                        }
                    }
                    milestones
                };
                assert_eq!(fired, expected, "factor {factor} limit {limit}");
            }
        }
    }

    #[test]
    fn alert_never_fires_below_factor() {
        assert!(!alert_needed(1, 4));
        assert!(!alert_needed(3, 4));
        assert!(!alert_needed(0, 2));
    }

    #[test]
    fn observe_counts_monotonically() {
        let mut map = HashMap::new();
        let first = observe(&mut map, "cid-1");
        assert!(first.first);
        assert_eq!(first.count, 1);

        let mut last = 1;
        for _ in 0..10 {
            let seen = observe(&mut map, "cid-1");
            assert!(!seen.first);
            assert!(seen.count > last);
            last = seen.count;
        }
        assert_eq!(last, 11);
    }

    fn test_checker(whitelist: &[&str]) -> EmbedChecker {
        let settings = EmbedSettings {
            whitelist_uris: whitelist.iter().map(|h| h.to_string()).collect::<HashSet<_>>(),
            image_factor: 4,
            video_factor: 4,
            record_factor: 4,
            link_factor: 4,
            ..EmbedSettings::default()
        };
        let metrics: SharedMetricsPublisher = std::sync::Arc::new(NoOpMetricsPublisher::new());
        let client = Arc::new(Client::new(
            ClientSettings {
                host: "pds.invalid".to_string(),
                port: 443,
                handle: String::new(),
                password: String::new(),
                did: String::new(),
                service_did: String::new(),
                dry_run: true,
                use_token: false,
            },
            metrics.clone(),
        ));
        let router = ActionRouter::new(4, client, metrics.clone());
        EmbedChecker::new(
            settings,
            Arc::new(SubstringMatcher::new(Vec::new())),
            router.handle(),
            metrics,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn whitelisted_host_is_skipped_after_prefix_strip() {
        let checker = test_checker(&["example.com"]);
        assert!(!checker.should_process_uri("https://www.example.com/x").await);
        assert!(!checker.should_process_uri("https://example.com/x").await);
        assert!(checker.should_process_uri("https://other.example.org/x").await);
    }

    #[tokio::test]
    async fn truncation_suffix_is_stripped_before_parsing() {
        let checker = test_checker(&["example.com"]);
        assert!(!checker.should_process_uri("https://example.com/page\u{2026}").await);
        assert!(checker.should_process_uri("https://kept.example.org/page\u{2026}").await);
    }

    #[tokio::test]
    async fn malformed_uri_is_dropped() {
        let checker = test_checker(&[]);
        assert!(!checker.should_process_uri("not a url at all").await);
        assert!(!checker.should_process_uri("data:text/plain,hello").await);
    }

    #[tokio::test]
    async fn image_counts_accumulate() {
        let checker = test_checker(&[]);
        for _ in 0..5 {
            checker.image_seen("did:plc:a", "app.bsky.feed.post/1", "cid-1").await;
        }
        checker.image_seen("did:plc:a", "app.bsky.feed.post/1", "cid-2").await;

        let counters = checker.counters.lock().await;
        assert_eq!(counters.images.get("cid-1"), Some(&5));
        assert_eq!(counters.images.get("cid-2"), Some(&1));
    }

    #[tokio::test]
    async fn uri_seen_reports_repeats() {
        let checker = test_checker(&[]);
        assert!(!checker.uri_seen("did:plc:a", "p", "https://a.test/").await);
        assert!(checker.uri_seen("did:plc:a", "p", "https://a.test/").await);
        assert_eq!(checker.checked_uri_count("https://a.test/").await, Some(2));
    }
}
