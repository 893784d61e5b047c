use async_trait::async_trait;
use cadence::{
    BufferedUdpMetricSink, Counted, CountedExt, Gauged, Metric, QueuingMetricSink, StatsdClient,
    Timed,
};
use std::net::UdpSocket;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::MetricsSettings;
use crate::errors::MetricsError;

/// Trait for publishing metrics with counter, gauge, timing, and histogram
/// support. Designed for minimal compatibility with cadence-style metrics.
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Increment a counter by 1
    async fn incr(&self, key: &str);

    /// Increment a counter by a specific value
    async fn count(&self, key: &str, value: u64);

    /// Increment a counter with tags
    async fn incr_with_tags(&self, key: &str, tags: &[(&str, &str)]);

    /// Record a gauge value
    async fn gauge(&self, key: &str, value: u64);

    /// Record a timing in milliseconds
    async fn time(&self, key: &str, millis: u64);

    /// Record a histogram value
    async fn histogram(&self, key: &str, value: u64);
}

/// No-op implementation for development and testing
#[derive(Debug, Clone, Default)]
pub struct NoOpMetricsPublisher;

impl NoOpMetricsPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsPublisher for NoOpMetricsPublisher {
    async fn incr(&self, _key: &str) {}
    async fn count(&self, _key: &str, _value: u64) {}
    async fn incr_with_tags(&self, _key: &str, _tags: &[(&str, &str)]) {}
    async fn gauge(&self, _key: &str, _value: u64) {}
    async fn time(&self, _key: &str, _millis: u64) {}
    async fn histogram(&self, _key: &str, _value: u64) {}
}

/// Statsd-backed metrics publisher using cadence
pub struct StatsdMetricsPublisher {
    client: StatsdClient,
    default_tags: Vec<(String, String)>,
}

impl StatsdMetricsPublisher {
    /// Create a new StatsdMetricsPublisher bound to the given local address
    pub fn new(
        host: &str,
        prefix: &str,
        bind_addr: &str,
        default_tags: Vec<(String, String)>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!(
            host = host,
            prefix = prefix,
            bind = bind_addr,
            "Creating StatsdMetricsPublisher"
        );

        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        let buffered_sink = BufferedUdpMetricSink::from(host, socket)?;
        let queuing_sink = QueuingMetricSink::builder()
            .with_error_handler(move |error| {
                error!("Failed to send metric via sink: {}", error);
            })
            .build(buffered_sink);
        let client = StatsdClient::from_sink(prefix, queuing_sink);

        Ok(Self {
            client,
            default_tags,
        })
    }

    /// Apply default tags to a builder
    fn apply_default_tags<'a, M>(
        &'a self,
        mut builder: cadence::MetricBuilder<'a, 'a, M>,
    ) -> cadence::MetricBuilder<'a, 'a, M>
    where
        M: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            builder = builder.with_tag(k.as_str(), v.as_str());
        }
        builder
    }
}

#[async_trait]
impl MetricsPublisher for StatsdMetricsPublisher {
    async fn incr(&self, key: &str) {
        if self.default_tags.is_empty() {
            if let Err(e) = self.client.incr(key) {
                error!("Failed to send metric {}: {}", key, e);
            }
        } else {
            let builder = self.client.incr_with_tags(key);
            let builder = self.apply_default_tags(builder);
            let _ = builder.send();
        }
    }

    async fn count(&self, key: &str, value: u64) {
        if self.default_tags.is_empty() {
            let _ = self.client.count(key, value);
        } else {
            let builder = self.client.count_with_tags(key, value);
            let builder = self.apply_default_tags(builder);
            let _ = builder.send();
        }
    }

    async fn incr_with_tags(&self, key: &str, tags: &[(&str, &str)]) {
        let mut builder = self.client.incr_with_tags(key);
        builder = self.apply_default_tags(builder);
        for (k, v) in tags {
            builder = builder.with_tag(k, v);
        }
        let _ = builder.send();
    }

    async fn gauge(&self, key: &str, value: u64) {
        debug!("Sending metric gauge: {} = {}", key, value);
        if self.default_tags.is_empty() {
            if let Err(e) = self.client.gauge(key, value) {
                error!("Failed to send gauge {} = {}: {}", key, value, e);
            }
        } else {
            let builder = self.client.gauge_with_tags(key, value);
            let builder = self.apply_default_tags(builder);
            let _ = builder.send();
        }
    }

    async fn time(&self, key: &str, millis: u64) {
        if self.default_tags.is_empty() {
            let _ = self.client.time(key, millis);
        } else {
            let builder = self.client.time_with_tags(key, millis);
            let builder = self.apply_default_tags(builder);
            let _ = builder.send();
        }
    }

    async fn histogram(&self, key: &str, value: u64) {
        // StatsD has no native histogram type, record as timing
        self.time(key, value).await;
    }
}

/// Type alias for shared metrics publisher
pub type SharedMetricsPublisher = Arc<dyn MetricsPublisher>;

/// Create a metrics publisher based on configuration.
///
/// Returns either a no-op publisher or a StatsD publisher based on the
/// `adapter` settings value.
pub fn create_metrics_publisher(
    settings: &MetricsSettings,
) -> Result<SharedMetricsPublisher, MetricsError> {
    match settings.adapter.as_str() {
        "noop" | "" => Ok(Arc::new(NoOpMetricsPublisher::new())),
        "statsd" => {
            let host = settings.statsd_host.as_deref().ok_or_else(|| {
                MetricsError::InvalidConfig(
                    "metrics.statsd_host is required when using the statsd adapter".to_string(),
                )
            })?;

            // Parse tags from comma-separated key:value pairs
            let default_tags = if let Some(tags_str) = settings.tags.as_deref() {
                tags_str
                    .split(',')
                    .filter_map(|tag| {
                        let parts: Vec<&str> = tag.trim().split(':').collect();
                        if parts.len() == 2 {
                            Some((parts[0].to_string(), parts[1].to_string()))
                        } else {
                            error!("Invalid tag format: {}", tag);
                            None
                        }
                    })
                    .collect()
            } else {
                vec![]
            };

            let publisher = StatsdMetricsPublisher::new(
                host,
                &settings.prefix,
                &settings.statsd_bind,
                default_tags,
            )
            .map_err(|e| MetricsError::CreationFailed(e.to_string()))?;

            Ok(Arc::new(publisher))
        }
        _ => Err(MetricsError::InvalidConfig(format!(
            "Unknown metrics adapter: {}",
            settings.adapter
        ))),
    }
}
