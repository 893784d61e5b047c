use crate::errors::ConfigError;
use crate::matcher::SubstringRule;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for the remote PDS / labeler client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Hostname of the target PDS, or a full `http(s)://` base for tests
    pub host: String,
    pub port: u16,
    /// Login identity; leave blank for an unauthenticated (read-only) client
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub password: String,
    /// Operator DID recorded as `createdBy` on emitted events
    #[serde(default)]
    pub did: String,
    /// Labeler identifier routed via the `Atproto-*` headers
    #[serde(default)]
    pub service_did: String,
    /// When true, emissions are logged only; no moderation calls are made
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Whether read requests carry the bearer token
    #[serde(default)]
    pub use_token: bool,
}

impl ClientSettings {
    /// XRPC base URL. A `host` carrying an explicit scheme is used verbatim,
    /// anything else is addressed over HTTPS.
    pub fn base_url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}/xrpc/", self.host, self.port)
        } else {
            format!("https://{}:{}/xrpc/", self.host, self.port)
        }
    }
}

/// Settings for the embed checker worker pool and its admission rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    pub number_of_threads: usize,
    pub queue_limit: usize,
    /// Maximum redirect hops followed per external URL
    pub url_redirect_limit: usize,
    /// Host prefix stripped before the whitelist check, e.g. `www.`
    pub uri_host_prefix: String,
    /// Hosts never followed or matched
    pub whitelist_uris: HashSet<String>,
    pub image_factor: u64,
    pub video_factor: u64,
    pub record_factor: u64,
    pub link_factor: u64,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            number_of_threads: 4,
            queue_limit: 5000,
            url_redirect_limit: 12,
            uri_host_prefix: "www.".to_string(),
            whitelist_uris: HashSet::new(),
            image_factor: 10,
            video_factor: 10,
            record_factor: 10,
            link_factor: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub queue_limit: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { queue_limit: 5000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountCacheSettings {
    pub max_accounts: usize,
}

impl Default for AccountCacheSettings {
    fn default() -> Self {
        Self {
            max_accounts: 500_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// `noop` or `statsd`
    pub adapter: String,
    pub statsd_host: Option<String>,
    pub prefix: String,
    pub statsd_bind: String,
    /// Comma-separated `key:value` pairs applied to every metric
    pub tags: Option<String>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            adapter: "noop".to_string(),
            statsd_host: None,
            prefix: "palisade".to_string(),
            statsd_bind: "[::]:0".to_string(),
            tags: None,
        }
    }
}

/// Top-level service settings, deserialized from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub client: ClientSettings,
    #[serde(default)]
    pub embed_checker: EmbedSettings,
    #[serde(default)]
    pub action_router: RouterSettings,
    #[serde(default)]
    pub account_cache: AccountCacheSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// Baseline substring rules for the built-in matcher. Deployments with a
    /// richer rule engine plug in their own `RuleMatcher` instead.
    #[serde(default)]
    pub rules: Vec<SubstringRule>,
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Settings =
            serde_yaml::from_str(text).map_err(|source| ConfigError::ParseFailed { source })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Startup validation; any failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.client.host.is_empty() {
            return Err(invalid("client.host", "must not be empty"));
        }
        if self.embed_checker.number_of_threads == 0 {
            return Err(invalid("embed_checker.number_of_threads", "must be >= 1"));
        }
        if self.embed_checker.queue_limit == 0 {
            return Err(invalid("embed_checker.queue_limit", "must be >= 1"));
        }
        if self.embed_checker.url_redirect_limit == 0 {
            return Err(invalid("embed_checker.url_redirect_limit", "must be >= 1"));
        }
        for (option, factor) in [
            ("embed_checker.image_factor", self.embed_checker.image_factor),
            ("embed_checker.video_factor", self.embed_checker.video_factor),
            (
                "embed_checker.record_factor",
                self.embed_checker.record_factor,
            ),
            ("embed_checker.link_factor", self.embed_checker.link_factor),
        ] {
            if factor < 2 {
                return Err(invalid(option, "alert factor must be >= 2"));
            }
        }
        if self.action_router.queue_limit == 0 {
            return Err(invalid("action_router.queue_limit", "must be >= 1"));
        }
        if self.account_cache.max_accounts == 0 {
            return Err(invalid("account_cache.max_accounts", "must be >= 1"));
        }
        Ok(())
    }
}

fn invalid(option: &str, details: &str) -> ConfigError {
    ConfigError::InvalidOption {
        option: option.to_string(),
        details: details.to_string(),
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
client:
  host: bsky.social
  port: 443
  handle: mod-bot.example.com
  password: "app-password"
  did: did:plc:operator
  service_did: did:plc:labeler
  dry_run: false
  use_token: true
embed_checker:
  number_of_threads: 8
  queue_limit: 1000
  url_redirect_limit: 5
  uri_host_prefix: "www."
  whitelist_uris: [example.com, bsky.app]
  image_factor: 4
  video_factor: 4
  record_factor: 10
  link_factor: 10
action_router:
  queue_limit: 250
account_cache:
  max_accounts: 1000
metrics:
  adapter: statsd
  statsd_host: "127.0.0.1:8125"
"#;

    #[test]
    fn parses_full_settings() {
        let settings = Settings::from_yaml(FULL).expect("settings should parse");
        assert_eq!(settings.client.host, "bsky.social");
        assert!(!settings.client.dry_run);
        assert!(settings.client.use_token);
        assert_eq!(settings.embed_checker.number_of_threads, 8);
        assert_eq!(settings.embed_checker.url_redirect_limit, 5);
        assert!(settings.embed_checker.whitelist_uris.contains("bsky.app"));
        assert_eq!(settings.embed_checker.image_factor, 4);
        assert_eq!(settings.action_router.queue_limit, 250);
        assert_eq!(settings.account_cache.max_accounts, 1000);
        assert_eq!(settings.metrics.adapter, "statsd");
    }

    #[test]
    fn applies_defaults() {
        let settings = Settings::from_yaml("client:\n  host: bsky.social\n  port: 443\n")
            .expect("minimal settings should parse");
        assert!(settings.client.dry_run);
        assert!(!settings.client.use_token);
        assert_eq!(settings.embed_checker.number_of_threads, 4);
        assert_eq!(settings.embed_checker.uri_host_prefix, "www.");
        assert_eq!(settings.account_cache.max_accounts, 500_000);
        assert_eq!(settings.metrics.adapter, "noop");
        assert!(settings.rules.is_empty());
    }

    #[test]
    fn rejects_small_alert_factor() {
        let yaml = "client:\n  host: h\n  port: 443\nembed_checker:\n  image_factor: 1\n";
        let err = Settings::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { option, .. }
            if option == "embed_checker.image_factor"));
    }

    #[test]
    fn rejects_zero_queue_limit() {
        let yaml = "client:\n  host: h\n  port: 443\nembed_checker:\n  queue_limit: 0\n";
        assert!(Settings::from_yaml(yaml).is_err());
    }

    #[test]
    fn base_url_schemes() {
        let settings = Settings::from_yaml("client:\n  host: bsky.social\n  port: 443\n").unwrap();
        assert_eq!(settings.client.base_url(), "https://bsky.social:443/xrpc/");

        let settings =
            Settings::from_yaml("client:\n  host: \"http://127.0.0.1\"\n  port: 8080\n").unwrap();
        assert_eq!(settings.client.base_url(), "http://127.0.0.1:8080/xrpc/");
    }
}
