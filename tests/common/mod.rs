//! Shared fixtures for the integration tests: token minting, settings
//! pointed at a mock PDS, and a running router pipeline.
#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use palisade::atproto::client::Client;
use palisade::config::{ClientSettings, EmbedSettings};
use palisade::embed::checker::EmbedChecker;
use palisade::matcher::{RuleMatcher, SubstringMatcher, SubstringRule};
use palisade::metrics::{NoOpMetricsPublisher, SharedMetricsPublisher};
use palisade::moderation::ActionRouter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mint an unsigned JWT whose payload expires `expires_in_secs` from now.
/// The session manager only reads the `exp` claim.
pub fn make_jwt(expires_in_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + expires_in_secs;
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({ "exp": exp }).to_string().as_bytes());
    format!("{header}.{payload}.test-signature")
}

/// Client settings pointed at a wiremock PDS.
pub fn client_settings(server: &MockServer, dry_run: bool) -> ClientSettings {
    let uri = url::Url::parse(&server.uri()).expect("mock server uri parses");
    ClientSettings {
        host: format!("{}://{}", uri.scheme(), uri.host_str().expect("host")),
        port: uri.port().expect("port"),
        handle: "mod-bot.example.com".to_string(),
        password: "app-password".to_string(),
        did: "did:plc:operator".to_string(),
        service_did: "did:plc:labeler".to_string(),
        dry_run,
        use_token: true,
    }
}

/// Mount `createSession` returning the given token pair.
pub async fn mount_create_session(
    server: &MockServer,
    access_jwt: &str,
    refresh_jwt: &str,
    expected_calls: u64,
) {
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessJwt": access_jwt,
            "refreshJwt": refresh_jwt,
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// A connected client plus a running action router and an embed checker,
/// all pointed at the same mock PDS.
pub struct Pipeline {
    pub client: Arc<Client>,
    pub checker: Arc<EmbedChecker>,
    pub token: CancellationToken,
}

impl Pipeline {
    /// `createSession` must already be mounted on `pds`.
    pub async fn start(
        pds: &MockServer,
        embed: EmbedSettings,
        rules: Vec<SubstringRule>,
        dry_run: bool,
    ) -> Self {
        let metrics: SharedMetricsPublisher = Arc::new(NoOpMetricsPublisher::new());
        let client = Arc::new(Client::new(client_settings(pds, dry_run), metrics.clone()));
        client.connect().await.expect("client connects");

        let router = Arc::new(ActionRouter::new(64, client.clone(), metrics.clone()));
        let handle = router.handle();
        let token = CancellationToken::new();
        {
            let router = router.clone();
            let token = token.clone();
            tokio::spawn(async move { router.run(token).await });
        }

        let matcher: Arc<dyn RuleMatcher> = Arc::new(SubstringMatcher::new(rules));
        let checker = Arc::new(
            EmbedChecker::new(embed, matcher, handle, metrics).expect("checker builds"),
        );

        Self {
            client,
            checker,
            token,
        }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// Wait until the mock server has seen `count` requests to `request_path`,
/// or panic after ~2 seconds.
pub async fn wait_for_requests(server: &MockServer, request_path: &str, count: usize) {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count();
        if seen >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("mock server never saw {count} requests to {request_path}");
}
