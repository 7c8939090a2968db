//! Fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, Clock, ExternalUserAgent, HttpClient, HttpRequest, HttpResponse, SecureStore,
    UserAgentOutcome, UserAgentRequest,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_runtime::events::EventBus;
use mockall::mock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::persistence::{SessionPersistence, SessionWriter};
use crate::session::AuthSession;
use crate::types::{ProviderConfiguration, SessionState, TokenSet};

pub const ISSUER: &str = "https://id.example.com";
pub const CLIENT_ID: &str = "mobile-app";
pub const REDIRECT_URI: &str = "com.example.app:/oauth2redirect/example";
pub const STORAGE_KEY: &str = "oidc_session_state";

type Handler = dyn Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync;

/// HTTP client answering from a closure and recording every request.
pub struct ScriptedHttpClient {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedHttpClient {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Fails the test on any request.
    pub fn unreachable() -> Self {
        Self::new(|request| panic!("unexpected request to {}", request.url))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&request)
    }
}

/// Decoded `application/x-www-form-urlencoded` body of a request.
pub fn form_params(request: &HttpRequest) -> HashMap<String, String> {
    let body = request.body.clone().unwrap_or_default();
    url::form_urlencoded::parse(&body).into_owned().collect()
}

/// In-memory secure store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage("store is read-only".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put_raw(key, value);
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.raw(key))
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Clock that only moves when told to.
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

mock! {
    pub UserAgent {}

    #[async_trait]
    impl ExternalUserAgent for UserAgent {
        async fn present(&self, request: UserAgentRequest) -> BridgeResult<UserAgentOutcome>;
    }
}

pub fn jwt(claims: Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

pub fn id_token_for(subject: &str) -> String {
    jwt(json!({
        "iss": ISSUER,
        "sub": subject,
        "aud": CLIENT_ID,
        "exp": 4_000_000_000i64,
        "iat": 1_700_000_000i64,
    }))
}

pub fn provider() -> ProviderConfiguration {
    ProviderConfiguration {
        issuer: ISSUER.to_string(),
        authorization_endpoint: format!("{ISSUER}/oauth2/authorize"),
        token_endpoint: format!("{ISSUER}/oauth2/token"),
        userinfo_endpoint: Some(format!("{ISSUER}/oauth2/userinfo")),
        end_session_endpoint: Some(format!("{ISSUER}/oauth2/logout")),
        jwks_uri: format!("{ISSUER}/oauth2/jwks"),
    }
}

pub fn tokens(access: &str, refresh: Option<&str>, expires_at: DateTime<Utc>) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        id_token: id_token_for("user-1"),
        expires_at,
    }
}

pub fn token_response(access: &str, refresh: Option<&str>, expires_in: i64) -> HttpResponse {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "id_token": id_token_for("user-1"),
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    HttpResponse::new(200, body.to_string())
}

pub fn oauth_error(status: u16, error: &str) -> HttpResponse {
    HttpResponse::new(status, json!({ "error": error }).to_string())
}

/// Session wired to an in-memory store and a fresh event bus.
pub fn session_with(initial: SessionState) -> (Arc<AuthSession>, Arc<MemoryStore>, EventBus) {
    let store = Arc::new(MemoryStore::default());
    let persistence = Arc::new(SessionPersistence::new(store.clone(), STORAGE_KEY));
    let events = EventBus::new(64);
    let session = Arc::new(AuthSession::new(
        initial,
        SessionWriter::spawn(persistence),
        events.clone(),
    ));
    (session, store, events)
}
