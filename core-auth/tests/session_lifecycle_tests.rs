use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    Clock, ExternalUserAgent, HttpClient, HttpRequest, HttpResponse, SecureStore,
    UserAgentOutcome, UserAgentRequest,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_auth::{
    EndSessionOutcome, ResourceError, SessionError, SessionManager, SessionPersistence,
    SessionState, TokenSet,
};
use core_runtime::ClientConfig;
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const ISSUER: &str = "https://login.example.org";
const CLIENT_ID: &str = "native-client";
const STORAGE_KEY: &str = "oidc_session_state";

#[derive(Clone, Copy, PartialEq)]
enum RefreshMode {
    Succeed,
    InvalidGrant,
}

/// Fake identity provider answering discovery, token and userinfo calls.
struct FakeProvider {
    refresh_mode: Mutex<RefreshMode>,
    userinfo_status: Mutex<u16>,
    token_delay: Duration,
    code_exchanges: AtomicUsize,
    refreshes: AtomicUsize,
    userinfo_calls: AtomicUsize,
    issued: AtomicUsize,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            refresh_mode: Mutex::new(RefreshMode::Succeed),
            userinfo_status: Mutex::new(200),
            token_delay: Duration::ZERO,
            code_exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            userinfo_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn token_response(&self) -> HttpResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        HttpResponse::new(
            200,
            json!({
                "access_token": format!("access-{n}"),
                "refresh_token": format!("refresh-{n}"),
                "id_token": id_token(),
                "token_type": "Bearer",
                "expires_in": 3600,
            })
            .to_string(),
        )
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let path = Url::parse(&request.url).unwrap().path().to_string();
        match path.as_str() {
            "/.well-known/openid-configuration" => HttpResponse::new(
                200,
                json!({
                    "issuer": ISSUER,
                    "authorization_endpoint": format!("{ISSUER}/authorize"),
                    "token_endpoint": format!("{ISSUER}/token"),
                    "userinfo_endpoint": format!("{ISSUER}/userinfo"),
                    "end_session_endpoint": format!("{ISSUER}/logout"),
                    "jwks_uri": format!("{ISSUER}/jwks"),
                })
                .to_string(),
            ),
            "/token" => {
                let body = request.body.clone().unwrap_or_default();
                let form: HashMap<String, String> =
                    url::form_urlencoded::parse(&body).into_owned().collect();
                match form.get("grant_type").map(String::as_str) {
                    Some("authorization_code") => {
                        self.code_exchanges.fetch_add(1, Ordering::SeqCst);
                        self.token_response()
                    }
                    Some("refresh_token") => {
                        self.refreshes.fetch_add(1, Ordering::SeqCst);
                        match *self.refresh_mode.lock().unwrap() {
                            RefreshMode::Succeed => self.token_response(),
                            RefreshMode::InvalidGrant => HttpResponse::new(
                                400,
                                json!({"error": "invalid_grant"}).to_string(),
                            ),
                        }
                    }
                    _ => HttpResponse::new(400, json!({"error": "unsupported_grant_type"}).to_string()),
                }
            }
            "/userinfo" => {
                self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
                let status = *self.userinfo_status.lock().unwrap();
                if status == 200 {
                    HttpResponse::new(
                        200,
                        json!({"sub": "user-42", "username": "grace", "email": "grace@example.org"})
                            .to_string(),
                    )
                } else {
                    HttpResponse::new(status, "")
                }
            }
            _ => HttpResponse::new(404, ""),
        }
    }
}

#[async_trait]
impl HttpClient for FakeProvider {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.url.ends_with("/token") && !self.token_delay.is_zero() {
            tokio::time::sleep(self.token_delay).await;
        }
        Ok(self.handle(&request))
    }
}

fn id_token() -> String {
    let claims = json!({
        "iss": ISSUER,
        "sub": "user-42",
        "aud": CLIENT_ID,
        "exp": 4_000_000_000i64,
    });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

#[derive(Default)]
struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    fn stored_session(&self) -> Option<SessionState> {
        let bytes = self.entries.lock().unwrap().get(STORAGE_KEY).cloned()?;
        SessionPersistence::decode(&bytes).ok()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()))
    }

    fn advance(&self, by: ChronoDuration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Approves every login; answers logout according to `logout`.
struct FakeAgent {
    logout: Mutex<Option<UserAgentOutcome>>,
}

impl FakeAgent {
    fn approving() -> Self {
        Self {
            logout: Mutex::new(None),
        }
    }

    fn cancelling_logout() -> Self {
        Self {
            logout: Mutex::new(Some(UserAgentOutcome::Cancelled)),
        }
    }
}

#[async_trait]
impl ExternalUserAgent for FakeAgent {
    async fn present(&self, request: UserAgentRequest) -> BridgeResult<UserAgentOutcome> {
        let url = Url::parse(&request.url).unwrap();
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        if url.path() == "/logout" {
            if let Some(outcome) = self.logout.lock().unwrap().clone() {
                return Ok(outcome);
            }
            return Ok(UserAgentOutcome::Callback(format!(
                "{}?state={}",
                request.callback_prefix, state
            )));
        }

        Ok(UserAgentOutcome::Callback(format!(
            "{}?code=granted&state={}",
            request.callback_prefix, state
        )))
    }
}

struct Harness {
    manager: SessionManager,
    provider: Arc<FakeProvider>,
    store: Arc<MemoryStore>,
}

fn harness(
    provider: Arc<FakeProvider>,
    store: Arc<MemoryStore>,
    clock: Arc<TestClock>,
    agent: FakeAgent,
) -> Harness {
    let config = ClientConfig::builder()
        .client_id(CLIENT_ID)
        .issuer(ISSUER)
        .application_id("org.example.notes")
        .provider_tag("example")
        .http_client(provider.clone())
        .secure_store(store.clone())
        .user_agent(Arc::new(agent))
        .clock(clock)
        .build()
        .unwrap();

    Harness {
        manager: SessionManager::new(config).unwrap(),
        provider,
        store,
    }
}

/// A logged-in session whose access token has already expired.
async fn expired_session(provider: FakeProvider) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(TestClock::new());
    let provider = Arc::new(provider);

    let first = harness(provider.clone(), store.clone(), clock.clone(), FakeAgent::approving());
    first.manager.login().await.unwrap();
    first.manager.flush().await;

    clock.advance(ChronoDuration::hours(2));
    let second = harness(provider, store, clock, FakeAgent::approving());
    second.manager.restore().await;
    second
}

#[tokio::test]
async fn test_end_to_end_login_restart_and_refresh() {
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(TestClock::new());
    let provider = Arc::new(FakeProvider::new());

    // Fresh process, nothing persisted.
    let app = harness(provider.clone(), store.clone(), clock.clone(), FakeAgent::approving());
    let view = app.manager.start().await.unwrap();
    assert!(!view.authorized);
    assert!(view.username.is_none());

    // Login persists an authorized session.
    let view = app.manager.login().await.unwrap();
    assert!(view.authorized);
    app.manager.flush().await;
    let persisted = store.stored_session().unwrap();
    assert!(persisted.is_authorized());
    let tokens_before: TokenSet = persisted.tokens.unwrap();
    drop(app);

    // Restart after the access token has expired.
    clock.advance(ChronoDuration::hours(2));
    let app = harness(provider.clone(), store.clone(), clock, FakeAgent::approving());
    assert_eq!(app.manager.restore().await.tokens, Some(tokens_before.clone()));

    let info = app.manager.fetch_user_info().await.unwrap();
    assert_eq!(info.username(), Some("grace"));
    assert_eq!(provider.refreshes(), 1);
    assert_eq!(provider.code_exchanges.load(Ordering::SeqCst), 1);

    let state = app.manager.session_state().await;
    assert!(state.is_authorized());
    assert_ne!(state.tokens.unwrap().access_token, tokens_before.access_token);

    // The refreshed token is fresh now; no second refresh.
    app.manager.fetch_user_info().await.unwrap();
    assert_eq!(provider.refreshes(), 1);
    assert_eq!(app.manager.view().await.username.as_deref(), Some("grace"));
}

#[tokio::test]
async fn test_start_revalidates_restored_session() {
    let h = expired_session(FakeProvider::new()).await;

    let view = h.manager.start().await.unwrap();

    assert!(view.authorized);
    assert_eq!(view.username.as_deref(), Some("grace"));
    assert_eq!(h.provider.refreshes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_trigger_exactly_one_refresh() {
    let h = expired_session(FakeProvider::new().with_token_delay(Duration::from_millis(50))).await;
    h.manager.discover().await.unwrap();

    let tokens = join_all((0..25).map(|_| h.manager.valid_access_token())).await;

    let first = tokens[0].as_ref().unwrap().clone();
    assert!(tokens.iter().all(|t| t.as_ref().unwrap() == &first));
    assert_eq!(h.provider.refreshes(), 1);

    h.manager.flush().await;
    assert_eq!(
        h.store.stored_session().unwrap().tokens.unwrap().access_token,
        first
    );
}

#[tokio::test]
async fn test_invalid_grant_logs_out_and_persists() {
    let provider = FakeProvider::new();
    *provider.refresh_mode.lock().unwrap() = RefreshMode::InvalidGrant;
    let h = expired_session(provider).await;
    let mut events = h.manager.subscribe();

    let err = h.manager.valid_access_token().await.unwrap_err();

    assert!(matches!(err, SessionError::Auth(ref e) if e.is_invalid_grant()));
    assert_eq!(h.manager.session_state().await, SessionState::empty());
    h.manager.flush().await;
    assert_eq!(h.store.stored_session(), Some(SessionState::empty()));

    let mut saw_clear = false;
    while let Some(Ok(event)) = events.try_recv() {
        if let core_runtime::SessionEvent::RefreshFailed { session_cleared, .. } = event {
            saw_clear = session_cleared;
        }
    }
    assert!(saw_clear);
}

#[tokio::test]
async fn test_logout_is_unconditional() {
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(TestClock::new());
    let provider = Arc::new(FakeProvider::new());
    let h = harness(provider, store.clone(), clock, FakeAgent::cancelling_logout());
    h.manager.login().await.unwrap();

    let outcome = h.manager.logout().await.unwrap();

    assert_eq!(outcome, EndSessionOutcome::Cancelled);
    assert!(!h.manager.view().await.authorized);
    h.manager.flush().await;
    assert_eq!(store.stored_session(), Some(SessionState::empty()));
}

#[tokio::test]
async fn test_logout_notifies_provider() {
    let h = harness(
        Arc::new(FakeProvider::new()),
        Arc::new(MemoryStore::default()),
        Arc::new(TestClock::new()),
        FakeAgent::approving(),
    );
    h.manager.login().await.unwrap();

    assert_eq!(
        h.manager.logout().await.unwrap(),
        EndSessionOutcome::ProviderNotified
    );
    assert_eq!(h.manager.session_state().await, SessionState::empty());
}

#[tokio::test]
async fn test_persistence_round_trip_and_bad_payloads() {
    let store = Arc::new(MemoryStore::default());
    let persistence = SessionPersistence::new(store.clone(), STORAGE_KEY);

    assert_eq!(persistence.load().await.unwrap(), None);

    let state = SessionState::with_tokens(TokenSet {
        access_token: "a".into(),
        refresh_token: Some("r".into()),
        id_token: id_token(),
        expires_at: TestClock::new().now(),
    });
    persistence.save(&state).await.unwrap();
    let loaded = persistence.load().await.unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(loaded.is_authorized(), state.is_authorized());

    store.set_secret(STORAGE_KEY, b"\xff\xfe not json").await.unwrap();
    assert!(persistence.load().await.unwrap_err().is_corrupt());
}

#[tokio::test]
async fn test_userinfo_401_flags_session_without_refresh() {
    let h = harness(
        Arc::new(FakeProvider::new()),
        Arc::new(MemoryStore::default()),
        Arc::new(TestClock::new()),
        FakeAgent::approving(),
    );
    h.manager.login().await.unwrap();
    *h.provider.userinfo_status.lock().unwrap() = 401;

    let err = h.manager.fetch_user_info().await.unwrap_err();

    assert!(matches!(err, SessionError::Resource(ResourceError::Unauthorized)));
    let state = h.manager.session_state().await;
    assert!(state.has_tokens());
    assert!(state.authorization_error.is_some());
    assert!(!h.manager.view().await.authorized);
    assert_eq!(h.provider.refreshes(), 0);
}
