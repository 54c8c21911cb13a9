//! Form-login session against the portal.
//!
//! ## Login protocol
//!
//!   1. `GET /` to obtain the session cookie
//!   2. `POST /login.php` with `username`, `password`, `login=Anmelden`
//!   3. `GET /getdata.php`; a login form in the body means "not active yet"
//!
//! The backend needs a moment after step 2 before the session works, so step
//! 3 is retried on a short backoff. If that is not enough the whole cycle
//! runs once more from scratch with a longer backoff before giving up.
//!
//! All calls of one session run strictly in sequence; the cookie jar inside
//! the transport is the only carrier of authentication.

use std::fmt;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};
use url::Url;

use super::detect::looks_like_login_page;
use super::http_client::{HttpClient, Page, RequestOptions, Transport};
use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::utils::snippet;

pub const LOGIN_PATH: &str = "login.php";
pub const DATA_PATH: &str = "getdata.php";
const SUBMIT_MARKER: (&str, &str) = ("login", "Anmelden");

// ── Credentials ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ── Endpoints / retry policy ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub root: Url,
    pub login: Url,
    pub data: Url,
}

impl Endpoints {
    /// Resolve the portal endpoints below `base_url`. A missing trailing slash
    /// is added so `https://host/school` keeps its path segment.
    pub fn from_base(base_url: &str) -> Result<Self, PortalError> {
        let trimmed = base_url.trim();
        let root = if trimmed.ends_with('/') {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("{trimmed}/"))?
        };
        Ok(Self {
            login: root.join(LOGIN_PATH)?,
            data: root.join(DATA_PATH)?,
            root,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub primary: Vec<Duration>,
    pub fallback: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &PortalConfig) -> Self {
        let to_durations =
            |ms: &[u64]| ms.iter().copied().map(Duration::from_millis).collect::<Vec<_>>();
        Self {
            primary: to_durations(&config.primary_delays_ms),
            fallback: to_durations(&config.fallback_delays_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PortalConfig::default())
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    /// Start page fetched, session cookie issued.
    FormLoaded,
    /// Credentials posted, activation not yet confirmed.
    Submitted,
    Verified,
    Failed,
}

/// Result of checking the data page after a login cycle.
enum Activation {
    Active(String),
    Pending(String),
}

/// Error type of a single data-page probe inside the retry loop.
enum Probe {
    LoginForm(String),
    Failed(PortalError),
}

/// One authenticated portal session. Owns its transport (and with it the
/// cookie jar), so a session is bound to exactly one credential pair.
pub struct Session<T = HttpClient> {
    transport: T,
    endpoints: Endpoints,
    credentials: Credentials,
    policy: RetryPolicy,
    state: LoginState,
}

impl Session<HttpClient> {
    /// Session with a fresh HTTP client and cookie jar.
    pub fn new(config: &PortalConfig, credentials: Credentials) -> Result<Self, PortalError> {
        let endpoints = Endpoints::from_base(&config.base_url)?;
        let transport = HttpClient::new(config)?;
        Ok(Self::with_transport(
            transport,
            endpoints,
            credentials,
            RetryPolicy::from_config(config),
        ))
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(
        transport: T,
        endpoints: Endpoints,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoints,
            credentials,
            policy,
            state: LoginState::Unauthenticated,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == LoginState::Verified
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Forget the authenticated state so the next refresh logs in again.
    pub fn invalidate(&mut self) {
        self.state = LoginState::Unauthenticated;
    }

    /// Log in and wait until the data page stops showing the login form.
    ///
    /// Returns the data page that proved the session active. Connectivity
    /// failures abort immediately; a session that never activates, even
    /// after the fallback cycle, yields [`PortalError::Authentication`].
    pub async fn establish(&mut self) -> Result<String, PortalError> {
        info!("Logging in as {}", self.credentials.username);
        match self.run_login().await {
            Ok(html) => {
                self.state = LoginState::Verified;
                info!("Session for {} verified", self.credentials.username);
                Ok(html)
            }
            Err(e) => {
                self.state = LoginState::Failed;
                warn!("Login for {} failed: {}", self.credentials.username, e);
                Err(e)
            }
        }
    }

    async fn run_login(&mut self) -> Result<String, PortalError> {
        let primary = self.policy.primary.clone();
        if let Activation::Active(html) = self.login_cycle("primary", &primary).await? {
            return Ok(html);
        }

        debug!("Login form still visible after first login, starting fallback login");
        let fallback = self.policy.fallback.clone();
        match self.login_cycle("fallback", &fallback).await? {
            Activation::Active(html) => Ok(html),
            Activation::Pending(html) => {
                debug!("Login form after fallback login: {}", snippet(&html, 300));
                Err(PortalError::Authentication(
                    "login form still shown after fallback login".to_string(),
                ))
            }
        }
    }

    /// GET start page (never from cache), POST credentials, then probe the
    /// data page with the given backoff.
    async fn login_cycle(
        &mut self,
        cycle: &'static str,
        delays: &[Duration],
    ) -> Result<Activation, PortalError> {
        self.state = LoginState::Unauthenticated;

        debug!("GET {} ({} login)", self.endpoints.root, cycle);
        let opts = RequestOptions {
            no_cache: true,
            referer: None,
        };
        self.transport
            .get(&self.endpoints.root, opts)
            .await?
            .check("GET start page")?;
        self.state = LoginState::FormLoaded;

        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            SUBMIT_MARKER,
        ];
        let opts = RequestOptions {
            no_cache: false,
            referer: Some(&self.endpoints.root),
        };
        debug!("POST {} (username={})", self.endpoints.login, self.credentials.username);
        self.transport
            .post_form(&self.endpoints.login, &form, opts)
            .await?
            .check("POST login")?;
        self.state = LoginState::Submitted;
        debug!(
            "Cookies after login: {:?}",
            self.transport.cookie_names(&self.endpoints.root)
        );

        self.await_activation(delays).await
    }

    /// Probe the data page, retrying after each delay while it still shows
    /// the login form. Any other failure stops the retries.
    async fn await_activation(&self, delays: &[Duration]) -> Result<Activation, PortalError> {
        let strategy = delays
            .iter()
            .copied()
            .inspect(|d| debug!("Session not active yet, retrying in {:?}", d));
        let result = RetryIf::start(
            strategy,
            move || self.probe_data_page(),
            |e: &Probe| matches!(e, Probe::LoginForm(_)),
        )
        .await;

        match result {
            Ok(html) => Ok(Activation::Active(html)),
            Err(Probe::LoginForm(html)) => Ok(Activation::Pending(html)),
            Err(Probe::Failed(e)) => Err(e),
        }
    }

    async fn probe_data_page(&self) -> Result<String, Probe> {
        let page = self.get_data_page().await.map_err(Probe::Failed)?;
        if looks_like_login_page(&page.body) {
            Err(Probe::LoginForm(page.body))
        } else {
            Ok(page.body)
        }
    }

    async fn get_data_page(&self) -> Result<Page, PortalError> {
        let opts = RequestOptions {
            no_cache: true,
            referer: Some(&self.endpoints.root),
        };
        self.transport
            .get(&self.endpoints.data, opts)
            .await?
            .check("GET data page")
    }

    /// Fetch the data page with the live session.
    ///
    /// A login form in the response means the server dropped the session:
    /// that is reported as [`PortalError::SessionExpired`] and the session
    /// drops back to `Unauthenticated`.
    pub async fn fetch_data(&mut self) -> Result<String, PortalError> {
        if !self.is_authenticated() {
            return Err(PortalError::NotAuthenticated);
        }
        let page = self.get_data_page().await?;
        if looks_like_login_page(&page.body) {
            warn!("Session for {} expired", self.credentials.username);
            self.state = LoginState::Unauthenticated;
            return Err(PortalError::SessionExpired);
        }
        Ok(page.body)
    }

    /// End the session. Dropping the transport discards its cookies.
    pub fn close(self) {
        debug!("Closing session for {}", self.credentials.username);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    pub const LOGIN_HTML: &str =
        r#"<form method="post" action="login.php"><input type="password" name="password"></form>"#;
    pub const DATA_HTML: &str =
        r#"<div class="pupilinfo"><table class="t01"><tr><td>Name:</td><td>Max Muster</td></tr></table></div>"#;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Page, PortalError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, status: u16, body: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(Page::new(status, body)));
            self
        }

        pub fn fail(self, err: PortalError) -> Self {
            self.responses.lock().unwrap().push_back(Err(err));
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: String) -> Result<Page, PortalError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response for {request}"))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &Url, _opts: RequestOptions<'_>) -> Result<Page, PortalError> {
            self.next(format!("GET {}", url.path()))
        }

        async fn post_form(
            &self,
            url: &Url,
            form: &[(&str, &str)],
            _opts: RequestOptions<'_>,
        ) -> Result<Page, PortalError> {
            assert!(form.contains(&("login", "Anmelden")));
            self.next(format!("POST {}", url.path()))
        }
    }

    pub fn session(transport: ScriptedTransport) -> Session<ScriptedTransport> {
        Session::with_transport(
            transport,
            Endpoints::from_base("https://portal.test/schule").unwrap(),
            Credentials::new("max", "geheim"),
            RetryPolicy {
                primary: vec![Duration::from_millis(1); 3],
                fallback: vec![Duration::from_millis(1); 4],
            },
        )
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let ep = Endpoints::from_base("https://homeinfopoint.de/salza-gymnasium").unwrap();
        assert_eq!(ep.root.as_str(), "https://homeinfopoint.de/salza-gymnasium/");
        assert_eq!(ep.login.as_str(), "https://homeinfopoint.de/salza-gymnasium/login.php");
        assert_eq!(ep.data.as_str(), "https://homeinfopoint.de/salza-gymnasium/getdata.php");
        assert!(Endpoints::from_base("not a url").is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let dbg = format!("{:?}", Credentials::new("max", "geheim"));
        assert!(!dbg.contains("geheim"));
    }

    #[tokio::test]
    async fn test_login_succeeds_on_first_check() {
        let transport = ScriptedTransport::new()
            .respond(200, "<html>start</html>")
            .respond(302, "")
            .respond(200, DATA_HTML);
        let mut s = session(transport);

        let html = assert_ok!(s.establish().await);
        assert_eq!(html, DATA_HTML);
        assert_eq!(s.state(), LoginState::Verified);
        assert_eq!(
            s.transport.requests(),
            vec!["GET /schule/", "POST /schule/login.php", "GET /schule/getdata.php"]
        );
    }

    #[tokio::test]
    async fn test_login_succeeds_after_one_backoff_step() {
        let transport = ScriptedTransport::new()
            .respond(200, "start")
            .respond(302, "")
            .respond(200, LOGIN_HTML)
            .respond(200, DATA_HTML);
        let mut s = session(transport);

        assert_ok!(s.establish().await);
        assert!(s.is_authenticated());
        // No second GET / POST: the fallback cycle never ran.
        assert_eq!(
            s.transport.requests(),
            vec![
                "GET /schule/",
                "POST /schule/login.php",
                "GET /schule/getdata.php",
                "GET /schule/getdata.php",
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_cycle_rescues_login() {
        let mut transport = ScriptedTransport::new().respond(200, "start").respond(200, "");
        for _ in 0..4 {
            transport = transport.respond(200, LOGIN_HTML);
        }
        let transport = transport
            .respond(200, "start")
            .respond(200, "")
            .respond(200, LOGIN_HTML)
            .respond(200, DATA_HTML);
        let mut s = session(transport);

        assert_ok!(s.establish().await);
        let requests = s.transport.requests();
        assert_eq!(requests.len(), 10);
        assert_eq!(requests[6], "GET /schule/");
        assert_eq!(requests[7], "POST /schule/login.php");
    }

    #[tokio::test]
    async fn test_login_form_forever_is_auth_error() {
        let mut transport = ScriptedTransport::new().respond(200, "start").respond(302, "");
        for _ in 0..4 {
            transport = transport.respond(200, LOGIN_HTML);
        }
        transport = transport.respond(200, "start").respond(302, "");
        for _ in 0..5 {
            transport = transport.respond(200, LOGIN_HTML);
        }
        let mut s = session(transport);

        let err = assert_err!(s.establish().await);
        assert!(matches!(err, PortalError::Authentication(_)));
        assert_eq!(s.state(), LoginState::Failed);
        // 1 + 1 + (1 + 3) primary, 1 + 1 + (1 + 4) fallback
        assert_eq!(s.transport.requests().len(), 13);
    }

    #[tokio::test]
    async fn test_start_page_error_is_connectivity() {
        let transport = ScriptedTransport::new().respond(500, "oops");
        let mut s = session(transport);

        let err = assert_err!(s.establish().await);
        assert!(err.is_connectivity());
        assert!(!err.is_auth_rejection());
        assert_eq!(s.state(), LoginState::Failed);
    }

    #[tokio::test]
    async fn test_login_post_error_is_connectivity() {
        let transport = ScriptedTransport::new()
            .respond(200, "start")
            .respond(404, "not found");
        let mut s = session(transport);

        let err = assert_err!(s.establish().await);
        assert!(matches!(err, PortalError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_data_page_error_stops_retries() {
        let transport = ScriptedTransport::new()
            .respond(200, "start")
            .respond(200, "")
            .respond(200, LOGIN_HTML)
            .respond(502, "bad gateway");
        let mut s = session(transport);

        let err = assert_err!(s.establish().await);
        assert!(matches!(err, PortalError::Http { status: 502, .. }));
        assert_eq!(s.transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_transport_failure_is_connectivity() {
        let transport =
            ScriptedTransport::new().fail(PortalError::InvalidUrl(url::ParseError::EmptyHost));
        let mut s = session(transport);

        let err = assert_err!(s.establish().await);
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_fetch_requires_login() {
        let mut s = session(ScriptedTransport::new());
        let err = assert_err!(s.fetch_data().await);
        assert!(matches!(err, PortalError::NotAuthenticated));
        assert!(s.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_detects_expired_session() {
        let transport = ScriptedTransport::new()
            .respond(200, "start")
            .respond(200, "")
            .respond(200, DATA_HTML)
            .respond(200, DATA_HTML)
            .respond(200, LOGIN_HTML);
        let mut s = session(transport);

        assert_ok!(s.establish().await);
        assert_eq!(assert_ok!(s.fetch_data().await), DATA_HTML);

        let err = assert_err!(s.fetch_data().await);
        assert!(matches!(err, PortalError::SessionExpired));
        assert!(err.needs_reauth());
        assert_eq!(s.state(), LoginState::Unauthenticated);
    }
}
