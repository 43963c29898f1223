//! Session lifecycle: login, expiry detection and single-flight renewal.
//!
//! The backend never answers an expired session with a distinct HTTP status.
//! It returns `200 OK` with a login page (or a script redirecting to one) in
//! place of the JSON envelope. [`classify_response`] recognises those bodies,
//! and [`SessionManager`] uses it on every authenticated call: an expired
//! answer triggers exactly one renewal and one retry, after which the call
//! fails with [`Error::Session`].
//!
//! # Examples
//!
//! ```rust
//! use zentao::session::{classify_response, SessionState};
//!
//! let expired = "<script>self.location='/zentao/user-login.html';</script>";
//! assert_eq!(classify_response(expired), SessionState::Expired);
//! assert_eq!(classify_response(r#"{"status":"success"}"#), SessionState::Alive);
//! ```

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::net::endpoint;
use crate::net::json::{self, failure_reason};
use crate::net::{Transport, log_target};

/// An authenticated session: the query parameter name the backend issued and
/// the session id that travels under it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    id: String,
}

impl Session {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Query parameter name, usually `zentaosid`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn attach(&self, url: &mut Url) {
        url.query_pairs_mut().append_pair(&self.name, &self.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("id", &"***")
            .finish()
    }
}

/// Whether a response body came from a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Alive,
    Expired,
}

const REDIRECT_MARKERS: &[&str] = &[
    "self.location",
    "location.href",
    "parent.location",
    "top.location",
    "window.location",
];

/// Classifies a text response body.
///
/// JSON bodies are always alive. Anything else is expired when it contains a
/// login form (`loginPanel`, `loginForm`), a client-side redirect inside a
/// `<script>` block, or a reference to the login page together with a form
/// or a redirect.
pub fn classify_response(body: &str) -> SessionState {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return SessionState::Alive;
    }

    let lower = body.to_ascii_lowercase();
    if lower.contains("loginpanel") || lower.contains("loginform") {
        return SessionState::Expired;
    }
    if lower
        .split("<script")
        .skip(1)
        .any(|script| REDIRECT_MARKERS.iter().any(|m| script.contains(m)))
    {
        return SessionState::Expired;
    }

    let login_page = lower.contains("user-login") || lower.contains("m=user&f=login");
    let redirects = REDIRECT_MARKERS.iter().any(|m| lower.contains(m));
    if login_page && (redirects || lower.contains("<form")) {
        SessionState::Expired
    } else {
        SessionState::Alive
    }
}

/// Classifies a possibly binary body. Recognised image payloads are alive
/// without further inspection.
pub fn classify_bytes(body: &[u8]) -> SessionState {
    if crate::download::ImageFormat::detect(body).is_some() {
        return SessionState::Alive;
    }
    classify_response(&String::from_utf8_lossy(body))
}

/// Owns the session and performs every authenticated call.
///
/// Shared behind an `Arc` by the pager, the image pipeline and the client.
/// Logins are serialized: when several callers see the same stale session
/// only the first logs in again and the rest reuse its result.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    base_url: Url,
    account: String,
    password: String,
    current: RwLock<Option<Arc<Session>>>,
    login_lock: tokio::sync::Mutex<()>,
    renewals: AtomicUsize,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.base_url.as_str())
            .field("account", &self.account)
            .field("logged_in", &self.current.read().is_some())
            .field("renewals", &self.renewal_count())
            .finish()
    }
}

impl SessionManager {
    /// Creates a manager without logging in; the first call does that.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the config is invalid.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            base_url: config.parsed_base_url()?,
            account: config.account.clone(),
            password: config.password.clone(),
            current: RwLock::new(None),
            login_lock: tokio::sync::Mutex::new(()),
            renewals: AtomicUsize::new(0),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Number of renewals after expiry or [`force_renew`](Self::force_renew).
    /// The initial login does not count.
    pub fn renewal_count(&self) -> usize {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Returns the held session, logging in first if there is none.
    ///
    /// # Errors
    ///
    /// [`Error::Session`] if login fails for any reason.
    pub async fn ensure_session(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.current.read().clone() {
            return Ok(session);
        }

        let _guard = self.login_lock.lock().await;
        if let Some(session) = self.current.read().clone() {
            return Ok(session);
        }

        let session = Arc::new(self.login().await?);
        *self.current.write() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Discards the held session and logs in again unconditionally.
    ///
    /// # Errors
    ///
    /// [`Error::Session`] if the new login fails.
    pub async fn force_renew(&self) -> Result<Arc<Session>> {
        let _guard = self.login_lock.lock().await;
        self.current.write().take();
        self.relogin().await
    }

    /// Renews `stale` unless another caller already replaced it, in which
    /// case the replacement is returned without a new login.
    async fn renew_stale(&self, stale: &Arc<Session>) -> Result<Arc<Session>> {
        let _guard = self.login_lock.lock().await;
        if let Some(current) = self.current.read().clone() {
            if !Arc::ptr_eq(&current, stale) {
                return Ok(current);
            }
        }
        self.current.write().take();
        self.relogin().await
    }

    // Caller holds `login_lock`.
    async fn relogin(&self) -> Result<Arc<Session>> {
        let session = Arc::new(self.login().await?);
        *self.current.write() = Some(Arc::clone(&session));
        self.renewals.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            account = %self.account,
            renewals = self.renewal_count(),
            "session renewed"
        );
        Ok(session)
    }

    async fn login(&self) -> Result<Session> {
        let session = self
            .issue_session_id()
            .await
            .map_err(|e| Error::session(format!("could not obtain a session id: {}", e)))?;

        let mut url = self.join(&endpoint::USER_LOGIN.path(&[])?)?;
        session.attach(&mut url);
        let form = vec![
            ("account".to_string(), self.account.clone()),
            ("password".to_string(), self.password.clone()),
        ];

        let body = self
            .transport
            .post_form(url.as_str(), &form)
            .await
            .map_err(|e| Error::session(format!("login request failed: {}", e)).redact(session.id()))?;

        let reply: Value = serde_json::from_slice(&body).map_err(|_| {
            Error::session(format!(
                "login rejected: unexpected response: {}",
                crate::error::excerpt(&body)
            ))
            .redact(session.id())
        })?;

        if reply.get("status").and_then(Value::as_str) != Some("success") {
            return Err(Error::session(format!(
                "login rejected for '{}': {}",
                self.account,
                failure_reason(&reply)
            ))
            .redact(session.id()));
        }

        tracing::info!(account = %self.account, "logged in");
        Ok(session)
    }

    async fn issue_session_id(&self) -> Result<Session> {
        let url = self.join(&endpoint::SESSION_ID.path(&[])?)?;
        let body = self.transport.get(url.as_str()).await?;
        let payload = json::decode_envelope(&body)?;
        let name: String = json::extract_as(&payload, "sessionName")?;
        let id: String = json::extract_as(&payload, "sessionID")?;
        if name.is_empty() || id.is_empty() {
            return Err(Error::upstream("backend issued an empty session id"));
        }
        Ok(Session::new(name, id))
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("cannot join '{}' to base url: {}", path, e)))
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    /// Authenticated GET of a relative endpoint path, returning the unwrapped
    /// envelope payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Session`] if login fails or the session is still expired
    ///   after one renewal
    /// - [`Error::Transport`] for network and non-success HTTP failures
    /// - [`Error::UpstreamData`] for malformed or failed envelopes
    pub async fn request(&self, path: &str) -> Result<Value> {
        let url = self.join(path)?;
        tracing::debug!(path, "request");
        let (body, session) = self.execute(&url, None).await?;
        json::decode_envelope(&body).map_err(|e| e.redact(session.id()))
    }

    /// Authenticated form POST to a relative endpoint path, returning the
    /// unwrapped payload. Same error semantics as [`request`](Self::request).
    pub async fn request_form(&self, path: &str, form: &[(String, String)]) -> Result<Value> {
        let url = self.join(path)?;
        tracing::debug!(path, fields = form.len(), "form request");
        let (body, session) = self.execute(&url, Some(form)).await?;
        json::decode_envelope(&body).map_err(|e| e.redact(session.id()))
    }

    /// Fetches a binary resource. `url` may be absolute or relative to the
    /// base URL. The session is attached only for the backend's own origin;
    /// foreign hosts are fetched plainly.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let url = self.join(url)?;
        if !self.is_same_origin(&url) {
            tracing::debug!(target_path = log_target(url.as_str()), "foreign fetch");
            return self.transport.get(url.as_str()).await;
        }
        let (body, _) = self.execute(&url, None).await?;
        Ok(body)
    }

    async fn execute(
        &self,
        url: &Url,
        form: Option<&[(String, String)]>,
    ) -> Result<(Bytes, Arc<Session>)> {
        let session = self.ensure_session().await?;
        let body = self.send(url, form, &session).await?;
        if classify_bytes(&body) == SessionState::Alive {
            return Ok((body, session));
        }

        tracing::warn!(
            target_path = log_target(url.as_str()),
            "session expired, renewing"
        );
        let renewed = self.renew_stale(&session).await?;
        let body = self.send(url, form, &renewed).await?;
        match classify_bytes(&body) {
            SessionState::Alive => Ok((body, renewed)),
            SessionState::Expired => Err(Error::session(format!(
                "session still expired after renewal ({})",
                log_target(url.as_str())
            ))),
        }
    }

    async fn send(
        &self,
        url: &Url,
        form: Option<&[(String, String)]>,
        session: &Session,
    ) -> Result<Bytes> {
        let mut url = url.clone();
        session.attach(&mut url);
        let result = match form {
            Some(form) => self.transport.post_form(url.as_str(), form).await,
            None => self.transport.get(url.as_str()).await,
        };
        result.map_err(|e| e.redact(session.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const EXPIRED: &str = "<html><script>self.location='/zentao/user-login-L3plbnRhbw==.html';</script></html>";

    /// Backend double: issues `sid1`, `sid2`, ... and answers data calls
    /// through `respond`, keyed by the session id in the URL.
    struct FakeBackend {
        issued: AtomicUsize,
        reject_login: bool,
        respond: Box<dyn Fn(&str) -> Result<Bytes> + Send + Sync>,
        data_calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn new(respond: impl Fn(&str) -> Result<Bytes> + Send + Sync + 'static) -> Self {
            Self {
                issued: AtomicUsize::new(0),
                reject_login: false,
                respond: Box::new(respond),
                data_calls: Mutex::new(Vec::new()),
            }
        }

        fn logins(&self) -> usize {
            self.issued.load(Ordering::SeqCst)
        }
    }

    fn envelope(data: &str) -> Bytes {
        Bytes::from(
            serde_json::json!({"status": "success", "data": data})
                .to_string(),
        )
    }

    #[async_trait]
    impl Transport for FakeBackend {
        async fn get(&self, url: &str) -> Result<Bytes> {
            tokio::task::yield_now().await;
            if url.contains("api-getSessionID") {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let data = format!(r#"{{"sessionName":"zentaosid","sessionID":"sid{}"}}"#, n);
                return Ok(envelope(&data));
            }
            self.data_calls.lock().push(url.to_string());
            (self.respond)(url)
        }

        async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Bytes> {
            tokio::task::yield_now().await;
            if url.contains("user-login") {
                assert!(form.iter().any(|(k, v)| k == "account" && v == "alice"));
                return Ok(if self.reject_login {
                    Bytes::from_static(br#"{"status":"failed","reason":"wrong password"}"#)
                } else {
                    Bytes::from_static(br#"{"status":"success"}"#)
                });
            }
            self.data_calls.lock().push(url.to_string());
            (self.respond)(url)
        }
    }

    fn manager(backend: Arc<FakeBackend>) -> SessionManager {
        let config = ClientConfig::builder()
            .base_url("http://pm.local/zentao")
            .account("alice")
            .password("secret")
            .build()
            .unwrap();
        SessionManager::new(&config, backend).unwrap()
    }

    #[test]
    fn test_classifier_markers() {
        let cases = [
            (EXPIRED, SessionState::Expired),
            ("<div id='loginPanel'><form></form></div>", SessionState::Expired),
            ("<script>parent.location.href='index.php?m=user&f=login'</script>", SessionState::Expired),
            ("<form action='/zentao/user-login.html' method='post'>", SessionState::Expired),
            ("<html><script>top.location='/zentao/index.php';</script></html>", SessionState::Expired),
            ("<SCRIPT>window.location = '/';</SCRIPT>", SessionState::Expired),
            ("<p>window.location explained</p>", SessionState::Alive),
            (r#"{"status":"success","data":"{}"}"#, SessionState::Alive),
            ("  [1,2,3]", SessionState::Alive),
            ("<p>see user-login docs</p>", SessionState::Alive),
            ("", SessionState::Alive),
        ];
        for (body, expected) in cases {
            assert_eq!(classify_response(body), expected, "body: {}", body);
        }
    }

    #[test]
    fn test_classify_bytes_trusts_images() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"user-login self.location");
        assert_eq!(classify_bytes(&png), SessionState::Alive);
        assert_eq!(classify_bytes(EXPIRED.as_bytes()), SessionState::Expired);
    }

    #[test]
    fn test_session_debug_hides_id() {
        let session = Session::new("zentaosid", "abc123");
        let debug = format!("{:?}", session);
        assert!(debug.contains("zentaosid"));
        assert!(!debug.contains("abc123"));
    }

    #[tokio::test]
    async fn test_expired_then_success_renews_once() {
        let backend = Arc::new(FakeBackend::new(|url| {
            Ok(if url.contains("zentaosid=sid1") {
                Bytes::from_static(EXPIRED.as_bytes())
            } else {
                envelope(r#"{"bug":{"id":1}}"#)
            })
        }));
        let sessions = manager(Arc::clone(&backend));

        let payload = sessions.request("bug-view-1.json").await.unwrap();
        assert_eq!(payload["bug"]["id"], 1);
        assert_eq!(sessions.renewal_count(), 1);
        assert_eq!(backend.logins(), 2);
        assert_eq!(backend.data_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_twice_is_session_error() {
        let backend = Arc::new(FakeBackend::new(|_| Ok(Bytes::from_static(EXPIRED.as_bytes()))));
        let sessions = manager(Arc::clone(&backend));

        let err = sessions.request("bug-view-1.json").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(!err.to_string().contains("sid"));
        assert_eq!(sessions.renewal_count(), 1);
        assert_eq!(backend.data_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_login_is_session_error() {
        let mut backend = FakeBackend::new(|_| Ok(envelope("{}")));
        backend.reject_login = true;
        let sessions = manager(Arc::new(backend));

        let err = sessions.ensure_session().await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(err.to_string().contains("wrong password"));
    }

    #[tokio::test]
    async fn test_concurrent_expiry_shares_one_renewal() {
        let backend = Arc::new(FakeBackend::new(|url| {
            Ok(if url.contains("zentaosid=sid1") {
                Bytes::from_static(EXPIRED.as_bytes())
            } else {
                envelope("{}")
            })
        }));
        let sessions = manager(Arc::clone(&backend));

        let (a, b, c) = tokio::join!(
            sessions.request("story-view-1.json"),
            sessions.request("story-view-2.json"),
            sessions.request("story-view-3.json"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(sessions.renewal_count(), 1);
        assert_eq!(backend.logins(), 2);
    }

    #[tokio::test]
    async fn test_ensure_session_reuses_held_session() {
        let backend = Arc::new(FakeBackend::new(|_| Ok(envelope("{}"))));
        let sessions = manager(Arc::clone(&backend));

        let first = sessions.ensure_session().await.unwrap();
        let second = sessions.ensure_session().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.logins(), 1);

        let renewed = sessions.force_renew().await.unwrap();
        assert_eq!(renewed.id(), "sid2");
        assert_eq!(sessions.renewal_count(), 1);
    }

    #[tokio::test]
    async fn test_token_only_sent_to_own_origin() {
        let backend = Arc::new(FakeBackend::new(|_| Ok(Bytes::from_static(b"GIF89a..."))));
        let sessions = manager(Arc::clone(&backend));

        sessions.fetch_bytes("file-read-3.png").await.unwrap();
        sessions.fetch_bytes("https://cdn.example.com/x.gif").await.unwrap();

        let calls = backend.data_calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("http://pm.local/zentao/file-read-3.png?zentaosid=sid1"));
        assert_eq!(calls[1], "https://cdn.example.com/x.gif");
    }

    #[tokio::test]
    async fn test_transport_errors_are_redacted() {
        let backend = Arc::new(FakeBackend::new(|url| {
            Err(Error::http_status(500, format!("failed for {}", url).as_bytes()))
        }));
        let sessions = manager(backend);

        let err = sessions.request("bug-view-9.json").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(!err.to_string().contains("sid1"));
    }
}
