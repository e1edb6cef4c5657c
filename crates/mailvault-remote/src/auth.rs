//! OAuth2 authorization for mailbox providers
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) plus the
//! client secret that Google and Microsoft issue for installed apps.
//!
//! ## Components
//!
//! - [`KeyringTokenStorage`] - Refresh token cache in the system keyring
//! - [`PKCEFlow`] - Authorization URL, code exchange and refresh via `oauth2`
//! - [`LocalCallbackServer`] - Loopback HTTP listener for the OAuth redirect
//! - [`OAuthTokenProvider`] - `ITokenProvider` adapter orchestrating the above

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mailvault_core::domain::session_config::DEFAULT_REQUEST_TIMEOUT;
use mailvault_core::ports::{AuthError, AuthRequest, ITokenProvider, Token};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    TokenResponse, TokenUrl,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::provider::{OAuthEndpoints, ProviderKind};

/// Default port of the loopback redirect listener
pub const DEFAULT_REDIRECT_PORT: u16 = 8400;

/// Default wait for the user to finish consent in the browser
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Keyring service name for storing tokens
const KEYRING_SERVICE: &str = "mailvault";

/// Access token lifetime assumed when the server does not report one
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

// ============================================================================
// KeyringTokenStorage
// ============================================================================

/// Stores and retrieves OAuth tokens from the system keyring
///
/// Tokens are serialized as JSON under the service name "mailvault", with
/// `<provider>:<client id>` as the username.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    /// Stores tokens in the system keyring
    pub fn store(username: &str, token: &Token) -> anyhow::Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        let json = serde_json::to_string(token).context("Failed to serialize tokens")?;

        entry
            .set_password(&json)
            .context("Failed to store tokens in keyring")?;

        debug!(username, "Stored tokens in keyring");
        Ok(())
    }

    /// Loads tokens from the system keyring, `None` if nothing is stored
    pub fn load(username: &str) -> anyhow::Result<Option<Token>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(json) => {
                let token: Token = serde_json::from_str(&json)
                    .context("Failed to deserialize tokens from keyring")?;
                debug!(username, "Loaded tokens from keyring");
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes tokens from the system keyring
    pub fn clear(username: &str) -> anyhow::Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// PKCEFlow
// ============================================================================

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 PKCE flow implementation using the `oauth2` crate
pub struct PKCEFlow {
    client: ConfiguredClient,
    scopes: Vec<String>,
}

impl PKCEFlow {
    /// Creates a flow for the given endpoints and credentials
    ///
    /// `redirect_uri` is only needed for the authorization code exchange;
    /// refreshing works without it.
    pub fn new(
        endpoints: &OAuthEndpoints,
        request: &AuthRequest,
        redirect_uri: Option<&str>,
    ) -> Result<Self, AuthError> {
        let auth_url = AuthUrl::new(endpoints.auth_url.clone())
            .map_err(|e| AuthError::Configuration(format!("Invalid authorization URL: {e}")))?;
        let token_url = TokenUrl::new(endpoints.token_url.clone())
            .map_err(|e| AuthError::Configuration(format!("Invalid token URL: {e}")))?;

        let mut client = BasicClient::new(ClientId::new(request.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_auth_type(AuthType::RequestBody);

        if !request.client_secret.is_empty() {
            client = client.set_client_secret(ClientSecret::new(request.client_secret.clone()));
        }

        if let Some(uri) = redirect_uri {
            let redirect = RedirectUrl::new(uri.to_string())
                .map_err(|e| AuthError::Configuration(format!("Invalid redirect URI: {e}")))?;
            client = client.set_redirect_uri(redirect);
        }

        Ok(Self {
            client,
            scopes: request.scopes.clone(),
        })
    }

    /// Generates an authorization URL with a PKCE challenge
    ///
    /// # Returns
    /// A tuple of `(authorization_url, csrf_token, pkce_verifier)`.
    /// The `pkce_verifier` must be kept until the code exchange step.
    pub fn generate_auth_url(
        &self,
        extra_params: &[(&'static str, &'static str)],
    ) -> (String, CsrfToken, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = self.client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }
        for (name, value) in extra_params {
            auth_request = auth_request.add_extra_param(*name, *value);
        }

        let (auth_url, csrf_token) = auth_request.set_pkce_challenge(pkce_challenge).url();
        (auth_url.to_string(), csrf_token, pkce_verifier)
    }

    /// Exchanges an authorization code for OAuth tokens
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<Token, AuthError> {
        info!("Exchanging authorization code for tokens");

        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(http)
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        Ok(to_token(&response, None))
    }

    /// Refreshes an access token using a refresh token
    ///
    /// Providers that do not rotate refresh tokens omit one from the
    /// response; the previous refresh token is kept in that case.
    pub async fn refresh_token(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<Token, AuthError> {
        info!("Refreshing access token");

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http)
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        Ok(to_token(&response, Some(refresh_token)))
    }
}

fn to_token(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> Token {
    let expires_in = response
        .expires_in()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    Token {
        access_token: response.access_token().secret().to_string(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in)),
    }
}

// ============================================================================
// LocalCallbackServer
// ============================================================================

/// Parameters extracted from the OAuth2 callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// The authorization code
    pub code: String,
    /// The CSRF state parameter
    pub state: String,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<Result<CallbackParams, AuthError>>>>>;

/// Loopback HTTP listener for the OAuth2 redirect
///
/// Binds `127.0.0.1:<port>` (port 0 picks a free port) and serves requests
/// until one carries either an authorization code or an OAuth error.
/// Unrelated requests such as `/favicon.ico` get a 404 and are ignored.
pub struct LocalCallbackServer {
    listener: TcpListener,
    port: u16,
}

impl LocalCallbackServer {
    /// Binds the listener
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::Callback(format!("Failed to bind 127.0.0.1:{port}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Callback(e.to_string()))?
            .port();
        debug!(port, "OAuth callback server listening");
        Ok(Self { listener, port })
    }

    /// The redirect URI to register with the authorization request
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    /// Waits for the redirect, giving up after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<CallbackParams, AuthError> {
        let (tx, mut rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));
        let listener = self.listener;

        let accept_loop = async {
            loop {
                tokio::select! {
                    received = &mut rx => {
                        return received.unwrap_or_else(|_| {
                            Err(AuthError::Callback("Callback channel closed".to_string()))
                        });
                    }
                    accepted = listener.accept() => {
                        let (stream, _addr) = accepted.map_err(|e| {
                            AuthError::Callback(format!("Failed to accept connection: {e}"))
                        })?;
                        tokio::spawn(serve_connection(stream, Arc::clone(&tx)));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, accept_loop)
            .await
            .map_err(|_| AuthError::Timeout(timeout))?
    }
}

async fn serve_connection(stream: TcpStream, tx: CallbackSender) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let tx = Arc::clone(&tx);
        async move {
            let outcome = parse_callback(&req.uri().to_string());
            let response = match &outcome {
                Some(Ok(_)) => html_response(StatusCode::OK, success_html()),
                Some(Err(e)) => html_response(StatusCode::BAD_REQUEST, error_html(&e.to_string())),
                None => html_response(
                    StatusCode::NOT_FOUND,
                    error_html("Not an authorization callback"),
                ),
            };
            if let Some(result) = outcome {
                if let Some(sender) = tx.lock().await.take() {
                    let _ = sender.send(result);
                }
            }
            Ok::<_, Infallible>(response)
        }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        warn!("Callback server connection error: {}", e);
    }
}

/// Interprets a callback request URI
///
/// Returns `None` when the request carries neither a code nor an error.
fn parse_callback(uri: &str) -> Option<Result<CallbackParams, AuthError>> {
    let url = url::Url::parse(&format!("http://localhost{uri}")).ok()?;
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            "error_description" => description = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let reason = match description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Some(Err(AuthError::Denied(reason)));
    }

    code.map(|code| {
        Ok(CallbackParams {
            code,
            state: state.unwrap_or_default(),
        })
    })
}

fn html_response(status: StatusCode, html: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(html)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Returns the HTML for a successful authorization page
fn success_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>MailVault - Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Authorization Successful</h1>
    <p>MailVault can now read your mailbox.</p>
    <p>You can close this window; the backup continues in your terminal.</p>
</body>
</html>"#
        .to_string()
}

/// Returns the HTML for an authorization error page
fn error_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>MailVault - Authorization Error</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Authorization Error</h1>
    <p>{}</p>
    <p>Please close this window and try again.</p>
</body>
</html>"#,
        html_escape(message)
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// OAuthTokenProvider
// ============================================================================

/// Callback receiving the authorization URL the user has to open
pub type AuthUrlNotice = Arc<dyn Fn(&str) + Send + Sync>;

/// [`ITokenProvider`] running the interactive OAuth2 flow
///
/// 1. Tries a refresh token cached in the keyring (if enabled)
/// 2. Otherwise opens the browser on the provider's consent page
/// 3. Waits for the redirect on the loopback listener
/// 4. Exchanges the code and caches the new tokens
pub struct OAuthTokenProvider {
    kind: ProviderKind,
    endpoints: OAuthEndpoints,
    redirect_port: u16,
    auth_timeout: Duration,
    use_keyring: bool,
    open_browser: bool,
    on_auth_url: Option<AuthUrlNotice>,
    request_timeout: Duration,
}

impl fmt::Debug for OAuthTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenProvider")
            .field("kind", &self.kind)
            .field("endpoints", &self.endpoints)
            .field("redirect_port", &self.redirect_port)
            .field("auth_timeout", &self.auth_timeout)
            .field("use_keyring", &self.use_keyring)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl OAuthTokenProvider {
    /// Creates a provider using the preset endpoints of `kind`
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            endpoints: kind.endpoints(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            use_keyring: true,
            open_browser: true,
            on_auth_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the OAuth endpoints (useful for testing)
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = port;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Bounds every call to the token endpoint
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables the keyring token cache
    pub fn with_keyring(mut self, enabled: bool) -> Self {
        self.use_keyring = enabled;
        self
    }

    /// Enables or disables launching the system browser
    pub fn with_browser(mut self, enabled: bool) -> Self {
        self.open_browser = enabled;
        self
    }

    /// Registers a callback that receives the authorization URL
    pub fn with_auth_url_notice(mut self, notice: AuthUrlNotice) -> Self {
        self.on_auth_url = Some(notice);
        self
    }

    /// Returns the provider kind
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn keyring_user(&self, request: &AuthRequest) -> String {
        format!("{}:{}", self.kind, request.client_id)
    }

    fn scoped(&self, request: &AuthRequest) -> AuthRequest {
        let mut request = request.clone();
        if request.scopes.is_empty() {
            request.scopes = self.kind.scopes();
        }
        request
    }

    /// Client for the token endpoint; redirects are not followed
    fn http_client(&self) -> Result<reqwest::Client, AuthError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Configuration(format!("could not build HTTP client: {e}")))
    }

    // Keyring backends block (D-Bus, Keychain), so they run off the runtime.

    async fn load_cached(&self, request: &AuthRequest) -> anyhow::Result<Option<Token>> {
        let user = self.keyring_user(request);
        tokio::task::spawn_blocking(move || KeyringTokenStorage::load(&user)).await?
    }

    async fn cache(&self, request: &AuthRequest, token: &Token) {
        if !self.use_keyring {
            return;
        }
        let user = self.keyring_user(request);
        let token = token.clone();
        let stored = tokio::task::spawn_blocking(move || KeyringTokenStorage::store(&user, &token))
            .await
            .unwrap_or_else(|e| Err(anyhow::Error::from(e)));
        if let Err(e) = stored {
            warn!(error = %e, "Could not cache tokens in keyring");
        }
    }

    async fn refresh_uncached(
        &self,
        request: &AuthRequest,
        token: &Token,
    ) -> Result<Token, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Refresh("no refresh token available".to_string()))?;
        let flow = PKCEFlow::new(&self.endpoints, request, None)?;
        flow.refresh_token(&self.http_client()?, refresh_token).await
    }

    async fn interactive(&self, request: &AuthRequest) -> Result<Token, AuthError> {
        let server = LocalCallbackServer::bind(self.redirect_port).await?;
        let flow = PKCEFlow::new(&self.endpoints, request, Some(&server.redirect_uri()))?;
        let (auth_url, csrf, verifier) = flow.generate_auth_url(self.kind.extra_auth_params());

        info!(provider = %self.kind, "Waiting for authorization in the browser");
        if let Some(notice) = &self.on_auth_url {
            notice(&auth_url);
        }
        if self.open_browser {
            if let Err(e) = webbrowser::open(&auth_url) {
                warn!(error = %e, "Could not open a browser, open the authorization URL manually");
            }
        }

        let callback = server.wait(self.auth_timeout).await?;
        if callback.state != *csrf.secret() {
            return Err(AuthError::Callback(
                "state parameter does not match the request".to_string(),
            ));
        }

        flow.exchange_code(&self.http_client()?, callback.code, verifier).await
    }
}

#[async_trait::async_trait]
impl ITokenProvider for OAuthTokenProvider {
    async fn authorize(&self, request: &AuthRequest) -> Result<Token, AuthError> {
        if request.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client id is required".to_string()));
        }
        let request = self.scoped(request);

        if self.use_keyring {
            match self.load_cached(&request).await {
                Ok(Some(cached)) if cached.refresh_token.is_some() => {
                    match self.refresh_uncached(&request, &cached).await {
                        Ok(token) => {
                            info!(provider = %self.kind, "Reusing cached authorization");
                            self.cache(&request, &token).await;
                            return Ok(token);
                        }
                        Err(e) => {
                            warn!(error = %e, "Cached authorization rejected, starting interactive flow")
                        }
                    }
                }
                Ok(_) => debug!("No cached authorization"),
                Err(e) => warn!(error = %e, "Keyring unavailable, skipping token cache"),
            }
        }

        let token = self.interactive(&request).await?;
        self.cache(&request, &token).await;
        info!(provider = %self.kind, "Authorization successful");
        Ok(token)
    }

    async fn refresh(&self, request: &AuthRequest, token: &Token) -> Result<Token, AuthError> {
        let request = self.scoped(request);
        let refreshed = self.refresh_uncached(&request, token).await?;
        self.cache(&request, &refreshed).await;
        Ok(refreshed)
    }
}
