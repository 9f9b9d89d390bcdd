//! Interactive authorization-code + PKCE flow over a loopback server.
//!
//! Three actors race: the axum loopback server feeding a result channel,
//! the user's browser, and a five-minute timeout. Whichever fires first
//! wins; the server is then shut down with a five-second drain.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{Html, Redirect};
use axum::routing::get;
use oauth2::reqwest::async_http_client;
use oauth2::url::Url;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope};
use serde::Deserialize;
use sstart_types::{SsoConfig, Tokens};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use crate::browser::open_browser;
use crate::client::{OidcClient, build_oidc_client, tokens_from_response};
use crate::discovery::DiscoveryDocument;
use crate::error::AuthError;

/// Default loopback port.
const DEFAULT_PORT: u16 = 5747;

/// Default callback path.
const DEFAULT_CALLBACK_PATH: &str = "/auth/sstart";

/// Overall interactive login timeout.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// How long the loopback server gets to drain after the outcome is known.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str =
    "<html><body><h3>Signed in.</h3><p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str =
    "<html><body><h3>Sign-in failed.</h3><p>Check the terminal for details.</p></body></html>";

/// Shared state between the two loopback handlers.
struct FlowState {
    client: OidcClient,
    auth_url: String,
    expected_state: String,
    verifier: Mutex<Option<PkceCodeVerifier>>,
    result: mpsc::Sender<Result<Tokens, AuthError>>,
    userinfo_endpoint: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Check the callback query against the per-session state and extract the
/// authorization code.
fn validate_callback(params: &CallbackParams, expected_state: &str) -> Result<String, AuthError> {
    if let Some(error) = &params.error {
        let message = match &params.error_description {
            Some(detail) => format!("{error}: {detail}"),
            None => error.clone(),
        };
        return Err(AuthError::Flow(message));
    }
    match (&params.code, &params.state) {
        (Some(code), Some(state)) if state == expected_state => Ok(code.clone()),
        (Some(_), Some(_)) => Err(AuthError::Flow("state mismatch in callback".into())),
        _ => Err(AuthError::Flow("callback missing code or state".into())),
    }
}

/// Derive the loopback bind port and callback route from the redirect URI.
fn loopback_target(redirect: &str) -> Result<(u16, String), AuthError> {
    let url =
        Url::parse(redirect).map_err(|e| AuthError::Flow(format!("invalid redirect URI: {e}")))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let path = match url.path() {
        "" | "/" => DEFAULT_CALLBACK_PATH.to_string(),
        path => path.to_string(),
    };
    Ok((port, path))
}

async fn login(State(state): State<Arc<FlowState>>) -> Redirect {
    Redirect::temporary(&state.auth_url)
}

async fn callback(
    State(state): State<Arc<FlowState>>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = handle_callback(&state, params).await;
    let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    let _ = state.result.send(outcome).await;
    Html(page)
}

async fn handle_callback(state: &FlowState, params: CallbackParams) -> Result<Tokens, AuthError> {
    let code = validate_callback(&params, &state.expected_state)?;
    let verifier = state
        .verifier
        .lock()
        .await
        .take()
        .ok_or_else(|| AuthError::Flow("callback already handled".into()))?;

    let response = state
        .client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(async_http_client)
        .await
        .map_err(|e| AuthError::TokenExchange(e.to_string()))?;
    let tokens = tokens_from_response(&response);

    if let Some(url) = &state.userinfo_endpoint {
        match state
            .http
            .get(url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
        {
            Ok(resp) => tracing::debug!(status = %resp.status(), "fetched userinfo"),
            Err(err) => tracing::debug!(error = %err, "userinfo fetch failed"),
        }
    }

    Ok(tokens)
}

/// Run the interactive flow to completion.
pub(crate) async fn run_interactive(
    config: &SsoConfig,
    discovery: &DiscoveryDocument,
    http: &reqwest::Client,
) -> Result<Tokens, AuthError> {
    let redirect = config
        .redirect_uri
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{DEFAULT_PORT}{DEFAULT_CALLBACK_PATH}"));
    let (port, callback_path) = loopback_target(&redirect)?;

    let client = build_oidc_client(config, discovery, None)?.set_redirect_uri(
        RedirectUrl::new(redirect.clone()).map_err(|e| AuthError::Flow(e.to_string()))?,
    );

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let mut auth = client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(challenge);
    for scope in &config.scopes {
        auth = auth.add_scope(Scope::new(scope.clone()));
    }
    if let Some(mode) = &config.response_mode {
        auth = auth.add_extra_param("response_mode", mode.clone());
    }
    let (auth_url, session_state) = auth.url();

    let (tx, mut rx) = mpsc::channel(1);
    let flow = Arc::new(FlowState {
        client,
        auth_url: auth_url.to_string(),
        expected_state: session_state.secret().clone(),
        verifier: Mutex::new(Some(verifier)),
        result: tx,
        userinfo_endpoint: discovery.userinfo_endpoint.clone(),
        http: http.clone(),
    });

    let app = Router::new()
        .route("/login", get(login))
        .route(callback_path.as_str(), get(callback))
        .with_state(flow);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| AuthError::Flow(format!("cannot bind loopback port {port}: {e}")))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let login_url = format!("http://localhost:{port}/login");
    tracing::info!(url = %login_url, "opening browser for SSO sign-in");

    let outcome = match open_browser(&login_url) {
        Err(err) => Err(AuthError::Flow(format!("cannot open browser: {err}"))),
        Ok(()) => match timeout(LOGIN_TIMEOUT, rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(AuthError::Flow("loopback server closed unexpectedly".into())),
            Err(_) => Err(AuthError::Timeout),
        },
    };

    let _ = shutdown_tx.send(());
    if timeout(DRAIN_TIMEOUT, server).await.is_err() {
        tracing::debug!("loopback server did not drain within 5s");
    }

    outcome
}
