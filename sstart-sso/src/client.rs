//! The SSO client: grant selection, token lifecycle, persistence.

use std::time::Duration;

use chrono::Utc;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ExtraTokenFields, RefreshToken, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use sstart_types::{SsoConfig, Tokens};
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::discovery::{DiscoveryDocument, discover};
use crate::error::AuthError;
use crate::flow;
use crate::store::TokenStore;

/// Timeout applied to every OIDC HTTP exchange.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra token-endpoint fields beyond plain OAuth2: the OIDC ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IdTokenFields {
    /// The ID token, present when the `openid` scope was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

/// Token response carrying [`IdTokenFields`].
pub(crate) type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

/// oauth2 client specialized to [`OidcTokenResponse`].
pub(crate) type OidcClient = oauth2::Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Read the client secret from `SSTART_SSO_SECRET`. Empty counts as unset.
pub fn client_secret_from_env() -> Option<String> {
    std::env::var(crate::CLIENT_SECRET_ENV)
        .ok()
        .filter(|s| !s.is_empty())
}

/// Build the oauth2 client against the discovered endpoints.
pub(crate) fn build_oidc_client(
    config: &SsoConfig,
    discovery: &DiscoveryDocument,
    secret: Option<String>,
) -> Result<OidcClient, AuthError> {
    let endpoint_err = |message: String| AuthError::Discovery {
        issuer: config.issuer.clone(),
        message,
    };
    let auth_url = AuthUrl::new(discovery.authorization_endpoint.clone())
        .map_err(|e| endpoint_err(format!("bad authorization endpoint: {e}")))?;
    let token_url = TokenUrl::new(discovery.token_endpoint.clone())
        .map_err(|e| endpoint_err(format!("bad token endpoint: {e}")))?;
    Ok(OidcClient::new(
        ClientId::new(config.client_id.clone()),
        secret.map(ClientSecret::new),
        auth_url,
        Some(token_url),
    ))
}

/// Convert a token-endpoint response into the persisted record.
pub(crate) fn tokens_from_response(response: &OidcTokenResponse) -> Tokens {
    let expiry = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);
    let token_type = match response.token_type() {
        BasicTokenType::Bearer => "Bearer".to_string(),
        BasicTokenType::Mac => "MAC".to_string(),
        other => format!("{other:?}"),
    };
    Tokens {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        id_token: response.extra_fields().id_token.clone(),
        token_type: Some(token_type),
        expiry,
    }
}

/// OIDC client with persistent tokens.
///
/// State machine: unconfigured (no [`SsoConfig`]) → configured →
/// authenticated (tokens persisted) ⇄ refreshing → cleared ([`logout`]).
///
/// Grant selection in [`authenticate`]: client-credentials when
/// `SSTART_SSO_SECRET` is set and PKCE is not forced; the interactive
/// loopback flow otherwise. Client-credentials never falls back to
/// interactive; a misconfigured secret should fail loudly, not pop a
/// browser on a CI box.
///
/// [`authenticate`]: SsoClient::authenticate
/// [`logout`]: SsoClient::logout
pub struct SsoClient {
    config: SsoConfig,
    http: reqwest::Client,
    store: TokenStore,
    discovery: OnceCell<DiscoveryDocument>,
}

impl SsoClient {
    /// Create a client with the default (keyring + XDG file) token store.
    pub fn new(config: SsoConfig) -> Self {
        Self::with_store(config, TokenStore::new())
    }

    /// Create a client over an explicit token store.
    pub fn with_store(config: SsoConfig, store: TokenStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            store,
            discovery: OnceCell::new(),
        }
    }

    /// True when a token record is persisted. Says nothing about expiry;
    /// [`tokens`](SsoClient::tokens) refreshes expired records on demand.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.store.load(), Ok(Some(_)))
    }

    async fn discovery(&self) -> Result<&DiscoveryDocument, AuthError> {
        self.discovery
            .get_or_try_init(|| discover(&self.http, &self.config.issuer))
            .await
    }

    /// Obtain tokens, running a grant flow when needed.
    ///
    /// With `force` the already-authenticated short-circuit is skipped and
    /// the active flow re-runs unconditionally.
    pub async fn authenticate(&self, force: bool) -> Result<Tokens, AuthError> {
        if !force && self.is_authenticated() {
            return self.tokens().await;
        }

        let tokens = match (client_secret_from_env(), self.config.pkce.unwrap_or(false)) {
            (Some(secret), false) => self.client_credentials(secret).await?,
            _ => {
                let discovery = self.discovery().await?;
                flow::run_interactive(&self.config, discovery, &self.http).await?
            }
        };

        self.store.save(&tokens)?;
        Ok(tokens)
    }

    /// The current token record, refreshed once if expired.
    pub async fn tokens(&self) -> Result<Tokens, AuthError> {
        let Some(tokens) = self.store.load()? else {
            return Err(AuthError::NotAuthenticated);
        };
        if tokens.is_expired(Utc::now()) {
            return self.refresh().await;
        }
        Ok(tokens)
    }

    /// The current access token, refreshed once if expired.
    pub async fn get_access_token(&self) -> Result<String, AuthError> {
        Ok(self.tokens().await?.access_token.clone())
    }

    /// Run the refresh grant and rewrite the persisted record.
    pub async fn refresh(&self) -> Result<Tokens, AuthError> {
        let Some(current) = self.store.load()? else {
            return Err(AuthError::NotAuthenticated);
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(AuthError::NotAuthenticated);
        };

        let discovery = self.discovery().await?;
        let client = build_oidc_client(&self.config, discovery, client_secret_from_env())?;
        let response = timeout(
            EXCHANGE_TIMEOUT,
            client
                .exchange_refresh_token(&RefreshToken::new(refresh_token))
                .request_async(async_http_client),
        )
        .await
        .map_err(|_| AuthError::TokenExchange("refresh timed out".into()))?
        .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        let mut tokens = tokens_from_response(&response);
        // The refresh response may omit tokens that stay valid.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = current.refresh_token.clone();
        }
        if tokens.id_token.is_none() {
            tokens.id_token = current.id_token.clone();
        }

        self.store.save(&tokens)?;
        tracing::debug!("refreshed SSO tokens");
        Ok(tokens)
    }

    /// Non-interactive client-credentials grant.
    async fn client_credentials(&self, secret: String) -> Result<Tokens, AuthError> {
        let discovery = self.discovery().await?;
        let client = build_oidc_client(&self.config, discovery, Some(secret))?;

        let mut request = client.exchange_client_credentials();
        for scope in &self.config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let response = timeout(EXCHANGE_TIMEOUT, request.request_async(async_http_client))
            .await
            .map_err(|_| AuthError::TokenExchange("client-credentials grant timed out".into()))?
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        tracing::debug!("obtained tokens via client-credentials grant");
        Ok(tokens_from_response(&response))
    }

    /// Drop the persisted record from keyring and file.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()
    }
}
