//! Authorizer variants: static bearer, client-credentials,
//! authorization-code, device-flow.
//!
//! All state lives behind one mutex per authorizer; `get_default_headers`
//! waits on the mutex, checks expiry, triggers a refresh if expired, and
//! returns the `Authorization` header. Because the mutex serializes
//! access, concurrent callers share a single in-flight refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;

use crate::error::AuthFlowError;
use crate::headers::HeaderDict;
use crate::oauth::connector::OAuthConnector;
use crate::oauth::data::{AccessToken, OAuthScopes};
use crate::oauth::loopback::LoopbackReceiver;

/// Produces auth headers and refreshes the underlying token on demand.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn get_default_headers(&self) -> Result<HeaderDict, AuthFlowError>;

    /// Attempts to obtain a fresh token. Returns `true` iff a new usable
    /// token was obtained.
    async fn refresh_token(&self) -> Result<bool, AuthFlowError>;
}

fn bearer_headers(token: &AccessToken) -> HeaderDict {
    let mut headers = HeaderDict::new();
    headers.insert("Authorization", token.bearer_header_value());
    headers
}

/// Returns a fixed bearer token. Never refreshes.
pub struct StaticBearerAuthorizer {
    token: String,
}

impl StaticBearerAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl Authorizer for StaticBearerAuthorizer {
    async fn get_default_headers(&self) -> Result<HeaderDict, AuthFlowError> {
        let mut headers = HeaderDict::new();
        headers.insert("Authorization", format!("Bearer {}", self.token));
        Ok(headers)
    }

    async fn refresh_token(&self) -> Result<bool, AuthFlowError> {
        Ok(false)
    }
}

struct TokenCache {
    token: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    fn new() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    /// Returns the cached token if present and unexpired, else calls
    /// `fetch` to obtain a fresh one and caches it.
    async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<AccessToken, AuthFlowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<AccessToken, AuthFlowError>>,
    {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }
        let fresh = fetch().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Exchanges `client_id`/`client_secret` for a token via
/// `grant_type=client_credentials`, caching the result until expiry.
pub struct ClientCredentialsAuthorizer {
    connector: Arc<OAuthConnector>,
    client_secret: String,
    scopes: OAuthScopes,
    cache: TokenCache,
}

impl ClientCredentialsAuthorizer {
    pub fn new(connector: Arc<OAuthConnector>, client_secret: impl Into<String>, scopes: OAuthScopes) -> Self {
        Self {
            connector,
            client_secret: client_secret.into(),
            scopes,
            cache: TokenCache::new(),
        }
    }

    async fn fetch(&self) -> Result<AccessToken, AuthFlowError> {
        self.connector
            .post_token_request(vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), self.connector.client_id().to_string()),
                ("client_secret".to_string(), self.client_secret.clone()),
                ("scope".to_string(), self.scopes.to_string()),
            ])
            .await
    }
}

#[async_trait]
impl Authorizer for ClientCredentialsAuthorizer {
    async fn get_default_headers(&self) -> Result<HeaderDict, AuthFlowError> {
        let token = self.cache.get_or_refresh(|| self.fetch()).await?;
        Ok(bearer_headers(&token))
    }

    async fn refresh_token(&self) -> Result<bool, AuthFlowError> {
        let fresh = self.fetch().await?;
        *self.cache.token.lock().await = Some(fresh);
        Ok(true)
    }
}

/// Drives the authorization-code grant via a local loopback redirect
/// receiver, and refreshes via the refresh token when `offline_access`
/// was requested.
pub struct AuthorizationCodeAuthorizer {
    connector: Arc<OAuthConnector>,
    scopes: OAuthScopes,
    redirect_timeout: Duration,
    cache: TokenCache,
}

impl AuthorizationCodeAuthorizer {
    pub fn new(connector: Arc<OAuthConnector>, scopes: OAuthScopes) -> Self {
        Self {
            connector,
            scopes,
            redirect_timeout: Duration::from_secs(300),
            cache: TokenCache::new(),
        }
    }

    /// Runs the full interactive flow: starts the loopback receiver,
    /// builds and returns the authorization URL the caller should open
    /// in a browser, waits for the redirect, then exchanges the code.
    pub async fn authorize_interactive(&self) -> Result<AccessToken, AuthFlowError> {
        let receiver = LoopbackReceiver::bind()
            .await
            .map_err(|e| AuthFlowError::AuthorizationFailed(e.to_string()))?;
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let redirect_uri = receiver.redirect_uri();
        let mut url = self.connector.authorization_endpoint().await;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.connector.client_id())
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", &self.scopes.to_string())
            .append_pair("state", &state);

        tracing::debug!(%url, "starting authorization-code flow");

        let code = receiver.wait_for_code(&state, self.redirect_timeout).await?;

        let token = self
            .connector
            .post_token_request(vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("code".to_string(), code),
                ("redirect_uri".to_string(), redirect_uri),
                ("client_id".to_string(), self.connector.client_id().to_string()),
            ])
            .await?;

        if self.scopes.contains(OAuthScopes::OPENID) {
            token.validate_id_token(self.connector.issuer().as_str(), self.connector.client_id())?;
        }

        *self.cache.token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn refresh_via_refresh_token(&self, refresh_token: &str) -> Result<AccessToken, AuthFlowError> {
        self.connector
            .post_token_request(vec![
                ("grant_type".to_string(), "refresh_token".to_string()),
                ("refresh_token".to_string(), refresh_token.to_string()),
                ("client_id".to_string(), self.connector.client_id().to_string()),
            ])
            .await
    }
}

#[async_trait]
impl Authorizer for AuthorizationCodeAuthorizer {
    async fn get_default_headers(&self) -> Result<HeaderDict, AuthFlowError> {
        let mut guard = self.cache.token.lock().await;
        let expired = guard.as_ref().map(|t| t.is_expired()).unwrap_or(true);
        if expired {
            let refresh_token = guard.as_ref().and_then(|t| t.refresh_token.clone());
            match refresh_token {
                Some(refresh_token) => {
                    drop(guard);
                    let fresh = self.refresh_via_refresh_token(&refresh_token).await?;
                    guard = self.cache.token.lock().await;
                    *guard = Some(fresh);
                }
                None if guard.is_none() => {
                    return Err(AuthFlowError::RefreshFailed(
                        "no cached token available; call authorize_interactive() first".into(),
                    ));
                }
                None => {
                    return Err(AuthFlowError::RefreshFailed(
                        "token expired and no refresh token is available".into(),
                    ));
                }
            }
        }
        let token = guard.as_ref().expect("token present after refresh check");
        Ok(bearer_headers(token))
    }

    async fn refresh_token(&self) -> Result<bool, AuthFlowError> {
        let refresh_token = self
            .cache
            .token
            .lock()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.clone());
        match refresh_token {
            Some(refresh_token) => {
                let token = self.refresh_via_refresh_token(&refresh_token).await?;
                *self.cache.token.lock().await = Some(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Polls the device-authorization endpoint until the user completes the
/// flow or it expires. Never refreshes: refresh tokens are not issued
/// for device flow.
pub struct DeviceFlowAuthorizer {
    connector: Arc<OAuthConnector>,
    scopes: OAuthScopes,
    cache: TokenCache,
}

impl DeviceFlowAuthorizer {
    pub fn new(connector: Arc<OAuthConnector>, scopes: OAuthScopes) -> Self {
        Self {
            connector,
            scopes,
            cache: TokenCache::new(),
        }
    }

    /// Starts the device flow, returning the verification details the
    /// caller should display to the user, then polls until the user
    /// authorizes or the flow expires.
    pub async fn authorize_interactive(&self) -> Result<AccessToken, AuthFlowError> {
        let device_flow = self
            .connector
            .post_device_authorization_request(&self.scopes.to_string())
            .await?;
        tracing::info!(%device_flow, "waiting for device flow authorization");

        let mut retry = device_flow.retry();
        let outcome = retry
            .run(|_attempt| {
                let device_code = device_flow.device_code.clone();
                async move {
                    match self
                        .connector
                        .post_token_request(vec![
                            (
                                "grant_type".to_string(),
                                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
                            ),
                            ("device_code".to_string(), device_code),
                            ("client_id".to_string(), self.connector.client_id().to_string()),
                        ])
                        .await
                    {
                        Ok(token) => crate::retry::Action::Done(token),
                        Err(e) => crate::retry::Action::Retry(e),
                    }
                }
            })
            .await;

        let token = match outcome {
            Ok(token) => token,
            Err(crate::retry::RetryError::Fatal(e)) => return Err(e),
            Err(crate::retry::RetryError::Exhausted(_)) => return Err(AuthFlowError::DeviceFlowExpired),
        };

        *self.cache.token.lock().await = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Authorizer for DeviceFlowAuthorizer {
    async fn get_default_headers(&self) -> Result<HeaderDict, AuthFlowError> {
        let guard = self.cache.token.lock().await;
        match guard.as_ref() {
            Some(token) if !token.is_expired() => Ok(bearer_headers(token)),
            _ => Err(AuthFlowError::RefreshFailed(
                "no valid token; call authorize_interactive() first".into(),
            )),
        }
    }

    async fn refresh_token(&self) -> Result<bool, AuthFlowError> {
        Ok(false)
    }
}
