//! Discovery and token-endpoint plumbing shared by every authorizer
//! variant. All OAuth HTTP calls are routed through the crate's own
//! `Transport` so they are bound by the same retry/redirect rules as
//! ordinary API calls.

use tokio::sync::OnceCell;
use url::Url;

use crate::error::AuthFlowError;
use crate::oauth::data::{AccessToken, OidcConfig};
use crate::transport::Transport;

const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "/connect/authorize";
const DEFAULT_TOKEN_ENDPOINT: &str = "/connect/token";

/// Talks to a single identity provider's discovery and token endpoints.
pub struct OAuthConnector {
    transport: Transport,
    issuer: Url,
    client_id: String,
    discovered: OnceCell<OidcConfig>,
}

impl OAuthConnector {
    pub fn new(transport: Transport, issuer: Url, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            issuer,
            client_id: client_id.into(),
            discovered: OnceCell::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    /// Fetches and caches `{issuer}/.well-known/openid-configuration`.
    pub async fn discover(&self) -> Result<&OidcConfig, AuthFlowError> {
        self.discovered
            .get_or_try_init(|| async {
                let mut url = self.issuer.clone();
                url.set_path(&format!(
                    "{}/.well-known/openid-configuration",
                    url.path().trim_end_matches('/')
                ));
                let mut headers = crate::headers::HeaderDict::new();
                headers.insert("Accept", "application/json");
                let response = self
                    .transport
                    .request(reqwest::Method::GET, url.as_str(), Some(headers), None, None, None)
                    .await?;
                let doc: serde_json::Value = response
                    .json()
                    .map_err(|e| AuthFlowError::RefreshFailed(format!("invalid discovery document: {e}")))?;
                OidcConfig::from_discovery_document(self.issuer.as_str(), &doc)
            })
            .await
    }

    pub async fn authorization_endpoint(&self) -> Url {
        let suffix = match self.discover().await {
            Ok(config) => config.authorization_endpoint.clone(),
            Err(_) => DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        };
        self.issuer.join(&suffix).unwrap_or_else(|_| self.issuer.clone())
    }

    pub async fn token_endpoint(&self) -> Url {
        let suffix = match self.discover().await {
            Ok(config) => config.token_endpoint.clone(),
            Err(_) => DEFAULT_TOKEN_ENDPOINT.to_string(),
        };
        self.issuer.join(&suffix).unwrap_or_else(|_| self.issuer.clone())
    }

    pub async fn device_authorization_endpoint(&self) -> Result<Url, AuthFlowError> {
        let config = self.discover().await?;
        let suffix = config
            .device_authorization_endpoint
            .as_deref()
            .ok_or(AuthFlowError::MissingDiscoveryField("device_authorization_endpoint"))?;
        Ok(self
            .issuer
            .join(suffix)
            .map_err(|e| AuthFlowError::RefreshFailed(e.to_string()))?)
    }

    /// POSTs `application/x-www-form-urlencoded` `params` to the token
    /// endpoint and decodes the response as an [`AccessToken`].
    pub async fn post_token_request(&self, params: Vec<(String, String)>) -> Result<AccessToken, AuthFlowError> {
        let endpoint = self.token_endpoint().await;
        let mut headers = crate::headers::HeaderDict::new();
        headers.insert("Content-Type", "application/x-www-form-urlencoded");
        let response = self
            .transport
            .request(reqwest::Method::POST, endpoint.as_str(), Some(headers), Some(params), None, None)
            .await?;

        if response.status >= 400 {
            return Err(AuthFlowError::RefreshFailed(format!(
                "token endpoint returned {}: {}",
                response.status,
                String::from_utf8_lossy(&response.data)
            )));
        }

        let mut token: AccessToken = response
            .json()
            .and_then(serde_json::from_value)
            .map_err(|e| AuthFlowError::RefreshFailed(format!("invalid token response: {e}")))?;
        token.issued_at = std::time::SystemTime::now();
        Ok(token)
    }

    /// POSTs a device-authorization request and decodes the response.
    pub async fn post_device_authorization_request(
        &self,
        scope: &str,
    ) -> Result<crate::oauth::data::DeviceFlowResponse, AuthFlowError> {
        let endpoint = self.device_authorization_endpoint().await?;
        let mut headers = crate::headers::HeaderDict::new();
        headers.insert("Content-Type", "application/x-www-form-urlencoded");
        let params = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("scope".to_string(), scope.to_string()),
        ];
        let response = self
            .transport
            .request(reqwest::Method::POST, endpoint.as_str(), Some(headers), Some(params), None, None)
            .await?;
        let value: serde_json::Value = response
            .json()
            .map_err(|e| AuthFlowError::RefreshFailed(format!("invalid device authorization response: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| AuthFlowError::RefreshFailed(format!("invalid device authorization response: {e}")))
    }
}
