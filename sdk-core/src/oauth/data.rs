//! OAuth2/OIDC data model: scopes, tokens, discovery documents, device flow.

use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthFlowError;
use crate::retry::{BackoffMethod, Retry};

const ALLOWABLE_CLOCK_DRIFT: Duration = Duration::from_secs(5 * 60);

/// Public OAuth scopes for authenticating against the platform's APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OAuthScopes(u32);

impl OAuthScopes {
    pub const OPENID: Self = Self(1 << 0);
    pub const PROFILE: Self = Self(1 << 1);
    pub const ORGANIZATION: Self = Self(1 << 2);
    pub const EMAIL: Self = Self(1 << 3);
    pub const ADDRESS: Self = Self(1 << 4);
    pub const PHONE: Self = Self(1 << 5);
    pub const OFFLINE_ACCESS: Self = Self(1 << 6);
    pub const EVO_DISCOVERY: Self = Self(1 << 7);
    pub const EVO_WORKSPACE: Self = Self(1 << 8);
    pub const EVO_BLOCKSYNC: Self = Self(1 << 9);
    pub const EVO_OBJECT: Self = Self(1 << 10);
    pub const EVO_FILE: Self = Self(1 << 11);

    pub const NONE: Self = Self(0);

    pub fn default_scopes() -> Self {
        Self::OPENID | Self::PROFILE | Self::ORGANIZATION | Self::EMAIL | Self::EVO_DISCOVERY | Self::EVO_WORKSPACE
    }

    pub fn all() -> Self {
        Self::default_scopes() | Self::EVO_BLOCKSYNC | Self::EVO_OBJECT | Self::EVO_FILE
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Space-separated scope list suitable for an OAuth request parameter.
    pub fn as_string(self) -> String {
        const ORDERED: &[(OAuthScopes, &str)] = &[
            (OAuthScopes::OPENID, "openid"),
            (OAuthScopes::PROFILE, "profile"),
            (OAuthScopes::ORGANIZATION, "organization"),
            (OAuthScopes::EMAIL, "email"),
            (OAuthScopes::ADDRESS, "address"),
            (OAuthScopes::PHONE, "phone"),
            (OAuthScopes::OFFLINE_ACCESS, "offline_access"),
            (OAuthScopes::EVO_DISCOVERY, "evo.discovery"),
            (OAuthScopes::EVO_WORKSPACE, "evo.workspace"),
            (OAuthScopes::EVO_BLOCKSYNC, "evo.blocksync"),
            (OAuthScopes::EVO_OBJECT, "evo.object"),
            (OAuthScopes::EVO_FILE, "evo.file"),
        ];
        ORDERED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::ops::BitOr for OAuthScopes {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for OAuthScopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// A bearer token response from an OAuth server (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token_type: String,
    pub access_token: String,
    pub expires_in: Option<u64>,
    #[serde(skip, default = "SystemTime::now")]
    pub issued_at: SystemTime,
    pub scope: Option<String>,
    /// Present only for authorization-code flow responses.
    pub id_token: Option<String>,
    /// Present only when `offline_access` was granted.
    pub refresh_token: Option<String>,
}

impl AccessToken {
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_in
            .map(|secs| self.issued_at + Duration::from_secs(secs))
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(at) => SystemTime::now() > at,
            None => false,
        }
    }

    pub fn bearer_header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Validates an ID token per the OpenID Connect Basic Client spec.
    /// Issuer validation is skipped for hosts under `seequent.com`, which
    /// are not fully OIDC-compliant.
    pub fn validate_id_token(&self, issuer: &str, client_id: &str) -> Result<(), AuthFlowError> {
        let id_token = self
            .id_token
            .as_deref()
            .ok_or_else(|| AuthFlowError::InvalidIdToken("response did not include an id_token".into()))?;

        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthFlowError::InvalidIdToken("malformed JWT".into()))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| AuthFlowError::InvalidIdToken(format!("unable to decode id_token: {e}")))?;
        let claims: serde_json::Value = serde_json::from_slice(&decoded)
            .map_err(|e| AuthFlowError::InvalidIdToken(format!("unable to decode id_token: {e}")))?;

        let issuer_url = Url::parse(issuer)
            .map_err(|e| AuthFlowError::InvalidIdToken(format!("invalid issuer: {e}")))?;
        let skip_issuer_check = issuer_url
            .host_str()
            .map(|h| h.ends_with(".seequent.com"))
            .unwrap_or(false);

        if !skip_issuer_check {
            if claims.get("iss").and_then(|v| v.as_str()) != Some(issuer) {
                return Err(AuthFlowError::InvalidIdToken(
                    "issuer identifier does not match the value of the iss claim".into(),
                ));
            }
        }

        let aud_contains_client = match claims.get("aud") {
            Some(serde_json::Value::String(s)) => s == client_id,
            Some(serde_json::Value::Array(values)) => {
                values.iter().any(|v| v.as_str() == Some(client_id))
            }
            _ => false,
        };
        if !aud_contains_client {
            return Err(AuthFlowError::InvalidIdToken(
                "audience claim does not contain the client_id value".into(),
            ));
        }

        let exp = claims
            .get("exp")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AuthFlowError::InvalidIdToken("id_token missing exp claim".into()))?;
        let exp_with_drift =
            SystemTime::UNIX_EPOCH + Duration::from_secs(exp) + ALLOWABLE_CLOCK_DRIFT;
        if self.issued_at > exp_with_drift {
            return Err(AuthFlowError::InvalidIdToken("token has expired".into()));
        }

        let iat = claims
            .get("iat")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AuthFlowError::InvalidIdToken("id_token missing iat claim".into()))?;
        let iat_claim = SystemTime::UNIX_EPOCH + Duration::from_secs(iat);
        let min_iat = self.issued_at - ALLOWABLE_CLOCK_DRIFT;
        let max_iat = self.issued_at + ALLOWABLE_CLOCK_DRIFT;
        if !(min_iat < iat_claim && iat_claim < max_iat) {
            return Err(AuthFlowError::InvalidIdToken(
                "token was issued too far away from the current time".into(),
            ));
        }

        Ok(())
    }
}

/// An OIDC discovery document, with endpoints normalized to paths
/// relative to the issuer.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub device_authorization_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
}

impl OidcConfig {
    /// Builds a config from a raw discovery document, validating that
    /// every endpoint is a URL under the issuer and rewriting it to the
    /// relative suffix.
    pub fn from_discovery_document(issuer: &str, doc: &serde_json::Value) -> Result<Self, AuthFlowError> {
        let relative = |field: &'static str, required: bool| -> Result<Option<String>, AuthFlowError> {
            match doc.get(field).and_then(|v| v.as_str()) {
                Some(value) => {
                    if !value.starts_with(issuer) {
                        return Err(AuthFlowError::EndpointNotUnderIssuer {
                            field,
                            value: value.to_string(),
                        });
                    }
                    Ok(Some(value[issuer.len()..].to_string()))
                }
                None if required => Err(AuthFlowError::MissingDiscoveryField(field)),
                None => Ok(None),
            }
        };

        Ok(Self {
            issuer: issuer.to_string(),
            authorization_endpoint: relative("authorization_endpoint", true)?.unwrap(),
            token_endpoint: relative("token_endpoint", true)?.unwrap(),
            device_authorization_endpoint: relative("device_authorization_endpoint", false)?,
            end_session_endpoint: relative("end_session_endpoint", false)?,
        })
    }
}

/// A response from the OAuth server to a device authorization request
/// (RFC 8628 §3.2).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFlowResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

impl DeviceFlowResponse {
    /// A `Retry` tuned to poll until `expires_in` elapses, at `interval`
    /// seconds per attempt.
    pub fn retry(&self) -> Retry {
        let max_attempts = (self.expires_in / self.interval).max(1) as u32;
        Retry::new(max_attempts, BackoffMethod::linear(self.interval as f64))
    }
}

impl std::fmt::Display for DeviceFlowResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Verification URL: {}\nUser code: {}",
            self.verification_uri, self.user_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_claims(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    #[test]
    fn validates_well_formed_id_token() {
        let now = SystemTime::now();
        let exp = now + Duration::from_secs(3600);
        let claims = serde_json::json!({
            "iss": "https://auth.example.com/",
            "aud": "my-client",
            "exp": exp.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
            "iat": now.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
        });
        let token = AccessToken {
            token_type: "Bearer".into(),
            access_token: "abc".into(),
            expires_in: Some(3600),
            issued_at: now,
            scope: None,
            id_token: Some(encode_claims(&claims)),
            refresh_token: None,
        };
        token
            .validate_id_token("https://auth.example.com/", "my-client")
            .unwrap();
    }

    #[test]
    fn rejects_audience_mismatch() {
        let now = SystemTime::now();
        let claims = serde_json::json!({
            "iss": "https://auth.example.com/",
            "aud": "other-client",
            "exp": (now + Duration::from_secs(3600)).duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
            "iat": now.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
        });
        let token = AccessToken {
            token_type: "Bearer".into(),
            access_token: "abc".into(),
            expires_in: Some(3600),
            issued_at: now,
            scope: None,
            id_token: Some(encode_claims(&claims)),
            refresh_token: None,
        };
        assert!(token
            .validate_id_token("https://auth.example.com/", "my-client")
            .is_err());
    }

    #[test]
    fn skips_issuer_check_for_seequent_id() {
        let now = SystemTime::now();
        let claims = serde_json::json!({
            "iss": "https://totally-different-issuer.example/",
            "aud": "my-client",
            "exp": (now + Duration::from_secs(3600)).duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
            "iat": now.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
        });
        let token = AccessToken {
            token_type: "Bearer".into(),
            access_token: "abc".into(),
            expires_in: Some(3600),
            issued_at: now,
            scope: None,
            id_token: Some(encode_claims(&claims)),
            refresh_token: None,
        };
        token
            .validate_id_token("https://login.seequent.com/", "my-client")
            .unwrap();
    }

    #[test]
    fn device_flow_retry_divides_expiry_by_interval() {
        let response = DeviceFlowResponse {
            device_code: "d".into(),
            user_code: "u".into(),
            verification_uri: "https://example.com/device".into(),
            verification_uri_complete: None,
            expires_in: 300,
            interval: 5,
        };
        assert_eq!(response.retry().max_attempts(), 60);
    }
}
