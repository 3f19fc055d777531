//! OAuth2/OIDC token lifecycle: discovery, token exchange, and the four
//! authorizer variants that produce request headers.

mod authorizer;
mod connector;
mod data;
mod loopback;

pub use authorizer::{
    AuthorizationCodeAuthorizer, Authorizer, ClientCredentialsAuthorizer, DeviceFlowAuthorizer,
    StaticBearerAuthorizer,
};
pub use connector::OAuthConnector;
pub use data::{AccessToken, DeviceFlowResponse, OAuthScopes, OidcConfig};
