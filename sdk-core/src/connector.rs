//! Composes a [`Transport`] and an [`Authorizer`] for a single `base_url`,
//! retrying once on HTTP 401 after a token refresh.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ResponseContent, ServiceError, TransportError};
use crate::headers::HeaderDict;
use crate::oauth::Authorizer;
use crate::transport::{Body, HttpResponse, RequestTimeout, Transport};

/// A function that decodes a response body for one expected status code.
pub type ResponseDecoder<T> = Box<dyn Fn(&HttpResponse) -> Result<T, ServiceError> + Send + Sync>;

/// Maps expected HTTP status codes to a decoder for the success type.
pub type ResponseTypes<T> = HashMap<u16, ResponseDecoder<T>>;

/// Builds a [`ResponseTypes`] map whose only entry decodes `status` as
/// JSON into `T`.
pub fn json_response<T: DeserializeOwned + 'static>(status: u16) -> ResponseTypes<T> {
    let mut map: ResponseTypes<T> = HashMap::new();
    map.insert(
        status,
        Box::new(|response: &HttpResponse| {
            response.json().and_then(serde_json::from_value).map_err(|e| {
                service_error_from_response(response, ResponseContent::Bytes(response.data.clone()))
                    .with_message(e.to_string())
            })
        }),
    );
    map
}

impl ServiceError {
    fn with_message(mut self, message: String) -> Self {
        self.reason = message;
        self
    }
}

fn decode_content(response: &HttpResponse) -> ResponseContent {
    if response.data.is_empty() {
        return ResponseContent::Empty;
    }
    match response.json() {
        Ok(value) => ResponseContent::Json(value),
        Err(_) => ResponseContent::Bytes(response.data.clone()),
    }
}

fn service_error_from_response(response: &HttpResponse, content: ResponseContent) -> ServiceError {
    ServiceError {
        status: response.status,
        reason: response.reason.clone(),
        content,
        headers: response.headers.clone(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Auth(#[from] crate::error::AuthFlowError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("invalid request path or query: {0}")]
    InvalidRequest(String),
}

impl From<ConnectorError> for crate::error::JobError {
    fn from(e: ConnectorError) -> Self {
        crate::error::JobError::UnknownResponse(e.to_string())
    }
}

/// Composes Transport + Authorizer for one `base_url`. `open()`/`close()`
/// mirror the underlying Transport's reference counting.
pub struct ApiConnector {
    base_url: Url,
    transport: Transport,
    authorizer: Arc<dyn Authorizer>,
    default_headers: HeaderDict,
}

impl ApiConnector {
    pub fn new(base_url: Url, transport: Transport, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            base_url,
            transport,
            authorizer,
            default_headers: HeaderDict::new(),
        }
    }

    pub async fn open(&self) -> Result<(), TransportError> {
        self.transport.open().await
    }

    pub async fn close(&self) {
        self.transport.close().await
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve_url(&self, path: &str, query: Option<&[(String, String)]>) -> Result<Url, ConnectorError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
        if let Some(query) = query {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Issues one call, merging default and caller headers, retrying once
    /// on HTTP 401 after a successful token refresh, and deserializing the
    /// response per `response_types`.
    #[allow(clippy::too_many_arguments)]
    pub async fn call_api<T>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: Option<&[(String, String)]>,
        headers: Option<HeaderDict>,
        body: Option<Body>,
        timeout: Option<RequestTimeout>,
        response_types: &ResponseTypes<T>,
    ) -> Result<T, ConnectorError> {
        let url = self.resolve_url(path, query)?;

        let mut merged = self.authorizer.get_default_headers().await?;
        merged.extend(&self.default_headers);
        if let Some(caller_headers) = &headers {
            merged.extend(caller_headers);
        }

        let response = self
            .transport
            .request(method.clone(), url.as_str(), Some(merged.clone()), None, body.clone(), timeout)
            .await?;

        let response = if response.status == 401 {
            if self.authorizer.refresh_token().await? {
                let mut retried_headers = self.authorizer.get_default_headers().await?;
                retried_headers.extend(&self.default_headers);
                if let Some(caller_headers) = &headers {
                    retried_headers.extend(caller_headers);
                }
                self.transport
                    .request(method, url.as_str(), Some(retried_headers), None, body, timeout)
                    .await?
            } else {
                response
            }
        } else {
            response
        };

        match response_types.get(&response.status) {
            Some(decoder) => decoder(&response).map_err(ConnectorError::Service),
            None => Err(ConnectorError::Service(service_error_from_response(
                &response,
                decode_content(&response),
            ))),
        }
    }
}
