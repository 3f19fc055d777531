//! Reference-counted HTTP session.
//!
//! Wraps a `reqwest::Client`, attaches default headers, never auto-follows
//! redirects, and wraps every request in the Retry Harness internally.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ClientUsageError, TransportError};
use crate::headers::HeaderDict;
use crate::retry::{Action, BackoffMethod, Retry, RetryError};

const DEFAULT_CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// A raw, non-serialized request body.
#[derive(Debug, Clone)]
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

/// Either a single total-time bound or a `(connect, read)` pair. Both are
/// applied to `reqwest` as a single overall request timeout; `reqwest`
/// does not expose separate connect/read deadlines per request.
#[derive(Debug, Clone, Copy)]
pub enum RequestTimeout {
    Total(Duration),
    ConnectRead(Duration, Duration),
}

impl RequestTimeout {
    fn as_duration(self) -> Duration {
        match self {
            RequestTimeout::Total(d) => d,
            RequestTimeout::ConnectRead(connect, read) => connect + read,
        }
    }
}

/// A uniform HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderDict,
    pub data: Bytes,
}

impl HttpResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    pub verify_ssl: bool,
    pub retry: Retry,
    pub close_grace_period: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("evo-sdk-core/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_ssl: true,
            retry: Retry::new(3, BackoffMethod::incremental(2.0)),
            close_grace_period: DEFAULT_CLOSE_GRACE_PERIOD,
        }
    }
}

struct State {
    client: Option<reqwest::Client>,
    open_count: u32,
}

/// Reference-counted HTTP session. `open()`/`close()` must balance; only
/// the outermost `close()` releases the underlying client.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    state: Arc<Mutex<State>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                client: None,
                open_count: 0,
            })),
        }
    }

    /// Opens the transport, constructing a fresh `reqwest::Client` if this
    /// is the first open since creation or the last matching close.
    pub async fn open(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.client.is_none() {
            let client = reqwest::Client::builder()
                .user_agent(self.config.user_agent.clone())
                .redirect(reqwest::redirect::Policy::none())
                .danger_accept_invalid_certs(!self.config.verify_ssl)
                .build()?;
            state.client = Some(client);
            debug!("transport opened");
        }
        state.open_count += 1;
        Ok(())
    }

    /// Closes one reference. Only when the count reaches zero is the
    /// underlying client dropped, followed by a grace sleep so in-flight
    /// TLS shutdowns can complete.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.open_count == 0 {
            return;
        }
        state.open_count -= 1;
        if state.open_count == 0 {
            state.client = None;
            drop(state);
            debug!("transport closing; waiting for grace period");
            tokio::time::sleep(self.config.close_grace_period).await;
        }
    }

    async fn client(&self) -> Result<reqwest::Client, TransportError> {
        let state = self.state.lock().await;
        state.client.clone().ok_or(TransportError::Closed)
    }

    /// Submits one request. Redirects are never followed. Internally
    /// wrapped in the Retry Harness, so transient transport failures
    /// retry transparently; `RetryExhausted` is surfaced as the cause when
    /// the budget is spent.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: Option<HeaderDict>,
        post_params: Option<Vec<(String, String)>>,
        body: Option<Body>,
        timeout: Option<RequestTimeout>,
    ) -> Result<HttpResponse, TransportError> {
        if post_params.is_some() && body.is_some() {
            return Err(ClientUsageError::ConflictingBody.into());
        }

        let client = self.client().await?;
        let headers = headers.unwrap_or_default();
        let content_type = headers.get("Content-Type").map(str::to_string);

        let mut builder = client.request(method.clone(), url);
        builder = builder.headers(headers.to_reqwest_headers());
        if let Some(t) = timeout {
            builder = builder.timeout(t.as_duration());
        }

        builder = if let Some(params) = post_params {
            match content_type.as_deref() {
                Some("multipart/form-data") => {
                    let mut form = reqwest::multipart::Form::new();
                    for (k, v) in params {
                        form = form.text(k, v);
                    }
                    builder.multipart(form)
                }
                Some("application/x-www-form-urlencoded") | None => builder.form(&params),
                Some(other) => {
                    return Err(ClientUsageError::UnsupportedFormContentType(other.to_string()).into())
                }
            }
        } else if let Some(body) = body {
            match body {
                Body::Text(s) => builder.body(s),
                Body::Bytes(b) => builder.body(b),
                Body::Json(value) => {
                    let is_json = content_type
                        .as_deref()
                        .map(|c| c.contains("json"))
                        .unwrap_or(true);
                    if is_json {
                        builder.json(&value)
                    } else {
                        return Err(ClientUsageError::InvalidArgument(format!(
                            "cannot JSON-encode a request body for content type `{}`",
                            content_type.unwrap_or_default()
                        ))
                        .into());
                    }
                }
            }
        } else {
            builder
        };

        let request = builder.build()?;

        debug!(method = %method, url = %url, "performing request");

        let mut retry = self.config.retry.clone();
        let outcome = retry
            .run(|_attempt| {
                let client = client.clone();
                let request = request.try_clone();
                async move {
                    let Some(request) = request else {
                        return Action::Fatal(TransportError::ClientUsage(
                            ClientUsageError::InvalidArgument(
                                "request body cannot be retried (streamed body)".into(),
                            ),
                        ));
                    };
                    match client.execute(request).await {
                        Ok(response) => Action::Done(response),
                        Err(e) => Action::Retry(TransportError::Request(e)),
                    }
                }
            })
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(RetryError::Fatal(e)) => return Err(e),
            Err(e @ RetryError::Exhausted(_)) => {
                return Err(TransportError::RetryExhausted {
                    caused_by: Box::new(e),
                })
            }
        };

        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let headers: HeaderDict = response.headers().clone().into();
        let data = response.bytes().await?;

        Ok(HttpResponse {
            status,
            reason,
            headers,
            data,
        })
    }
}
