//! Minimal single-shot local HTTP server that receives the OAuth
//! authorization-code redirect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::AuthFlowError;

#[derive(Debug, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

struct Shared {
    sender: std::sync::Mutex<Option<oneshot::Sender<RedirectParams>>>,
}

pub struct LoopbackReceiver {
    port: u16,
    receiver: oneshot::Receiver<RedirectParams>,
    server: tokio::task::JoinHandle<()>,
}

impl LoopbackReceiver {
    /// Binds an ephemeral port on the loopback interface and starts
    /// serving a single request.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            sender: std::sync::Mutex::new(Some(tx)),
        });

        let app = axum::Router::new()
            .route("/", get(handle_redirect))
            .with_state(shared);

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            port,
            receiver: rx,
            server,
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Waits for the redirect to arrive, validates `state`, and returns
    /// the authorization code.
    pub async fn wait_for_code(self, expected_state: &str, timeout: Duration) -> Result<String, AuthFlowError> {
        let result = tokio::time::timeout(timeout, self.receiver).await;
        self.server.abort();

        let params = match result {
            Ok(Ok(params)) => params,
            Ok(Err(_)) => {
                return Err(AuthFlowError::AuthorizationFailed(
                    "loopback receiver closed before a redirect arrived".into(),
                ))
            }
            Err(_) => {
                return Err(AuthFlowError::AuthorizationFailed(
                    "timed out waiting for the authorization redirect".into(),
                ))
            }
        };

        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            return Err(AuthFlowError::AuthorizationFailed(format!("{error}: {description}")));
        }
        if params.state.as_deref() != Some(expected_state) {
            return Err(AuthFlowError::AuthorizationFailed("state mismatch".into()));
        }
        params
            .code
            .ok_or_else(|| AuthFlowError::AuthorizationFailed("redirect did not include a code".into()))
    }
}

async fn handle_redirect(
    State(shared): State<Arc<Shared>>,
    Query(params): Query<RedirectParams>,
) -> Html<&'static str> {
    if let Some(sender) = shared.sender.lock().expect("lock not poisoned").take() {
        let _ = sender.send(params);
    }
    Html("<html><body>You may close this window and return to the application.</body></html>")
}
