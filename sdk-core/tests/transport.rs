//! HTTP-level fixtures for `Transport` and `ApiConnector` using `wiremock`
//! mock servers instead of hand-rolled TCP listeners.

use std::sync::Arc;
use std::time::Duration;

use sdk_core::{ApiConnector, Authorizer, HeaderDict, Transport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> Transport {
    Transport::new(sdk_core::transport::TransportConfig::default())
}

#[tokio::test]
async fn open_and_close_reuse_the_same_client_while_refcounted() {
    let transport = transport();
    transport.open().await.unwrap();
    transport.open().await.unwrap();
    transport.close().await;
    // Still open: second close below releases the underlying client.
    transport.close().await;
}

struct AlwaysValidToken(String);

#[async_trait::async_trait]
impl Authorizer for AlwaysValidToken {
    async fn get_default_headers(&self) -> Result<HeaderDict, sdk_core::AuthFlowError> {
        let mut headers = HeaderDict::new();
        headers.insert("Authorization", format!("Bearer {}", self.0));
        Ok(headers)
    }

    async fn refresh_token(&self) -> Result<bool, sdk_core::AuthFlowError> {
        Ok(true)
    }
}

#[tokio::test]
async fn call_api_refreshes_once_on_401_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/widgets"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Bearer"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    transport.open().await.unwrap();

    let base_url = url::Url::parse(&format!("{}/", server.uri())).unwrap();
    let connector = ApiConnector::new(base_url, transport.clone(), Arc::new(AlwaysValidToken("tok".into())));
    connector.open().await.unwrap();

    let response_types = sdk_core::connector::json_response::<serde_json::Value>(200);
    let body = connector
        .call_api(reqwest::Method::GET, "widgets", None, None, None, None, &response_types)
        .await
        .unwrap();
    assert_eq!(body["ok"], true);

    connector.close().await;
    transport.close().await;
}

#[tokio::test]
async fn block_upload_stages_every_chunk_then_commits_once() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(201))
        .expect(5)
        .mount(&server)
        .await;

    let transport = transport();
    transport.open().await.unwrap();

    let url_generator: sdk_core::io::block::UrlGenerator = {
        let base = format!("{}/blob?sig=abc", server.uri());
        Arc::new(move || {
            let base = base.clone();
            Box::pin(async move { Ok(base) })
        })
    };

    let destination = Arc::new(sdk_core::io::StorageDestination::new(
        transport.clone(),
        url_generator,
        sdk_core::Retry::new(3, sdk_core::BackoffMethod::incremental(1.0)),
    ));

    let total_size = 5 * 1024 * 1024u64;
    let chunk_size = 1024 * 1024u64;
    let manager = sdk_core::io::ChunkedIoManager::new(total_size, chunk_size);

    struct ZeroSource(u64);
    #[async_trait::async_trait]
    impl sdk_core::io::Source for ZeroSource {
        async fn get_size(&self) -> Result<u64, sdk_core::ChunkedIoError> {
            Ok(self.0)
        }
        async fn read_chunk(&self, _offset: u64, length: u64) -> Result<bytes::Bytes, sdk_core::ChunkedIoError> {
            Ok(bytes::Bytes::from(vec![0u8; length as usize]))
        }
    }

    let source = Arc::new(ZeroSource(total_size));
    let destination_dyn: Arc<dyn sdk_core::io::Destination> = destination.clone();

    manager
        .run(
            source,
            destination_dyn,
            3,
            sdk_core::Retry::new(3, sdk_core::BackoffMethod::incremental(1.0)),
            tokio_util::sync::CancellationToken::new(),
            Arc::new(sdk_core::NoFeedback),
        )
        .await
        .unwrap();

    assert!(manager.tracker().is_done());

    Mock::given(method("PUT"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    destination.commit().await.unwrap();
    transport.close().await;
}

#[tokio::test]
async fn job_poll_loop_calls_status_until_terminal_then_results_once() {
    let server = MockServer::start().await;
    let org_id = uuid::Uuid::new_v4();
    let status_path = format!("/compute/orgs/{org_id}/analysis/run/11111111-1111-1111-1111-111111111111/status");
    let results_path = format!("/compute/orgs/{org_id}/analysis/run/11111111-1111-1111-1111-111111111111/results");

    Mock::given(method("GET"))
        .and(path(status_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "in-progress", "progress": 50
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(status_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "succeeded", "progress": 100
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(results_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "succeeded", "results": {"value": 42}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    transport.open().await.unwrap();
    let base_url = url::Url::parse(&format!("{}/", server.uri())).unwrap();
    let connector = Arc::new(ApiConnector::new(
        base_url,
        transport.clone(),
        Arc::new(AlwaysValidToken("tok".into())),
    ));
    connector.open().await.unwrap();

    let url = format!(
        "{}compute/orgs/{org_id}/analysis/run/11111111-1111-1111-1111-111111111111/status",
        connector.base_url()
    );
    let job = sdk_core::JobClient::<serde_json::Value>::from_url(connector.clone(), &url).unwrap();

    let results = job
        .wait_for_results(Duration::from_millis(1), None, None)
        .await
        .unwrap();
    assert_eq!(results["value"], 42);

    // Second call must not issue another HTTP request: the mock for
    // `/results` is registered with `expect(1)` and wiremock verifies
    // that on drop.
    let cached = job.get_results().await.unwrap();
    assert_eq!(cached["value"], 42);

    connector.close().await;
    transport.close().await;
}

#[tokio::test]
async fn failed_job_returns_an_equal_cached_error_on_repeat_get_results() {
    let server = MockServer::start().await;
    let org_id = uuid::Uuid::new_v4();
    let status_path = format!("/compute/orgs/{org_id}/analysis/run/22222222-2222-2222-2222-222222222222/status");
    let results_path = format!("/compute/orgs/{org_id}/analysis/run/22222222-2222-2222-2222-222222222222/results");

    Mock::given(method("GET"))
        .and(path(status_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed",
            "progress": 100,
            "message": "analysis diverged",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(results_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed",
            "error": {"message": "analysis diverged"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    transport.open().await.unwrap();
    let base_url = url::Url::parse(&format!("{}/", server.uri())).unwrap();
    let connector = Arc::new(ApiConnector::new(
        base_url,
        transport.clone(),
        Arc::new(AlwaysValidToken("tok".into())),
    ));
    connector.open().await.unwrap();

    let url = format!(
        "{}compute/orgs/{org_id}/analysis/run/22222222-2222-2222-2222-222222222222/status",
        connector.base_url()
    );
    let job = sdk_core::JobClient::<serde_json::Value>::from_url(connector.clone(), &url).unwrap();

    let first_error = job
        .wait_for_results(Duration::from_millis(1), None, None)
        .await
        .unwrap_err();

    // Second call must not issue another HTTP request: the status mock
    // above is registered with `expect(1)` and wiremock verifies that on
    // drop. The cached error must compare equal to the first, but (being
    // `Clone`, not shared by reference) is a distinct instance.
    let second_error = job.get_results().await.unwrap_err();
    assert_eq!(first_error, second_error);

    connector.close().await;
    transport.close().await;
}
