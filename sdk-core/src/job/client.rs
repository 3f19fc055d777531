//! Submit/poll/cancel a single compute task and cache its result.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::connector::{json_response, ApiConnector, ResponseTypes};
use crate::error::JobError;
use crate::feedback::{Feedback, NoFeedback};
use crate::headers::HeaderDict;
use crate::retry::{Action, Retry};
use crate::transport::HttpResponse;

use super::data::{CompletedJobResponseBody, JobProgress, JobStatus, StatusResponseBody};

fn status_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^compute/orgs/(?P<org_id>[^/]+)/(?P<topic>[^/]+)/(?P<task>[^/]+)/(?P<job_id>[^/]+)/status$")
            .expect("status URL pattern is valid")
    })
}

fn job_error_from_value(value: Option<serde_json::Value>) -> Option<JobError> {
    value.map(|content| {
        let message = content
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("job failed")
            .to_string();
        JobError::Failed {
            message,
            content: Some(content),
        }
    })
}

/// Client for a single submitted job, identified by `(org_id, topic, task, job_id)`.
pub struct JobClient<T> {
    connector: Arc<ApiConnector>,
    org_id: Uuid,
    topic: String,
    task: String,
    job_id: Uuid,
    status_path: String,
    results_path: String,
    cached: Mutex<Option<Result<T, JobError>>>,
    _result: PhantomData<fn() -> T>,
}

impl<T> JobClient<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn new(connector: Arc<ApiConnector>, org_id: Uuid, topic: String, task: String, job_id: Uuid) -> Self {
        let status_path = format!("compute/orgs/{org_id}/{topic}/{task}/{job_id}/status");
        let results_path = format!("compute/orgs/{org_id}/{topic}/{task}/{job_id}/results");
        Self {
            connector,
            org_id,
            topic,
            task,
            job_id,
            status_path,
            results_path,
            cached: Mutex::new(None),
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.job_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.connector.base_url(), self.status_path)
    }

    /// Restores a client from a previously persisted status URL. The URL's
    /// hostname and path must match the connector's base URL and the
    /// compute-task status shape exactly.
    pub fn from_url(connector: Arc<ApiConnector>, url: &str) -> Result<Self, JobError> {
        let base = connector.base_url().as_str();
        let suffix = url
            .strip_prefix(base)
            .ok_or_else(|| JobError::InvalidStatusUrl(url.to_string()))?;

        let captures = status_url_regex()
            .captures(suffix)
            .ok_or_else(|| JobError::InvalidStatusUrl(url.to_string()))?;

        let org_id: Uuid = captures["org_id"]
            .parse()
            .map_err(|_| JobError::InvalidStatusUrl(url.to_string()))?;
        let job_id: Uuid = captures["job_id"]
            .parse()
            .map_err(|_| JobError::InvalidStatusUrl(url.to_string()))?;
        let topic = captures["topic"].to_string();
        let task = captures["task"].to_string();

        Ok(Self::new(connector, org_id, topic, task, job_id))
    }

    /// POSTs `parameters` to the task endpoint and builds a client from the
    /// `Location` header of the response.
    pub async fn submit(
        connector: Arc<ApiConnector>,
        org_id: Uuid,
        topic: &str,
        task: &str,
        parameters: serde_json::Value,
    ) -> Result<Self, JobError> {
        let path = format!("compute/orgs/{org_id}/{topic}/{task}");
        let body = crate::transport::Body::Json(serde_json::json!({ "parameters": parameters }));

        let mut response_types: ResponseTypes<HeaderDict> = HashMap::new();
        for status in [200u16, 201, 202] {
            response_types.insert(
                status,
                Box::new(|response: &HttpResponse| Ok(response.headers.clone())),
            );
        }

        let headers = connector
            .call_api(
                reqwest::Method::POST,
                &path,
                None,
                None,
                Some(body),
                None,
                &response_types,
            )
            .await?;

        let location = headers
            .get("Location")
            .ok_or_else(|| JobError::UnknownResponse("response is missing a Location header".into()))?;
        let base = connector.base_url().as_str();
        let job_url = format!("{base}{}", location.trim_start_matches(base).trim_start_matches('/'));

        Self::from_url(connector, &job_url)
    }

    /// GETs the status endpoint.
    pub async fn get_status(&self) -> Result<JobProgress, JobError> {
        let response_types = json_response::<StatusResponseBody>(200);
        let body = self
            .connector
            .call_api(
                reqwest::Method::GET,
                &self.status_path,
                None,
                None,
                None,
                None,
                &response_types,
            )
            .await?;

        Ok(JobProgress {
            status: body.status,
            progress: body.progress,
            message: body.message,
            error: job_error_from_value(body.error),
        })
    }

    /// GETs the results endpoint exactly once; every later call returns the
    /// cached outcome (cloned, never aliased with the cache).
    pub async fn get_results(&self) -> Result<T, JobError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            let mut response_types: ResponseTypes<(u16, CompletedJobResponseBody)> = HashMap::new();
            for status in [200u16, 202] {
                response_types.insert(
                    status,
                    Box::new(move |response: &HttpResponse| {
                        let body: CompletedJobResponseBody = response
                            .json()
                            .and_then(serde_json::from_value)
                            .map_err(|e| crate::error::ServiceError {
                                status: response.status,
                                reason: e.to_string(),
                                content: crate::error::ResponseContent::Bytes(response.data.clone()),
                                headers: response.headers.clone(),
                            })?;
                        Ok((response.status, body))
                    }),
                );
            }

            let outcome = self
                .connector
                .call_api(
                    reqwest::Method::GET,
                    &self.results_path,
                    None,
                    None,
                    None,
                    None,
                    &response_types,
                )
                .await;

            let result: Result<T, JobError> = match outcome {
                Err(e) => Err(JobError::from(e)),
                Ok((202, _)) => Err(JobError::Pending),
                Ok((_, body)) => {
                    if let Some(error) = job_error_from_value(body.error) {
                        Err(error)
                    } else {
                        match body.results {
                            Some(results) => serde_json::from_value(results)
                                .map_err(|e| JobError::UnknownResponse(e.to_string())),
                            None if body.status == JobStatus::Cancelled => {
                                Err(JobError::UnknownResponse(
                                    "cancelled job returned no results and no error".into(),
                                ))
                            }
                            None => Err(JobError::UnknownResponse(
                                "completed job response had neither results nor error".into(),
                            )),
                        }
                    }
                }
            };
            *cached = Some(result);
        }

        cached.as_ref().expect("populated above").clone()
    }

    /// DELETEs the job.
    pub async fn cancel(&self) -> Result<(), JobError> {
        let mut response_types: ResponseTypes<()> = HashMap::new();
        for status in [200u16, 202, 204] {
            response_types.insert(status, Box::new(|_response: &HttpResponse| Ok(())));
        }
        self.connector
            .call_api(
                reqwest::Method::DELETE,
                &self.status_path,
                None,
                None,
                None,
                None,
                &response_types,
            )
            .await?;
        Ok(())
    }

    /// Polls `get_status` under `retry` (a default is created if `None`) at
    /// `polling_interval`, reporting progress to `feedback`, until the job
    /// reaches a terminal state, then returns `get_results()`.
    pub async fn wait_for_results(
        &self,
        polling_interval: std::time::Duration,
        retry: Option<Retry>,
        feedback: Option<&dyn Feedback>,
    ) -> Result<T, JobError> {
        let no_feedback = NoFeedback;
        let feedback = feedback.unwrap_or(&no_feedback);
        let mut retry = retry.unwrap_or_default();

        loop {
            let status_result: Result<JobProgress, JobError> = retry
                .run(|_attempt| async move {
                    match self.get_status().await {
                        Ok(progress) => Action::Done(progress),
                        Err(e) => Action::Retry(e),
                    }
                })
                .await
                .map_err(|e| match e {
                    crate::retry::RetryError::Fatal(e) => e,
                    crate::retry::RetryError::Exhausted(mut errors) => {
                        errors.pop().unwrap_or(JobError::Pending)
                    }
                });

            let progress = status_result?;

            if progress.status.is_terminal() {
                break;
            }

            let scaled_progress = progress.progress.unwrap_or(0.0);
            feedback.progress(scaled_progress, progress.message.as_deref());
            tokio::time::sleep(polling_interval).await;
        }

        feedback.progress(100.0, Some("Fetching results..."));
        self.get_results().await
    }
}

impl<T> std::fmt::Display for JobClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "compute/orgs/{}/{}/{}/{}/status",
            self.org_id, self.topic, self.task, self.job_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_url_regex_rejects_wrong_shape() {
        assert!(!status_url_regex().is_match("compute/orgs/abc/topic/task/job"));
        assert!(status_url_regex().is_match("compute/orgs/abc/topic/task/job/status"));
    }
}
