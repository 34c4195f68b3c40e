//! Typed HTTP client for the coordinator API.

use anyhow::{Context, Result, bail};
use orchestrator_protocol::{
    HeartbeatRequest, HeartbeatResponse, PollResponse, RegisterRunnerRequest,
    RegisterRunnerResponse, ReportCompletedRequest, ReportFailedRequest, ReportStartedRequest,
    ReportStoppedRequest,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Client for the coordinator's runner-facing endpoints.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// The coordinator's structured error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            // Long-polls ride on top of this; leave headroom over the wait.
            .timeout(Duration::from_secs(90))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .with_context(|| format!("parsing {what} response"));
        }
        let body: Option<ErrorBody> = response.json().await.ok();
        match body {
            Some(body) => bail!("{what} failed ({}): {} ({})", status, body.message, body.error),
            None => bail!("{what} failed with status {status}"),
        }
    }

    /// Whether an error message indicates the coordinator forgot us.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        err.to_string().contains(&StatusCode::NOT_FOUND.to_string())
            || err.to_string().contains("not_found")
    }

    pub async fn register(
        &self,
        request: &RegisterRunnerRequest,
    ) -> Result<RegisterRunnerResponse> {
        let response = self
            .authed(self.http.post(format!("{}/runner/register", self.base_url)))
            .json(request)
            .send()
            .await
            .context("sending registration")?;
        Self::expect_json(response, "registration").await
    }

    pub async fn heartbeat(&self, runner_id: &str) -> Result<HeartbeatResponse> {
        let response = self
            .authed(self.http.post(format!("{}/runner/heartbeat", self.base_url)))
            .json(&HeartbeatRequest {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await
            .context("sending heartbeat")?;
        Self::expect_json(response, "heartbeat").await
    }

    pub async fn poll(&self, runner_id: &str, wait_secs: u64) -> Result<PollResponse> {
        let response = self
            .authed(self.http.get(format!("{}/runner/runs", self.base_url)))
            .query(&[("runner_id", runner_id), ("wait", &wait_secs.to_string())])
            .send()
            .await
            .context("polling for runs")?;
        Self::expect_json(response, "poll").await
    }

    async fn report(&self, run_id: &str, verb: &str, body: &impl serde::Serialize) -> Result<()> {
        let response = self
            .authed(
                self.http
                    .post(format!("{}/runner/runs/{run_id}/{verb}", self.base_url)),
            )
            .json(body)
            .send()
            .await
            .with_context(|| format!("reporting run {verb}"))?;
        let _: Value = Self::expect_json(response, verb).await?;
        Ok(())
    }

    pub async fn report_started(
        &self,
        run_id: &str,
        runner_id: &str,
        executor_session_id: Option<String>,
    ) -> Result<()> {
        self.report(
            run_id,
            "started",
            &ReportStartedRequest {
                runner_id: runner_id.to_string(),
                executor_session_id,
            },
        )
        .await
    }

    pub async fn report_completed(&self, run_id: &str, runner_id: &str) -> Result<()> {
        self.report(
            run_id,
            "completed",
            &ReportCompletedRequest {
                runner_id: runner_id.to_string(),
                result: None,
            },
        )
        .await
    }

    pub async fn report_failed(&self, run_id: &str, runner_id: &str, error: String) -> Result<()> {
        self.report(
            run_id,
            "failed",
            &ReportFailedRequest {
                runner_id: runner_id.to_string(),
                error,
            },
        )
        .await
    }

    pub async fn report_stopped(
        &self,
        run_id: &str,
        runner_id: &str,
        reason: Option<String>,
    ) -> Result<()> {
        self.report(
            run_id,
            "stopped",
            &ReportStoppedRequest {
                runner_id: runner_id.to_string(),
                reason,
            },
        )
        .await
    }

    /// Forward a run-creation request (used by the MCP facade).
    pub async fn create_run(&self, body: &Value) -> Result<Value> {
        let response = self
            .authed(self.http.post(format!("{}/runs", self.base_url)))
            .json(body)
            .send()
            .await
            .context("creating run")?;
        Self::expect_json(response, "run creation").await
    }

    /// Fetch a session's status probe (used by the MCP facade).
    pub async fn session_status(&self, session_id: &str) -> Result<Value> {
        let response = self
            .authed(
                self.http
                    .get(format!("{}/sessions/{session_id}/status", self.base_url)),
            )
            .send()
            .await
            .context("fetching session status")?;
        Self::expect_json(response, "session status").await
    }

    /// Fetch a session's result payload (used by the MCP facade).
    pub async fn session_result(&self, session_id: &str) -> Result<Value> {
        let response = self
            .authed(
                self.http
                    .get(format!("{}/sessions/{session_id}/result", self.base_url)),
            )
            .send()
            .await
            .context("fetching session result")?;
        Self::expect_json(response, "session result").await
    }
}
