use crate::config::AgentConfig;
use crate::model::SystemPayload;
use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Simulated addresses are drawn from `0..SIM_ADDRESS_BLOCKS` blocks.
pub const SIM_ADDRESS_BLOCKS: u64 = 4096;
pub const SIM_BLOCK_BYTES: u64 = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("agent unreachable: {0}")]
    UnreachableAgent(String),
    #[error("malformed agent response: {0}")]
    MalformedResponse(String),
}

/// Wire client for the companion agent. Holds connection settings only.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    http: Client,
    base_url: String,
    latency_timeout: Duration,
}

#[derive(Serialize)]
struct KillRequest {
    pid: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheConfigRequest<'a> {
    size: u64,
    block_size: u64,
    policy: &'a str,
}

#[derive(Serialize)]
struct SimulateRequest {
    accesses: Vec<u64>,
}

#[derive(Deserialize)]
struct MessageReply {
    message: String,
}

#[derive(Deserialize)]
struct StatusReply {
    status: String,
}

impl MetricsClient {
    pub fn new(cfg: &AgentConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("smcmap-bridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|err| ClientError::UnreachableAgent(format!("http client init: {err}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim().trim_end_matches('/').to_string(),
            latency_timeout: cfg.connect_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_stats(&self) -> Result<SystemPayload, ClientError> {
        self.request_stats(None).await
    }

    async fn request_stats(&self, timeout: Option<Duration>) -> Result<SystemPayload, ClientError> {
        let mut req = self
            .http
            .get(self.url("/api/stats"))
            .header(ACCEPT, "application/json");
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(unreachable)?;
        let body = success_body(resp).await?;
        serde_json::from_str(&body).map_err(malformed)
    }

    pub async fn kill_process(&self, pid: i32) -> Result<String, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/process/kill"))
            .json(&KillRequest { pid })
            .send()
            .await
            .map_err(unreachable)?;
        let body = success_body(resp).await?;
        let reply: MessageReply = serde_json::from_str(&body).map_err(malformed)?;
        Ok(reply.message)
    }

    /// The policy name is not checked here; the agent decides what it accepts.
    pub async fn update_cache_config(
        &self,
        size_bytes: u64,
        block_size: u64,
        policy: &str,
    ) -> Result<String, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/cache/config"))
            .json(&CacheConfigRequest {
                size: size_bytes,
                block_size,
                policy,
            })
            .send()
            .await
            .map_err(unreachable)?;
        let body = success_body(resp).await?;
        let reply: StatusReply = serde_json::from_str(&body).map_err(malformed)?;
        Ok(reply.status)
    }

    /// Returns the agent's body untouched.
    pub async fn simulate_cache_accesses(&self, count: u32) -> Result<String, ClientError> {
        let accesses = random_block_addresses(count);
        let resp = self
            .http
            .post(self.url("/api/cache/simulate"))
            .json(&SimulateRequest { accesses })
            .send()
            .await
            .map_err(unreachable)?;
        success_body(resp).await
    }

    /// Round trip of one stats fetch in milliseconds, or -1 on any failure.
    /// The whole fetch is bounded by the connect timeout, not the request one.
    pub async fn measure_latency(&self) -> i64 {
        let start = Instant::now();
        match self.request_stats(Some(self.latency_timeout)).await {
            Ok(_) => start.elapsed().as_millis().min(i64::MAX as u128) as i64,
            Err(err) => {
                debug!(error = %err, "latency measurement failed");
                -1
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub fn random_block_addresses(count: u32) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| rng.gen_range(0..SIM_ADDRESS_BLOCKS) * SIM_BLOCK_BYTES)
        .collect()
}

async fn success_body(resp: Response) -> Result<String, ClientError> {
    let status = resp.status();
    let body = resp.text().await.map_err(unreachable)?;
    if status.is_success() {
        return Ok(body);
    }

    let detail = serde_json::from_str::<MessageReply>(&body)
        .map(|reply| reply.message)
        .unwrap_or_default();
    if detail.is_empty() {
        Err(ClientError::UnreachableAgent(format!("HTTP {status}")))
    } else {
        Err(ClientError::UnreachableAgent(format!(
            "HTTP {status}: {detail}"
        )))
    }
}

fn unreachable(err: reqwest::Error) -> ClientError {
    ClientError::UnreachableAgent(err.to_string())
}

fn malformed(err: serde_json::Error) -> ClientError {
    ClientError::MalformedResponse(err.to_string())
}
