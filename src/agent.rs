use crate::client::MetricsClient;
use crate::config::AgentConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{info, warn};

const HEALTH_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent {path}: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to stop agent: {0}")]
    Stop(std::io::Error),
}

/// The companion agent process owned by this bridge.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    path: PathBuf,
}

impl AgentProcess {
    /// Spawns the configured executable. `Ok(None)` means the agent is managed
    /// elsewhere: nothing is configured or the file is missing.
    pub fn start(cfg: &AgentConfig) -> Result<Option<Self>, AgentError> {
        let Some(path) = cfg.executable.clone() else {
            info!("no agent executable configured, expecting an external agent");
            return Ok(None);
        };
        if !path.exists() {
            warn!(path = %path.display(), "agent executable not found, expecting an external agent");
            return Ok(None);
        }

        let child = Command::new(&path)
            .args(&cfg.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                path: path.display().to_string(),
                source,
            })?;
        info!(path = %path.display(), pid = ?child.id(), "agent started");
        Ok(Some(Self { child, path }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn health_check(&self, client: &MetricsClient) -> bool {
        client.measure_latency().await >= 0
    }

    /// Polls the agent until it answers or `timeout` elapses.
    pub async fn wait_healthy(&mut self, client: &MetricsClient, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.health_check(client).await {
                return true;
            }
            if !self.is_running() || Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }
    }

    pub async fn stop(mut self) -> Result<(), AgentError> {
        if !self.is_running() {
            return Ok(());
        }
        self.child.kill().await.map_err(AgentError::Stop)?;
        info!(path = %self.path.display(), "agent stopped");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{unreachable_base_url, FakeAgent};

    fn sleeper() -> AgentConfig {
        AgentConfig {
            executable: Some(PathBuf::from("/bin/sh")),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            ..AgentConfig::default()
        }
    }

    #[test]
    fn unconfigured_or_missing_executable_is_external() {
        assert!(AgentProcess::start(&AgentConfig::default())
            .unwrap()
            .is_none());

        let cfg = AgentConfig {
            executable: Some(PathBuf::from("/definitely/not/here/agent")),
            ..AgentConfig::default()
        };
        assert!(AgentProcess::start(&cfg).unwrap().is_none());
    }

    #[tokio::test]
    async fn start_and_stop_owned_process() {
        let mut agent = AgentProcess::start(&sleeper()).unwrap().expect("spawned");
        assert!(agent.pid().is_some());
        assert!(agent.is_running());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn health_follows_the_agent_endpoint() {
        let mut process = AgentProcess::start(&sleeper()).unwrap().expect("spawned");

        let fake = FakeAgent::spawn().await;
        let healthy = MetricsClient::new(&AgentConfig {
            base_url: fake.base_url.clone(),
            ..AgentConfig::default()
        })
        .unwrap();
        assert!(process.wait_healthy(&healthy, Duration::from_secs(2)).await);

        let down = MetricsClient::new(&AgentConfig {
            base_url: unreachable_base_url(),
            ..AgentConfig::default()
        })
        .unwrap();
        assert!(!process.health_check(&down).await);
        assert!(!process.wait_healthy(&down, Duration::from_millis(300)).await);

        process.stop().await.unwrap();
    }
}
