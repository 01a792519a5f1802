use serde::{Deserialize, Serialize};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemorySnapshot {
    #[serde(rename = "totalRam")]
    pub total_bytes: u64,
    #[serde(rename = "usedRam")]
    pub used_bytes: u64,
    #[serde(rename = "freeRam")]
    pub free_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessEntry {
    pub pid: i32,
    pub name: String,
    #[serde(rename = "memoryUsed")]
    pub memory_used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub algorithm: String,
    pub hits: u32,
    pub misses: u32,
    pub hit_ratio: f64,
}

/// One `/api/stats` reading. Serialises to the flattened shape pushed as
/// `updateDashboard`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystemPayload {
    pub memory: MemorySnapshot,
    pub cache: CacheStats,
    pub processes: Vec<ProcessEntry>,
}

/// Persisted row, already scaled to binary megabytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "totalRam")]
    pub total_ram_mb: u64,
    #[serde(rename = "usedRam")]
    pub used_ram_mb: u64,
    #[serde(rename = "freeRam")]
    pub free_ram_mb: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub count: u32,
    #[serde(rename = "dbSizeKB")]
    pub db_size_kb: u64,
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub latency_ms: i64,
    pub uptime_sec: u64,
    pub total_snapshots: u32,
    #[serde(rename = "dbSizeKB")]
    pub db_size_kb: u64,
    pub agent_url: String,
    pub status: LinkStatus,
}

impl NodeInfo {
    pub fn status_for_latency(latency_ms: i64) -> LinkStatus {
        if latency_ms >= 0 {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os_name: String,
    pub kernel: String,
    pub arch: String,
    pub hostname: String,
    pub runtime_version: String,
    pub cpu_cores: u32,
    pub user_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub connected: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AgentStatus {
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self {
            connected: false,
            status: "AGENT DISCONNECTED".to_string(),
            reason: Some(reason.into()),
        }
    }
}

/// Rounds to the nearest binary megabyte.
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes.saturating_add(BYTES_PER_MB / 2) / BYTES_PER_MB
}
