use crate::model::SystemInfo;
use sysinfo::{System, SystemExt};

/// Static descriptor of the machine running the bridge.
pub fn collect_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_cpu();

    let kernel = system
        .kernel_version()
        .or_else(|| system.os_version())
        .unwrap_or_else(|| "unknown".to_string());

    SystemInfo {
        os_name: system
            .long_os_version()
            .or_else(|| system.name())
            .unwrap_or_else(|| std::env::consts::OS.to_string()),
        kernel,
        arch: std::env::consts::ARCH.to_string(),
        hostname: system.host_name().unwrap_or_else(|| "unknown".to_string()),
        runtime_version: concat!("smcmap-bridge ", env!("CARGO_PKG_VERSION")).to_string(),
        cpu_cores: system.cpus().len() as u32,
        user_name: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_populated() {
        let info = collect_system_info();
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert!(!info.os_name.is_empty());
        assert!(!info.hostname.is_empty());
        assert!(info.runtime_version.starts_with("smcmap-bridge "));

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("cpuCores").is_some());
        assert!(json.get("runtimeVersion").is_some());
    }
}
