//! Canned GPU records, `nvidia-smi` output and configs

use gpuwatch::config::RemoteConf;
use gpuwatch::{Config, ConfigFile, GpuMetricRecord};

pub fn gpu(
    index: u32,
    utilization: u8,
    used_mib: u64,
    total_mib: u64,
    temperature_c: i32,
) -> GpuMetricRecord {
    GpuMetricRecord {
        index,
        utilization,
        memory_used_mib: used_mib,
        memory_total_mib: total_mib,
        temperature_c,
        name: None,
    }
}

/// One CSV line in the `--format=csv,noheader,nounits` layout
pub fn smi_line(record: &GpuMetricRecord) -> String {
    let mut line = format!(
        "{}, {}, {}, {}, {}",
        record.index,
        record.utilization,
        record.memory_used_mib,
        record.memory_total_mib,
        record.temperature_c
    );
    if let Some(name) = &record.name {
        line.push_str(", ");
        line.push_str(name);
    }
    line
}

pub fn smi_output(records: &[GpuMetricRecord]) -> String {
    records.iter().map(|r| smi_line(r) + "\n").collect()
}

/// Fast timings for engine tests: refresh 1s, timeouts 4s/2s, grace 100ms
pub fn test_config(hosts: &[&str]) -> Config {
    let file = ConfigFile {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        refresh_interval_secs: Some(1.0),
        initial_timeout_secs: Some(4),
        steady_timeout_secs: Some(2),
        shutdown_grace_ms: Some(100),
        remote: RemoteConf {
            program: Some("true".to_string()),
            ..RemoteConf::default()
        },
        ..ConfigFile::default()
    };
    match file.validate() {
        Ok(config) => config,
        Err(e) => panic!("test config rejected: {e}"),
    }
}
