// proctalk/src/process/os.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Snapshot of the processes running on the host.

use std::time::Duration;

use crate::error::Result as ProctalkResult;
use crate::message::Value;

/// One OS process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_time: Duration,
}

impl ProcessInfo {
    /// `[pid, name, cpu_seconds]`
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.pid),
            Value::from(self.name.as_str()),
            Value::Float(self.cpu_time.as_secs_f64()),
        ])
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let pid = u32::try_from(items.first()?.as_i64()?).ok()?;
        let name = items.get(1)?.as_str()?.to_string();
        let seconds = items.get(2)?.as_f64()?;
        Some(Self {
            pid,
            name,
            cpu_time: Duration::try_from_secs_f64(seconds).unwrap_or_default(),
        })
    }
}

/// Parses `ps` cumulative CPU time: `[[dd-]hh:]mm:ss[.frac]`.
pub fn parse_cpu_time(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (days, clock) = match text.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, text),
    };

    let mut seconds = 0f64;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in &parts {
        seconds = seconds * 60.0 + part.parse::<f64>().ok()?;
    }
    Duration::try_from_secs_f64(seconds + (days * 86_400) as f64).ok()
}

/// Lists every process visible to the server.
pub async fn list_os_processes() -> ProctalkResult<Vec<ProcessInfo>> {
    let mut processes = platform::list().await?;
    processes.sort_by_key(|p| p.pid);
    Ok(processes)
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    // USER_HZ; fixed at 100 on every mainstream Linux ABI.
    const CLOCK_TICKS_PER_SEC: u64 = 100;

    /// Parses `/proc/<pid>/stat`. `comm` may itself contain spaces and parentheses.
    pub(super) fn parse_stat(pid: u32, stat: &str) -> Option<ProcessInfo> {
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let name = stat.get(open + 1..close)?.to_string();
        let fields: Vec<&str> = stat.get(close + 1..)?.split_whitespace().collect();
        // fields[0] is field 3 (state); utime and stime are fields 14 and 15.
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let ticks = utime + stime;
        Some(ProcessInfo {
            pid,
            name,
            cpu_time: Duration::from_millis(ticks * 1000 / CLOCK_TICKS_PER_SEC),
        })
    }

    pub(super) async fn list() -> ProctalkResult<Vec<ProcessInfo>> {
        let mut entries = tokio::fs::read_dir("/proc").await?;
        let mut processes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // The process may exit between read_dir and read.
            let Ok(stat) = tokio::fs::read_to_string(entry.path().join("stat")).await else {
                continue;
            };
            match parse_stat(pid, &stat) {
                Some(info) => processes.push(info),
                None => tracing::debug!("Unparseable /proc/{}/stat", pid),
            }
        }
        Ok(processes)
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::*;
    use crate::error::ProctalkError;

    pub(super) async fn list() -> ProctalkResult<Vec<ProcessInfo>> {
        let output = tokio::process::Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "time=", "-o", "comm="])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProctalkError::Internal(format!("ps exited with {}", output.status)));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let pid = parts.next()?.parse().ok()?;
                let cpu_time = parse_cpu_time(parts.next()?)?;
                let name = parts.collect::<Vec<_>>().join(" ");
                Some(ProcessInfo { pid, name, cpu_time })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_time() {
        assert_eq!(parse_cpu_time("00:00"), Some(Duration::ZERO));
        assert_eq!(parse_cpu_time("01:05"), Some(Duration::from_secs(65)));
        assert_eq!(parse_cpu_time("1:00:01"), Some(Duration::from_secs(3601)));
        assert_eq!(parse_cpu_time("2-00:00:10"), Some(Duration::from_secs(2 * 86_400 + 10)));
        assert_eq!(parse_cpu_time("0:01.50"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_cpu_time("abc"), None);
        assert_eq!(parse_cpu_time("1:2:3:4"), None);
    }

    #[test]
    fn test_process_info_value_shape() {
        let info = ProcessInfo {
            pid: 42,
            name: "sleep".into(),
            cpu_time: Duration::from_millis(250),
        };
        let value = info.to_value();
        assert_eq!(
            value,
            Value::Array(vec![Value::Integer(42), Value::from("sleep"), Value::Float(0.25)])
        );
        assert_eq!(ProcessInfo::from_value(&value), Some(info));
        assert_eq!(ProcessInfo::from_value(&Value::from("nope")), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_proc_stat_with_odd_comm() {
        let stat = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 150 50 0 0 20 0 1 0 100 0 0";
        let info = platform::parse_stat(1234, stat).unwrap();
        assert_eq!(info.name, "my (odd) proc");
        assert_eq!(info.cpu_time, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_lists_own_process() {
        let processes = list_os_processes().await.unwrap();
        let me = std::process::id();
        assert!(processes.iter().any(|p| p.pid == me));
        assert!(processes.windows(2).all(|w| w[0].pid <= w[1].pid));
    }
}
