//! ICMP echo through the platform `ping` tool

use crate::proxy::models::{ProbeFailure, ProbeOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Grace period on top of the per-packet timeout before the tool is killed
const PROCESS_GRACE: Duration = Duration::from_millis(500);

/// `time=12.3 ms`, `time<1ms` (Linux, macOS, Windows)
static REPLY_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)time[=<]([\d.]+)\s?ms").expect("Invalid reply time regex")
});

/// Linux summary line
static RTT_SUMMARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"rtt min/avg/max/mdev = [\d.]+/([\d.]+)/").expect("Invalid rtt regex")
});

/// BSD / macOS summary line
static ROUND_TRIP_SUMMARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"round-trip min/avg/max/stddev = [\d.]+/([\d.]+)/")
        .expect("Invalid round-trip regex")
});

/// Extract the round-trip time in whole milliseconds from `ping` output
pub fn parse_ping_output(output: &str) -> Option<u64> {
    [
        &*REPLY_TIME_REGEX,
        &*RTT_SUMMARY_REGEX,
        &*ROUND_TRIP_SUMMARY_REGEX,
    ]
    .iter()
    .find_map(|re| {
        re.captures(output)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .map(|ms| ms as u64)
    })
}

#[cfg(windows)]
fn ping_command(host: &str, timeout: Duration) -> Command {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut command = Command::new("ping");
    command
        .args(["-n", "1", "-w"])
        .arg(timeout.as_millis().to_string())
        .arg(host)
        .creation_flags(CREATE_NO_WINDOW);
    command
}

#[cfg(not(windows))]
fn ping_command(host: &str, timeout: Duration) -> Command {
    let mut command = Command::new("ping");
    command
        .args(["-c", "1", "-W"])
        .arg(wait_arg(timeout))
        .arg(host);
    command
}

/// `-W` value: milliseconds for the BSD-derived `ping`, seconds elsewhere
#[cfg(not(windows))]
fn wait_arg(timeout: Duration) -> String {
    if cfg!(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    )) {
        timeout.as_millis().to_string()
    } else {
        format!("{:.1}", timeout.as_secs_f64())
    }
}

/// Send a single echo request to `host` and report the round-trip time.
///
/// A missing `ping` binary is reported as [`ProbeFailure::ToolMissing`] so
/// the caller can switch ping off for the rest of the run.
pub async fn ping_host(host: &str, timeout: Duration) -> ProbeOutcome<u64> {
    let mut command = ping_command(host, timeout);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout + PROCESS_GRACE, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            return ProbeOutcome::SoftFailure(ProbeFailure::ToolMissing)
        }
        Ok(Err(e)) => {
            debug!(host, error = %e, "ping could not be started");
            return ProbeOutcome::SoftFailure(ProbeFailure::Unavailable);
        }
        Err(_) => return ProbeOutcome::SoftFailure(ProbeFailure::Unavailable),
    };

    if !output.status.success() {
        return ProbeOutcome::SoftFailure(ProbeFailure::Unavailable);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_ping_output(&stdout) {
        Some(ms) => ProbeOutcome::Success(ms),
        None => ProbeOutcome::SoftFailure(ProbeFailure::Unparseable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_output() {
        let output = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.\n\
            64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=14.7 ms\n\n\
            --- 8.8.8.8 ping statistics ---\n\
            1 packets transmitted, 1 received, 0% packet loss, time 0ms\n\
            rtt min/avg/max/mdev = 14.721/14.721/14.721/0.000 ms\n";
        assert_eq!(parse_ping_output(output), Some(14));
    }

    #[test]
    fn test_parse_windows_sub_millisecond() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_output(output), Some(1));
    }

    #[test]
    fn test_parse_windows_output() {
        let output = "Reply from 1.1.1.1: bytes=32 time=23ms TTL=57";
        assert_eq!(parse_ping_output(output), Some(23));
    }

    #[test]
    fn test_parse_summary_only() {
        let linux = "rtt min/avg/max/mdev = 10.100/31.900/40.000/1.000 ms";
        assert_eq!(parse_ping_output(linux), Some(31));

        let mac = "round-trip min/avg/max/stddev = 5.001/7.250/9.000/0.500 ms";
        assert_eq!(parse_ping_output(mac), Some(7));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_ping_output(""), None);
        assert_eq!(parse_ping_output("Request timed out."), None);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_wait_arg_units() {
        let wait = wait_arg(Duration::from_millis(1500));
        if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly"
        )) {
            assert_eq!(wait, "1500");
        } else {
            assert_eq!(wait, "1.5");
        }
    }
}
