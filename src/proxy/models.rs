//! Proxy data models

use crate::proxy::verdict::Verdict;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Reasons a raw `host:port` line is rejected before any network probing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid format (expected IP:PORT)")]
    MissingSeparator,
    #[error("invalid format (empty host)")]
    EmptyHost,
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

/// A validated proxy endpoint in `host:port` form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    host: String,
    port: u16,
}

impl ProxyAddress {
    /// Parse a raw `host:port` line.
    ///
    /// The line is split on the first `:`. The port must consist only of
    /// ASCII digits and lie in `1..=65535`.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let (host, port) = raw
            .trim()
            .split_once(':')
            .ok_or(AddressError::MissingSeparator)?;

        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::InvalidPort(port.to_string()));
        }

        let port = match port.parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => return Err(AddressError::InvalidPort(port.to_string())),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the proxy URL used for HTTP(S) tunneling
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// The host as an IP address, if it is one
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Whether the host is a non-globally-routable address: private,
    /// loopback, link-local, unspecified, documentation, benchmarking or
    /// reserved. Hostnames are never considered private.
    pub fn is_private(&self) -> bool {
        match self.ip() {
            Some(IpAddr::V4(ip)) => is_private_v4(ip),
            Some(IpAddr::V6(ip)) => is_private_v6(ip),
            None => false,
        }
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_documentation()
        || ip.is_broadcast()
        // 0.0.0.0/8
        || a == 0
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Why a single probe did not produce a measurement
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("timeout ({url})")]
    Timeout { url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    BadResponse(String),
    #[error("IP mismatch (expected {expected}, got {observed})")]
    IpMismatch { expected: String, observed: String },
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("ping tool not found")]
    ToolMissing,
    #[error("could not parse ping output")]
    Unparseable,
    #[error("not available")]
    Unavailable,
}

/// Tagged result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome<T> {
    Success(T),
    /// The probe ran but was inconclusive, slow or unreachable
    SoftFailure(ProbeFailure),
    /// The probe could not be attempted for this proxy at all
    HardFailure(ProbeFailure),
}

impl<T> ProbeOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ProbeOutcome::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            ProbeOutcome::Success(_) => None,
            ProbeOutcome::SoftFailure(f) | ProbeOutcome::HardFailure(f) => Some(f),
        }
    }
}

/// Live progress snapshot of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub checked: usize,
    pub total: usize,
    pub good: usize,
}

impl Progress {
    pub fn percent(&self) -> u16 {
        if self.total == 0 {
            return 0;
        }
        (self.checked as f64 / self.total as f64 * 100.0) as u16
    }
}

/// Terminal record of one proxy's validation
#[derive(Debug, Clone)]
pub enum CheckReport {
    /// Rejected by the format check, never probed and never counted
    Malformed { raw: String, error: AddressError },
    /// Went through network probing
    Checked {
        address: ProxyAddress,
        verdict: Verdict,
        /// Whether the address made it into the output sink
        persisted: bool,
    },
}

impl CheckReport {
    /// The proxy as it appeared in the input list
    pub fn label(&self) -> String {
        match self {
            CheckReport::Malformed { raw, .. } => raw.clone(),
            CheckReport::Checked { address, .. } => address.to_string(),
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            CheckReport::Checked { verdict, .. } => Some(verdict),
            CheckReport::Malformed { .. } => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, CheckReport::Checked { persisted: true, .. })
    }
}

/// Per-proxy completion event published by the coordinator
#[derive(Debug, Clone)]
pub struct CheckEvent {
    pub report: CheckReport,
    pub progress: Progress,
}

/// Final figures of a drained run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub checked: usize,
    pub good: usize,
    pub total: usize,
    pub export_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_address() {
        let proxy = ProxyAddress::parse("192.168.1.1:8080").unwrap();
        assert_eq!(proxy.host(), "192.168.1.1");
        assert_eq!(proxy.port(), 8080);
        assert_eq!(proxy.to_string(), "192.168.1.1:8080");
        assert_eq!(proxy.url(), "http://192.168.1.1:8080");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let proxy: ProxyAddress = "  8.8.8.8:3128 \n".parse().unwrap();
        assert_eq!(proxy.to_string(), "8.8.8.8:3128");
    }

    #[test]
    fn test_parse_missing_separator() {
        assert_eq!(
            ProxyAddress::parse("1.2.3.4"),
            Err(AddressError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_port_out_of_range() {
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:99999"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:0"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:65536"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(ProxyAddress::parse("1.2.3.4:65535").is_ok());
    }

    #[test]
    fn test_parse_non_numeric_port() {
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:abc"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:+80"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ProxyAddress::parse("1.2.3.4:8080:user:pass"),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_parse_empty_host() {
        assert_eq!(ProxyAddress::parse(":8080"), Err(AddressError::EmptyHost));
    }

    #[test]
    fn test_private_detection() {
        let private = [
            "127.0.0.1:80",
            "10.0.0.5:80",
            "192.168.1.1:80",
            "172.16.3.4:80",
            "169.254.10.20:8080",
            "0.0.0.0:80",
            "0.1.2.3:80",
            "192.0.2.10:80",
            "198.51.100.7:80",
            "203.0.113.9:80",
            "198.18.0.1:80",
            "198.19.255.254:80",
            "240.0.0.1:80",
            "255.255.255.255:80",
        ];
        for raw in private {
            assert!(ProxyAddress::parse(raw).unwrap().is_private(), "{raw}");
        }

        let public = [
            "8.8.8.8:80",
            "1.1.1.1:80",
            "169.255.0.1:80",
            "198.20.0.1:80",
            "223.255.255.1:80",
            "proxy.example.com:80",
        ];
        for raw in public {
            assert!(!ProxyAddress::parse(raw).unwrap().is_private(), "{raw}");
        }
    }

    #[test]
    fn test_private_detection_v6() {
        let private = ["::1", "::", "fd12:3456::1", "fc00::1", "fe80::1", "febf::1", "2001:db8::1"];
        for raw in private {
            assert!(is_private_v6(raw.parse().unwrap()), "{raw}");
        }

        for raw in ["2001:4860:4860::8888", "2606:4700::1111", "fec0::1"] {
            assert!(!is_private_v6(raw.parse().unwrap()), "{raw}");
        }
    }

    #[test]
    fn test_probe_outcome_accessors() {
        let ok: ProbeOutcome<u64> = ProbeOutcome::Success(120);
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&120));
        assert!(ok.failure().is_none());

        let soft: ProbeOutcome<u64> = ProbeOutcome::SoftFailure(ProbeFailure::Status(503));
        assert!(!soft.is_success());
        assert_eq!(soft.failure(), Some(&ProbeFailure::Status(503)));
    }

    #[test]
    fn test_progress_percent() {
        let progress = Progress {
            checked: 25,
            total: 100,
            good: 3,
        };
        assert_eq!(progress.percent(), 25);
        assert_eq!(Progress::default().percent(), 0);
    }

    #[test]
    fn test_failure_messages() {
        let mismatch = ProbeFailure::IpMismatch {
            expected: "1.2.3.4".to_string(),
            observed: "5.6.7.8".to_string(),
        };
        assert_eq!(
            mismatch.to_string(),
            "IP mismatch (expected 1.2.3.4, got 5.6.7.8)"
        );
        assert_eq!(ProbeFailure::Status(404).to_string(), "HTTP status 404");
    }
}
