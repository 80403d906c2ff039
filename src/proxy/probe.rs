//! Network probes run against a single proxy
//!
//! Each probe is independent and stateless: it takes a proxy address and
//! the shared [`ProbeConfig`] and returns a [`ProbeOutcome`]. Probes never
//! touch run state.

use crate::proxy::models::{ProbeFailure, ProbeOutcome, ProxyAddress};
use crate::proxy::ping;
use crate::proxy::verdict::ScoringPolicy;
use async_trait::async_trait;
use reqwest::{redirect, Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default timeout for HTTP probes in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default host latency threshold in milliseconds
pub const DEFAULT_MAX_MS: u64 = 5000;

/// Default URL used to measure host latency
pub const DEFAULT_HOST_CHECK_URL: &str = "https://www.google.com";

/// Default IP echo endpoint
pub const DEFAULT_IP_CHECK_URL: &str = "https://api.ipify.org?format=json";

/// Default per-packet ping timeout in milliseconds
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 1000;

/// Default file streamed by the throughput probe
pub const DEFAULT_SPEED_TEST_URL: &str = "http://speedtest.tele2.net/1MB.zip";

/// Default throughput considered good, in KB/s
pub const DEFAULT_SPEED_MIN_GOOD_KBPS: u64 = 100;

/// The throughput probe never gets less time than this
const MIN_SPEED_TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum number of redirects followed by the latency probe
const MAX_REDIRECTS: usize = 10;

/// Process-wide ping switch.
///
/// Starts from the configured flag and can only ever be turned off. Several
/// workers may detect a missing `ping` tool at once; every one of them
/// stores `false`, so the race is harmless.
#[derive(Debug, Clone)]
pub struct PingSwitch(Arc<AtomicBool>);

impl PingSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Turn ping off. Returns `true` only for the call that flipped it.
    pub fn disable(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Configuration shared read-only by every validation of a run
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout for the anonymity and latency probes
    pub http_timeout: Duration,
    /// Host latency must be strictly below this to pass
    pub max_ms: u64,
    /// URL the latency probe sends HEAD requests to
    pub host_check_url: String,
    /// IP echo endpoint used by the anonymity probe
    pub ip_check_url: String,
    /// Per-packet ping timeout
    pub ping_timeout: Duration,
    /// Whether ping runs; may be switched off mid-run
    pub ping: PingSwitch,
    /// Whether the throughput probe runs
    pub enable_speed_test: bool,
    /// File streamed by the throughput probe
    pub speed_test_url: String,
    /// Throughput at or above this is rendered as good
    pub speed_min_good_kbps: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_ms: DEFAULT_MAX_MS,
            host_check_url: DEFAULT_HOST_CHECK_URL.to_string(),
            ip_check_url: DEFAULT_IP_CHECK_URL.to_string(),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            ping: PingSwitch::new(true),
            enable_speed_test: false,
            speed_test_url: DEFAULT_SPEED_TEST_URL.to_string(),
            speed_min_good_kbps: DEFAULT_SPEED_MIN_GOOD_KBPS,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_max_ms(mut self, max_ms: u64) -> Self {
        self.max_ms = max_ms;
        self
    }

    pub fn with_host_check_url(mut self, url: String) -> Self {
        self.host_check_url = url;
        self
    }

    pub fn with_ip_check_url(mut self, url: String) -> Self {
        self.ip_check_url = url;
        self
    }

    pub fn with_ping(mut self, enabled: bool, timeout: Duration) -> Self {
        self.ping = PingSwitch::new(enabled);
        self.ping_timeout = timeout;
        self
    }

    pub fn with_speed_test(mut self, url: String, min_good_kbps: u64) -> Self {
        self.enable_speed_test = true;
        self.speed_test_url = url;
        self.speed_min_good_kbps = min_good_kbps;
        self
    }

    /// Time budget of the throughput probe
    pub fn speed_test_timeout(&self) -> Duration {
        self.http_timeout.max(MIN_SPEED_TEST_TIMEOUT)
    }

    pub fn scoring(&self) -> ScoringPolicy {
        ScoringPolicy {
            max_ms: self.max_ms,
            speed_min_good_kbps: self.speed_min_good_kbps,
        }
    }
}

/// The four network probes of the validation pipeline
#[async_trait]
pub trait Prober: Send + Sync {
    /// Fetch the IP echo endpoint through the proxy and return the IP seen
    /// by the remote side. A different IP than the proxy's own is a failure.
    async fn anonymity(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<String>;

    /// Round-trip time in milliseconds of a HEAD request through the proxy
    async fn latency(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64>;

    /// ICMP round-trip time in milliseconds to the proxy host
    async fn ping(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64>;

    /// Download throughput in KB/s through the proxy
    async fn throughput(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64>;
}

/// Probes backed by `reqwest` and the platform `ping` tool
#[derive(Debug, Clone, Default)]
pub struct HttpProber;

impl HttpProber {
    pub fn new() -> Self {
        Self
    }

    /// Create a reqwest client tunneling through the proxy
    fn create_client(proxy: &ProxyAddress, timeout: Duration) -> Result<Client, ProbeFailure> {
        let reqwest_proxy = ReqwestProxy::all(proxy.url())
            .map_err(|e| ProbeFailure::InvalidProxy(e.to_string()))?;

        Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ProbeFailure::InvalidProxy(e.to_string()))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn anonymity(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<String> {
        let client = match Self::create_client(proxy, config.http_timeout) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::HardFailure(e),
        };

        let url = &config.ip_check_url;
        let request = client.get(url).send();
        let response = match tokio::time::timeout(config.http_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return ProbeOutcome::SoftFailure(classify(e, url)),
            Err(_) => return ProbeOutcome::SoftFailure(timeout_failure(url)),
        };

        if !response.status().is_success() {
            return ProbeOutcome::SoftFailure(ProbeFailure::Status(response.status().as_u16()));
        }

        let body = match tokio::time::timeout(config.http_timeout, response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return ProbeOutcome::SoftFailure(classify(e, url)),
            Err(_) => return ProbeOutcome::SoftFailure(timeout_failure(url)),
        };

        let observed = match parse_echoed_ip(&body) {
            Ok(ip) => ip,
            Err(e) => return ProbeOutcome::SoftFailure(e),
        };

        if observed != proxy.host() {
            return ProbeOutcome::SoftFailure(ProbeFailure::IpMismatch {
                expected: proxy.host().to_string(),
                observed,
            });
        }

        ProbeOutcome::Success(observed)
    }

    async fn latency(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64> {
        let client = match Self::create_client(proxy, config.http_timeout) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::HardFailure(e),
        };

        let url = &config.host_check_url;
        let start = Instant::now();

        match tokio::time::timeout(config.http_timeout, client.head(url).send()).await {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    let elapsed = (start.elapsed().as_secs_f64() * 1000.0).round() as u64;
                    ProbeOutcome::Success(elapsed)
                } else {
                    ProbeOutcome::SoftFailure(ProbeFailure::Status(response.status().as_u16()))
                }
            }
            Ok(Err(e)) => ProbeOutcome::SoftFailure(classify(e, url)),
            Err(_) => ProbeOutcome::SoftFailure(timeout_failure(url)),
        }
    }

    async fn ping(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64> {
        ping::ping_host(proxy.host(), config.ping_timeout).await
    }

    async fn throughput(&self, proxy: &ProxyAddress, config: &ProbeConfig) -> ProbeOutcome<u64> {
        let budget = config.speed_test_timeout();
        let client = match Self::create_client(proxy, budget) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::HardFailure(e),
        };

        let url = &config.speed_test_url;
        let start = Instant::now();

        let download = async {
            let mut response = client.get(url).send().await?.error_for_status()?;
            let mut received: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                received += chunk.len() as u64;
            }
            Ok::<u64, reqwest::Error>(received)
        };

        match tokio::time::timeout(budget, download).await {
            Ok(Ok(received)) => ProbeOutcome::Success(compute_kbps(received, start.elapsed())),
            Ok(Err(e)) => ProbeOutcome::SoftFailure(classify(e, url)),
            Err(_) => ProbeOutcome::SoftFailure(timeout_failure(url)),
        }
    }
}

#[derive(Deserialize)]
struct IpEcho {
    ip: String,
}

/// Read the caller IP from an echo service body, either `{"ip": "..."}`
/// or a bare address.
pub fn parse_echoed_ip(body: &str) -> Result<String, ProbeFailure> {
    if let Ok(echo) = serde_json::from_str::<IpEcho>(body) {
        return Ok(echo.ip);
    }

    let trimmed = body.trim();
    if trimmed.parse::<IpAddr>().is_ok() {
        return Ok(trimmed.to_string());
    }

    let preview: String = trimmed.chars().take(40).collect();
    Err(ProbeFailure::BadResponse(preview))
}

/// Throughput in KB/s, or 0 when nothing measurable was transferred
pub fn compute_kbps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.001 && bytes > 0 {
        ((bytes as f64 / 1024.0) / secs).round() as u64
    } else {
        0
    }
}

fn timeout_failure(url: &str) -> ProbeFailure {
    ProbeFailure::Timeout {
        url: url.to_string(),
    }
}

fn classify(e: reqwest::Error, url: &str) -> ProbeFailure {
    if e.is_timeout() {
        timeout_failure(url)
    } else if let Some(status) = e.status() {
        ProbeFailure::Status(status.as_u16())
    } else {
        ProbeFailure::Transport(e.to_string())
    }
}
