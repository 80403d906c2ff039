//! Per-proxy validation pipeline
//!
//! Runs the probes of one proxy in order, stops at the first stage that
//! disqualifies it, aggregates the outcomes and records the result in the
//! shared run state.

use crate::proxy::coordinator::SharedState;
use crate::proxy::models::{CheckEvent, CheckReport, ProbeFailure, ProbeOutcome, ProxyAddress};
use crate::proxy::probe::{ProbeConfig, Prober};
use crate::proxy::verdict::{aggregate, ProbeOutcomes, Verdict};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Validator<P> {
    prober: Arc<P>,
    config: Arc<ProbeConfig>,
    state: Arc<SharedState>,
}

impl<P: Prober> Validator<P> {
    pub fn new(prober: Arc<P>, config: Arc<ProbeConfig>, state: Arc<SharedState>) -> Self {
        Self {
            prober,
            config,
            state,
        }
    }

    /// Validate one raw `host:port` line.
    ///
    /// Malformed lines are reported without touching the counters. Every
    /// other line is counted as checked exactly once, whatever happens
    /// during probing.
    pub async fn validate(&self, raw: &str) -> CheckEvent {
        let address = match ProxyAddress::parse(raw) {
            Ok(address) => address,
            Err(error) => {
                debug!(proxy = raw, %error, "rejected before probing");
                return CheckEvent {
                    report: CheckReport::Malformed {
                        raw: raw.trim().to_string(),
                        error,
                    },
                    progress: self.state.progress(),
                };
            }
        };

        let verdict = match AssertUnwindSafe(self.run_probes(&address))
            .catch_unwind()
            .await
        {
            Ok(verdict) => verdict,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(proxy = %address, %message, "validation panicked");
                Verdict::failed(format!("Unexpected error: {message}"))
            }
        };

        let (progress, written) = self.state.record_result(&address, verdict.passed);
        let persisted = match written {
            Ok(written) => written,
            Err(e) => {
                error!(proxy = %address, error = %e, "failed to write passing proxy");
                false
            }
        };

        debug!(
            proxy = %address,
            status = ?verdict.status,
            diagnostic = %verdict.diagnostic,
            persisted,
            "proxy checked"
        );

        CheckEvent {
            report: CheckReport::Checked {
                address,
                verdict,
                persisted,
            },
            progress,
        }
    }

    async fn run_probes(&self, address: &ProxyAddress) -> Verdict {
        let config = self.config.as_ref();
        let policy = config.scoring();
        let mut outcomes = ProbeOutcomes::default();

        if !address.is_private() {
            let anonymity = self.prober.anonymity(address, config).await;
            let passed = anonymity.is_success();
            outcomes.anonymity = Some(anonymity);
            if !passed {
                return aggregate(&outcomes, &policy);
            }
        }

        let latency = self.prober.latency(address, config).await;
        let reachable = latency.is_success();
        outcomes.latency = Some(latency);
        if !reachable {
            return aggregate(&outcomes, &policy);
        }

        if config.ping.is_enabled() {
            let ping = self.prober.ping(address, config).await;
            if matches!(ping, ProbeOutcome::SoftFailure(ProbeFailure::ToolMissing))
                && config.ping.disable()
            {
                warn!("ping tool not found, ICMP ping disabled for the rest of the run");
            }
            outcomes.ping = Some(ping);
        }

        if config.enable_speed_test {
            outcomes.throughput = Some(self.prober.throughput(address, config).await);
        }

        aggregate(&outcomes, &policy)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::coordinator::OutputSink;
    use crate::proxy::verdict::VerdictStatus;
    use async_trait::async_trait;
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted prober.
    ///
    /// - latency is the port number, ports above 60000 time out
    /// - hosts starting with `9.` echo a different IP
    /// - port 666 panics during the latency probe
    #[derive(Default)]
    struct ScriptedProber {
        anonymity_calls: AtomicUsize,
        ping_calls: AtomicUsize,
        ping_missing: bool,
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn anonymity(&self, proxy: &ProxyAddress, _: &ProbeConfig) -> ProbeOutcome<String> {
            self.anonymity_calls.fetch_add(1, Ordering::SeqCst);
            if proxy.host().starts_with("9.") {
                ProbeOutcome::SoftFailure(ProbeFailure::IpMismatch {
                    expected: proxy.host().to_string(),
                    observed: "203.0.113.7".to_string(),
                })
            } else {
                ProbeOutcome::Success(proxy.host().to_string())
            }
        }

        async fn latency(&self, proxy: &ProxyAddress, _: &ProbeConfig) -> ProbeOutcome<u64> {
            match proxy.port() {
                666 => panic!("probe exploded"),
                p if p > 60000 => ProbeOutcome::SoftFailure(ProbeFailure::Timeout {
                    url: "https://www.google.com".to_string(),
                }),
                p => ProbeOutcome::Success(p as u64),
            }
        }

        async fn ping(&self, _: &ProxyAddress, _: &ProbeConfig) -> ProbeOutcome<u64> {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            if self.ping_missing {
                ProbeOutcome::SoftFailure(ProbeFailure::ToolMissing)
            } else {
                ProbeOutcome::Success(12)
            }
        }

        async fn throughput(&self, _: &ProxyAddress, _: &ProbeConfig) -> ProbeOutcome<u64> {
            ProbeOutcome::Success(250)
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(ping: bool) -> ProbeConfig {
        ProbeConfig::new()
            .with_max_ms(5000)
            .with_ping(ping, Duration::from_millis(100))
    }

    fn setup(
        prober: ScriptedProber,
        config: ProbeConfig,
        sink: OutputSink,
    ) -> (Validator<ScriptedProber>, Arc<ScriptedProber>, Arc<SharedState>) {
        let prober = Arc::new(prober);
        let state = Arc::new(SharedState::new(10, sink));
        let validator = Validator::new(Arc::clone(&prober), Arc::new(config), Arc::clone(&state));
        (validator, prober, state)
    }

    fn verdict_of(event: &CheckEvent) -> &Verdict {
        event.report.verdict().expect("proxy should have been checked")
    }

    #[tokio::test]
    async fn test_fast_anonymous_proxy_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("good.txt");
        let (validator, prober, state) =
            setup(ScriptedProber::default(), config(false), OutputSink::create(&path).unwrap());

        let event = validator.validate("8.8.8.8:4200").await;

        assert!(event.report.is_persisted());
        assert_eq!(verdict_of(&event).status, VerdictStatus::Good);
        assert_eq!(event.progress.checked, 1);
        assert_eq!(event.progress.good, 1);
        assert_eq!(prober.anonymity_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.snapshot().good_count, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "8.8.8.8:4200\n");
    }

    #[tokio::test]
    async fn test_malformed_line_is_not_counted() {
        let (validator, _, state) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(io::sink()));

        for raw in ["1.2.3.4", "1.2.3.4:99999", "1.2.3.4:http"] {
            let event = validator.validate(raw).await;
            assert!(matches!(event.report, CheckReport::Malformed { .. }));
            assert_eq!(event.progress.checked, 0);
        }
        assert_eq!(state.snapshot().checked_count, 0);
    }

    #[tokio::test]
    async fn test_private_proxy_skips_anonymity() {
        let (validator, prober, _) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(io::sink()));

        let event = validator.validate("192.168.0.10:300").await;

        assert!(verdict_of(&event).passed);
        assert_eq!(prober.anonymity_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_anonymity_mismatch_fails_and_counts() {
        let (validator, _, state) =
            setup(ScriptedProber::default(), config(true), OutputSink::from_writer(io::sink()));

        let event = validator.validate("9.9.9.9:100").await;
        let verdict = verdict_of(&event);

        assert_eq!(verdict.status, VerdictStatus::Failed);
        assert!(verdict.diagnostic.to_string().starts_with("IP check failed"));
        assert!(!event.report.is_persisted());
        assert_eq!(state.snapshot().checked_count, 1);
        assert_eq!(state.snapshot().good_count, 0);
    }

    #[tokio::test]
    async fn test_latency_timeout_is_counted_not_good() {
        let (validator, prober, state) =
            setup(ScriptedProber::default(), config(true), OutputSink::from_writer(io::sink()));

        let event = validator.validate("8.8.8.8:61000").await;

        assert!(!verdict_of(&event).passed);
        assert_eq!(state.snapshot().checked_count, 1);
        assert_eq!(state.snapshot().good_count, 0);
        // Short-circuited before the optional probes.
        assert_eq!(prober.ping_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_proxy_is_not_persisted() {
        let (validator, _, state) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(io::sink()));

        let event = validator.validate("8.8.8.8:5000").await;

        assert_eq!(verdict_of(&event).status, VerdictStatus::Slow);
        assert!(!event.report.is_persisted());
        assert_eq!(state.snapshot().good_count, 0);
    }

    #[tokio::test]
    async fn test_ping_disabled_never_measured() {
        let (validator, prober, _) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(io::sink()));

        let event = validator.validate("8.8.8.8:100").await;

        assert!(!verdict_of(&event).diagnostic.to_string().contains("Ping"));
        assert_eq!(prober.ping_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_ping_tool_disables_ping() {
        let prober = ScriptedProber {
            ping_missing: true,
            ..Default::default()
        };
        let config = config(true);
        let switch = config.ping.clone();
        let (validator, prober, _) = setup(prober, config, OutputSink::from_writer(io::sink()));

        let first = validator.validate("8.8.8.8:100").await;
        assert!(verdict_of(&first).passed);
        assert!(verdict_of(&first).diagnostic.to_string().contains("Ping: N/A"));
        assert!(!switch.is_enabled());

        let second = validator.validate("8.8.4.4:100").await;
        assert!(!verdict_of(&second).diagnostic.to_string().contains("Ping"));
        assert_eq!(prober.ping_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_speed_test_appended() {
        let config = config(true).with_speed_test("http://speed.test/1MB".to_string(), 100);
        let (validator, _, _) =
            setup(ScriptedProber::default(), config, OutputSink::from_writer(io::sink()));

        let event = validator.validate("8.8.8.8:100").await;

        assert_eq!(
            verdict_of(&event).diagnostic.to_string(),
            "100ms | Ping: 12ms | Speed: 250 KB/s"
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_counted() {
        let (validator, _, state) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(io::sink()));

        let event = validator.validate("8.8.8.8:666").await;
        let verdict = verdict_of(&event);

        assert_eq!(verdict.status, VerdictStatus::Failed);
        assert_eq!(verdict.diagnostic.to_string(), "Unexpected error: probe exploded");
        assert_eq!(state.snapshot().checked_count, 1);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_verdict_but_not_persisted() {
        let (validator, _, state) =
            setup(ScriptedProber::default(), config(false), OutputSink::from_writer(FailingWriter));

        let event = validator.validate("8.8.8.8:100").await;

        assert!(verdict_of(&event).passed);
        assert!(!event.report.is_persisted());
        assert_eq!(state.snapshot().checked_count, 1);
        assert_eq!(state.snapshot().good_count, 0);
    }
}
