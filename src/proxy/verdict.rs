//! Verdict aggregation
//!
//! Folds the outcomes of the probe sequence for one proxy into a pass/fail
//! classification and a diagnostic line. Aggregation is a pure function:
//! it never blocks and never touches run state.

use crate::proxy::models::ProbeOutcome;
use std::fmt;

/// Thresholds applied when scoring probe outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// Host latency must be strictly below this to pass
    pub max_ms: u64,
    /// Throughput at or above this is rendered as good
    pub speed_min_good_kbps: u64,
}

/// Outcomes gathered for one proxy; `None` means the probe did not run
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcomes {
    pub anonymity: Option<ProbeOutcome<String>>,
    pub latency: Option<ProbeOutcome<u64>>,
    pub ping: Option<ProbeOutcome<u64>>,
    pub throughput: Option<ProbeOutcome<u64>>,
}

/// Overall classification of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    /// Reachable and faster than the threshold
    Good,
    /// Reachable but at or above the threshold
    Slow,
    Failed,
}

/// Rendering hint for one part of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Good,
    Warn,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub tone: Tone,
}

/// Diagnostic line made of toned segments, displayed joined by ` | `
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostic {
    segments: Vec<Segment>,
}

impl Diagnostic {
    fn push(&mut self, text: impl Into<String>, tone: Tone) {
        self.segments.push(Segment {
            text: text.into(),
            tone,
        });
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", segment.text)?;
        }
        Ok(())
    }
}

/// Aggregated classification plus diagnostic for one proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub passed: bool,
    pub host_latency_ms: Option<u64>,
    pub ping_ms: Option<u64>,
    pub throughput_kbps: Option<u64>,
    pub diagnostic: Diagnostic,
}

impl Verdict {
    /// A failing verdict carrying only a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        let mut diagnostic = Diagnostic::default();
        diagnostic.push(reason, Tone::Bad);
        Self {
            status: VerdictStatus::Failed,
            passed: false,
            host_latency_ms: None,
            ping_ms: None,
            throughput_kbps: None,
            diagnostic,
        }
    }
}

/// Combine probe outcomes into a verdict.
///
/// An anonymity failure wins over everything, then a latency failure.
/// Otherwise the proxy passes iff its host latency is strictly below
/// `policy.max_ms`. Ping and throughput are informational only.
pub fn aggregate(outcomes: &ProbeOutcomes, policy: &ScoringPolicy) -> Verdict {
    if let Some(failure) = outcomes.anonymity.as_ref().and_then(|o| o.failure()) {
        let verdict = Verdict::failed(format!("IP check failed: {failure}"));
        return with_extras(verdict, outcomes, policy);
    }

    let latency = match &outcomes.latency {
        Some(ProbeOutcome::Success(ms)) => *ms,
        Some(outcome) => {
            let reason = outcome
                .failure()
                .map(|f| format!("Host check failed: {f}"))
                .unwrap_or_else(|| "Host check failed".to_string());
            return with_extras(Verdict::failed(reason), outcomes, policy);
        }
        None => {
            return with_extras(
                Verdict::failed("Host check not performed"),
                outcomes,
                policy,
            )
        }
    };

    let passed = latency < policy.max_ms;
    let (status, tone) = if passed {
        (VerdictStatus::Good, Tone::Good)
    } else {
        (VerdictStatus::Slow, Tone::Warn)
    };

    let mut diagnostic = Diagnostic::default();
    diagnostic.push(format!("{latency}ms"), tone);

    let verdict = Verdict {
        status,
        passed,
        host_latency_ms: Some(latency),
        ping_ms: None,
        throughput_kbps: None,
        diagnostic,
    };

    with_extras(verdict, outcomes, policy)
}

fn with_extras(mut verdict: Verdict, outcomes: &ProbeOutcomes, policy: &ScoringPolicy) -> Verdict {
    match &outcomes.ping {
        Some(ProbeOutcome::Success(ms)) => {
            verdict.ping_ms = Some(*ms);
            verdict.diagnostic.push(format!("Ping: {ms}ms"), Tone::Plain);
        }
        Some(_) => verdict.diagnostic.push("Ping: N/A", Tone::Warn),
        None => {}
    }

    match &outcomes.throughput {
        Some(ProbeOutcome::Success(kbps)) => {
            verdict.throughput_kbps = Some(*kbps);
            let tone = if *kbps >= policy.speed_min_good_kbps {
                Tone::Good
            } else {
                Tone::Warn
            };
            verdict.diagnostic.push(format!("Speed: {kbps} KB/s"), tone);
        }
        Some(_) => verdict.diagnostic.push("Speed: N/A", Tone::Warn),
        None => {}
    }

    verdict
}
