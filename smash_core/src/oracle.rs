use crate::executor::Outcome;
use crate::input::Payload;
use serde::Serialize;
use std::fmt;

/// Why an iteration counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The target exited non-zero or was killed by a signal.
    Crash,
    /// The target outlived its deadline and was killed by the supervisor.
    Timeout,
}

impl FailureKind {
    /// File name prefix used for artifacts of this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            FailureKind::Crash => "crash",
            FailureKind::Timeout => "timeout",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "crash" => Some(FailureKind::Crash),
            "timeout" => Some(FailureKind::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A failing iteration: which one, why, and the exact bytes that caused it.
///
/// Built once per failing iteration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashRecord {
    iteration: u64,
    kind: FailureKind,
    outcome: Outcome,
    payload: Payload,
}

impl CrashRecord {
    pub fn new(iteration: u64, kind: FailureKind, outcome: Outcome, payload: Payload) -> Self {
        Self {
            iteration,
            kind,
            outcome,
            payload,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// MD5 hex digest of the payload, for log lines and triage.
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(self.payload.as_bytes()))
    }

    pub fn describe(&self) -> String {
        match self.outcome {
            Outcome::AbnormalExit { code } if code < 0 => {
                format!("Terminated by signal {}", -code)
            }
            Outcome::AbnormalExit { code } => format!("Exited with code {code}"),
            Outcome::Timeout => "Exceeded deadline".to_string(),
            Outcome::Normal { code } => format!("Exited normally with code {code}"),
        }
    }
}

/// An `Oracle` decides whether an outcome is a finding worth persisting.
pub trait Oracle {
    fn examine(&self, iteration: u64, payload: Payload, outcome: &Outcome) -> Option<CrashRecord>;
}

/// Treats abnormal exits and timeouts alike as failures. Timeouts gate the
/// verdict exactly like crashes do.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureOracle;

impl FailureOracle {
    pub fn new() -> Self {
        FailureOracle
    }
}

impl Oracle for FailureOracle {
    fn examine(&self, iteration: u64, payload: Payload, outcome: &Outcome) -> Option<CrashRecord> {
        let kind = match outcome {
            Outcome::Normal { code: 0 } => return None,
            Outcome::Normal { .. } | Outcome::AbnormalExit { .. } => FailureKind::Crash,
            Outcome::Timeout => FailureKind::Timeout,
        };
        Some(CrashRecord::new(iteration, kind, *outcome, payload))
    }
}

#[cfg(test)]
pub(crate) fn record_for_test(iteration: u64, kind: FailureKind, bytes: &[u8]) -> CrashRecord {
    let outcome = match kind {
        FailureKind::Crash => Outcome::AbnormalExit { code: 1 },
        FailureKind::Timeout => Outcome::Timeout,
    };
    CrashRecord::new(iteration, kind, outcome, Payload::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_are_not_reported() {
        let oracle = FailureOracle::new();
        let report = oracle.examine(0, Payload::new(vec![1, 2, 3]), &Outcome::Normal { code: 0 });
        assert!(report.is_none());
    }

    #[test]
    fn abnormal_exit_becomes_crash_record() {
        let oracle = FailureOracle::new();
        let input_data = vec![0xFF, 0xFE, 0xFD];
        let record = oracle
            .examine(
                7,
                Payload::new(input_data.clone()),
                &Outcome::AbnormalExit { code: 139 },
            )
            .expect("abnormal exit should be reported");
        assert_eq!(record.iteration(), 7);
        assert_eq!(record.kind(), FailureKind::Crash);
        assert_eq!(record.payload().as_bytes(), input_data.as_slice());
        assert_eq!(record.describe(), "Exited with code 139");
        assert_eq!(
            record.digest(),
            format!("{:x}", md5::compute(&input_data))
        );
    }

    #[test]
    fn signal_death_is_described() {
        let record = FailureOracle
            .examine(1, Payload::empty(), &Outcome::AbnormalExit { code: -11 })
            .unwrap();
        assert_eq!(record.kind(), FailureKind::Crash);
        assert_eq!(record.describe(), "Terminated by signal 11");
    }

    #[test]
    fn timeout_becomes_timeout_record() {
        let record = FailureOracle
            .examine(3, Payload::new(vec![0xAA]), &Outcome::Timeout)
            .expect("timeouts are failures");
        assert_eq!(record.kind(), FailureKind::Timeout);
        assert_eq!(record.outcome(), Outcome::Timeout);
    }

    #[test]
    fn prefixes_round_trip() {
        for kind in [FailureKind::Crash, FailureKind::Timeout] {
            assert_eq!(FailureKind::from_prefix(kind.prefix()), Some(kind));
        }
        assert_eq!(FailureKind::from_prefix("hang"), None);
    }
}
