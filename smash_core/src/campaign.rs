use crate::config::{CampaignSettings, ConfigError, SmashConfig};
use crate::corpus::{CorpusError, CrashDirectory, CrashStore};
use crate::executor::{CommandSupervisor, Supervisor, SupervisorError};
use crate::generator::{Generator, WeightedGenerator};
use crate::monitor::{LogMonitor, ProgressMonitor};
use crate::oracle::{FailureKind, FailureOracle, Oracle};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::{Serialize, Serializer};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Harness-level failures. Target failures never show up here: they are
/// recorded as artifacts and the campaign carries on.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Harness fault in target supervisor: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("Harness fault in crash corpus: {0}")]
    Corpus(#[from] CorpusError),
    #[error("Campaign already ran to completion")]
    AlreadyFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Running,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Success,
    FailureDetected,
}

impl Verdict {
    fn from_failures(failures: u64) -> Self {
        if failures == 0 {
            Verdict::Success
        } else {
            Verdict::FailureDetected
        }
    }

    /// Process exit code for pipeline gating.
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Success => 0,
            Verdict::FailureDetected => 1,
        }
    }
}

/// Running totals, owned by the [`Campaign`] that produces them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CampaignStats {
    /// Supervised executions completed.
    pub iterations: u64,
    /// All failures: abnormal exits plus timeouts.
    pub crashes: u64,
    pub abnormal_exits: u64,
    pub timeouts: u64,
    #[serde(rename = "elapsed-secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl CampaignStats {
    fn record_failure(&mut self, kind: FailureKind) {
        self.crashes += 1;
        match kind {
            FailureKind::Crash => self.abnormal_exits += 1,
            FailureKind::Timeout => self.timeouts += 1,
        }
    }

    pub fn execs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.iterations as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CampaignReport {
    pub verdict: Verdict,
    /// Seed of the payload RNG; rerunning with it replays the same inputs.
    pub seed: u64,
    pub stats: CampaignStats,
}

impl CampaignReport {
    pub fn write_json(&self, path: &Path) -> Result<(), anyhow::Error> {
        let file = File::create(path)
            .map_err(|e| anyhow::anyhow!("Failed to create summary file {:?}: {}", path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Drives one fuzzing campaign from the first iteration to a verdict.
///
/// Per iteration: generate a payload, run it, and if the oracle reports a
/// failure, persist it before moving on. A campaign runs once; its counters
/// live here, so independent campaigns can share a process.
pub struct Campaign<G, S, C, O = FailureOracle>
where
    G: Generator<ChaCha8Rng>,
    S: Supervisor,
    C: CrashStore,
    O: Oracle,
{
    generator: G,
    supervisor: S,
    store: C,
    oracle: O,
    monitor: Box<dyn ProgressMonitor>,
    rng: ChaCha8Rng,
    seed: u64,
    iterations: u64,
    progress_interval: u64,
    state: CampaignState,
    stats: CampaignStats,
}

impl<G, S, C> Campaign<G, S, C>
where
    G: Generator<ChaCha8Rng>,
    S: Supervisor,
    C: CrashStore,
{
    /// A campaign with the standard [`FailureOracle`] and [`LogMonitor`].
    pub fn new(settings: &CampaignSettings, generator: G, supervisor: S, store: C) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        Self {
            generator,
            supervisor,
            store,
            oracle: FailureOracle::new(),
            monitor: Box::new(LogMonitor),
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            iterations: settings.iterations,
            progress_interval: settings.progress_interval.max(1),
            state: CampaignState::Running,
            stats: CampaignStats::default(),
        }
    }

    /// Swaps in a different failure oracle.
    pub fn with_oracle<O: Oracle>(self, oracle: O) -> Campaign<G, S, C, O> {
        Campaign {
            generator: self.generator,
            supervisor: self.supervisor,
            store: self.store,
            oracle,
            monitor: self.monitor,
            rng: self.rng,
            seed: self.seed,
            iterations: self.iterations,
            progress_interval: self.progress_interval,
            state: self.state,
            stats: self.stats,
        }
    }
}

impl<G, S, C, O> Campaign<G, S, C, O>
where
    G: Generator<ChaCha8Rng>,
    S: Supervisor,
    C: CrashStore,
    O: Oracle,
{
    pub fn with_monitor(mut self, monitor: Box<dyn ProgressMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Runs every iteration and returns the report. A harness fault stops
    /// the campaign at once; the campaign is `Done` either way.
    pub fn run(&mut self) -> Result<CampaignReport, CampaignError> {
        if self.state == CampaignState::Done {
            return Err(CampaignError::AlreadyFinished);
        }
        let started = Instant::now();
        self.monitor.on_start(self.iterations, self.seed);

        let result = self.run_iterations(started);
        self.stats.elapsed = started.elapsed();
        self.state = CampaignState::Done;
        result?;

        let report = CampaignReport {
            verdict: Verdict::from_failures(self.stats.crashes),
            seed: self.seed,
            stats: self.stats.clone(),
        };
        self.monitor.on_finish(&report);
        Ok(report)
    }

    fn run_iterations(&mut self, started: Instant) -> Result<(), CampaignError> {
        for iteration in 0..self.iterations {
            let payload = self.generator.generate(&mut self.rng);
            let outcome = self.supervisor.run(&payload)?;
            self.stats.iterations += 1;

            if let Some(record) = self.oracle.examine(iteration, payload, &outcome) {
                let artifact = self.store.save(&record)?;
                self.stats.record_failure(record.kind());
                self.monitor.on_failure(&record, &artifact);
            }

            if iteration % self.progress_interval == 0 {
                self.stats.elapsed = started.elapsed();
                self.monitor.on_progress(iteration, &self.stats);
            }
        }
        Ok(())
    }
}

impl Campaign<WeightedGenerator, CommandSupervisor, CrashDirectory> {
    /// Wires the standard components from a validated configuration.
    pub fn from_config(config: &SmashConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let target = config
            .target
            .path
            .clone()
            .ok_or(ConfigError::MissingTarget)?;
        let generator = WeightedGenerator::new(
            config.generator.weights,
            config.generator.raw_length,
            config.generator.noise_length,
        )?;
        let supervisor = CommandSupervisor::new(target, config.target.timeout());
        let store = CrashDirectory::new(&config.corpus.crash_dir);
        Ok(Self::new(&config.campaign, generator, supervisor, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCrashStore;
    use crate::executor::Outcome;
    use crate::input::Payload;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Returns scripted outcomes in a cycle and remembers every payload.
    /// A `None` step is a harness fault.
    struct ScriptedSupervisor {
        outcomes: Vec<Option<Outcome>>,
        seen: Vec<Payload>,
    }

    impl ScriptedSupervisor {
        fn always(outcome: Outcome) -> Self {
            Self {
                outcomes: vec![Some(outcome)],
                seen: Vec::new(),
            }
        }
    }

    impl Supervisor for ScriptedSupervisor {
        fn run(&mut self, payload: &Payload) -> Result<Outcome, SupervisorError> {
            let step = self.outcomes[self.seen.len() % self.outcomes.len()];
            self.seen.push(payload.clone());
            step.ok_or(SupervisorError::StdinUnavailable)
        }
    }

    #[derive(Default)]
    struct Recorded {
        progress: Vec<u64>,
        failures: Vec<u64>,
        finished: Option<Verdict>,
    }

    struct RecordingMonitor(Rc<RefCell<Recorded>>);

    impl ProgressMonitor for RecordingMonitor {
        fn on_failure(&mut self, record: &crate::oracle::CrashRecord, _artifact: &Path) {
            self.0.borrow_mut().failures.push(record.iteration());
        }
        fn on_progress(&mut self, iteration: u64, _stats: &CampaignStats) {
            self.0.borrow_mut().progress.push(iteration);
        }
        fn on_finish(&mut self, report: &CampaignReport) {
            self.0.borrow_mut().finished = Some(report.verdict);
        }
    }

    fn settings(iterations: u64, seed: u64) -> CampaignSettings {
        CampaignSettings {
            iterations,
            seed: Some(seed),
            progress_interval: 1000,
        }
    }

    fn campaign(
        iterations: u64,
        supervisor: ScriptedSupervisor,
    ) -> Campaign<WeightedGenerator, ScriptedSupervisor, InMemoryCrashStore> {
        Campaign::new(
            &settings(iterations, 11),
            WeightedGenerator::default(),
            supervisor,
            InMemoryCrashStore::new(),
        )
    }

    #[test]
    fn passing_target_gives_success() {
        let mut campaign = campaign(50, ScriptedSupervisor::always(Outcome::Normal { code: 0 }));
        let report = campaign.run().unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.verdict.exit_code(), 0);
        assert_eq!(report.stats.iterations, 50);
        assert_eq!(report.stats.crashes, 0);
        assert_eq!(campaign.supervisor().seen.len(), 50);
        assert!(campaign.store().records().is_empty());
        assert_eq!(campaign.state(), CampaignState::Done);
    }

    #[test]
    fn every_failure_is_stored_with_its_payload() {
        let supervisor = ScriptedSupervisor {
            outcomes: vec![
                Some(Outcome::Normal { code: 0 }),
                Some(Outcome::AbnormalExit { code: 2 }),
                Some(Outcome::Timeout),
            ],
            seen: Vec::new(),
        };
        let mut campaign = campaign(9, supervisor);
        let report = campaign.run().unwrap();

        assert_eq!(report.verdict, Verdict::FailureDetected);
        assert_eq!(report.verdict.exit_code(), 1);
        assert_eq!(report.stats.crashes, 6);
        assert_eq!(report.stats.abnormal_exits, 3);
        assert_eq!(report.stats.timeouts, 3);

        let records = campaign.store().records();
        let iterations: Vec<u64> = records.iter().map(|r| r.iteration()).collect();
        assert_eq!(iterations, vec![1, 2, 4, 5, 7, 8]);
        for record in records {
            let expected_kind = if record.iteration() % 3 == 1 {
                FailureKind::Crash
            } else {
                FailureKind::Timeout
            };
            assert_eq!(record.kind(), expected_kind);
            assert_eq!(
                record.payload(),
                &campaign.supervisor().seen[record.iteration() as usize]
            );
        }
    }

    #[test]
    fn zero_iterations_is_a_trivial_success() {
        let mut campaign = campaign(0, ScriptedSupervisor::always(Outcome::Timeout));
        let report = campaign.run().unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.stats.iterations, 0);
        assert!(campaign.supervisor().seen.is_empty());
    }

    #[test]
    fn harness_fault_aborts_immediately() {
        let supervisor = ScriptedSupervisor {
            outcomes: vec![
                Some(Outcome::AbnormalExit { code: 1 }),
                None,
            ],
            seen: Vec::new(),
        };
        let mut campaign = campaign(10, supervisor);
        let result = campaign.run();
        assert!(matches!(
            result,
            Err(CampaignError::Supervisor(SupervisorError::StdinUnavailable))
        ));
        assert_eq!(campaign.supervisor().seen.len(), 2);
        // The fault is not a finding; only the earlier crash was stored.
        assert_eq!(campaign.store().records().len(), 1);
        assert_eq!(campaign.stats().crashes, 1);
        assert_eq!(campaign.state(), CampaignState::Done);
    }

    #[test]
    fn store_fault_aborts_immediately() {
        struct FailingStore;
        impl CrashStore for FailingStore {
            fn save(
                &mut self,
                _record: &crate::oracle::CrashRecord,
            ) -> Result<std::path::PathBuf, CorpusError> {
                Err(CorpusError::NotADirectory("crashes".into()))
            }
        }
        let mut campaign = Campaign::new(
            &settings(5, 1),
            WeightedGenerator::default(),
            ScriptedSupervisor::always(Outcome::Timeout),
            FailingStore,
        );
        assert!(matches!(
            campaign.run(),
            Err(CampaignError::Corpus(CorpusError::NotADirectory(_)))
        ));
        assert_eq!(campaign.supervisor().seen.len(), 1);
        assert_eq!(campaign.stats().crashes, 0);
    }

    /// Only signal deaths count; plain non-zero exits and hangs are ignored.
    struct SignalOnlyOracle;

    impl Oracle for SignalOnlyOracle {
        fn examine(
            &self,
            iteration: u64,
            payload: Payload,
            outcome: &Outcome,
        ) -> Option<crate::oracle::CrashRecord> {
            outcome.signal().map(|_| {
                crate::oracle::CrashRecord::new(iteration, FailureKind::Crash, *outcome, payload)
            })
        }
    }

    #[test]
    fn custom_oracle_decides_what_is_a_failure() {
        let supervisor = ScriptedSupervisor {
            outcomes: vec![
                Some(Outcome::AbnormalExit { code: 1 }),
                Some(Outcome::AbnormalExit { code: -11 }),
                Some(Outcome::Timeout),
            ],
            seen: Vec::new(),
        };
        let mut campaign = campaign(6, supervisor).with_oracle(SignalOnlyOracle);
        let report = campaign.run().unwrap();

        assert_eq!(report.verdict, Verdict::FailureDetected);
        assert_eq!(report.stats.crashes, 2);
        assert_eq!(report.stats.timeouts, 0);
        let iterations: Vec<u64> = campaign
            .store()
            .records()
            .iter()
            .map(|r| r.iteration())
            .collect();
        assert_eq!(iterations, vec![1, 4]);
    }

    #[test]
    fn campaign_runs_only_once() {
        let mut campaign = campaign(3, ScriptedSupervisor::always(Outcome::Normal { code: 0 }));
        campaign.run().unwrap();
        assert!(matches!(campaign.run(), Err(CampaignError::AlreadyFinished)));
        assert_eq!(campaign.supervisor().seen.len(), 3);
    }

    #[test]
    fn progress_fires_on_interval_including_first_iteration() {
        let recorded = Rc::new(RefCell::new(Recorded::default()));
        let mut campaign = Campaign::new(
            &CampaignSettings {
                iterations: 25,
                seed: Some(3),
                progress_interval: 10,
            },
            WeightedGenerator::default(),
            ScriptedSupervisor::always(Outcome::AbnormalExit { code: 1 }),
            InMemoryCrashStore::new(),
        )
        .with_monitor(Box::new(RecordingMonitor(recorded.clone())));
        campaign.run().unwrap();

        let recorded = recorded.borrow();
        assert_eq!(recorded.progress, vec![0, 10, 20]);
        assert_eq!(recorded.failures.len(), 25);
        assert_eq!(recorded.finished, Some(Verdict::FailureDetected));
    }

    #[test]
    fn same_seed_replays_same_payloads() {
        let run = |seed| {
            let mut campaign = Campaign::new(
                &settings(40, seed),
                WeightedGenerator::default(),
                ScriptedSupervisor::always(Outcome::Normal { code: 0 }),
                InMemoryCrashStore::new(),
            );
            campaign.run().unwrap();
            campaign.supervisor().seen.clone()
        };
        assert_eq!(run(77), run(77));
        assert_ne!(run(77), run(78));
    }

    #[test]
    fn seed_is_drawn_when_not_configured() {
        let campaign = Campaign::new(
            &CampaignSettings::default(),
            WeightedGenerator::default(),
            ScriptedSupervisor::always(Outcome::Normal { code: 0 }),
            InMemoryCrashStore::new(),
        );
        let report_seed = campaign.seed();
        let replay = Campaign::new(
            &CampaignSettings {
                seed: Some(report_seed),
                ..CampaignSettings::default()
            },
            WeightedGenerator::default(),
            ScriptedSupervisor::always(Outcome::Normal { code: 0 }),
            InMemoryCrashStore::new(),
        );
        assert_eq!(replay.seed(), report_seed);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = CampaignReport {
            verdict: Verdict::FailureDetected,
            seed: 5,
            stats: CampaignStats {
                iterations: 10,
                crashes: 2,
                abnormal_exits: 1,
                timeouts: 1,
                elapsed: Duration::from_millis(1500),
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["verdict"], "failure-detected");
        assert_eq!(value["seed"], 5);
        assert_eq!(value["stats"]["crashes"], 2);
        assert_eq!(value["stats"]["abnormal-exits"], 1);
        assert_eq!(value["stats"]["elapsed-secs"], 1.5);
        assert!(value["stats"].get("abnormal_exits").is_none());
    }
}
