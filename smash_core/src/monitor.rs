use crate::campaign::{CampaignReport, CampaignStats, Verdict};
use crate::oracle::{CrashRecord, FailureKind};
use log::{info, warn};
use std::path::Path;

/// A `ProgressMonitor` receives observations from a running campaign.
///
/// Monitors are pure side effects: nothing they do feeds back into the
/// campaign loop. Every hook except `on_progress` has an empty default.
pub trait ProgressMonitor {
    /// Called once before the first iteration.
    fn on_start(&mut self, _iterations: u64, _seed: u64) {}

    /// Called after a failing iteration's record has been persisted.
    fn on_failure(&mut self, _record: &CrashRecord, _artifact: &Path) {}

    /// Called at the configured progress interval, iteration 0 included.
    fn on_progress(&mut self, iteration: u64, stats: &CampaignStats);

    /// Called once with the final report.
    fn on_finish(&mut self, _report: &CampaignReport) {}
}

/// Reports through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMonitor;

impl ProgressMonitor for LogMonitor {
    fn on_start(&mut self, iterations: u64, seed: u64) {
        info!("Starting fuzzing campaign: {iterations} iterations (seed {seed})");
    }

    fn on_failure(&mut self, record: &CrashRecord, artifact: &Path) {
        match record.kind() {
            FailureKind::Timeout => warn!(
                "TIMEOUT on input size {} (iteration {}, md5 {}), saved to {:?}",
                record.payload().len(),
                record.iteration(),
                record.digest(),
                artifact
            ),
            FailureKind::Crash => warn!(
                "CRASH detected! {} (iteration {}, input size {}, md5 {}), saved to {:?}",
                record.describe(),
                record.iteration(),
                record.payload().len(),
                record.digest(),
                artifact
            ),
        }
    }

    fn on_progress(&mut self, iteration: u64, stats: &CampaignStats) {
        info!(
            "Completed {} iterations, failures: {}, execs/sec: {:.2}",
            iteration,
            stats.crashes,
            stats.execs_per_sec()
        );
    }

    fn on_finish(&mut self, report: &CampaignReport) {
        let stats = &report.stats;
        info!("Fuzzing complete in {:.2?}", stats.elapsed);
        info!(
            "Total crashes: {} ({} abnormal exits, {} timeouts) over {} iterations",
            stats.crashes, stats.abnormal_exits, stats.timeouts, stats.iterations
        );
        match report.verdict {
            Verdict::Success => info!("SUCCESS: No crashes found."),
            Verdict::FailureDetected => warn!("FAILURE: Crashes detected."),
        }
    }
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMonitor;

impl ProgressMonitor for NoOpMonitor {
    fn on_progress(&mut self, _iteration: u64, _stats: &CampaignStats) {}
}
