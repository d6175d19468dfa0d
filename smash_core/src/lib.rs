pub mod campaign;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod generator;
pub mod input;
pub mod monitor;
pub mod oracle;

pub use campaign::{Campaign, CampaignError, CampaignReport, CampaignState, CampaignStats, Verdict};
pub use config::{ConfigError, SmashConfig};
pub use corpus::{ArtifactName, CorpusError, CrashDirectory, CrashStore, InMemoryCrashStore};
pub use executor::{CommandSupervisor, Outcome, Supervisor, SupervisorError};
pub use generator::{GenerationStrategy, Generator, StrategyWeights, WeightedGenerator};
pub use input::Payload;
pub use monitor::{LogMonitor, NoOpMonitor, ProgressMonitor};
pub use oracle::{CrashRecord, FailureKind, FailureOracle, Oracle};
