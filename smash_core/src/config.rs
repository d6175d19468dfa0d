use crate::generator::{
    DEFAULT_NOISE_LENGTH, DEFAULT_RAW_LENGTH, LengthRange, StrategyKind, StrategyWeights,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("No target executable configured")]
    MissingTarget,
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Progress interval must be greater than zero")]
    ZeroProgressInterval,
    #[error("Weight for {kind:?} must be finite and non-negative, got {weight}")]
    InvalidWeight { kind: StrategyKind, weight: f64 },
    #[error("At least one generation strategy needs a positive weight")]
    ZeroWeights,
    #[error("Length range {name} is inverted: min {min} > max {max}")]
    InvalidLengthRange {
        name: &'static str,
        min: usize,
        max: usize,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Seed for the payload RNG. `None` draws one from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

pub fn default_iterations() -> u64 {
    5000
}
pub fn default_progress_interval() -> u64 {
    1000
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            seed: None,
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl TargetSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GeneratorSettings {
    #[serde(default)]
    pub weights: StrategyWeights,
    #[serde(default = "default_raw_length")]
    pub raw_length: LengthRange,
    #[serde(default = "default_noise_length")]
    pub noise_length: LengthRange,
}

fn default_raw_length() -> LengthRange {
    DEFAULT_RAW_LENGTH
}
fn default_noise_length() -> LengthRange {
    DEFAULT_NOISE_LENGTH
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            weights: StrategyWeights::default(),
            raw_length: default_raw_length(),
            noise_length: default_noise_length(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
}

pub fn default_crash_dir() -> PathBuf {
    PathBuf::from("crashes")
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            crash_dir: default_crash_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SmashConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub generator: GeneratorSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
}

impl SmashConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks everything a campaign needs before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.path.is_none() {
            return Err(ConfigError::MissingTarget);
        }
        if self.target.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.campaign.progress_interval == 0 {
            return Err(ConfigError::ZeroProgressInterval);
        }
        self.generator.weights.validate()?;
        self.generator.raw_length.validate("raw-length")?;
        self.generator.noise_length.validate("noise-length")
    }
}
