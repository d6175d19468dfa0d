use crate::config::ConfigError;
use crate::input::Payload;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bytes used by [`GenerationStrategy::StructuredNoise`]: JSON punctuation
/// and hex digits, so the noise looks like a broken JSON-RPC frame.
pub const NOISE_ALPHABET: &[u8] = b"{}\"':,[]0123456789abcdef";

/// Default inclusive length range for raw random payloads.
pub const DEFAULT_RAW_LENGTH: LengthRange = LengthRange { min: 1, max: 1024 };
/// Default inclusive length range for structured noise payloads.
pub const DEFAULT_NOISE_LENGTH: LengthRange = LengthRange { min: 10, max: 1000 };

/// A `Generator` produces one fresh [`Payload`] per fuzzing iteration.
///
/// Implementations must only consume randomness from the provided `rng`, so
/// that a fixed seed reproduces the exact payload sequence of a run.
pub trait Generator<R: Rng + ?Sized> {
    fn generate(&mut self, rng: &mut R) -> Payload;
}

/// The strategy picked for a single iteration, with its drawn parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// Uniformly random bytes.
    RawRandom { length: usize },
    /// Bytes drawn from [`NOISE_ALPHABET`].
    StructuredNoise { length: usize },
    /// The zero-length payload.
    Empty,
}

impl GenerationStrategy {
    /// Builds the payload described by this strategy.
    pub fn materialize<R: Rng + ?Sized>(&self, rng: &mut R) -> Payload {
        match *self {
            GenerationStrategy::RawRandom { length } => {
                let mut bytes = vec![0u8; length];
                rng.fill(bytes.as_mut_slice());
                Payload::new(bytes)
            }
            GenerationStrategy::StructuredNoise { length } => {
                let bytes = (0..length)
                    .map(|_| NOISE_ALPHABET[rng.random_range(0..NOISE_ALPHABET.len())])
                    .collect();
                Payload::new(bytes)
            }
            GenerationStrategy::Empty => Payload::empty(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            GenerationStrategy::RawRandom { .. } => StrategyKind::RawRandom,
            GenerationStrategy::StructuredNoise { .. } => StrategyKind::StructuredNoise,
            GenerationStrategy::Empty => StrategyKind::Empty,
        }
    }
}

/// Parameterless tag of a [`GenerationStrategy`], used for bucket lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    RawRandom,
    StructuredNoise,
    Empty,
}

/// Inclusive `[min, max]` length range.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LengthRange {
    pub min: usize,
    pub max: usize,
}

impl LengthRange {
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::InvalidLengthRange {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.random_range(self.min..=self.max)
    }
}

/// Relative weights of the three strategies.
///
/// Weights need not sum to one; they are normalized into cumulative buckets
/// checked in declaration order (raw random, structured noise, empty).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct StrategyWeights {
    #[serde(default = "default_raw_random_weight")]
    pub raw_random: f64,
    #[serde(default = "default_structured_noise_weight")]
    pub structured_noise: f64,
    #[serde(default = "default_empty_weight")]
    pub empty: f64,
}

fn default_raw_random_weight() -> f64 {
    0.5
}
fn default_structured_noise_weight() -> f64 {
    0.4
}
fn default_empty_weight() -> f64 {
    0.1
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            raw_random: default_raw_random_weight(),
            structured_noise: default_structured_noise_weight(),
            empty: default_empty_weight(),
        }
    }
}

impl StrategyWeights {
    fn entries(&self) -> [(StrategyKind, f64); 3] {
        [
            (StrategyKind::RawRandom, self.raw_random),
            (StrategyKind::StructuredNoise, self.structured_noise),
            (StrategyKind::Empty, self.empty),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, weight) in self.entries() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight { kind, weight });
            }
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::ZeroWeights);
        }
        Ok(())
    }

    fn total(&self) -> f64 {
        self.raw_random + self.structured_noise + self.empty
    }

    /// Maps a uniform draw in `[0, 1)` onto a strategy bucket.
    pub fn bucket(&self, draw: f64) -> StrategyKind {
        let total = self.total();
        let mut cumulative = 0.0;
        let mut last_enabled = StrategyKind::Empty;
        for (kind, weight) in self.entries() {
            if weight <= 0.0 {
                continue;
            }
            cumulative += weight / total;
            last_enabled = kind;
            if draw < cumulative {
                return kind;
            }
        }
        // Rounding can leave the final cumulative a hair below 1.0.
        last_enabled
    }
}

/// Picks a strategy by one weighted draw, then materializes it.
#[derive(Debug, Clone)]
pub struct WeightedGenerator {
    weights: StrategyWeights,
    raw_length: LengthRange,
    noise_length: LengthRange,
}

impl WeightedGenerator {
    pub fn new(
        weights: StrategyWeights,
        raw_length: LengthRange,
        noise_length: LengthRange,
    ) -> Result<Self, ConfigError> {
        weights.validate()?;
        raw_length.validate("raw-length")?;
        noise_length.validate("noise-length")?;
        Ok(Self {
            weights,
            raw_length,
            noise_length,
        })
    }

    pub fn choose_strategy<R: Rng + ?Sized>(&self, rng: &mut R) -> GenerationStrategy {
        let draw: f64 = rng.random();
        match self.weights.bucket(draw) {
            StrategyKind::RawRandom => GenerationStrategy::RawRandom {
                length: self.raw_length.sample(rng),
            },
            StrategyKind::StructuredNoise => GenerationStrategy::StructuredNoise {
                length: self.noise_length.sample(rng),
            },
            StrategyKind::Empty => GenerationStrategy::Empty,
        }
    }
}

impl Default for WeightedGenerator {
    fn default() -> Self {
        Self {
            weights: StrategyWeights::default(),
            raw_length: DEFAULT_RAW_LENGTH,
            noise_length: DEFAULT_NOISE_LENGTH,
        }
    }
}

impl<R: Rng + ?Sized> Generator<R> for WeightedGenerator {
    fn generate(&mut self, rng: &mut R) -> Payload {
        let strategy = self.choose_strategy(rng);
        strategy.materialize(rng)
    }
}
