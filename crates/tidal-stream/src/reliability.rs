// ABOUTME: Ack-with-simulated-loss reliability layer.
// ABOUTME: Decides per DataMessage whether to acknowledge it, deduplicating by id.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidal_proto::{AckMessage, DataMessage};

use crate::error::ConfigError;

/// Default probability of simulating a lost ack.
pub const DEFAULT_DROP_PROBABILITY: f64 = 0.1;

/// Settings for the reliability variant of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityConfig {
    /// Probability in `[0, 1]` that an ack is withheld.
    pub drop_probability: f64,
    /// Seed for reproducible drop decisions. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            drop_probability: DEFAULT_DROP_PROBABILITY,
            seed: None,
        }
    }
}

impl ReliabilityConfig {
    pub fn new(drop_probability: f64) -> Result<Self, ConfigError> {
        let config = Self {
            drop_probability,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if (0.0..=1.0).contains(&self.drop_probability) {
            Ok(())
        } else {
            Err(ConfigError::DropProbability(self.drop_probability))
        }
    }

    /// Random source for one attempt. A seeded config derives a distinct,
    /// reproducible stream per attempt.
    pub fn rng_for(&self, attempt: u32) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(attempt))),
            None => StdRng::from_entropy(),
        }
    }
}

/// Counters kept by a [`ReliabilityLayer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliabilityStats {
    pub acked: u64,
    pub dropped: u64,
    /// Redeliveries of an id that was already acked or already dropped.
    pub duplicates: u64,
}

/// Per-session acknowledgment policy.
///
/// The first delivery of an id draws one uniform value: below the drop
/// probability the ack is withheld, otherwise the id joins the dedup set and
/// an ack is produced. Redeliveries never produce a second ack, and a dropped
/// id is not given another draw.
#[derive(Debug)]
pub struct ReliabilityLayer<R = StdRng> {
    drop_probability: f64,
    rng: R,
    acked: HashSet<u64>,
    dropped: HashSet<u64>,
    stats: ReliabilityStats,
}

impl ReliabilityLayer<StdRng> {
    /// Build the layer for one session attempt.
    pub fn for_attempt(config: &ReliabilityConfig, attempt: u32) -> Self {
        Self::with_rng(config.drop_probability, config.rng_for(attempt))
    }
}

impl<R: Rng> ReliabilityLayer<R> {
    /// `drop_probability` is clamped into `[0, 1]`.
    pub fn with_rng(drop_probability: f64, rng: R) -> Self {
        let drop_probability = if drop_probability.is_nan() {
            0.0
        } else {
            drop_probability.clamp(0.0, 1.0)
        };
        Self {
            drop_probability,
            rng,
            acked: HashSet::new(),
            dropped: HashSet::new(),
            stats: ReliabilityStats::default(),
        }
    }

    /// Decide whether `msg` gets an ack.
    pub fn on_data(&mut self, msg: &DataMessage) -> Option<AckMessage> {
        let id = msg.id;
        if self.acked.contains(&id) || self.dropped.contains(&id) {
            self.stats.duplicates += 1;
            tracing::debug!(message_id = id, "redelivered message, not acknowledging again");
            return None;
        }

        if self.rng.gen::<f64>() < self.drop_probability {
            self.dropped.insert(id);
            self.stats.dropped += 1;
            tracing::info!(message_id = id, "simulating drop");
            return None;
        }

        self.acked.insert(id);
        self.stats.acked += 1;
        Some(AckMessage {
            ack_id: id,
            timestamp: unix_now(),
        })
    }

    /// Whether `id` has been acknowledged in this session.
    pub fn is_acked(&self, id: u64) -> bool {
        self.acked.contains(&id)
    }

    /// Size of the dedup set.
    pub fn acked_len(&self) -> usize {
        self.acked.len()
    }

    pub fn stats(&self) -> ReliabilityStats {
        self.stats
    }

    pub fn drop_probability(&self) -> f64 {
        self.drop_probability
    }
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
