//! Delays between requests.
//!
//! The policy functions here are pure so they can be tested without
//! sleeping; the backup loop hands the resulting durations to a [`Pause`]
//! implementation, which is a real tokio sleep in production and a recorder
//! in tests.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PacingConfig;

/// Largest exponent applied to the backoff base.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Why the backup loop is pausing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Randomized delay between two items.
    Between,
    /// Longer pause after every `batch_size` items.
    Batch,
    /// Exponential backoff after a failed item.
    Backoff,
}

/// Backoff after the `retry_count`-th consecutive failure:
/// `base * 2^(retry_count - 1)`.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let shift = retry_count.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

/// Uniform delay in `[min, max]`, shifted by up to `±jitter` and clamped to
/// the floor.
pub fn jittered_delay<R: Rng + ?Sized>(pacing: &PacingConfig, rng: &mut R) -> Duration {
    let base = if pacing.max_delay_secs > pacing.min_delay_secs {
        rng.gen_range(pacing.min_delay_secs..=pacing.max_delay_secs)
    } else {
        pacing.min_delay_secs
    };
    let jitter = if pacing.jitter_secs > 0.0 {
        rng.gen_range(-pacing.jitter_secs..=pacing.jitter_secs)
    } else {
        0.0
    };
    Duration::try_from_secs_f64((base + jitter).max(pacing.delay_floor_secs).max(0.0))
        .unwrap_or(Duration::MAX)
}

/// Suspends the backup loop.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, kind: PauseKind, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, kind: PauseKind, duration: Duration) {
        match kind {
            PauseKind::Between => debug!("Waiting {:.1} seconds...", duration.as_secs_f64()),
            PauseKind::Batch => info!("Batch complete. Pausing for {:.0} seconds...", duration.as_secs_f64()),
            PauseKind::Backoff => {}
        }
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingPause {
    pauses: Mutex<Vec<(PauseKind, Duration)>>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(PauseKind, Duration)> {
        self.pauses
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn of_kind(&self, kind: PauseKind) -> Vec<Duration> {
        self.recorded()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .collect()
    }
}

#[async_trait]
impl Pause for RecordingPause {
    async fn pause(&self, kind: PauseKind, duration: Duration) {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push((kind, duration));
        }
    }
}
