//! The deterministic environment a workflow handler runs under: a seeded
//! PRNG in place of `random()`, a clock that replays recorded timestamps
//! instead of reading the wall clock, and a logger that goes quiet during
//! replay. Handlers never see real time, real randomness, or a network
//! socket — those belong in actions, dispatched through `dex_workpool`.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Mutex;

/// Per-workflow-execution PRNG. Seeded from the workflow id so every
/// replay of the same execution produces the same sequence of `random()`
/// calls, which then gets captured into the journal the first time and
/// read back from the cache on every later replay (the seed only matters
/// for the very first, non-replayed tick).
pub struct DeterministicRng {
    inner: Mutex<StdRng>,
}

impl DeterministicRng {
    pub fn from_workflow_id(id: uuid::Uuid) -> Self {
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(id.as_bytes());
        Self {
            inner: Mutex::new(StdRng::from_seed(seed)),
        }
    }

    pub fn next_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.inner.lock().expect("rng lock poisoned").fill_bytes(&mut buf);
        buf
    }
}

/// Replay-aware clock. During replay, `now()` returns the timestamp
/// already recorded in the journal for this step; on first execution it
/// reads the real wall clock and that reading is what gets journaled.
pub enum Clock {
    Live,
    Replaying(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Live => Utc::now(),
            Clock::Replaying(t) => *t,
        }
    }
}

/// Suppresses `tracing` output while a tick is just replaying previously
/// recorded steps, so restart/retry noise doesn't dominate logs. Mirrors
/// the teacher's `invariant-engine` convention of keeping observability
/// opt-in rather than ambient.
pub struct ReplayAwareLog {
    pub replaying: bool,
}

impl ReplayAwareLog {
    pub fn emit(&self, level: tracing::Level, message: &str) {
        if self.replaying {
            return;
        }
        match level {
            tracing::Level::ERROR => tracing::error!("{message}"),
            tracing::Level::WARN => tracing::warn!("{message}"),
            tracing::Level::INFO => tracing::info!("{message}"),
            tracing::Level::DEBUG => tracing::debug!("{message}"),
            tracing::Level::TRACE => tracing::trace!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn same_workflow_id_produces_same_sequence() {
        let id = uuid::Uuid::now_v7();
        let a = DeterministicRng::from_workflow_id(id);
        let b = DeterministicRng::from_workflow_id(id);
        similar_asserts::assert_eq!(a.next_bytes(16), b.next_bytes(16));
    }

    #[test]
    fn different_workflow_ids_diverge() {
        let a = DeterministicRng::from_workflow_id(uuid::Uuid::now_v7());
        let b = DeterministicRng::from_workflow_id(uuid::Uuid::now_v7());
        assert_ne!(a.next_bytes(16), b.next_bytes(16));
    }

    #[test]
    fn replaying_clock_is_pinned() {
        let t = Utc::now();
        let clock = Clock::Replaying(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), clock.now());
    }
}
