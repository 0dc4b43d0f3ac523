//! Deterministic environment: seeded ChaCha RNG and a virtual clock.
//!
//! Time only moves when a test calls [`SimEnv::advance`] (or awaits
//! [`Environment::sleep`], which advances instead of waiting). Two `SimEnv`s
//! built from the same seed produce identical random bytes, so every request
//! id and device key in a simulated run is reproducible.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use clawlink_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock reported at virtual time zero (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Virtual instant: time elapsed since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the start of the simulation.
    pub fn elapsed_since_start(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = SimInstant;

    fn add(self, rhs: Duration) -> SimInstant {
        SimInstant(self.0 + rhs)
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: SimInstant) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Simulation environment. Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    clock_nanos: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment seeded with `0`.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.clock_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Virtual time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.clock_nanos.load(Ordering::SeqCst))
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        SIM_EPOCH_MS + self.elapsed().as_millis() as u64
    }
}
