//! Production Environment implementation using system time and RNG.
//!
//! Time is `tokio::time::Instant` so the runtime can `sleep_until` the
//! deadlines the state machine reports. Randomness comes from the OS via
//! getrandom, which backs device keys and request ids.

use std::time::Duration;

use clawlink_core::env::Environment;

/// Production environment using tokio time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without working cryptographic
/// randomness cannot generate a device key, and continuing would hand out
/// predictable identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - device keys would be predictable");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn wall_clock_is_after_2023() {
        assert!(SystemEnv::new().wall_clock_millis() > 1_700_000_000_000);
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_millis(20)).await;
        assert!(env.now() - start >= Duration::from_millis(20));
    }
}
