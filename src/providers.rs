//! Injectable clock and entropy sources.
//!
//! Every nondeterministic read in the engine (timestamps, random
//! strings, UUIDs, retry jitter) goes through these traits so tests can
//! replay byte-identical output documents.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait Entropy: Send + Sync {
    /// `n` random lowercase hex characters.
    fn hex(&self, n: usize) -> String;
    fn uuid(&self) -> String;
    /// Uniform factor in `[0.5, 1.5)` applied to backoff delays when
    /// jitter is enabled.
    fn jitter_factor(&self) -> f64;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// OS-seeded randomness.
#[derive(Debug, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn hex(&self, n: usize) -> String {
        const HEX: &[u8] = b"0123456789abcdef";
        let mut rng = rand::thread_rng();
        (0..n).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
    }

    fn uuid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn jitter_factor(&self) -> f64 {
        rand::thread_rng().gen_range(0.5..1.5)
    }
}

/// Clock pinned to a fixed instant, for deterministic tests.
#[derive(Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Entropy that cycles a fixed alphabet, for deterministic tests.
#[derive(Debug, Default)]
pub struct FixedEntropy;

impl Entropy for FixedEntropy {
    fn hex(&self, n: usize) -> String {
        "0123456789abcdef".chars().cycle().take(n).collect()
    }

    fn uuid(&self) -> String {
        "00000000-0000-4000-8000-000000000000".to_string()
    }

    fn jitter_factor(&self) -> f64 {
        1.0
    }
}

/// The provider bundle threaded through the engine.
#[derive(Clone)]
pub struct Providers {
    pub clock: Arc<dyn Clock>,
    pub entropy: Arc<dyn Entropy>,
}

impl Providers {
    pub fn system() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
        }
    }

    /// Fixed clock and entropy; used by snapshot-style tests.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            clock: Arc::new(FixedClock(at)),
            entropy: Arc::new(FixedEntropy),
        }
    }
}

impl Default for Providers {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_os_entropy_hex_length() {
        let e = OsEntropy;
        assert_eq!(e.hex(0), "");
        assert_eq!(e.hex(8).len(), 8);
        assert!(e.hex(32).chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fixed_providers_are_stable() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let p = Providers::fixed(at);
        assert_eq!(p.clock.now(), at);
        assert_eq!(p.entropy.hex(4), p.entropy.hex(4));
        assert_eq!(p.entropy.uuid(), p.entropy.uuid());
    }

    #[test]
    fn test_jitter_factor_range() {
        let e = OsEntropy;
        for _ in 0..100 {
            let f = e.jitter_factor();
            assert!((0.5..1.5).contains(&f));
        }
    }
}
