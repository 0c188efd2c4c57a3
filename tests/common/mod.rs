#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Arc;
use strandkit::test_utils::RecordingContinuation;
use strandkit::{CancellableContinuation, Continuation, Job};

pub use strandkit::test_utils::{EscalationCapture, init_test_logging};

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "STRANDKIT_PROPTEST_SEED";

/// Build a ProptestConfig with a fixed seed under CI or when
/// `STRANDKIT_PROPTEST_SEED` is set.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// A suspended waiter bound to `job`, plus the recorder it delivers to.
pub fn suspended_waiter(
    job: Option<&Arc<Job>>,
) -> (Arc<RecordingContinuation<u64>>, Arc<CancellableContinuation<u64>>) {
    let recorder = RecordingContinuation::new(job.cloned());
    let waiter =
        CancellableContinuation::new(Arc::clone(&recorder) as Arc<dyn Continuation<u64>>);
    waiter.init_cancellability();
    let pending = waiter
        .get_result()
        .expect("fresh waiter suspends")
        .is_pending();
    assert!(pending, "fresh waiter must suspend");
    (recorder, waiter)
}
