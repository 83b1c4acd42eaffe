//! Process-wide logging setup for jobforge binaries and tests.

/// Initialize structured JSON logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber construction (filters, formats).
pub mod tracing;

pub use self::tracing::{init_for_tests, init_pretty};
