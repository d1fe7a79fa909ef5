//! Process-wide tracing setup shared by binaries and tests.

pub mod tracing;

pub use self::tracing::{DEFAULT_FILTER, init, init_with_filter};
