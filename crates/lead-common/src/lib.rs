//! Shared, cross-cutting bits used by both binaries.

pub mod logging;

pub use logging::init_logging;
