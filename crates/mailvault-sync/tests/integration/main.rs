//! Integration tests for mailvault-sync
//!
//! Drive complete backup sessions against in-memory mailbox and token
//! providers and a temporary data folder, asserting on the emitted events,
//! the summary and the files left on disk.

mod common;

mod test_cancellation;
mod test_failures;
mod test_retry;
mod test_scenarios;
