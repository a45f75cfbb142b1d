//! Attempt-based repair loop with a local deployment supervisor.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (repair policy, status
//!   transitions, audit formatting). No I/O.
//! - **[`io`]**: Side-effecting operations (catalog files, ports, child
//!   processes, HTTP probes, artifact serving).
//!
//! Orchestration modules ([`orchestrator`], [`deployer`], [`watchdog`],
//! [`stress`]) coordinate core logic with I/O; [`agents`] holds the
//! orchestrator's collaborators behind traits.

pub mod agents;
pub mod app;
pub mod core;
pub mod deployer;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod stress;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watchdog;
