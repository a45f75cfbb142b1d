//! Deterministic, pure logic shared by the orchestrator and deployer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod audit;
pub mod policy;
pub mod status_validator;
pub mod types;
