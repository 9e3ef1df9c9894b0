//! # jobstore-testing-utils
//!
//! Shared testing utilities for the job execution service: in-memory
//! implementations of both repository ports (enforcing the same uniqueness
//! rules as the Postgres store) and a scripted remote executor double.
//!
//! Add this crate as a dev-dependency and build services against the mocks
//! instead of a database connection.

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
