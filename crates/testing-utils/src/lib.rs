//! # Job Service Testing Utils
//!
//! In-memory implementations of the domain ports plus builders for tracked
//! task messages, shared by the unit tests of every crate in the workspace.
//!
//! ```toml
//! [dev-dependencies]
//! jobservice-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
