//! Testing utilities and mock implementations
//!
//! Lets the publisher and the relay be exercised without a running broker.

pub mod mocks;

pub use mocks::*;
