//! Test utilities for brokercache integration tests
//!
//! `TestFixture` wires a sample shop mapping, an in-memory store and a
//! broker factory together. Every fixture owns its own cache registry, so
//! tests running in parallel never share cache state.

#![allow(dead_code)]

pub mod hooked_store;
pub mod test_fixture;
