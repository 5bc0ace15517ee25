//! Cross-module test suite
//!
//! Scenarios that drive declarations through composition, schema sync and
//! the lifecycle layer together. Unit tests live next to their modules.

mod fixtures;

mod composition;
