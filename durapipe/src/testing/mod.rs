//! Testing utilities for durapipe orchestrations.
//!
//! This module provides an in-process [`ScriptedWorker`] that stands in for
//! real stage workers in tests and in the demo binary.

mod mocks;

pub use mocks::{ScriptedWorker, StageInvocation, DEFAULT_CHANNEL};
