//! Unit tests for the roost CLI
//!
//! These tests use mocked backends and run fast without external I/O.

mod mocks;
mod orchestrator_runs;
