//! Roost library: provisioning pipeline, backend adapters and CLI plumbing.

pub mod application;
pub mod cli;
pub mod commands;
pub mod domain;
pub mod infra;
pub mod output;
