//! Test utilities for the signaling service.

#![warn(clippy::pedantic)]

pub mod server_harness;

pub use server_harness::TestServer;
