//! Parsec Testbed - in-memory server for tests
//!
//! [`TestbedServer`] hosts organizations in memory and registers itself in
//! the process-wide server registry, so any client pointed at its address
//! talks to it. [`TestbedEnv`] builds populated organizations on top of it.
//!
//! The server enforces the same rules a real one does (certificate
//! signatures, timestamp ordering, roles, invitation lifecycle, greeting
//! step ordering) but keeps no data on disk.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

mod anonymous;
mod authenticated;
mod certificates;
pub mod env;
mod greeting;
mod invited;
pub mod server;
mod state;

pub use env::{TestbedEnv, TestbedWorkspace, TESTBED_PASSWORD};
pub use server::TestbedServer;
