//! kubefork operator - controllers keeping forked workloads and their routing
//! in sync with Fork, ForkManager and RouteOverride objects

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;

pub use config::ControllerConfig;
pub use controller::Context;
pub use controller_runner::build_controllers;

/// Capacity of the deadline trigger channel; the watcher waits when it is full
pub const DEADLINE_CHANNEL_CAPACITY: usize = 64;
