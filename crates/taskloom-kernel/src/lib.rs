//! Core kernel for Taskloom.
//!
//! Hosts the workflow sequencer, the event bus, configuration loading and
//! the [`kernel::TaskloomKernel`] facade that wires the runtime together.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod kernel;
pub mod workflow;

pub use kernel::TaskloomKernel;
