//! Core types for the Taskloom agent orchestration core.
//!
//! This crate defines the data model shared by the runtime (state machine,
//! retry policy, executor) and the kernel (workflow sequencer). It contains
//! no business logic.

pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod workflow;
