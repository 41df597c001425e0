//! Core module containing the harness functionality
//!
//! This module provides:
//! - Line buffers with blocking pattern watches
//! - Pipe readers draining process output
//! - Started applications and their ramsh command channel
//! - Local and SSH targets
//! - Screenshot comparison
//! - Power relay control
//! - Test expansion, ordering and execution

pub mod application;
pub mod buffer;
pub mod error;
pub mod helper;
pub mod image_utils;
pub mod power;
pub mod reader;
pub mod report;
pub mod runner;
pub mod suite;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{HarnessError, Result};
