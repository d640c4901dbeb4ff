//! # ursula
//!
//! An environment-aware wrapper around `ansible-playbook`. It resolves an environment
//! directory into a complete invocation, optionally brings up `vagrant` machines first,
//! and streams the output of every tool it drives.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// A cooperative cancellation flag shared between the Ctrl+C handler and long waits.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
