//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the external tools `ursula`
//! drives. It serves as a boundary between the orchestration logic and the specifics of
//! process management.
//!
//! ## Modules
//!
//! - **`executor`**: The [`executor::ProcessRunner`] seam and its production
//!   implementation. Spawns literal argument vectors with an explicit environment,
//!   streams merged stdout/stderr line by line, and honours timeouts and `Ctrl+C`.
//! - **`ansible`**: Builds the `ansible-playbook` invocation and runs the `--version`
//!   pre-flight check.
//! - **`vagrant`**: The provisioning state machine: `vagrant up`, the bounded
//!   `ssh-config` poll, and the cached SSH descriptor.

pub mod ansible;
pub mod executor;
pub mod vagrant;
