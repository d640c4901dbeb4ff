// src/core/mod.rs

pub mod commons;
pub mod config_loader;
pub mod environment;
pub mod orchestrator;
pub mod process_env;
