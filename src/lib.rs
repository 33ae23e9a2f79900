// ABOUTME: Library root for shipwright - the deployment engine and its seams.
// ABOUTME: The main binary in main.rs is a thin CLI over these modules.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod health;
pub mod host;
pub mod inventory;
pub mod output;
pub mod preflight;
pub mod runtime;
pub mod types;
