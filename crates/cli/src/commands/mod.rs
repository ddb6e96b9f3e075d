//! Subcommand implementations

pub mod detect;
pub mod health;
pub mod incidents;
