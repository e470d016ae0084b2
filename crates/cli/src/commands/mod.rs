//! CLI commands.

pub mod replay;
pub mod show_config;

pub use replay::ReplayArgs;
pub use show_config::ShowConfigArgs;
