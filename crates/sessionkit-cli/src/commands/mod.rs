//! Subcommand implementations.

pub mod request;
pub mod watch;
pub mod whoami;
