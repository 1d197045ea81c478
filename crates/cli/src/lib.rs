//! WinInspect command-line client library.
//!
//! This crate provides the IO half of the client:
//! - Frame transport over TCP
//! - Daemon connection, handshake and request exchange
//! - Configuration file handling
//! - Private key files

pub mod client;
pub mod config;
pub mod identity;
pub mod transport;

pub use client::{run_command, run_request, ClientOptions, RemoteClient};
pub use config::{default_config_path, Config, ConfigError, EnvOverride};
pub use identity::CredentialSource;
