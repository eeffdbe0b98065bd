//! Shared configuration utilities for vroute binaries
//!
//! - Generic YAML config loading/saving
//! - Per-user support directory, socket and config file paths
//!
//! # Usage
//!
//! ```ignore
//! use vroute_core::config::{default_config_path, load_config, save_config};
//!
//! let config: DaemonConfig = load_config(&default_config_path());
//! save_config(&config, &default_config_path())?;
//! ```

mod io;
mod paths;

pub use io::{load_config, load_config_strict, save_config};
pub use paths::{
    default_config_path, default_socket_path, socket_path_from, support_dir, CONFIG_FILE_NAME,
    SOCKET_ENV_VAR, SOCKET_FILE_NAME,
};
