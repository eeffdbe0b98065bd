//! Standard locations for the socket and configuration files

use std::path::{Path, PathBuf};

/// Environment variable overriding the socket path
pub const SOCKET_ENV_VAR: &str = "VROUTE_SOCKET";

/// Socket file name inside the support directory
pub const SOCKET_FILE_NAME: &str = "vroute.sock";

/// Config file name inside the support directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Per-user support directory
///
/// Returns `<data_dir>/vroute` (`~/Library/Application Support/vroute` on macOS,
/// `$XDG_DATA_HOME/vroute` on Linux), or `./vroute` when no data dir is known.
pub fn support_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vroute")
}

/// Well-known socket path, honouring `VROUTE_SOCKET`
pub fn default_socket_path() -> PathBuf {
    socket_path_from(std::env::var_os(SOCKET_ENV_VAR).as_deref().map(Path::new))
}

/// Socket path for an optional override
pub fn socket_path_from(override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
        _ => support_dir().join(SOCKET_FILE_NAME),
    }
}

/// Returns: `<support_dir>/config.yaml`
pub fn default_config_path() -> PathBuf {
    support_dir().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_dir_ends_with_vroute() {
        assert!(support_dir().ends_with("vroute"));
    }

    #[test]
    fn test_socket_override() {
        assert_eq!(
            socket_path_from(Some(Path::new("/tmp/custom.sock"))),
            PathBuf::from("/tmp/custom.sock")
        );
        assert!(socket_path_from(Some(Path::new(""))).ends_with(SOCKET_FILE_NAME));
        assert!(socket_path_from(None).ends_with("vroute/vroute.sock"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        assert!(default_config_path().ends_with(CONFIG_FILE_NAME));
    }
}
