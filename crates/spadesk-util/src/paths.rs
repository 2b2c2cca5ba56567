//! Default paths for spadesk components
//!
//! Paths are user-writable by default:
//! - Socket: `$XDG_RUNTIME_DIR/spadesk/spadeskd.sock` or `/tmp/spadesk-$USER/spadeskd.sock`
//! - Data: `$XDG_DATA_HOME/spadesk` or `~/.local/share/spadesk`
//! - Config: `$XDG_CONFIG_HOME/spadesk/config.toml` or `~/.config/spadesk/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const SPADESK_SOCKET_ENV: &str = "SPADESK_SOCKET";

/// Environment variable for overriding the data directory
pub const SPADESK_DATA_DIR_ENV: &str = "SPADESK_DATA_DIR";

const SOCKET_FILENAME: &str = "spadeskd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "spadesk";

fn home_subdir(parts: &[&str]) -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let mut path = PathBuf::from(home);
    for part in parts {
        path.push(part);
    }
    Some(path.join(APP_DIR))
}

/// Default socket path, honouring `$SPADESK_SOCKET`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(SPADESK_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Socket path ignoring `$SPADESK_SOCKET`
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Default data directory, honouring `$SPADESK_DATA_DIR`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(SPADESK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Data directory ignoring `$SPADESK_DATA_DIR`
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_subdir(&[".local", "share"]).unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("data"))
}

/// Default configuration file
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    home_subdir(&[".config"])
        .map(|dir| dir.join(CONFIG_FILENAME))
        .unwrap_or_else(|| PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME))
}
