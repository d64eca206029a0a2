use std::env;
use std::path::PathBuf;

/// Process-level configuration, environment-driven with CLI overrides on
/// top.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address the relay listens on.
    pub listen: String,
    /// Upstream WebSocket endpoint of the remote service.
    pub upstream: String,
    /// Archivist socket path.
    pub archive_sock: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen: env::var("BREAKWATER_LISTEN").unwrap_or(defaults.listen),
            upstream: env::var("BREAKWATER_UPSTREAM").unwrap_or(defaults.upstream),
            archive_sock: env::var("BREAKWATER_ARCHIVE_SOCK")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_sock),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9892".to_string(),
            upstream: "wss://ws.ptt.cc/bbs".to_string(),
            archive_sock: PathBuf::from("/tmp/.breakwater_archivist"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.listen.contains(':'));
        assert!(config.upstream.starts_with("wss://"));
    }
}
