//! Daemon configuration, read from environment variables.
//!
//! | Variable | Effect |
//! |---|---|
//! | `PASEO_HOME` | State directory (default `~/.paseo`) |
//! | `PASEO_LISTEN` | `host:port` the daemon binds (default `127.0.0.1:7423`) |
//! | `PASEO_RELAY_ENDPOINT` | `host:port` of the relay to register with (optional) |
//! | `PASEO_CORS_ORIGINS` | Comma-separated allowed origins |
//! | `PASEO_SERVER_ID` | Stable server id override; generated + persisted when absent |

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paseo_home: PathBuf,
    pub listen: String,
    pub relay_endpoint: Option<String>,
    pub cors_origins: Vec<String>,
    pub server_id_override: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl DaemonConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let paseo_home = std::env::var("PASEO_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home());

        let listen =
            std::env::var("PASEO_LISTEN").unwrap_or_else(|_| "127.0.0.1:7423".to_string());

        let relay_endpoint = std::env::var("PASEO_RELAY_ENDPOINT")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let cors_origins = std::env::var("PASEO_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let server_id_override = std::env::var("PASEO_SERVER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Self {
            paseo_home,
            listen,
            relay_endpoint,
            cors_origins,
            server_id_override,
        }
    }

    /// Validate the configuration. Errors are fatal at startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.listen.rsplit_once(':').is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!("PASEO_LISTEN '{}' is not host:port", self.listen),
            });
        }

        if let Some(relay) = &self.relay_endpoint {
            if relay.rsplit_once(':').is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("PASEO_RELAY_ENDPOINT '{relay}' is not host:port"),
                });
            }
        } else {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "PASEO_RELAY_ENDPOINT unset — clients can only connect directly".into(),
            });
        }

        if self.paseo_home.as_os_str().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "PASEO_HOME is empty".into(),
            });
        }

        issues
    }

    /// Directory holding per-agent records.
    pub fn agents_dir(&self) -> PathBuf {
        self.paseo_home.join("agents")
    }

    /// Directory holding paseo-owned worktree tracking metadata.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.paseo_home.join("worktrees")
    }

    /// Directory holding voice conversation documents.
    pub fn voice_dir(&self) -> PathBuf {
        self.paseo_home.join("voice-conversations")
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".paseo")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DaemonConfig {
        DaemonConfig {
            paseo_home: PathBuf::from("/tmp/paseo-home"),
            listen: "127.0.0.1:7423".into(),
            relay_endpoint: Some("relay.example.com:443".into()),
            cors_origins: vec![],
            server_id_override: None,
        }
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = base_config().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn bad_listen_is_an_error() {
        let mut cfg = base_config();
        cfg.listen = "nonsense".into();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn missing_relay_is_a_warning() {
        let mut cfg = base_config();
        cfg.relay_endpoint = None;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn state_dirs_are_under_home() {
        let cfg = base_config();
        assert_eq!(cfg.agents_dir(), PathBuf::from("/tmp/paseo-home/agents"));
        assert_eq!(
            cfg.voice_dir(),
            PathBuf::from("/tmp/paseo-home/voice-conversations")
        );
    }
}
