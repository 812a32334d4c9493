use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use matchdesk_core::config::{
    ConfigError, DEFAULT_AUTH_URL, DEFAULT_DEVICE_NAME, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TRUST_WINDOW_SECS, SessionConfig,
};

/// Matchdesk session client.
#[derive(Parser, Debug)]
#[command(name = "matchdesk", about = "Matchdesk session client")]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "MATCHDESK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Tenant to log into
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Log out and clear the stored session
    Logout,

    /// Restore the session and print it
    Status,

    /// Refresh the access token
    Refresh,

    /// Ask the server whether the current token is valid
    Verify,

    /// Print redacted session diagnostics (no network)
    Debug,

    /// Keep the session alive and log session events until Ctrl-C
    Watch,

    /// Print version
    Version,
}

/// Session settings. Every flag falls back to its environment variable.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Base URL of the auth endpoints.
    #[arg(long, global = true, env = "MATCHDESK_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    pub auth_url: String,

    /// Public API key.
    #[arg(long, global = true, env = "MATCHDESK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the data API; unset disables the data client.
    #[arg(long, global = true, env = "MATCHDESK_DATA_URL")]
    pub data_url: Option<String>,

    #[arg(long, global = true, env = "MATCHDESK_DEVICE_NAME", default_value = DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// Seconds a cached session is trusted without verify (0 = always verify).
    #[arg(
        long,
        global = true,
        env = "MATCHDESK_TRUST_WINDOW_SECS",
        default_value_t = DEFAULT_TRUST_WINDOW_SECS
    )]
    pub trust_window_secs: u64,

    #[arg(
        long,
        global = true,
        env = "MATCHDESK_REQUEST_TIMEOUT_SECS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS
    )]
    pub request_timeout_secs: u64,

    /// Seconds between background refreshes in `watch` (0 = never).
    #[arg(
        long,
        global = true,
        env = "MATCHDESK_REFRESH_INTERVAL_SECS",
        default_value_t = DEFAULT_REFRESH_INTERVAL_SECS
    )]
    pub refresh_interval_secs: u64,

    /// Where the session is persisted.
    #[arg(long, global = true, env = "MATCHDESK_SESSION_FILE")]
    pub session_file: Option<PathBuf>,
}

impl SessionArgs {
    /// Validate through the same path as `SessionConfig::from_env`.
    pub fn to_config(&self) -> Result<SessionConfig, ConfigError> {
        SessionConfig::from_lookup(|name| match name {
            "MATCHDESK_AUTH_URL" => Some(self.auth_url.clone()),
            "MATCHDESK_API_KEY" => self.api_key.clone(),
            "MATCHDESK_DATA_URL" => self.data_url.clone(),
            "MATCHDESK_DEVICE_NAME" => Some(self.device_name.clone()),
            "MATCHDESK_TRUST_WINDOW_SECS" => Some(self.trust_window_secs.to_string()),
            "MATCHDESK_REQUEST_TIMEOUT_SECS" => Some(self.request_timeout_secs.to_string()),
            "MATCHDESK_REFRESH_INTERVAL_SECS" => Some(self.refresh_interval_secs.to_string()),
            "MATCHDESK_SESSION_FILE" => self
                .session_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_become_config() {
        let cli = Cli::parse_from([
            "matchdesk",
            "--auth-url",
            "https://auth.example.com/functions/v1",
            "--trust-window-secs",
            "0",
            "--session-file",
            "/tmp/s.json",
            "status",
        ]);
        let config = cli.session.to_config().unwrap();
        assert_eq!(config.auth_url.host_str(), Some("auth.example.com"));
        assert!(config.policy.trust_window.is_none());
        assert_eq!(config.session_file, PathBuf::from("/tmp/s.json"));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn login_takes_tenant() {
        let cli = Cli::parse_from([
            "matchdesk",
            "login",
            "--email",
            "ada@example.com",
            "--password",
            "pw",
            "--tenant",
            "t-1",
        ]);
        match cli.command {
            Commands::Login { tenant, .. } => assert_eq!(tenant.as_deref(), Some("t-1")),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
