use crate::session::SessionConfig;
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_SESSION_DURATION_SECONDS: &str = "session-duration-seconds";
pub const ARG_IDLE_SESSION_TIMEOUT_SECONDS: &str = "idle-session-timeout-seconds";
pub const ARG_POST_LOGOUT_REDIRECT_URL: &str = "post-logout-redirect-url";
pub const ARG_CSRF_SECRET: &str = "csrf-secret";
pub const ARG_ENFORCE_FINGERPRINT: &str = "enforce-fingerprint";
pub const ARG_ENFORCE_INTROSPECTION: &str = "enforce-introspection";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: SessionConfig,
    pub csrf_secret: SecretString,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the CSRF secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let csrf_secret = matches
            .get_one::<String>(ARG_CSRF_SECRET)
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_CSRF_SECRET}"))?;

        let seconds = |id: &str, default: u64| {
            Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(default))
        };

        let config = SessionConfig::default()
            .with_session_duration(seconds(ARG_SESSION_DURATION_SECONDS, 86_400))
            .with_idle_timeout(seconds(ARG_IDLE_SESSION_TIMEOUT_SECONDS, 1_800))
            .with_post_logout_redirect_url(
                matches
                    .get_one::<String>(ARG_POST_LOGOUT_REDIRECT_URL)
                    .cloned()
                    .unwrap_or_default(),
            )
            .with_enforce_fingerprint(matches.get_flag(ARG_ENFORCE_FINGERPRINT))
            .with_enforce_introspection(matches.get_flag(ARG_ENFORCE_INTROSPECTION));

        Ok(Self {
            config,
            csrf_secret: SecretString::from(csrf_secret),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_DURATION_SECONDS)
                .long(ARG_SESSION_DURATION_SECONDS)
                .help("Absolute session lifetime in seconds, also the cookie Max-Age")
                .env("SESSIOND_SESSION_DURATION_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_IDLE_SESSION_TIMEOUT_SECONDS)
                .long(ARG_IDLE_SESSION_TIMEOUT_SECONDS)
                .help("Sessions without activity for this long are evicted")
                .env("SESSIOND_IDLE_SESSION_TIMEOUT_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_POST_LOGOUT_REDIRECT_URL)
                .long(ARG_POST_LOGOUT_REDIRECT_URL)
                .help("Where logout lands when the provider has no end-session endpoint")
                .env("SESSIOND_POST_LOGOUT_REDIRECT_URL"),
        )
        .arg(
            Arg::new(ARG_CSRF_SECRET)
                .long(ARG_CSRF_SECRET)
                .help("HMAC secret for CSRF tokens, at least 32 bytes")
                .env("SESSIOND_CSRF_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ENFORCE_FINGERPRINT)
                .long(ARG_ENFORCE_FINGERPRINT)
                .help("Reject sessions whose client fingerprint changed instead of only warning")
                .env("SESSIOND_ENFORCE_FINGERPRINT")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ENFORCE_INTROSPECTION)
                .long(ARG_ENFORCE_INTROSPECTION)
                .help("Reject sessions whose access token the provider reports inactive")
                .env("SESSIOND_ENFORCE_INTROSPECTION")
                .action(ArgAction::SetTrue),
        )
}
