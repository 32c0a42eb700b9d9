use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_DSN: &str = "dsn";
pub const ARG_KV_DSN: &str = "kv-dsn";
pub const ARG_KV_PREFIX: &str = "kv-prefix";
pub const ARG_KV_TIMEOUT_MS: &str = "kv-timeout-ms";

/// Backend selected by a `memory://` DSN instead of Postgres or Redis.
pub const MEMORY_DSN: &str = "memory://";

#[derive(Debug, Clone)]
pub struct Options {
    pub dsn: String,
    pub kv_dsn: String,
    pub kv_prefix: String,
    pub kv_timeout: Duration,
}

impl Options {
    /// Parse storage arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            dsn: read_required(ARG_DSN)?,
            kv_dsn: read_required(ARG_KV_DSN)?,
            kv_prefix: read_required(ARG_KV_PREFIX)?,
            kv_timeout: Duration::from_millis(
                matches
                    .get_one::<u64>(ARG_KV_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(2000),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Trust registry database connection string (postgres://… or memory://)")
                .env("SESSIOND_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_KV_DSN)
                .long(ARG_KV_DSN)
                .help("Session store connection string (redis://… or memory://)")
                .env("SESSIOND_KV_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_KV_PREFIX)
                .long(ARG_KV_PREFIX)
                .help("Prefix for every session store key")
                .env("SESSIOND_KV_PREFIX")
                .default_value(crate::store::DEFAULT_PREFIX),
        )
        .arg(
            Arg::new(ARG_KV_TIMEOUT_MS)
                .long(ARG_KV_TIMEOUT_MS)
                .help("Deadline for a single session store operation in milliseconds")
                .env("SESSIOND_KV_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
}
