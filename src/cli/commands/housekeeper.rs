use crate::housekeeper::HousekeeperConfig;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_TRIGGER_INTERVAL_SECONDS: &str = "housekeeper-trigger-interval-seconds";
pub const ARG_TOKEN_REFRESH_TRIGGER_INTERVAL_SECONDS: &str =
    "housekeeper-token-refresh-trigger-interval-seconds";
pub const ARG_CONCURRENCY_LIMIT: &str = "housekeeper-concurrency-limit";

#[must_use]
pub fn parse(matches: &ArgMatches) -> HousekeeperConfig {
    let defaults = HousekeeperConfig::default();
    let seconds = |id: &str, default: Duration| {
        matches
            .get_one::<u64>(id)
            .copied()
            .map_or(default, Duration::from_secs)
    };

    defaults
        .with_trigger_interval(seconds(
            ARG_TRIGGER_INTERVAL_SECONDS,
            defaults.trigger_interval,
        ))
        .with_token_refresh_trigger_interval(seconds(
            ARG_TOKEN_REFRESH_TRIGGER_INTERVAL_SECONDS,
            defaults.token_refresh_trigger_interval,
        ))
        .with_concurrency_limit(
            matches
                .get_one::<usize>(ARG_CONCURRENCY_LIMIT)
                .copied()
                .unwrap_or(defaults.concurrency_limit),
        )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRIGGER_INTERVAL_SECONDS)
                .long(ARG_TRIGGER_INTERVAL_SECONDS)
                .help("Seconds between two housekeeping passes")
                .env("SESSIOND_HOUSEKEEPER_TRIGGER_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOKEN_REFRESH_TRIGGER_INTERVAL_SECONDS)
                .long(ARG_TOKEN_REFRESH_TRIGGER_INTERVAL_SECONDS)
                .help("Refresh access tokens expiring within this many seconds")
                .env("SESSIOND_HOUSEKEEPER_TOKEN_REFRESH_TRIGGER_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CONCURRENCY_LIMIT)
                .long(ARG_CONCURRENCY_LIMIT)
                .help("Number of housekeeping workers")
                .env("SESSIOND_HOUSEKEEPER_CONCURRENCY_LIMIT")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
}
