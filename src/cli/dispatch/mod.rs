//! Map validated CLI matches to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{cookies, housekeeper, oidc, session, store, ARG_GRPC_PORT, ARG_PORT};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let grpc_port = matches
        .get_one::<u16>(ARG_GRPC_PORT)
        .copied()
        .unwrap_or(50051);
    if port == grpc_port {
        anyhow::bail!("--{ARG_PORT} and --{ARG_GRPC_PORT} must differ");
    }

    let store = store::Options::parse(matches)?;
    let oidc = oidc::Options::parse(matches)?;
    let session = session::Options::parse(matches)?;
    let cookies = cookies::parse(matches, session.config.session_duration);
    let housekeeper = housekeeper::parse(matches);

    Ok(Action::Server(Args {
        port,
        grpc_port,
        store,
        oidc,
        session,
        cookies,
        housekeeper,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [(&str, Option<&str>); 6] = [
        ("SESSIOND_DSN", Some("memory://")),
        ("SESSIOND_KV_DSN", Some("memory://")),
        ("SESSIOND_CLIENT_ID", Some("sessiond")),
        ("SESSIOND_REDIRECT_URI", Some("https://app.example/callback")),
        ("SESSIOND_CSRF_SECRET", Some("0123456789abcdef0123456789abcdef")),
        ("SESSIOND_CLIENT_AUTH", Some("insecure")),
    ];

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(REQUIRED, || {
            let matches = crate::cli::commands::new()
                .get_matches_from(vec!["sessiond", "--session-duration-seconds", "600"]);
            let Action::Server(args) = handler(&matches).unwrap();
            assert_eq!(args.port, 8080);
            assert_eq!(args.grpc_port, 50051);
            assert_eq!(args.store.dsn, "memory://");
            assert_eq!(args.cookies.max_age, std::time::Duration::from_secs(600));
        });
    }

    #[test]
    fn ports_must_differ() {
        temp_env::with_vars(REQUIRED, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sessiond",
                "--port",
                "9000",
                "--grpc-port",
                "9000",
            ]);
            let err = handler(&matches).unwrap_err();
            assert!(err.to_string().contains("must differ"));
        });
    }

    #[test]
    fn mtls_without_certificate_is_rejected() {
        temp_env::with_vars(
            [
                ("SESSIOND_DSN", Some("memory://")),
                ("SESSIOND_KV_DSN", Some("memory://")),
                ("SESSIOND_CLIENT_ID", Some("sessiond")),
                ("SESSIOND_REDIRECT_URI", Some("https://app.example/callback")),
                ("SESSIOND_CSRF_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("SESSIOND_CLIENT_AUTH", Some("mtls")),
                ("SESSIOND_MTLS_CERT_PATH", None),
                ("SESSIOND_MTLS_KEY_PATH", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["sessiond"]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
