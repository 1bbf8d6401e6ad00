//! Process-wide tracing setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,sqlx=warn,chromiumoxide=warn,tower_http=info";

/// Keeps the sentry client alive for the lifetime of the process.
pub struct LoggingGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Install the global subscriber. Call once, before anything logs.
///
/// `RUST_LOG` overrides the default filter. When `sentry_dsn` is set, events
/// at `error` and above are also forwarded to sentry.
pub fn init_tracing(sentry_dsn: Option<&str>, environment: &str) -> LoggingGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let sentry_guard = sentry_dsn.map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(environment.to_string().into()),
                ..Default::default()
            },
        ))
    });

    let sentry_layer = sentry_guard.as_ref().map(|_| sentry_tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(sentry_layer)
        .init();

    LoggingGuard {
        _sentry: sentry_guard,
    }
}
