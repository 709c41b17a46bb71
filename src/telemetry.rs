use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "fintrack_api=debug,tower_http=debug";

/// Installs the global subscriber. JSON lines in production, human readable otherwise.
pub fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if production {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
