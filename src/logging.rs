use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,datainsight=debug";

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence over
/// the default filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Shorten text for log lines without splitting a UTF-8 character.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
