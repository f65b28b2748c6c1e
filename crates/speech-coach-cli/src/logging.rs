use speech_coach_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter directives from config: the base level followed by per-crate overrides.
pub fn filter_directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };
    let mut directives = vec![level.to_string()];
    directives.extend(config.filters.iter().map(|f| f.trim().to_string()));
    directives.retain(|d| !d.is_empty());
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over config when set.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config, verbose))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = config.format.eq_ignore_ascii_case("json");
    let stdout = config.output.eq_ignore_ascii_case("stdout");
    let result = match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).try_init(),
        (true, false) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, true) => builder.with_writer(std::io::stdout).try_init(),
        (false, false) => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
