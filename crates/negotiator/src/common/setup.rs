use env_logger::DEFAULT_FILTER_ENV;
use log::LevelFilter;

/// Initializes `env_logger`. `--debug` lowers the level to `Debug`;
/// `RUST_LOG` is applied last and wins over both.
pub fn setup_logging(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder = env_logger::Builder::default();
    builder.filter_level(level);

    let env_debug = std::env::var(DEFAULT_FILTER_ENV).is_ok_and(|v| v.contains("debug"));
    if debug || env_debug {
        builder.format_timestamp_millis().format_module_path(true);
    } else {
        // <time> <level> <message>
        builder.format_timestamp_secs().format_target(false);
    }

    builder.parse_default_env();
    builder.init();
}
