use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

pub fn init_logging(verbosity: u8) {
    // 0 = errors only (suppress engine detail)
    // 1 (-v) = info for the cli, warn for the engine
    // 2+ (-vv) = debug/trace for everything
    let filter = match verbosity {
        0 => "error",
        1 => "info,relive=warn",
        _ => "debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr)
        .with_target(true)
        .with_level(true)
        .compact()
        .init();
}
