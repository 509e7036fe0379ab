use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    EnvFilter,
    prelude::*,
};

use crate::config::settings::Logging;

pub fn init_tracing(config: &Logging) {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
    });
    let plain_layer = (!config.json).then(|| {
        fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .init();
}
