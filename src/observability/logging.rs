use crate::config::{LogFormat, LoggingSettings};
use crate::error::{AppError, Result};
use anyhow::anyhow;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn fmt_layer(settings: &LoggingSettings) -> BoxedLayer {
    let layer = fmt::layer()
        .with_file(settings.with_source)
        .with_line_number(settings.with_source);

    match settings.format {
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| AppError::InvalidArgument(format!("logging.level: {}", e)))?,
    };

    tracing_subscriber::registry()
        .with(fmt_layer(settings))
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::Internal(anyhow!("Failed to initialize logging: {}", e)))?;

    tracing::info!(level = %settings.level, format = ?settings.format, "Logging initialized");
    Ok(())
}

/// Masks sensitive data in strings (e.g., idempotency keys, tokens).
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        return "*".repeat(chars.len());
    }

    let prefix: String = chars[..visible_chars].iter().collect();
    let suffix: String = chars[chars.len() - visible_chars..].iter().collect();
    let masked_len = chars.len() - (visible_chars * 2);

    format!("{}{}{}", prefix, "*".repeat(masked_len), suffix)
}

/// Masks a payment token, keeping only the last four characters.
pub fn mask_payment_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }

    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), suffix)
}
