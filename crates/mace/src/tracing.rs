//! Logging setup and MACE line prefixes.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Install a compact stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise the MACE crates log at `level` and
/// everything else at warn. stdout is left to the host.
pub fn init(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| Error::Internal(format!("tracing already initialized: {}", e)))
}

/// Filter for the MACE crates at `level` (trace, debug, info, warn, error, off).
pub fn default_filter(level: &str) -> Result<EnvFilter> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| Error::Config(format!("unknown log level '{}'", level)))?;
    Ok(EnvFilter::new(format!(
        "warn,mace={0},mace_core={0},mace_cli={0}",
        level
    )))
}

/// Log line prefixes.
pub mod prefix {
    /// Background recomputation
    pub const RUN: &str = "꩜";
    /// Engine startup
    pub const OPEN: &str = "✿";
    /// Result store commits
    pub const COMMIT: &str = "⊔";
    /// Skipped or coalesced triggers
    pub const SKIP: &str = "⋯";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_filter_scopes_level_to_mace_crates() {
        let filter = default_filter("debug").unwrap();
        assert_eq!(
            filter.to_string(),
            EnvFilter::new("warn,mace=debug,mace_core=debug,mace_cli=debug").to_string()
        );
    }

    #[test]
    fn unknown_level_is_a_config_error() {
        assert!(matches!(default_filter("loud"), Err(Error::Config(_))));
    }
}
