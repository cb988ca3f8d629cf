//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise `appforge=info`, or `appforge=debug`
//! with `--verbose`. Logs go to stderr so command output on stdout stays
//! machine-readable.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "appforge=debug,warn"
    } else {
        "appforge=info,warn"
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .map_err(|e| anyhow!("invalid log filter: {e}"))?;

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
        assert!(default_directives(true).contains("appforge=debug"));
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever test installs first wins; the second call must error.
        let _ = init_tracing(false, false);
        assert!(init_tracing(false, true).is_err());
    }
}
