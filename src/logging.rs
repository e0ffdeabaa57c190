//! tracing setup for the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for this crate when
/// `verbose`. Installing twice is an error.
pub fn init_tracing(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_level(true);

    Registry::default().with(env_filter).with(fmt_layer).try_init()
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("info,cardinal_storage=debug")
    } else {
        EnvFilter::new("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert!(default_filter(false).to_string().starts_with("info"));
        assert!(default_filter(true).to_string().contains("cardinal_storage=debug"));
    }
}
