use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
fn default_directives(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "brevsync=error"
    } else if verbose {
        "brevsync=debug"
    } else {
        "brevsync=warn"
    }
}

/// Install the global subscriber, logging to stderr so stdout stays clean.
///
/// `RUST_LOG` wins over the flags. Safe to call more than once.
pub fn init(quiet: bool, verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(quiet, verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_ansi(!no_color),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(default_directives(true, true), "brevsync=error");
        assert_eq!(default_directives(false, true), "brevsync=debug");
        assert_eq!(default_directives(false, false), "brevsync=warn");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(true, false, true);
        init(false, true, true);
    }
}
