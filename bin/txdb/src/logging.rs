//! Logging setup for the `txdb` binary.

use clap::Args;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence everything but errors.
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "txdb=trace").
    #[arg(long = "log.filter", value_name = "DIRECTIVE", global = true)]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json", global = true)]
    pub(crate) json: bool,
}

impl LogArgs {
    /// Build the filter: `--quiet` wins, then `RUST_LOG` or the verbosity
    /// level, then any `--log.filter` directives on top.
    fn env_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("error");
        }

        let base_level = match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &self.filter {
            for directive in custom.split(',') {
                if let Ok(d) = directive.parse() {
                    filter = filter.add_directive(d);
                }
            }
        }
        filter
    }
}

/// Initialize logging to stderr so command output stays clean on stdout.
pub(crate) fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(args.env_filter())
        .with_writer(std::io::stderr)
        .without_time();

    if args.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
