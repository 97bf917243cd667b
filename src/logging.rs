//! Command line flags for logging, and the global `tracing` subscriber.
//!
//! Diagnostics always go to stderr: stdout carries the drained messages.
use clap::ArgAction;
use std::env::VarError;
use tracing_subscriber::EnvFilter;

/// Used when neither the flags nor `RUST_LOG` say otherwise.
pub const DEFAULT_LOG_FILTER: &str = "warn,draino=info";

#[derive(Debug, Clone, Default, clap::Args)]
pub struct LoggingArgs {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target, e.g. `debug,lapin=info`.
    /// See <https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html>
    /// for the full syntax.
    ///
    /// Overridden by `-v`.
    #[arg(long = "log-filter", env = "LOG_FILTER", global = true)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// -v   'info,lapin=warn'
    ///
    /// -vv  'debug,lapin=info'
    ///
    /// -vvv 'trace,lapin=debug'
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub log_verbose_count: u8,
}

impl LoggingArgs {
    /// The filter directive to use, if the flags set one.
    pub fn directive(&self) -> Option<String> {
        match self.log_verbose_count {
            0 => self.log_filter.clone(),
            1 => Some("info,lapin=warn".to_owned()),
            2 => Some("debug,lapin=info".to_owned()),
            _ => Some("trace,lapin=debug".to_owned()),
        }
    }

    /// Flags first, then `RUST_LOG`, then [`DEFAULT_LOG_FILTER`].
    ///
    /// An invalid directive is an error wherever it comes from.
    pub fn env_filter(&self) -> Result<EnvFilter, anyhow::Error> {
        let rust_log = match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directive) => Some(directive),
            Err(VarError::NotPresent) => None,
            Err(e) => return Err(anyhow::anyhow!("Invalid {}: {e}", EnvFilter::DEFAULT_ENV)),
        };
        self.env_filter_or(rust_log)
    }

    fn env_filter_or(&self, rust_log: Option<String>) -> Result<EnvFilter, anyhow::Error> {
        let directive = self
            .directive()
            .or(rust_log)
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned());
        EnvFilter::try_new(&directive)
            .map_err(|e| anyhow::anyhow!("Invalid log filter `{directive}`: {e}"))
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn install_global_subscriber(&self) -> Result<(), anyhow::Error> {
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter()?)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
    }
}
