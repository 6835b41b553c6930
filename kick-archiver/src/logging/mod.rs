//! Tracing subscriber setup with local-time timestamps and an optional daily log file.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogSettings;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "kick_archiver=info,hls_capture=info";

const VERBOSE_LOG_FILTER: &str = "kick_archiver=debug,hls_capture=debug";

const HTTP_LOG_DIRECTIVES: &[&str] = &["reqwest=trace", "hyper_util=debug"];

const LOG_FILE_PREFIX: &str = "kick-archiver.log";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Resolved logging options: the config file and environment, then `-v`/`-q`.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub filter: Option<String>,
    pub dir: Option<PathBuf>,
    pub verbose: bool,
    pub quiet: bool,
    pub debug_http: bool,
}

impl LogOptions {
    pub fn from_settings(settings: &LogSettings, verbose: bool, quiet: bool) -> Self {
        Self {
            filter: settings.filter.clone(),
            dir: settings.dir.clone(),
            verbose: verbose || settings.verbose,
            quiet,
            debug_http: settings.debug_http,
        }
    }

    /// The filter directive in effect. `RUST_LOG` is consulted by the caller.
    pub fn directive(&self) -> String {
        let mut directive = if self.quiet {
            "error".to_string()
        } else if self.verbose {
            VERBOSE_LOG_FILTER.to_string()
        } else {
            self.filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
        };
        if self.debug_http && !self.quiet {
            for extra in HTTP_LOG_DIRECTIVES {
                directive.push(',');
                directive.push_str(extra);
            }
        }
        directive
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        // An explicit -v / -q beats RUST_LOG.
        if !self.verbose
            && !self.quiet
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return Ok(filter);
        }
        EnvFilter::try_new(self.directive())
            .map_err(|e| Error::Logging(format!("invalid filter directive: {e}")))
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit so the
/// file writer flushes.
pub fn init_logging(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = options.env_filter()?;
    let console = fmt::layer().with_timer(LocalTimer).with_target(options.verbose);

    let (file_layer, guard) = match &options.dir {
        Some(dir) => {
            let (layer, guard) = file_layer(dir)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(format!("failed to set global subscriber: {e}")))?;

    Ok(guard)
}

fn file_layer<S>(dir: &Path) -> Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(LocalTimer)
        .boxed();
    Ok((layer, guard))
}
