//! Tracing subscriber for `yb` and the `[component] event: detail` macros.
//!
//! Every background worker and pipeline stage reports through
//! [`log_event!`](crate::log_event) or [`debug_event!`](crate::debug_event),
//! which keeps lines greppable by component:
//!
//! ```text
//! 14:02:11.408  INFO [cache] miss: notes/a
//! 14:02:11.412  INFO [gen] wrote: public/blog/notes/a/index.html
//! 14:02:19.930  INFO [config] update success: version 2
//! ```
//!
//! Levels come from `[logging]` in `yb.toml`; a set `RUST_LOG` replaces them
//! entirely. Output goes to stderr so `yb config` stays pipeable.
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "ybook::search" = "debug"
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Wall-clock `HH:MM:SS.mmm`; the date is noise for a foreground server.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `default,module=level,...` with modules in a stable order.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    modules
        .into_iter()
        .fold(config.default.clone(), |mut directives, (module, level)| {
            directives.push_str(&format!(",{module}={level}"));
            directives
        })
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(filter_directives(config)),
    }
}

/// Install the global subscriber from the startup `[logging]` section.
///
/// Later calls are ignored. Changing levels in `yb.toml` needs a restart.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(ClockTime)
            .with_filter(env_filter(config));

        tracing_subscriber::registry().with(layer).init();
    });
}

/// [`init_with_config`] with `info` everywhere.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// `info` line tagged with a component, with optional formatted detail.
///
/// ```ignore
/// log_event!("server", "shut down");
/// log_event!("cache", "invalidated", "{key} (and {parent})");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Same shape as [`log_event!`] at `debug` level.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_sorted() {
        let mut config = LoggingConfig::default();
        config.modules.insert("ybook::search".into(), "debug".into());
        config.modules.insert("ybook::cache".into(), "trace".into());

        assert_eq!(
            filter_directives(&config),
            "info,ybook::cache=trace,ybook::search=debug"
        );
    }

    #[test]
    fn test_filter_directives_default_only() {
        assert_eq!(filter_directives(&LoggingConfig::default()), "info");
    }
}
