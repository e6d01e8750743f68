use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, Registry, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, reload,
    util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Handle onto the installed level filter, used to re-read `LOG_LEVEL` on
/// the log rotation signal.
#[derive(Clone)]
pub struct LogHandle(reload::Handle<LevelFilter, Registry>);

impl LogHandle {
    /// Re-read `LOG_LEVEL` and swap the active filter.
    ///
    /// # Errors
    ///
    /// Fails if the subscriber owning the filter has been dropped.
    pub fn reload(&self) -> Result<LevelFilter, reload::Error> {
        let level = level_from_env();
        self.0.reload(level)?;
        Ok(level)
    }
}

const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    let default = default_level();

    value.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn level_from_env() -> LevelFilter {
    parse_level(std::env::var("LOG_LEVEL").ok().as_deref())
}

/// Install the global subscriber. Only events from `mailchat*` targets are
/// emitted.
pub fn init() -> LogHandle {
    let (filter, handle) = reload::Layer::new(level_from_env());

    tracing_subscriber::Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("mailchat")
                })),
        )
        .init();

    LogHandle(handle)
}
