use std::time::{Duration, Instant};

use log::LevelFilter;

use crate::status::ExecStatus;

/// Log levels for the statements executed on a connection.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct LogSettings {
    pub statements_level: LevelFilter,
    pub slow_statements_level: LevelFilter,
    pub slow_statements_duration: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            statements_level: LevelFilter::Debug,
            slow_statements_level: LevelFilter::Warn,
            slow_statements_duration: Duration::from_secs(1),
        }
    }
}

impl LogSettings {
    pub fn log_statements(&mut self, level: LevelFilter) -> &mut Self {
        self.statements_level = level;
        self
    }

    pub fn log_slow_statements(&mut self, level: LevelFilter, duration: Duration) -> &mut Self {
        self.slow_statements_level = level;
        self.slow_statements_duration = duration;
        self
    }

    /// Disable logging of statements entirely.
    pub fn disable_statement_logging(&mut self) -> &mut Self {
        self.log_statements(LevelFilter::Off)
            .log_slow_statements(LevelFilter::Off, Duration::default())
    }
}

// `tracing` macros need the level as a constant
// https://github.com/tokio-rs/tracing/issues/372
macro_rules! private_tracing_dynamic_enabled {
    (target: $target:expr, $level:expr) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::enabled!(target: $target, Level::ERROR),
            Level::WARN => ::tracing::enabled!(target: $target, Level::WARN),
            Level::INFO => ::tracing::enabled!(target: $target, Level::INFO),
            Level::DEBUG => ::tracing::enabled!(target: $target, Level::DEBUG),
            Level::TRACE => ::tracing::enabled!(target: $target, Level::TRACE),
        }
    }};
}

macro_rules! private_tracing_dynamic_event {
    (target: $target:expr, $level:expr, $($args:tt)*) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::event!(target: $target, Level::ERROR, $($args)*),
            Level::WARN => ::tracing::event!(target: $target, Level::WARN, $($args)*),
            Level::INFO => ::tracing::event!(target: $target, Level::INFO, $($args)*),
            Level::DEBUG => ::tracing::event!(target: $target, Level::DEBUG, $($args)*),
            Level::TRACE => ::tracing::event!(target: $target, Level::TRACE, $($args)*),
        }
    }};
}

pub(crate) fn level_filter_to_levels(filter: LevelFilter) -> Option<(tracing::Level, log::Level)> {
    let tracing_level = match filter {
        LevelFilter::Error => Some(tracing::Level::ERROR),
        LevelFilter::Warn => Some(tracing::Level::WARN),
        LevelFilter::Info => Some(tracing::Level::INFO),
        LevelFilter::Debug => Some(tracing::Level::DEBUG),
        LevelFilter::Trace => Some(tracing::Level::TRACE),
        LevelFilter::Off => None,
    };

    tracing_level.zip(filter.to_level())
}

/// Logs one blocking statement when dropped.
pub(crate) struct QueryLogger<'q> {
    sql: &'q [u8],
    status: Option<ExecStatus>,
    rows_returned: u64,
    rows_affected: u64,
    start: Instant,
    settings: LogSettings,
}

impl<'q> QueryLogger<'q> {
    pub(crate) fn new(sql: &'q [u8], settings: LogSettings) -> Self {
        Self {
            sql,
            status: None,
            rows_returned: 0,
            rows_affected: 0,
            start: Instant::now(),
            settings,
        }
    }

    pub(crate) fn set_status(&mut self, status: ExecStatus) {
        self.status = Some(status);
    }

    pub(crate) fn set_rows_returned(&mut self, n: u64) {
        self.rows_returned = n;
    }

    pub(crate) fn set_rows_affected(&mut self, n: u64) {
        self.rows_affected = n;
    }

    pub(crate) fn finish(&self) {
        let elapsed = self.start.elapsed();

        let was_slow = elapsed >= self.settings.slow_statements_duration;

        let level = if was_slow {
            self.settings.slow_statements_level
        } else {
            self.settings.statements_level
        };

        let Some((tracing_level, log_level)) = level_filter_to_levels(level) else {
            return;
        };

        // a subscriber may be listening through either `log` or `tracing`
        let log_is_enabled = log::log_enabled!(target: "pqx::query", log_level)
            || private_tracing_dynamic_enabled!(target: "pqx::query", tracing_level);

        if !log_is_enabled {
            return;
        }

        let sql = String::from_utf8_lossy(self.sql);
        let mut summary = summarize(&sql);
        let status = self.status.map(ExecStatus::as_str).unwrap_or("NONE");

        let statement = if summary != sql {
            summary.push_str(" …");
            format!("\n\n{sql}\n")
        } else {
            String::new()
        };

        if was_slow {
            private_tracing_dynamic_event!(
                target: "pqx::query",
                tracing_level,
                summary,
                db.statement = statement,
                status,
                rows_affected = self.rows_affected,
                rows_returned = self.rows_returned,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
                slow_threshold = ?self.settings.slow_statements_duration,
                "slow statement: execution time exceeded alert threshold"
            );
        } else {
            private_tracing_dynamic_event!(
                target: "pqx::query",
                tracing_level,
                summary,
                db.statement = statement,
                status,
                rows_affected = self.rows_affected,
                rows_returned = self.rows_returned,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
            );
        }
    }
}

impl Drop for QueryLogger<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The first few words of a statement, on one line.
pub(crate) fn summarize(sql: &str) -> String {
    let mut summary = String::with_capacity(sql.len().min(64));

    for word in sql.split_whitespace().take(4) {
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(word);
    }

    summary
}
