//! slog audit logger used by the stock synchronizer.
//!
//! Operational logging goes through `tracing`; this logger carries the one-line-per-sync
//! audit trail so it can be routed to a separate sink.

use slog::{o, Discard, Drain, Logger};
use slog_async::Async;
use slog_term::{FullFormat, PlainSyncDecorator, TermDecorator};

/// Configuration for setting up the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    async_buffer_size: usize,
    use_color: bool,
    plain: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: 1024,
            use_color: true,
            plain: false,
        }
    }
}

impl LoggerConfig {
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.async_buffer_size = size.max(1);
        self
    }

    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// Plain, uncolored output on stdout; suitable for piping.
    pub fn plain(mut self) -> Self {
        self.plain = true;
        self.use_color = false;
        self
    }
}

/// Sets up an async terminal logger tagged with the crate version
pub fn setup_logger(config: LoggerConfig) -> Logger {
    let version = env!("CARGO_PKG_VERSION");

    if config.plain {
        let decorator = PlainSyncDecorator::new(std::io::stdout());
        let drain = FullFormat::new(decorator).build().fuse();
        let drain = Async::new(drain)
            .chan_size(config.async_buffer_size)
            .build()
            .fuse();
        return Logger::root(drain, o!("version" => version, "log" => "audit"));
    }

    let decorator = {
        let builder = TermDecorator::new();
        let builder = if config.use_color {
            builder.force_color()
        } else {
            builder
        };
        builder.build()
    };

    let drain = FullFormat::new(decorator).build().fuse();

    let drain = Async::new(drain)
        .chan_size(config.async_buffer_size)
        .build()
        .fuse();

    Logger::root(drain, o!("version" => version, "log" => "audit"))
}

/// Logger that drops everything.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_buffer() {
        let cfg = LoggerConfig::default().with_buffer_size(0).with_color(false);
        assert_eq!(cfg.async_buffer_size, 1);
        assert!(!cfg.use_color);
        assert!(LoggerConfig::default().plain().plain);
    }

    #[test]
    fn discard_logger_accepts_records() {
        let logger = discard();
        slog::info!(logger, "sync"; "reference" => "Return #1", "appended" => 2);
    }
}
