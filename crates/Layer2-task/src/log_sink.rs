//! Log-sink proxy for the `tracing` facade
//!
//! [`TaskLogLayer`] turns events emitted on task threads into formatted,
//! ANSI-free lines routed through the log-sink [`OutputProxy`]. Pair it with
//! [`console_filter`] on the console layer so each record goes to exactly
//! one place:
//!
//! ```no_run
//! use taskhost_task::log_sink::{console_filter, TaskLogLayer};
//! use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer().with_filter(console_filter()))
//!     .with(TaskLogLayer::default())
//!     .init();
//! ```
//!
//! [`OutputProxy`]: crate::output::OutputProxy

use crate::output::{self, Stream};
use crate::routing;
use std::cell::Cell;
use std::fmt::{self, Write as _};
use taskhost_foundation::{LoggingConfig, DEFAULT_LOG_FORMAT, DEFAULT_TIME_FORMAT};
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::layer::{Context, Layer};

/// Records from the runtime itself always go to the console
const RUNTIME_TARGET: &str = env!("CARGO_CRATE_NAME");

thread_local! {
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Whether a record belongs in a task's log rather than on the console
pub fn captures(metadata: &Metadata<'_>) -> bool {
    !metadata.target().starts_with(RUNTIME_TARGET) && routing::is_bound()
}

/// Per-layer filter for the console: everything the task layer does not take
pub fn console_filter() -> FilterFn {
    FilterFn::new(passes_console as fn(&Metadata<'_>) -> bool)
}

fn passes_console(metadata: &Metadata<'_>) -> bool {
    !captures(metadata)
}

// ============================================================================
// LogFormat
// ============================================================================

/// `{time}`, `{target}`, `{level}` and `{message}` template
#[derive(Debug, Clone)]
pub struct LogFormat {
    pattern: String,
    time_format: String,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_FORMAT, DEFAULT_TIME_FORMAT)
    }
}

impl LogFormat {
    pub fn new(pattern: impl Into<String>, time_format: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            time_format: time_format.into(),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(config.format.clone(), config.time_format.clone())
    }

    pub fn render(&self, level: &str, target: &str, message: &str) -> String {
        let mut time = String::new();
        if self.pattern.contains("{time}") {
            // chrono reports bad specifiers as a fmt error
            let _ = write!(time, "{}", chrono::Local::now().format(&self.time_format));
        }
        let line = self
            .pattern
            .replace("{time}", &time)
            .replace("{target}", target)
            .replace("{level}", level)
            .replace("{message}", message);
        strip_ansi_escapes::strip_str(line)
    }
}

// ============================================================================
// TaskLogLayer
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TaskLogLayer {
    format: LogFormat,
}

impl TaskLogLayer {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(LogFormat::from_config(config))
    }
}

impl<S: Subscriber> Layer<S> for TaskLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !captures(metadata) || IN_SINK.with(|flag| flag.replace(true)) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let mut line = self
            .format
            .render(metadata.level().as_str(), metadata.target(), &visitor.finish());
        line.push('\n');
        output::proxy(Stream::Log).write_str(&line);

        IN_SINK.with(|flag| flag.set(false));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        format!("{} {}", self.message, self.fields.join(" "))
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_and_strips_ansi() {
        let format = LogFormat::new("{level} [{target}] {message}", "%H");
        let line = format.render("INFO", "job", "\x1b[32mgreen\x1b[0m done");
        assert_eq!(line, "INFO [job] green done");
    }

    #[test]
    fn test_default_format_has_time() {
        let line = LogFormat::default().render("WARN", "t", "m");
        assert!(line.ends_with(" - t - WARN - m"));
        assert!(line.len() > " - t - WARN - m".len());
    }

    #[test]
    fn test_bad_time_format_does_not_panic() {
        let line = LogFormat::new("{time}|{message}", "%Q%").render("INFO", "t", "m");
        assert!(line.ends_with("|m"));
    }

    #[test]
    fn test_unbound_thread_is_not_captured() {
        assert!(!routing::is_bound());
    }
}
