use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// External receiver of engine diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Emits through `tracing` and, when installed, forwards to a [`DiagnosticsSink`].
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl Diagnostics {
    pub fn new(sink: Option<Arc<dyn DiagnosticsSink>>) -> Self {
        Self { sink }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        if let Some(sink) = &self.sink {
            sink.log(level, message);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Collapses whitespace and truncates to `max` characters with an ellipsis.
pub fn summarize_text(value: &str, max: usize) -> String {
    let text = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max {
        return text;
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(LogLevel, String)>>);

    impl DiagnosticsSink for Capture {
        fn log(&self, level: LogLevel, message: &str) {
            self.0.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_forwards_to_sink() {
        let capture = Arc::new(Capture::default());
        let diagnostics = Diagnostics::new(Some(capture.clone()));
        diagnostics.info("attached");
        diagnostics.error("detach failed");

        let seen = capture.0.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (LogLevel::Info, "attached".to_string()));
        assert_eq!(seen[1].0, LogLevel::Error);
    }

    #[test]
    fn test_without_sink_is_noop() {
        Diagnostics::default().warn("nobody listening");
    }

    #[test]
    fn test_summarize_text() {
        assert_eq!(summarize_text("  a \n b  ", 10), "a b");
        assert_eq!(summarize_text("abcdef", 4), "abc…");
        assert_eq!(summarize_text("héllo wörld", 5), "héll…");
    }
}
