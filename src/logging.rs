//! Log sink contract and verbosity tiers.
//!
//! A timer reports its lifecycle through a [`LogSink`]. Which calls reach
//! the sink, and what is added around the caller's own values, depends on
//! the timer's [`Verbosity`]:
//!
//! - the units digit selects which argument-less events are emitted
//!   (`1` launch, `2` done and abort, `3` update, `4` scheduler ticks);
//! - the tens digit selects enrichment (`1` identifier, `2` current time,
//!   `3` the timestamp the deadline falls on).
//!
//! Calls that carry values are always emitted, whatever the level.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::TimerError;
use crate::id::TimerId;

/// Error a sink may report. It is logged and dropped, never returned.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Destination for formatted timer log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, values: &[String]) -> Result<(), SinkError>;
}

impl<F> LogSink for F
where
    F: Fn(&[String]) -> Result<(), SinkError> + Send + Sync,
{
    fn write(&self, values: &[String]) -> Result<(), SinkError> {
        self(values)
    }
}

/// Default sink: one `info` record per line, values joined by spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn write(&self, values: &[String]) -> Result<(), SinkError> {
        log::info!("{}", values.join(" "));
        Ok(())
    }
}

/// Lifecycle point a log line is emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    Launch,
    Update,
    Done,
    Abort,
    Tick,
    /// Ad-hoc line requested through `Timer::log`.
    Log,
}

impl LogEvent {
    /// Message used when the call carries no values.
    #[must_use]
    pub fn default_message(self) -> Option<&'static str> {
        match self {
            Self::Launch => Some("Launched"),
            Self::Update => Some("Updated"),
            Self::Done => Some("Done"),
            Self::Abort => Some("Aborted"),
            Self::Tick => Some("Ticked"),
            Self::Log => None,
        }
    }

    fn silent_threshold(self) -> u8 {
        match self {
            Self::Log => 0,
            Self::Launch => 1,
            Self::Done | Self::Abort => 2,
            Self::Update => 3,
            Self::Tick => 4,
        }
    }
}

/// Two-digit verbosity level, see the module docs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(u8);

impl Verbosity {
    pub const SILENT: Self = Self(0);

    #[must_use]
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Units digit.
    #[must_use]
    pub const fn events(self) -> u8 {
        self.0 % 10
    }

    /// Tens digit.
    #[must_use]
    pub const fn detail(self) -> u8 {
        self.0 / 10
    }

    /// Whether a call for `event` reaches the sink.
    #[must_use]
    pub fn allows(self, event: LogEvent, has_values: bool) -> bool {
        match event {
            // ticks are noisy; values do not unlock them
            LogEvent::Tick => self.events() >= LogEvent::Tick.silent_threshold(),
            _ => has_values || self.events() >= event.silent_threshold(),
        }
    }
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        Self(level)
    }
}

impl FromStr for Verbosity {
    type Err = TimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map(Self)
            .map_err(|e| TimerError::InvalidArgument(format!("verbosity {s:?}: {e}")))
    }
}

/// Timer state captured for one log line.
#[derive(Debug, Clone)]
pub(crate) struct LogContext {
    pub id: TimerId,
    pub deadline: DateTime<Local>,
}

/// Binds a sink to a verbosity level on behalf of one timer.
#[derive(Clone)]
pub(crate) struct TimerLogger {
    sink: Arc<dyn LogSink>,
    verbosity: Verbosity,
}

impl TimerLogger {
    pub(crate) fn new(sink: Arc<dyn LogSink>, verbosity: Verbosity) -> Self {
        Self { sink, verbosity }
    }

    pub(crate) fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub(crate) fn emit(&self, event: LogEvent, ctx: &LogContext, args: &[&dyn fmt::Display]) {
        if !self.verbosity.allows(event, !args.is_empty()) {
            return;
        }
        let values = self.format(event, ctx, args);
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.write(&values))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!("Timer '{}': log sink is not working properly: {}", ctx.id, err);
            }
            Err(_) => {
                log::warn!("Timer '{}': log sink panicked", ctx.id);
            }
        }
    }

    fn format(&self, event: LogEvent, ctx: &LogContext, args: &[&dyn fmt::Display]) -> Vec<String> {
        let mut values: Vec<String> = if args.is_empty() {
            event.default_message().map(str::to_string).into_iter().collect()
        } else {
            args.iter().map(ToString::to_string).collect()
        };
        values.retain(|v| !v.is_empty());

        let detail = self.verbosity.detail();
        if detail >= 1 {
            values.push(format!("(_id: {})", ctx.id));
        }
        if detail >= 2 {
            values.insert(0, Local::now().format("%H:%M:%S%.3f").to_string());
        }
        if detail >= 3 {
            values.push(format!(
                "Timeout on {}.",
                ctx.deadline.format("%d/%m/%Y %H:%M:%S%.3f")
            ));
        }
        values
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    fn ctx() -> LogContext {
        LogContext {
            id: TimerId::from("fetch"),
            deadline: Local::now(),
        }
    }

    #[test]
    fn test_silent_calls_follow_event_tier() {
        let quiet = Verbosity::new(0);
        assert!(!quiet.allows(LogEvent::Launch, false));
        assert!(quiet.allows(LogEvent::Launch, true));
        assert!(quiet.allows(LogEvent::Log, false));

        let level2 = Verbosity::new(2);
        assert!(level2.allows(LogEvent::Launch, false));
        assert!(level2.allows(LogEvent::Done, false));
        assert!(level2.allows(LogEvent::Abort, false));
        assert!(!level2.allows(LogEvent::Update, false));
    }

    #[test]
    fn test_ticks_need_level_four() {
        assert!(!Verbosity::new(3).allows(LogEvent::Tick, true));
        assert!(Verbosity::new(4).allows(LogEvent::Tick, false));
    }

    #[test]
    fn test_default_message_and_enrichment() {
        let sink = RecordingSink::default();
        let logger = TimerLogger::new(Arc::new(sink.clone()), Verbosity::new(12));
        logger.emit(LogEvent::Done, &ctx(), &[]);

        let lines = sink.lines();
        assert_eq!(lines, vec![vec!["Done".to_string(), "(_id: fetch)".to_string()]]);
    }

    #[test]
    fn test_full_enrichment_wraps_values() {
        let sink = RecordingSink::default();
        let logger = TimerLogger::new(Arc::new(sink.clone()), Verbosity::new(30));
        logger.emit(LogEvent::Update, &ctx(), &[&"step", &2, &""]);

        let line = &sink.lines()[0];
        assert_eq!(line.len(), 5);
        assert_eq!(line[1], "step");
        assert_eq!(line[2], "2");
        assert_eq!(line[3], "(_id: fetch)");
        assert!(line[4].starts_with("Timeout on "));
    }

    #[test]
    fn test_failing_sink_is_contained() {
        let failing = |_: &[String]| -> Result<(), SinkError> { Err("disk full".into()) };
        let logger = TimerLogger::new(Arc::new(failing), Verbosity::new(9));
        logger.emit(LogEvent::Abort, &ctx(), &[&"boom"]);
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let panicking = |_: &[String]| -> Result<(), SinkError> { panic!("sink exploded") };
        let logger = TimerLogger::new(Arc::new(panicking), Verbosity::new(9));
        logger.emit(LogEvent::Abort, &ctx(), &[&"boom"]);
    }

    #[test]
    fn test_verbosity_from_str() {
        assert_eq!("21".parse::<Verbosity>(), Ok(Verbosity::new(21)));
        assert!(matches!(
            "loud".parse::<Verbosity>(),
            Err(TimerError::InvalidArgument(_))
        ));
    }
}
