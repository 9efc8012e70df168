use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::id::TimerId;
use crate::logging::{LogCrateSink, LogSink, Verbosity};

/// Padding added to every configured duration to absorb scheduling jitter.
pub const MARGIN: Duration = Duration::from_millis(100);

/// Duration used when a timer is created without one.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(2 * 60);

/// Longest single sleep of the scheduler; longer deadlines are re-evaluated.
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// Construction options for a [`Timer`](crate::Timer).
#[derive(Clone)]
pub struct TimerOptions {
    /// Requested identifier; the lowest unused number when `None`.
    pub id: Option<TimerId>,
    /// Fall back to an automatic identifier when `id` is taken or invalid.
    pub force_create: bool,
    /// Register the timer so it can be retrieved by identifier.
    pub persist: bool,
    /// Destroy the timer once `done`/`abort` completes.
    pub auto_destroy: bool,
    pub verbosity: Verbosity,
    pub sink: Arc<dyn LogSink>,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            id: None,
            force_create: false,
            persist: true,
            auto_destroy: true,
            verbosity: Verbosity::SILENT,
            sink: Arc::new(LogCrateSink),
        }
    }
}

impl fmt::Debug for TimerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerOptions")
            .field("id", &self.id)
            .field("force_create", &self.force_create)
            .field("persist", &self.persist)
            .field("auto_destroy", &self.auto_destroy)
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl TimerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<TimerId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn force_create(mut self, force: bool) -> Self {
        self.force_create = force;
        self
    }

    #[must_use]
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    #[must_use]
    pub fn auto_destroy(mut self, auto_destroy: bool) -> Self {
        self.auto_destroy = auto_destroy;
        self
    }

    #[must_use]
    pub fn verbosity(mut self, verbosity: impl Into<Verbosity>) -> Self {
        self.verbosity = verbosity.into();
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }
}

/// Options for [`Registry::get_by_id`](crate::Registry::get_by_id).
#[derive(Debug, Clone)]
pub struct GetterOptions {
    /// Create the timer when no timer has the identifier.
    pub create_one: bool,
    /// Duration in milliseconds for a newly created timer.
    pub duration: Option<u64>,
    /// Options for a newly created timer; `id` is overridden.
    pub timer: TimerOptions,
}

impl Default for GetterOptions {
    fn default() -> Self {
        Self {
            create_one: true,
            duration: None,
            timer: TimerOptions::default(),
        }
    }
}

impl GetterOptions {
    /// Lookup only, never create.
    #[must_use]
    pub fn existing() -> Self {
        Self {
            create_one: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn duration(mut self, millis: u64) -> Self {
        self.duration = Some(millis);
        self
    }

    #[must_use]
    pub fn timer(mut self, options: TimerOptions) -> Self {
        self.timer = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TimerOptions::default();
        assert!(options.id.is_none());
        assert!(!options.force_create);
        assert!(options.persist);
        assert!(options.auto_destroy);
        assert_eq!(options.verbosity, Verbosity::SILENT);
        assert!(GetterOptions::default().create_one);
        assert!(!GetterOptions::existing().create_one);
    }

    #[test]
    fn test_builder_chain() {
        let options = TimerOptions::new()
            .id("upload")
            .force_create(true)
            .persist(false)
            .auto_destroy(false)
            .verbosity(Verbosity::new(23));
        assert_eq!(options.id, Some(TimerId::from("upload")));
        assert!(options.force_create);
        assert!(!options.persist);
        assert!(!options.auto_destroy);
        assert_eq!(options.verbosity.detail(), 2);
        assert!(format!("{options:?}").contains("upload"));
    }
}
