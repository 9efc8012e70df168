//! # Watchdog Timer
//!
//! A rolling-deadline watchdog for guarding asynchronous work, built on top of Tokio.
//!
//! A [`Timer`] is launched around a piece of work and aborts it when no
//! liveness signal arrives within its duration of the previous one. Work can
//! be watched through a callback, or raced as a future against the deadline.
//!
//! ## Features
//!
//! - **Rolling Deadline**: Every `update` pushes the deadline back, without rescheduling churn
//! - **Named Timers**: A [`Registry`] retrieves timers by name or number
//! - **Two Calling Conventions**: Callback on timeout, or a future that fails on timeout
//! - **Safe Teardown**: Running timers refuse destruction until stopped
//! - **Pluggable Logging**: Verbosity tiers over any [`LogSink`], the `log` crate by default
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use watchdog_timer::{Registry, Timer, TimerError, TimerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TimerError> {
//!     let registry = Registry::new();
//!
//!     // Race a future against a 500ms deadline
//!     let timer = Timer::new(&registry, Some(500), TimerOptions::new().id("fetch"))?;
//!     let value = timer
//!         .launch_timer_future(async { Ok::<_, TimerError>(42) }, &[])
//!         .await?;
//!     assert_eq!(value, 42);
//!
//!     // Keep a callback-style watchdog alive with updates
//!     let watchdog = Timer::new(&registry, Some(100), TimerOptions::default())?;
//!     watchdog.launch_timer(|err| eprintln!("gave up: {err}"), &[])?;
//!     for step in 0..3 {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         watchdog.update(&[&"step", &step]);
//!     }
//!     watchdog.done(&[]);
//!
//!     assert!(registry.is_empty());
//!     Ok(())
//! }
//! ```

mod error;
mod id;
mod logging;
mod options;
mod registry;
mod timer;

pub use error::{Result, TimerError};
pub use id::TimerId;
pub use logging::{LogCrateSink, LogEvent, LogSink, SinkError, Verbosity};
pub use options::{GetterOptions, TimerOptions, DEFAULT_DURATION, MARGIN, MAX_WAIT};
pub use registry::Registry;
pub use timer::{Action, Launched, LogArgs, Timer};

// Re-export commonly used types for convenience
pub use std::time::Duration;
