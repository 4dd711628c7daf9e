//! Environment-derived runtime tunables.
//!
//! Two knobs are read from the process environment, both simple bounded integer
//! reads: the event-loop thread count and the default stream high-water mark.
//! Out-of-range or unparsable values fall back to the default with a warning.

use tracing::warn;

/// Event-loop thread count override.
pub const LOOP_THREADS_ENV: &str = "EVIO_LOOP_THREADS";
/// Default stream high-water mark override, in bytes.
pub const MAX_BUFFER_ENV: &str = "EVIO_MAX_BUFFER_SIZE";

const LOOP_THREADS_RANGE: (usize, usize) = (1, 256);
const MAX_BUFFER_RANGE: (usize, usize) = (1, 64 * 1024 * 1024);

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Number of event-loop worker threads.
    pub loop_threads: usize,
    /// Default high-water mark handed to streams created by this runtime.
    pub high_water_mark: usize,
    /// How long the work counter must stay at zero before the runtime reports
    /// idle (absorbs newly-scheduled follow-up work).
    pub idle_grace: std::time::Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_threads: default_loop_threads(),
            high_water_mark: crate::DEFAULT_HIGH_WATER_MARK,
            idle_grace: std::time::Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from the environment, falling back to defaults for
    /// anything missing or out of range.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            loop_threads: bounded(
                LOOP_THREADS_ENV,
                std::env::var(LOOP_THREADS_ENV).ok().as_deref(),
                defaults.loop_threads,
                LOOP_THREADS_RANGE,
            ),
            high_water_mark: bounded(
                MAX_BUFFER_ENV,
                std::env::var(MAX_BUFFER_ENV).ok().as_deref(),
                defaults.high_water_mark,
                MAX_BUFFER_RANGE,
            ),
            idle_grace: defaults.idle_grace,
        }
    }
}

fn default_loop_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Parses a bounded integer setting; `raw = None` means unset (silent default),
/// anything else must parse and land within `range` or the default wins with a
/// warning.
fn bounded(name: &str, raw: Option<&str>, default: usize, range: (usize, usize)) -> usize {
    let (min, max) = range;
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if (min..=max).contains(&value) => value,
            Ok(value) => {
                warn!(name, value, min, max, default, "setting out of range, using default");
                default
            }
            Err(_) => {
                warn!(name, raw, default, "setting is not an integer, using default");
                default
            }
        },
    }
}
