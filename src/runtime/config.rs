use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Sets the number of scheduler ticks after which the scheduler will yield
    /// to the host driver.
    ///
    /// A scheduler "tick" corresponds to one `poll` invocation on a task. By default,
    /// the event interval is `61`. Which means that at most `61` futures will be polled
    /// before handing control back to the driver.
    ///
    /// A smaller value delivers external events sooner, at the cost of more driver
    /// turns when tasks poll quickly.
    ///
    /// This number is intentionally set to a prime number close to a power of 2 so to avoid
    /// unintentional synchronizations with events that may occur at a predictable frequency.
    pub(crate) event_interval: u32,
    /// Whether a runtime with no runnable task and no pending driver events reports
    /// [`Error::Deadlock`](crate::Error::Deadlock). When disabled the runtime keeps calling
    /// [`Driver::wait`](super::Driver::wait), so the driver is expected to block.
    pub(crate) deadlock_detection: bool,
    /// Seeds the generator `select` uses to choose among ready cases.
    pub(crate) seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            event_interval: 61,
            deadlock_detection: true,
            seed: None,
        }
    }
}

impl Config {
    /// See [`Config::event_interval`](Config#structfield.event_interval).
    /// A value of zero is raised to one.
    #[must_use]
    pub fn event_interval(mut self, event_interval: u32) -> Self {
        self.event_interval = event_interval.max(1);
        self
    }

    #[must_use]
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Default configuration overridden by `WARREN_EVENT_INTERVAL`,
    /// `WARREN_DEADLOCK_DETECTION` and `WARREN_SEED`.
    /// Values that fail to parse are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(event_interval) = var("WARREN_EVENT_INTERVAL") {
            config = config.event_interval(event_interval);
        }
        if let Some(enabled) = var("WARREN_DEADLOCK_DETECTION") {
            config = config.deadlock_detection(enabled);
        }
        if let Some(seed) = var("WARREN_SEED") {
            config = config.seed(seed);
        }
        config
    }
}

fn var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(name, value = %value, "ignoring unparsable configuration value");
    }
    parsed
}
