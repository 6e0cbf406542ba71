use crate::config::EngineConfig;
use crate::constants::MIN_FAILURE_DETECTION_TIME;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::scheduler::Jitter;
use crate::sys::{EventSink, FlagControl};
use crate::types::{ProbeId, Sequence};
use std::time::Duration;

/// Build a failure detection [`Engine`].
///
/// # Examples
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// use mpath_core::{Builder, NullEventSink, NullFlagControl};
/// use std::time::Duration;
///
/// let engine = Builder::new(NullFlagControl, NullEventSink)
///     .failure_detection_time(Duration::from_secs(7))
///     .transitive_probing(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct Builder<F: FlagControl, E: EventSink> {
    config: EngineConfig,
    flag_control: F,
    events: E,
    jitter: Option<Box<dyn Jitter + Send>>,
}

impl<F: FlagControl, E: EventSink> Builder<F, E> {
    /// A builder with default configuration and the given collaborators.
    #[must_use]
    pub fn new(flag_control: F, events: E) -> Self {
        Self {
            config: EngineConfig::default(),
            flag_control,
            events,
            jitter: None,
        }
    }

    /// The requested failure detection time.
    #[must_use]
    pub fn failure_detection_time(mut self, failure_detection_time: Duration) -> Self {
        self.config.failure_detection_time = failure_detection_time;
        self
    }

    /// Consecutive losses before a failure is declared.
    #[must_use]
    pub fn probe_failure_count(mut self, probe_failure_count: usize) -> Self {
        self.config.probe_failure_count = probe_failure_count;
        self
    }

    /// Consecutive successes before a repair is declared.
    #[must_use]
    pub fn probe_repair_count(mut self, probe_repair_count: usize) -> Self {
        self.config.probe_repair_count = probe_repair_count;
        self
    }

    /// The first sequence number sent by each probing instance.
    #[must_use]
    pub fn initial_sequence(mut self, initial_sequence: u16) -> Self {
        self.config.initial_sequence = Sequence(initial_sequence);
        self
    }

    /// The ICMP identifier base.
    #[must_use]
    pub fn probe_id(mut self, probe_id: u16) -> Self {
        self.config.probe_id = ProbeId(probe_id);
        self
    }

    /// How long the channel waits for a packet before giving up a read.
    #[must_use]
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config.read_timeout = read_timeout;
        self
    }

    /// Whether interfaces without a test address infer liveness from peers.
    #[must_use]
    pub fn transitive_probing(mut self, transitive_probing: bool) -> Self {
        self.config.transitive_probing = transitive_probing;
        self
    }

    /// Override the probe jitter source; useful for simulations.
    #[must_use]
    pub fn jitter(mut self, jitter: Box<dyn Jitter + Send>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Engine<F, E>> {
        if self.config.probe_failure_count == 0 {
            return Err(Error::BadConfig(String::from(
                "probe failure count must be at least 1",
            )));
        }
        if self.config.probe_repair_count == 0 {
            return Err(Error::BadConfig(String::from(
                "probe repair count must be at least 1",
            )));
        }
        if self.config.failure_detection_time < MIN_FAILURE_DETECTION_TIME {
            return Err(Error::BadConfig(format!(
                "failure detection time must be at least {}ms",
                MIN_FAILURE_DETECTION_TIME.as_millis()
            )));
        }
        Ok(match self.jitter {
            Some(jitter) => {
                Engine::with_jitter(self.config, self.flag_control, self.events, jitter)
            }
            None => Engine::new(self.config, self.flag_control, self.events),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{NullEventSink, NullFlagControl};

    #[test]
    fn test_build_defaults() {
        let engine = Builder::new(NullFlagControl, NullEventSink).build().unwrap();
        assert_eq!(Duration::from_secs(10), engine.config().failure_detection_time);
    }

    #[test]
    fn test_zero_failure_count_rejected() {
        let err = Builder::new(NullFlagControl, NullEventSink)
            .probe_failure_count(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadConfig(_)));
    }

    #[test]
    fn test_zero_repair_count_rejected() {
        let err = Builder::new(NullFlagControl, NullEventSink)
            .probe_repair_count(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadConfig(_)));
    }

    #[test]
    fn test_tiny_detection_time_rejected() {
        let err = Builder::new(NullFlagControl, NullEventSink)
            .failure_detection_time(Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadConfig(_)));
    }
}
