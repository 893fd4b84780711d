use std::time::Duration;

use crate::wait::PollOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerConfig {
    pub poll: PollOptions,
    /// Guard every patch with a `test` on the last observed resourceVersion.
    pub optimistic_lock: bool,
}

impl ControllerConfig {
    /// `STEWARD_CONVERGE_TIMEOUT_SECS`, `STEWARD_POLL_INTERVAL_MS`,
    /// `STEWARD_POLL_MAX_INTERVAL_MS`, `STEWARD_OPTIMISTIC_LOCK`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let num = |k: &str, default: u64| get(k).and_then(|s| s.trim().parse::<u64>().ok()).unwrap_or(default);
        // a zero interval would never back off
        let positive = |k: &str, default: u64| Some(num(k, default)).filter(|n| *n > 0).unwrap_or(default);
        let defaults = PollOptions::default();
        let poll = PollOptions {
            timeout: Duration::from_secs(num("STEWARD_CONVERGE_TIMEOUT_SECS", defaults.timeout.as_secs())),
            interval: Duration::from_millis(positive("STEWARD_POLL_INTERVAL_MS", defaults.interval.as_millis() as u64)),
            max_interval: Duration::from_millis(positive(
                "STEWARD_POLL_MAX_INTERVAL_MS",
                defaults.max_interval.as_millis() as u64,
            )),
        };
        let optimistic_lock = get("STEWARD_OPTIMISTIC_LOCK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { poll, optimistic_lock }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_and_defaults() {
        let none = ControllerConfig::from_lookup(|_| None);
        assert_eq!(none, ControllerConfig::default());
        assert_eq!(none.poll.timeout, Duration::from_secs(60));

        let env: HashMap<&str, &str> = HashMap::from([
            ("STEWARD_CONVERGE_TIMEOUT_SECS", "5"),
            ("STEWARD_POLL_INTERVAL_MS", "junk"),
            ("STEWARD_OPTIMISTIC_LOCK", "TRUE"),
        ]);
        let cfg = ControllerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.poll.timeout, Duration::from_secs(5));
        assert_eq!(cfg.poll.interval, Duration::from_millis(500));
        assert!(cfg.optimistic_lock);
    }

    #[test]
    fn zero_intervals_fall_back_to_defaults() {
        let env: HashMap<&str, &str> =
            HashMap::from([("STEWARD_POLL_INTERVAL_MS", "0"), ("STEWARD_POLL_MAX_INTERVAL_MS", "0")]);
        let cfg = ControllerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.poll.interval, Duration::from_millis(500));
        assert_eq!(cfg.poll.max_interval, Duration::from_secs(10));
    }
}
