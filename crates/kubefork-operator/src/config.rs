//! Controller configuration
//!
//! Every option can be given as a flag or through its environment variable.

use std::time::Duration;

use clap::Args;

/// Settings of the `controller` mode
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Seconds between two fork deadline checks
    #[arg(long, env = "KUBEFORK_DEADLINE_INTERVAL_SECS", default_value_t = 60)]
    pub deadline_interval_secs: u64,

    /// Seconds before a failed reconciliation is retried
    #[arg(long, env = "KUBEFORK_REQUEUE_SECS", default_value_t = 30)]
    pub requeue_secs: u64,

    /// Watch only this namespace instead of the whole cluster
    #[arg(long, env = "KUBEFORK_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl ControllerConfig {
    /// Interval of the deadline watcher
    pub fn deadline_interval(&self) -> Duration {
        Duration::from_secs(self.deadline_interval_secs.max(1))
    }

    /// Delay before a failed reconciliation is retried
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            deadline_interval_secs: 60,
            requeue_secs: 30,
            watch_namespace: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ControllerConfig,
    }

    #[test]
    fn defaults_match_default_impl() {
        let cli = TestCli::try_parse_from(["kubefork"]).unwrap();
        assert_eq!(cli.config, ControllerConfig::default());
        assert_eq!(cli.config.deadline_interval(), Duration::from_secs(60));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "kubefork",
            "--deadline-interval-secs",
            "5",
            "--watch-namespace",
            "team-a",
        ])
        .unwrap();
        assert_eq!(cli.config.deadline_interval(), Duration::from_secs(5));
        assert_eq!(cli.config.watch_namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn zero_interval_is_raised_to_one_second() {
        let config = ControllerConfig {
            deadline_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.deadline_interval(), Duration::from_secs(1));
    }
}
