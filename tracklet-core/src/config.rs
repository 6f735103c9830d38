//! Runtime parameters of the session store and reaper.
//!
//! All values are injected at startup and immutable afterwards; there is no
//! runtime reconfiguration path.

use crate::types::DeviceId;
use std::time::Duration;

/// Configuration consumed by [`crate::store::SessionStore`] and
/// [`crate::reaper::Reaper`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Hard bound on simultaneously non-closed sessions.
    pub max_sessions: usize,
    /// A session idle longer than this becomes eligible for reaping.
    pub idle_timeout: Duration,
    /// How often the reaper sweeps the store.
    pub sweep_interval: Duration,
    /// Fixed membership of the device pool, partitioned across sessions.
    pub devices: Vec<DeviceId>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            devices: vec![DeviceId::new("cuda:0")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let config = CoreConfig::default();
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.devices.len(), 1);
    }
}
