//! Connection retries with optional power cycling

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// How hard to try before a target counts as unreachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Connection attempts per round
    pub attempts: u32,
    /// Timeout of a single attempt, in seconds
    pub attempt_timeout_secs: u64,
    /// Pause between attempts, in seconds
    pub retry_sleep_secs: u64,
    /// Power-cycle rounds after the first round failed
    pub power_cycles: u32,
    /// Time an outlet stays off during a power cycle, in seconds
    pub power_off_secs: u64,
    /// Time to wait for the target to boot after a power cycle, in seconds
    pub boot_wait_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            attempt_timeout_secs: 10,
            retry_sleep_secs: 5,
            power_cycles: 1,
            power_off_secs: 5,
            boot_wait_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Per-attempt timeout
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Pause between attempts
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_secs(self.retry_sleep_secs)
    }
}

/// Try to connect following `policy`
///
/// Each round makes up to `policy.attempts` calls to `attempt`. Before every
/// round but the first `power_cycle` is called; when it returns false (no
/// power device, or switching failed) no further rounds are made.
pub fn connect_with_retries<A, P, S>(
    target_name: &str,
    policy: &RetryPolicy,
    mut attempt: A,
    mut power_cycle: P,
    sleep: S,
) -> bool
where
    A: FnMut(Duration) -> crate::core::error::Result<()>,
    P: FnMut() -> bool,
    S: Fn(Duration),
{
    for round in 0..=policy.power_cycles {
        if round > 0 {
            info!(target_name, "power cycling before connection round {}", round + 1);
            if !power_cycle() {
                warn!(target_name, "power cycle not possible, giving up");
                return false;
            }
        }

        for nr in 1..=policy.attempts {
            match attempt(policy.attempt_timeout()) {
                Ok(()) => {
                    info!(target_name, "connected (attempt {})", nr);
                    return true;
                }
                Err(e) => {
                    warn!(target_name, "connection attempt {}/{} failed: {}", nr, policy.attempts, e);
                    if nr < policy.attempts {
                        sleep(policy.retry_sleep());
                    }
                }
            }
        }
    }
    false
}
