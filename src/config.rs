//! Configuration resolution.
//!
//! Every tunable resolves with a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (CLI flag), highest priority
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value, lowest priority
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SLURMLINK_POLL_INTERVAL` | 15s | Node discovery poll interval in seconds |
//! | `SLURMLINK_BASE_DELAY_MS` | 1000ms | First reconnect delay in milliseconds |
//! | `SLURMLINK_KEEPALIVE` | 30s | Transport keepalive interval in seconds |
//! | `SLURMLINK_CONNECT_TIMEOUT` | 30s | SSH handshake timeout in seconds |

use std::env;

/// Default node discovery poll interval in seconds
pub(crate) const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default first reconnect delay in milliseconds; later attempts double it
pub(crate) const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default transport keepalive interval in seconds
pub(crate) const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Default SSH handshake timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Environment variable name for the discovery poll interval
pub(crate) const POLL_INTERVAL_ENV_VAR: &str = "SLURMLINK_POLL_INTERVAL";

/// Environment variable name for the first reconnect delay
pub(crate) const BASE_DELAY_MS_ENV_VAR: &str = "SLURMLINK_BASE_DELAY_MS";

/// Environment variable name for the keepalive interval
pub(crate) const KEEPALIVE_ENV_VAR: &str = "SLURMLINK_KEEPALIVE";

/// Environment variable name for the handshake timeout
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SLURMLINK_CONNECT_TIMEOUT";

/// Resolve the discovery poll interval with priority: parameter -> env var -> default
pub fn resolve_poll_interval(interval_param: Option<u64>) -> u64 {
    if let Some(interval) = interval_param {
        return interval;
    }

    if let Ok(env_interval) = env::var(POLL_INTERVAL_ENV_VAR)
        && let Ok(interval) = env_interval.parse::<u64>()
    {
        return interval;
    }

    DEFAULT_POLL_INTERVAL_SECS
}

/// Resolve the first reconnect delay with priority: parameter -> env var -> default
pub fn resolve_base_delay_ms(delay_param: Option<u64>) -> u64 {
    if let Some(delay) = delay_param {
        return delay;
    }

    if let Ok(env_delay) = env::var(BASE_DELAY_MS_ENV_VAR)
        && let Ok(delay) = env_delay.parse::<u64>()
    {
        return delay;
    }

    DEFAULT_BASE_DELAY_MS
}

/// Resolve the keepalive interval with priority: env var -> default
pub fn resolve_keepalive_secs() -> u64 {
    if let Ok(env_keepalive) = env::var(KEEPALIVE_ENV_VAR)
        && let Ok(keepalive) = env_keepalive.parse::<u64>()
    {
        return keepalive;
    }

    DEFAULT_KEEPALIVE_SECS
}

/// Resolve the handshake timeout with priority: env var -> default
pub fn resolve_connect_timeout_secs() -> u64 {
    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_CONNECT_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Use a mutex to serialize env var tests to avoid race conditions
    static ENV_TEST_MUTEX: StdMutex<()> = StdMutex::new(());

    /// Helper to set an environment variable safely within tests.
    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// Helper to remove an environment variable safely within tests.
    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    mod poll_interval {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_poll_interval(Some(60)), 60);
        }

        #[test]
        fn test_param_takes_priority_over_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(POLL_INTERVAL_ENV_VAR, "120");
            }
            let result = resolve_poll_interval(Some(45));
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(POLL_INTERVAL_ENV_VAR);
            }
            assert_eq!(result, 45);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(POLL_INTERVAL_ENV_VAR, "90");
            }
            let result = resolve_poll_interval(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(POLL_INTERVAL_ENV_VAR);
            }
            assert_eq!(result, 90);
        }

        #[test]
        fn test_uses_default_when_no_param_or_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(POLL_INTERVAL_ENV_VAR);
            }
            assert_eq!(resolve_poll_interval(None), DEFAULT_POLL_INTERVAL_SECS);
        }

        #[test]
        fn test_ignores_invalid_env_var() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(POLL_INTERVAL_ENV_VAR, "soon");
            }
            let result = resolve_poll_interval(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(POLL_INTERVAL_ENV_VAR);
            }
            assert_eq!(result, DEFAULT_POLL_INTERVAL_SECS);
        }
    }

    mod base_delay {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_base_delay_ms(Some(250)), 250);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(BASE_DELAY_MS_ENV_VAR, "3000");
            }
            let result = resolve_base_delay_ms(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(BASE_DELAY_MS_ENV_VAR);
            }
            assert_eq!(result, 3000);
        }

        #[test]
        fn test_uses_default_when_no_param_or_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(BASE_DELAY_MS_ENV_VAR);
            }
            assert_eq!(resolve_base_delay_ms(None), DEFAULT_BASE_DELAY_MS);
        }
    }

    mod keepalive {
        use super::*;

        #[test]
        fn test_uses_env_var_when_set() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(KEEPALIVE_ENV_VAR, "45");
            }
            let result = resolve_keepalive_secs();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(KEEPALIVE_ENV_VAR);
            }
            assert_eq!(result, 45);
        }

        #[test]
        fn test_uses_default_when_no_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(KEEPALIVE_ENV_VAR);
            }
            assert_eq!(resolve_keepalive_secs(), DEFAULT_KEEPALIVE_SECS);
        }
    }

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_uses_env_var_when_set() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(CONNECT_TIMEOUT_ENV_VAR, "10");
            }
            let result = resolve_connect_timeout_secs();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(CONNECT_TIMEOUT_ENV_VAR);
            }
            assert_eq!(result, 10);
        }

        #[test]
        fn test_uses_default_when_no_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(CONNECT_TIMEOUT_ENV_VAR);
            }
            assert_eq!(resolve_connect_timeout_secs(), DEFAULT_CONNECT_TIMEOUT_SECS);
        }
    }
}
