use crate::{Error, Result};
use core::time::Duration;

/// Environment variable holding the number of workers.
pub const POOL_SIZE_ENV: &str = "FERROPOOL_POOL_SIZE";

/// Environment variable holding the graceful shutdown timeout, in seconds.
pub const SHUTDOWN_TIMEOUT_ENV: &str = "FERROPOOL_SHUTDOWN_TIMEOUT_SECS";

/// Default upper bound for each phase of [`Pool::shutdown`].
///
/// [`Pool::shutdown`]: crate::Pool::shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Construction parameters for a [`Pool`](crate::Pool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers. Also the maximum number of tasks executing at once.
    pub pool_size: usize,
    /// Upper bound for each phase of a graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl PoolConfig {
    /// Creates a configuration with `pool_size` workers and the default
    /// shutdown timeout.
    pub const fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds a configuration from `FERROPOOL_POOL_SIZE` and
    /// `FERROPOOL_SHUTDOWN_TIMEOUT_SECS`.
    ///
    /// Unset variables fall back to one worker per logical CPU and
    /// [`DEFAULT_SHUTDOWN_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if a variable is set but does
    /// not parse, or if the resulting configuration fails [`validate`].
    ///
    /// [`validate`]: Self::validate
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pool_size = match lookup(POOL_SIZE_ENV) {
            Some(raw) => parse_var::<usize>(POOL_SIZE_ENV, &raw)?,
            None => num_cpus::get(),
        };
        let shutdown_timeout = match lookup(SHUTDOWN_TIMEOUT_ENV) {
            Some(raw) => Duration::from_secs(parse_var::<u64>(SHUTDOWN_TIMEOUT_ENV, &raw)?),
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        let config = Self {
            pool_size,
            shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can be used to build a pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `pool_size` is 0.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "pool size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

fn parse_var<T: core::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::InvalidConfiguration {
            reason: format!("{key}={raw:?}: {e}"),
        })
}
