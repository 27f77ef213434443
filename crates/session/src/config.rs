//! Client configuration.
//!
//! Every timing and sizing knob of the session client lives in [`SessionConfig`].
//! Values can be built in code (`SessionConfig::new(url).with_*`) or loaded from
//! `SESSION_*` environment variables with [`SessionConfig::from_env`].

use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds every tunable of the session client.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Endpoint of the agent backend, e.g. `wss://agent.example.com/live`.
    pub url: String,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_multiplier: f64,
    pub reconnect_max_delay: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_check_interval: Duration,
    /// Ceiling on transport-buffered bytes above which ordinary sends are dropped.
    pub max_buffered_bytes: usize,
    pub start_retry_delay: Duration,
    /// Total number of start sends per handshake, the first one included.
    pub max_start_attempts: u32,
    /// Capacity of the rolling buffered-bytes history.
    pub health_samples: usize,
    pub health_summary_interval: Duration,
    /// Re-queue the last start request when the connection drops mid-session.
    pub resume_session_on_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/live".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_multiplier: 2.0,
            reconnect_max_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            heartbeat_check_interval: Duration::from_secs(5),
            max_buffered_bytes: 1024 * 1024,
            start_retry_delay: Duration::from_secs(3),
            max_start_attempts: 3,
            health_samples: 64,
            health_summary_interval: Duration::from_secs(60),
            resume_session_on_reconnect: true,
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(
        mut self,
        max_attempts: u32,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self.reconnect_multiplier = multiplier;
        self.reconnect_max_delay = max_delay;
        self
    }

    pub fn with_heartbeat(
        mut self,
        interval: Duration,
        timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self.heartbeat_check_interval = check_interval;
        self
    }

    pub fn with_max_buffered_bytes(mut self, limit: usize) -> Self {
        self.max_buffered_bytes = limit;
        self
    }

    pub fn with_start_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.start_retry_delay = delay;
        self.max_start_attempts = max_attempts;
        self
    }

    pub fn with_resume_session_on_reconnect(mut self, resume: bool) -> Self {
        self.resume_session_on_reconnect = resume;
        self
    }

    /// Clamps every value into a range the client can run with: intervals are
    /// at least 1ms, the multiplier at least 1.0, attempt counts at least 1.
    pub fn normalized(mut self) -> Self {
        const FLOOR: Duration = Duration::from_millis(1);
        self.connect_timeout = self.connect_timeout.max(FLOOR);
        self.reconnect_base_delay = self.reconnect_base_delay.max(FLOOR);
        self.reconnect_max_delay = self.reconnect_max_delay.max(self.reconnect_base_delay);
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            self.reconnect_multiplier = 1.0;
        }
        self.heartbeat_interval = self.heartbeat_interval.max(FLOOR);
        self.heartbeat_timeout = self.heartbeat_timeout.max(FLOOR);
        self.heartbeat_check_interval = self.heartbeat_check_interval.max(FLOOR);
        self.start_retry_delay = self.start_retry_delay.max(FLOOR);
        self.max_start_attempts = self.max_start_attempts.max(1);
        self.health_samples = self.health_samples.max(1);
        self.health_summary_interval = self.health_summary_interval.max(FLOOR);
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `base * multiplier^(attempt - 1)`, never above `reconnect_max_delay`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs =
            self.reconnect_base_delay.as_secs_f64() * self.reconnect_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.reconnect_max_delay)
            .min(self.reconnect_max_delay)
    }

    /// Loads configuration from environment variables.
    ///
    /// `SESSION_URL` is required. Durations are read in milliseconds from the
    /// `*_MS` variables; anything unset keeps its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let url = std::env::var("SESSION_URL")
            .map_err(|_| ConfigError::MissingVar("SESSION_URL".to_string()))?;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "SESSION_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", url),
            ));
        }

        let defaults = Self::default();
        let config = Self {
            url,
            connect_timeout: env_millis("SESSION_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            max_reconnect_attempts: env_parse(
                "SESSION_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            reconnect_base_delay: env_millis(
                "SESSION_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay,
            )?,
            reconnect_multiplier: env_parse(
                "SESSION_RECONNECT_MULTIPLIER",
                defaults.reconnect_multiplier,
            )?,
            reconnect_max_delay: env_millis(
                "SESSION_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay,
            )?,
            heartbeat_interval: env_millis(
                "SESSION_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: env_millis(
                "SESSION_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout,
            )?,
            heartbeat_check_interval: env_millis(
                "SESSION_HEARTBEAT_CHECK_INTERVAL_MS",
                defaults.heartbeat_check_interval,
            )?,
            max_buffered_bytes: env_parse(
                "SESSION_MAX_BUFFERED_BYTES",
                defaults.max_buffered_bytes,
            )?,
            start_retry_delay: env_millis(
                "SESSION_START_RETRY_DELAY_MS",
                defaults.start_retry_delay,
            )?,
            max_start_attempts: env_parse(
                "SESSION_MAX_START_ATTEMPTS",
                defaults.max_start_attempts,
            )?,
            health_samples: env_parse("SESSION_HEALTH_SAMPLES", defaults.health_samples)?,
            health_summary_interval: env_millis(
                "SESSION_HEALTH_SUMMARY_INTERVAL_MS",
                defaults.health_summary_interval,
            )?,
            resume_session_on_reconnect: env_parse(
                "SESSION_RESUME_ON_RECONNECT",
                defaults.resume_session_on_reconnect,
            )?,
        };
        Ok(config.normalized())
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "SESSION_URL",
        "SESSION_CONNECT_TIMEOUT_MS",
        "SESSION_MAX_RECONNECT_ATTEMPTS",
        "SESSION_RECONNECT_BASE_DELAY_MS",
        "SESSION_RECONNECT_MULTIPLIER",
        "SESSION_RECONNECT_MAX_DELAY_MS",
        "SESSION_HEARTBEAT_INTERVAL_MS",
        "SESSION_HEARTBEAT_TIMEOUT_MS",
        "SESSION_HEARTBEAT_CHECK_INTERVAL_MS",
        "SESSION_MAX_BUFFERED_BYTES",
        "SESSION_START_RETRY_DELAY_MS",
        "SESSION_MAX_START_ATTEMPTS",
        "SESSION_HEALTH_SAMPLES",
        "SESSION_HEALTH_SUMMARY_INTERVAL_MS",
        "SESSION_RESUME_ON_RECONNECT",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_URL", "wss://agent.test/live");
        }

        let config = SessionConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.url, "wss://agent.test/live");
        assert_eq!(
            config,
            SessionConfig::new("wss://agent.test/live").normalized()
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_URL", "ws://localhost:9000/live");
            env::set_var("SESSION_CONNECT_TIMEOUT_MS", "2500");
            env::set_var("SESSION_MAX_RECONNECT_ATTEMPTS", "8");
            env::set_var("SESSION_RECONNECT_MULTIPLIER", "1.5");
            env::set_var("SESSION_MAX_BUFFERED_BYTES", "4096");
            env::set_var("SESSION_MAX_START_ATTEMPTS", "4");
            env::set_var("SESSION_RESUME_ON_RECONNECT", "false");
        }

        let config = SessionConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_reconnect_attempts, 8);
        assert_eq!(config.reconnect_multiplier, 1.5);
        assert_eq!(config.max_buffered_bytes, 4096);
        assert_eq!(config.max_start_attempts, 4);
        assert!(!config.resume_session_on_reconnect);
    }

    #[test]
    #[serial]
    fn test_config_missing_url() {
        clear_env_vars();

        let err = SessionConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "SESSION_URL"),
            _ => panic!("Expected MissingVar for SESSION_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_websocket_url() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_URL", "https://agent.test/live");
        }

        let err = SessionConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_URL"),
            _ => panic!("Expected InvalidValue for SESSION_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_number() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_URL", "wss://agent.test/live");
            env::set_var("SESSION_HEARTBEAT_TIMEOUT_MS", "soon");
        }

        let err = SessionConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_HEARTBEAT_TIMEOUT_MS"),
            _ => panic!("Expected InvalidValue for SESSION_HEARTBEAT_TIMEOUT_MS"),
        }
    }

    #[test]
    fn test_reconnect_delay_grows_and_caps() {
        let config = SessionConfig::new("ws://x").with_reconnect(
            10,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(5),
        );

        let delays: Vec<Duration> = (1..=10).map(|n| config.reconnect_delay(n)).collect();

        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[2], Duration::from_secs(2));
        assert_eq!(delays[3], Duration::from_secs(4));
        for window in delays.windows(2) {
            assert!(window[0] <= window[1]);
        }
        for delay in &delays {
            assert!(*delay <= Duration::from_secs(5));
        }
        assert_eq!(delays[9], Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_delay_survives_huge_attempts() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_delay(u32::MAX), config.reconnect_max_delay);
        assert_eq!(config.reconnect_delay(0), config.reconnect_base_delay);
    }

    #[test]
    fn test_normalized_clamps_degenerate_values() {
        let config = SessionConfig::new("ws://x")
            .with_reconnect(3, Duration::ZERO, 0.5, Duration::ZERO)
            .with_start_retry(Duration::ZERO, 0)
            .normalized();

        assert_eq!(config.reconnect_multiplier, 1.0);
        assert!(config.reconnect_base_delay > Duration::ZERO);
        assert!(config.reconnect_max_delay >= config.reconnect_base_delay);
        assert_eq!(config.max_start_attempts, 1);
        assert!(config.start_retry_delay > Duration::ZERO);
    }
}
