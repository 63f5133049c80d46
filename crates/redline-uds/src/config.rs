//! Session configuration

use serde::{Deserialize, Serialize};

/// Configuration for a `DiagnosticSession`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Request address of the target ECU
    #[serde(default = "default_target_id")]
    pub target_id: u32,
    /// Security level required before programming session entry
    #[serde(default = "default_flash_level")]
    pub flash_level: u8,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub security: SecuritySessionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_id: default_target_id(),
            flash_level: default_flash_level(),
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            keepalive: KeepaliveConfig::default(),
            security: SecuritySessionConfig::default(),
        }
    }
}

fn default_target_id() -> u32 {
    0x7E0
}

fn default_flash_level() -> u8 {
    0x05
}

/// Bounded-wait timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-exchange response timeout (typical 1-5 s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Extended deadline while the ECU reports ResponsePending (0x78)
    #[serde(default = "default_pending_timeout")]
    pub response_pending_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            response_pending_timeout_ms: default_pending_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_pending_timeout() -> u64 {
    30000
}

/// Retry policy for retryable NRCs and idempotent read timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts, doubled each retry
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    200
}

/// Tester-present keepalive during non-default sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_keepalive_interval")]
    pub interval_ms: u64,
    /// Send `[0x3E, 0x80]` instead of waiting for the positive response.
    /// Left off by default so keepalive failures are observable.
    #[serde(default)]
    pub suppress_response: bool,
    /// Consecutive failures before the session is declared disconnected
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_ms: default_keepalive_interval(),
            suppress_response: false,
            max_failures: default_max_failures(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval() -> u64 {
    2000
}

fn default_max_failures() -> u32 {
    3
}

/// Key-rejection lockout emulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySessionConfig {
    /// Consecutive key rejections before the cooldown engages
    #[serde(default = "default_max_key_attempts")]
    pub max_key_attempts: u32,
    /// Cooldown after lockout, during which seed/key attempts are
    /// rejected locally without sending a frame
    #[serde(default = "default_cooldown")]
    pub lockout_cooldown_ms: u64,
}

impl Default for SecuritySessionConfig {
    fn default() -> Self {
        Self {
            max_key_attempts: default_max_key_attempts(),
            lockout_cooldown_ms: default_cooldown(),
        }
    }
}

fn default_max_key_attempts() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    10000
}
