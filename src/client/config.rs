//! Reconnecting client settings and retry bookkeeping

use std::time::Duration;

use crate::common::config::{ClientSettings, ProtocolSettings};
use crate::common::error::{Error, Result};
use crate::common::types::{Identity, ProtocolVersion};
use crate::protocol::MessageCodec;

/// Retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Unlimited,
    Limited(u32),
}

impl RetryLimit {
    /// Config form: `-1` is unlimited, anything else below zero is rejected
    pub fn from_config(value: i32) -> Result<Self> {
        match value {
            -1 => Ok(Self::Unlimited),
            n if n >= 0 => Ok(Self::Limited(n as u32)),
            n => Err(Error::config(format!("max_retries must be -1 or >= 0, got {}", n))),
        }
    }

    pub fn allows(self, retry_count: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => retry_count < max,
        }
    }
}

/// Reconnecting client configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// `ws://host:port/{prefix}/{device}`
    pub url: String,
    pub version: ProtocolVersion,
    /// Names the peer in logs and in handler contexts
    pub device_id: String,
    pub max_retries: RetryLimit,
    pub backoff: Duration,
    pub call_timeout: Duration,
    pub codec: MessageCodec,
}

impl ReconnectConfig {
    pub fn new(url: impl Into<String>, version: ProtocolVersion) -> Self {
        let url = url.into();
        let device_id = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            url,
            version,
            device_id,
            max_retries: RetryLimit::Limited(2),
            backoff: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(60),
            codec: MessageCodec::default(),
        }
    }

    pub fn from_settings(
        url: impl Into<String>,
        version: ProtocolVersion,
        client: &ClientSettings,
        protocol: &ProtocolSettings,
    ) -> Result<Self> {
        Ok(Self::new(url, version)
            .with_max_retries(RetryLimit::from_config(client.max_retries)?)
            .with_backoff(Duration::from_millis(client.backoff_ms))
            .with_call_timeout(protocol.call_timeout()))
    }

    pub fn with_max_retries(mut self, max_retries: RetryLimit) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(None, self.device_id.clone(), self.version)
    }
}

/// Retry counter for one client instance. The count restarts from zero
/// on every successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    retry_count: u32,
    max_retries: RetryLimit,
    backoff: Duration,
}

impl ReconnectState {
    pub fn new(max_retries: RetryLimit, backoff: Duration) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            backoff,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.max_retries.allows(self.retry_count)
    }

    /// Consume one retry, returning its 1-based number
    pub fn next_retry(&mut self) -> Option<u32> {
        if !self.can_retry() {
            return None;
        }
        self.retry_count += 1;
        Some(self.retry_count)
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> RetryLimit {
        self.max_retries
    }

    /// Fixed delay before every retry
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_limit_from_config() {
        assert_eq!(RetryLimit::from_config(-1).unwrap(), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from_config(0).unwrap(), RetryLimit::Limited(0));
        assert_eq!(RetryLimit::from_config(2).unwrap(), RetryLimit::Limited(2));
        assert!(RetryLimit::from_config(-2).is_err());
    }

    #[test]
    fn test_bounded_budget() {
        let mut state = ReconnectState::new(RetryLimit::Limited(2), Duration::from_millis(1000));
        assert_eq!(state.next_retry(), Some(1));
        assert_eq!(state.next_retry(), Some(2));
        assert_eq!(state.next_retry(), None);
        assert_eq!(state.retry_count(), 2);
        assert_eq!(state.backoff(), Duration::from_millis(1000));

        state.reset();
        assert!(state.can_retry());
        assert_eq!(state.next_retry(), Some(1));
    }

    #[test]
    fn test_unlimited_budget() {
        let mut state = ReconnectState::new(RetryLimit::Unlimited, Duration::from_millis(10));
        for expected in 1..=1000 {
            assert_eq!(state.next_retry(), Some(expected));
        }
    }

    #[test]
    fn test_config_derives_device_label() {
        let config = ReconnectConfig::new("ws://127.0.0.1:9000/ocpp/CP042", ProtocolVersion::V16);
        assert_eq!(config.device_id, "CP042");
        assert_eq!(config.identity().version, ProtocolVersion::V16);

        let settings = ClientSettings {
            max_retries: -1,
            backoff_ms: 250,
        };
        let config = ReconnectConfig::from_settings("ws://h/ocpp/X/", ProtocolVersion::V201, &settings, &ProtocolSettings::default())
            .unwrap();
        assert_eq!(config.device_id, "X");
        assert_eq!(config.max_retries, RetryLimit::Unlimited);
        assert_eq!(config.backoff, Duration::from_millis(250));
    }
}
