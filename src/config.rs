//! Stream session configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{StreamError, StreamResult};
use crate::event::{FieldSet, TradeField};
use crate::session::SubscriptionMode;

/// Default auto-close delay for listeners created without an explicit timeout.
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_secs(60);

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Auto-close delay for default listeners; 0 disables auto-close.
    pub default_listener_timeout_ms: u64,
    /// Item name prefix; the subscribed item is `{prefix}:{account_id}`.
    pub item_prefix: String,
    pub subscription_mode: SubscriptionMode,
    /// Fields requested from the push server.
    pub fields: Vec<TradeField>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_listener_timeout_ms: u64::try_from(DEFAULT_LISTENER_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            item_prefix: "TRADE".to_string(),
            subscription_mode: SubscriptionMode::Distinct,
            fields: TradeField::ALL.to_vec(),
        }
    }
}

impl StreamConfig {
    /// Parses and validates a JSON configuration. Missing keys take defaults.
    pub fn from_json_str(raw: &str) -> StreamResult<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| StreamError::config(format!("invalid stream config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects an empty item prefix or field list.
    pub fn validate(&self) -> StreamResult<()> {
        if self.item_prefix.trim().is_empty() {
            return Err(StreamError::config("item_prefix cannot be empty"));
        }
        if self.fields.is_empty() {
            return Err(StreamError::config("at least one field must be subscribed"));
        }
        Ok(())
    }

    /// Timeout applied by `add_listener_default`; `None` when disabled.
    #[must_use]
    pub fn default_listener_timeout(&self) -> Option<Duration> {
        (self.default_listener_timeout_ms > 0)
            .then(|| Duration::from_millis(self.default_listener_timeout_ms))
    }

    /// Subscription item for an account.
    #[must_use]
    pub fn item_for(&self, account_id: &str) -> String {
        format!("{}:{}", self.item_prefix.trim(), account_id)
    }

    /// Subscribed fields as a set.
    #[must_use]
    pub fn field_set(&self) -> FieldSet {
        self.fields.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.default_listener_timeout(), Some(DEFAULT_LISTENER_TIMEOUT));
        assert_eq!(cfg.item_for("ABC123"), "TRADE:ABC123");
        assert_eq!(cfg.field_set(), FieldSet::all());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let raw = r#"{"default_listener_timeout_ms": 0, "fields": ["CONFIRMS"]}"#;
        let cfg = StreamConfig::from_json_str(raw).unwrap();
        assert_eq!(cfg.default_listener_timeout(), None);
        assert_eq!(cfg.field_set(), FieldSet::only(TradeField::Confirms));
        assert_eq!(cfg.item_prefix, "TRADE");
        assert_eq!(cfg.subscription_mode, SubscriptionMode::Distinct);
    }

    #[test]
    fn test_from_json_mode() {
        let cfg = StreamConfig::from_json_str(r#"{"subscription_mode": "MERGE"}"#).unwrap();
        assert_eq!(cfg.subscription_mode, SubscriptionMode::Merge);
    }

    #[test]
    fn test_validation_failures() {
        let err = StreamConfig::from_json_str(r#"{"fields": []}"#).unwrap_err();
        assert!(matches!(err, StreamError::Config { .. }));

        let err = StreamConfig::from_json_str(r#"{"item_prefix": "  "}"#).unwrap_err();
        assert!(matches!(err, StreamError::Config { .. }));

        let err = StreamConfig::from_json_str(r#"{"fields": ["NOPE"]}"#).unwrap_err();
        assert!(matches!(err, StreamError::Config { .. }));
    }
}
