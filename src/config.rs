use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the session, dispatch and pre-key components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// How far ahead of a receiving chain a single message may jump.
    pub max_skipped_messages: u32,
    /// Attempts per send, the first one included, before giving up on device repair.
    pub max_send_attempts: u32,
    /// Server-side one-time pre-key count below which a new batch is published.
    pub min_one_time_pre_keys: u32,
    /// Size of a freshly published one-time pre-key batch.
    pub max_one_time_pre_keys: u32,
    #[serde(with = "duration_secs")]
    pub signed_pre_key_rotation_interval: Duration,
    /// HKDF info used by the X3DH agreement.
    pub protocol_info: Vec<u8>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_skipped_messages: 2000,
            max_send_attempts: 3,
            min_one_time_pre_keys: 10,
            max_one_time_pre_keys: 100,
            signed_pre_key_rotation_interval: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
            protocol_info: b"Herald-X3DH".to_vec(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"max_send_attempts": 5, "signed_pre_key_rotation_interval": 60}"#)
                .unwrap();

        assert_eq!(config.max_send_attempts, 5);
        assert_eq!(config.signed_pre_key_rotation_interval, Duration::from_secs(60));
        assert_eq!(config.max_skipped_messages, 2000);
        assert_eq!(config.protocol_info, b"Herald-X3DH".to_vec());
    }
}
