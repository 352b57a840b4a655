//! Encoding of the per-job state column.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Payload;

/// Everything about a pending job that is not a queryable column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub retry_count: i32,
    pub retry_delay_ms: i64,
    pub timeout_at: i64,
    pub payload: Payload,
}

/// Encodes and decodes [`JobState`] for storage.
pub trait JobCodec: Send + Sync {
    fn encode(&self, state: &JobState) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<JobState>;
}

/// JSON codec. The default for every scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JobCodec for JsonCodec {
    fn encode(&self, state: &JobState) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(state)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<JobState> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn json_codec_preserves_state() {
        let state = JobState {
            retry_count: 2,
            retry_delay_ms: 500,
            timeout_at: 1_700_000_000_000,
            payload: json!({"checked": true, "tags": ["a", "b"]}),
        };
        let bytes = JsonCodec.encode(&state).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), state);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = JsonCodec.decode(b"#Intent;end").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn missing_fields_fail_to_decode() {
        let err = JsonCodec.decode(br#"{"retry_count": 1}"#).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
