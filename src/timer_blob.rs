//! Serialized form of the timer registry and its load-time migration.
//!
//! Current layout: `{"version": 1, "timers": {"<issue id>": TimerRecord}}`.
//! Blobs without a `version` field are the legacy layout, the bare id to
//! record object, where numbers may be floats and fields may be missing.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

use crate::timer::{TimerMap, TimerRecord};

pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("timer blob is not valid JSON: {0}")]
    Malformed(String),
    #[error("timer blob must be a JSON object")]
    NotAnObject,
    #[error("timer blob version {0} is newer than supported version {SCHEMA_VERSION}")]
    UnsupportedVersion(u64),
}

/// Result of decoding a stored blob.
#[derive(Debug, Default)]
pub struct DecodedBlob {
    pub timers: TimerMap,
    pub legacy: bool,
    /// Records whose stored shape broke an invariant and were normalized.
    pub repaired: usize,
    /// Entries that could not be interpreted at all.
    pub dropped: usize,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u64,
    timers: &'a TimerMap,
}

/// Lenient per-record shape accepted from any version.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawRecord {
    active: bool,
    start: Option<f64>,
    time: Option<f64>,
    pinned: bool,
    remembered: bool,
}

pub fn encode(timers: &TimerMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeRef {
        version: SCHEMA_VERSION,
        timers,
    })
}

/// Decodes and normalizes a stored blob against the current time.
pub fn decode(blob: &str, now: i64) -> Result<DecodedBlob, BlobError> {
    let value: Value =
        serde_json::from_str(blob).map_err(|err| BlobError::Malformed(err.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(BlobError::NotAnObject);
    };

    let (entries, legacy) = match root.get("version") {
        Some(version) => {
            let version = version.as_u64().unwrap_or(u64::MAX);
            if version > SCHEMA_VERSION {
                return Err(BlobError::UnsupportedVersion(version));
            }
            let entries = match root.remove("timers") {
                Some(Value::Object(entries)) => entries,
                _ => JsonMap::new(),
            };
            (entries, false)
        }
        None => (root, true),
    };

    let mut decoded = DecodedBlob {
        timers: BTreeMap::new(),
        legacy,
        repaired: 0,
        dropped: 0,
    };

    for (key, raw_value) in entries {
        let Ok(issue_id) = key.trim().parse::<u64>() else {
            warn!("Dropping timer with non-numeric issue id {:?}", key);
            decoded.dropped += 1;
            continue;
        };
        let raw: RawRecord = match serde_json::from_value(raw_value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Dropping unreadable timer for issue #{}: {}", issue_id, err);
                decoded.dropped += 1;
                continue;
            }
        };
        let (record, repaired) = normalize(raw, now);
        if repaired {
            decoded.repaired += 1;
        }
        decoded.timers.insert(issue_id, record);
    }

    Ok(decoded)
}

/// Restores `start.is_some() == active`, a non-negative integral `time` and a
/// start that is not in the future.
fn normalize(raw: RawRecord, now: i64) -> (TimerRecord, bool) {
    let mut repaired = false;

    let time = match raw.time {
        None => 0,
        Some(value) if value.is_finite() && value >= 0.0 => {
            if value.fract() != 0.0 {
                repaired = true;
            }
            value.round() as u64
        }
        Some(_) => {
            repaired = true;
            0
        }
    };

    let start = match raw.start {
        Some(value) if value.is_finite() => Some(value.round() as i64),
        Some(_) => {
            repaired = true;
            None
        }
        None => None,
    };

    let (active, start) = match (raw.active, start) {
        (true, Some(started)) if started > now => {
            repaired = true;
            (true, Some(now))
        }
        (true, Some(started)) => (true, Some(started)),
        (true, None) => {
            repaired = true;
            (false, None)
        }
        (false, Some(_)) => {
            repaired = true;
            (false, None)
        }
        (false, None) => (false, None),
    };

    let record = TimerRecord {
        active,
        start,
        time,
        pinned: raw.pinned,
        remembered: raw.remembered,
    };
    (record, repaired)
}
