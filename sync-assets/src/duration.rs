//! Human-friendly durations for flags and the config file: `30`, `30s`, `500ms`, `2m`.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{raw}' (expected e.g. 30, 30s, 500ms, 2m)"))?;
    let duration = match unit.trim() {
        "" | "s" | "sec" | "secs" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" | "min" | "mins" => Duration::from_secs(value.saturating_mul(60)),
        other => return Err(format!("unknown duration unit '{other}' in '{raw}'")),
    };
    if duration.is_zero() {
        return Err(format!("duration '{raw}' must be greater than zero"));
    }
    Ok(duration)
}

/// `deserialize_with` helper for optional duration strings or plain second counts.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Seconds(secs)) => parse_duration(&secs.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Raw::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
