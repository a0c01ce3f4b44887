use serde::{Deserialize, Deserializer, de::Error};
use std::time::Duration;

/// Accepts humantime strings (`"300ms"`, `"1m 30s"`) or a bare number of milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
        Raw::Text(text) => humantime::parse_duration(&text).map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct TestStruct {
        #[serde(deserialize_with = "deserialize_duration")]
        wait: Duration,
    }

    #[test]
    fn test_deserialize_humantime_duration() {
        let json = r#"{"wait": "1m 30s"}"#;
        let result: TestStruct = serde_json::from_str(json).unwrap();

        assert_eq!(result.wait, Duration::from_secs(90));
    }

    #[test]
    fn test_deserialize_millis_duration() {
        let json = r#"{"wait": 250}"#;
        let result: TestStruct = serde_json::from_str(json).unwrap();

        assert_eq!(result.wait, Duration::from_millis(250));
    }

    #[test]
    fn test_deserialize_invalid_duration() {
        let json = r#"{"wait": "soon"}"#;
        assert!(serde_json::from_str::<TestStruct>(json).is_err());
    }
}
