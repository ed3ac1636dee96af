//! Serde adapters shared by the result types

/// Serialize a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Timed {
        #[serde(with = "super::duration_secs")]
        elapsed: Duration,
    }

    #[test]
    fn test_duration_as_seconds() {
        let json = serde_json::to_string(&Timed {
            elapsed: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json, r#"{"elapsed":1.5}"#);

        let back: Timed = serde_json::from_str(&json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1500));
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(serde_json::from_str::<Timed>(r#"{"elapsed":-1.0}"#).is_err());
    }
}
