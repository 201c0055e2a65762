use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize_duration_secs<S: Serializer>(that: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(that.as_secs())
}

pub fn deserialize_duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

pub fn serialize_duration_millis<S: Serializer>(that: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(that.as_millis() as u64)
}

pub fn deserialize_duration_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let millis: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// JSON has no NaN, so an unavailable prediction is written as `null`.
pub fn serialize_nan_as_none<S: Serializer>(that: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if that.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_some(that)
    }
}

pub fn deserialize_none_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value: Option<f64> = Deserialize::deserialize(deserializer)?;
    Ok(value.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_test::{assert_de_tokens, assert_ser_tokens, Token};

    #[derive(Debug, Serialize, Deserialize)]
    struct Latency {
        #[serde(serialize_with = "serialize_nan_as_none", deserialize_with = "deserialize_none_as_nan")]
        p90: f64,
    }

    impl PartialEq for Latency {
        fn eq(&self, other: &Self) -> bool {
            (self.p90.is_nan() && other.p90.is_nan()) || self.p90 == other.p90
        }
    }

    #[test]
    fn test_unavailable_latency_serde_tokens() {
        let unavailable = Latency { p90: f64::NAN };
        assert_ser_tokens(
            &unavailable,
            &[
                Token::Struct { name: "Latency", len: 1 },
                Token::Str("p90"),
                Token::None,
                Token::StructEnd,
            ],
        );
        assert_de_tokens(
            &unavailable,
            &[
                Token::Struct { name: "Latency", len: 1 },
                Token::Str("p90"),
                Token::None,
                Token::StructEnd,
            ],
        );

        let observed = Latency { p90: 0.25 };
        assert_ser_tokens(
            &observed,
            &[
                Token::Struct { name: "Latency", len: 1 },
                Token::Str("p90"),
                Token::Some,
                Token::F64(0.25),
                Token::StructEnd,
            ],
        );
    }
}
