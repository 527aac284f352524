use crate::constants::SECURE_TOPIC_SUFFIX;
use crate::error::IngestError;

/// Parsed secure telemetry topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub namespace: &'a str,
    pub device_id: &'a str,
}

/// Parse a topic of the form `<namespace>/<device_id>/secure`
///
/// The device segment is returned as-is; checking it against the key store is
/// the caller's job.
///
/// # Examples
/// ```
/// use dhtlink_lib::topic::parse_topic;
///
/// let parsed = parse_topic("esp32/ESP32_0123456789AB/secure").unwrap();
/// assert_eq!(parsed.namespace, "esp32");
/// assert_eq!(parsed.device_id, "ESP32_0123456789AB");
/// ```
pub fn parse_topic(topic: &str) -> Result<ParsedTopic<'_>, IngestError> {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts.as_slice() {
        [namespace, device_id, suffix]
            if *suffix == SECURE_TOPIC_SUFFIX && !namespace.is_empty() && !device_id.is_empty() =>
        {
            Ok(ParsedTopic {
                namespace: *namespace,
                device_id: *device_id,
            })
        }
        _ => Err(IngestError::InvalidTopic(topic.to_string())),
    }
}

/// Subscription filter matching every device under `namespace`
pub fn subscription_filter(namespace: &str) -> String {
    format!("{}/+/{}", namespace, SECURE_TOPIC_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_topic() {
        let parsed = parse_topic("esp32/ESP32_A4CF12B3C5D6/secure").unwrap();
        assert_eq!(parsed.namespace, "esp32");
        assert_eq!(parsed.device_id, "ESP32_A4CF12B3C5D6");
    }

    #[test]
    fn test_parse_invalid_topics() {
        for topic in [
            "esp32/ESP32_A4CF12B3C5D6",
            "esp32/ESP32_A4CF12B3C5D6/plain",
            "esp32//secure",
            "/ESP32_A4CF12B3C5D6/secure",
            "esp32/ESP32_A4CF12B3C5D6/secure/extra",
            "",
        ] {
            assert!(
                matches!(parse_topic(topic), Err(IngestError::InvalidTopic(_))),
                "topic '{}' should be rejected",
                topic
            );
        }
    }

    #[test]
    fn test_subscription_filter() {
        assert_eq!(subscription_filter("esp32"), "esp32/+/secure");
    }
}
