//! Topic name and filter validation, MQTT 3.1.1 §4.7.

use crate::error::{MqttError, Result};

const MAX_TOPIC_LEN: usize = 65_535;

/// Validates a topic name for publication: non-empty, no wildcards, no NUL.
///
/// # Errors
///
/// Returns `InvalidTopicName` describing the violation.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(MqttError::InvalidTopicName("empty topic".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(MqttError::InvalidTopicName(format!(
            "topic exceeds {MAX_TOPIC_LEN} bytes"
        )));
    }
    if topic.contains(['+', '#']) {
        return Err(MqttError::InvalidTopicName(format!(
            "wildcard in topic name: {topic:?}"
        )));
    }
    if topic.contains('\0') {
        return Err(MqttError::InvalidTopicName("NUL in topic".to_string()));
    }
    Ok(())
}

/// Validates a subscription topic filter: `+` must occupy a whole level, `#`
/// must occupy the final level.
///
/// # Errors
///
/// Returns `InvalidTopicFilter` describing the violation.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(MqttError::InvalidTopicFilter("empty filter".to_string()));
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(MqttError::InvalidTopicFilter(format!(
            "filter exceeds {MAX_TOPIC_LEN} bytes"
        )));
    }
    if filter.contains('\0') {
        return Err(MqttError::InvalidTopicFilter("NUL in filter".to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" || i != levels.len() - 1 {
                return Err(MqttError::InvalidTopicFilter(format!(
                    "'#' must be the final whole level: {filter:?}"
                )));
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(MqttError::InvalidTopicFilter(format!(
                "'+' must occupy a whole level: {filter:?}"
            )));
        }
    }
    Ok(())
}
