//! MQTT topic scheme.
//!
//! Pure, stateless builders and parsers, namespaced under the fixed root
//! prefix `edgebus/`, one sub-namespace per logical channel:
//!
//! ```text
//! edgebus/events/{userTopic}
//! edgebus/values/{userTopic}
//! edgebus/properties/{nodeId}
//! edgebus/states/{nodeId}
//! edgebus/statistics/{nodeId}
//! edgebus/requests/{calleeNodeId}/{callerNodeId}
//! edgebus/replies/{callerNodeId}/{calleeNodeId}
//! edgebus/nodes/offline/{roleType}/{nodeId}
//! edgebus/nodes/inspect
//! ```

/// Fixed root prefix of every edgebus topic.
pub const TOPIC_ROOT: &str = "edgebus";

/// Self-description broadcast topic.
pub const TOPIC_NODES_INSPECT: &str = "edgebus/nodes/inspect";

/// Wildcard over every node's retained offline marker.
pub const TOPIC_NODES_OFFLINE_ALL: &str = "edgebus/nodes/offline/#";

/// Wildcard over every event topic.
pub const TOPIC_EVENTS_ALL: &str = "edgebus/events/#";

/// Wildcard over every value topic.
pub const TOPIC_VALUES_ALL: &str = "edgebus/values/#";

/// Topic for events published under a user topic.
///
/// # Errors
///
/// Returns error if the segment is empty or starts with `/`.
pub fn events(user_topic: &str) -> Result<String, TopicError> {
    check_segment(user_topic)?;
    Ok(format!("{TOPIC_ROOT}/events/{user_topic}"))
}

/// Topic for values published under a user topic.
///
/// # Errors
///
/// Returns error if the segment is empty or starts with `/`.
pub fn values(user_topic: &str) -> Result<String, TopicError> {
    check_segment(user_topic)?;
    Ok(format!("{TOPIC_ROOT}/values/{user_topic}"))
}

/// Topic carrying a node's property document.
///
/// # Errors
///
/// Returns error if the segment is empty or starts with `/`.
pub fn properties(node_id: &str) -> Result<String, TopicError> {
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/properties/{node_id}"))
}

/// Topic carrying a node's state messages.
///
/// # Errors
///
/// Returns error if the segment is empty or starts with `/`.
pub fn states(node_id: &str) -> Result<String, TopicError> {
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/states/{node_id}"))
}

/// Topic carrying a node's self-statistics.
///
/// # Errors
///
/// Returns error if the segment is empty or starts with `/`.
pub fn statistics(node_id: &str) -> Result<String, TopicError> {
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/statistics/{node_id}"))
}

/// Concrete topic a caller publishes a request on.
///
/// # Errors
///
/// Returns error if either node id is empty or starts with `/`.
pub fn request_send(callee_node_id: &str, caller_node_id: &str) -> Result<String, TopicError> {
    check_segment(callee_node_id)?;
    check_segment(caller_node_id)?;
    Ok(format!(
        "{TOPIC_ROOT}/requests/{callee_node_id}/{caller_node_id}"
    ))
}

/// Subscription filter a server listens on: one wildcard level matches any
/// caller.
///
/// # Errors
///
/// Returns error if the node id is empty or starts with `/`.
pub fn request_listen(node_id: &str) -> Result<String, TopicError> {
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/requests/{node_id}/+"))
}

/// Concrete topic a server publishes a reply on.
///
/// # Errors
///
/// Returns error if either node id is empty or starts with `/`.
pub fn reply_send(caller_node_id: &str, callee_node_id: &str) -> Result<String, TopicError> {
    check_segment(caller_node_id)?;
    check_segment(callee_node_id)?;
    Ok(format!(
        "{TOPIC_ROOT}/replies/{caller_node_id}/{callee_node_id}"
    ))
}

/// Subscription filter a caller listens on for replies from any callee.
///
/// # Errors
///
/// Returns error if the node id is empty or starts with `/`.
pub fn reply_listen(node_id: &str) -> Result<String, TopicError> {
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/replies/{node_id}/+"))
}

/// Retained last-will topic marking a node offline.
///
/// # Errors
///
/// Returns error if either segment is empty or starts with `/`.
pub fn offline(role_type: &str, node_id: &str) -> Result<String, TopicError> {
    check_segment(role_type)?;
    check_segment(node_id)?;
    Ok(format!("{TOPIC_ROOT}/nodes/offline/{role_type}/{node_id}"))
}

/// Extract the caller node id from a concrete delivered request topic
/// (its last path segment).
#[must_use]
pub fn caller_from_request(topic: &str) -> Option<&str> {
    topic.rsplit('/').next().filter(|segment| !segment.is_empty())
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels),
/// used to dispatch broker deliveries to local subscriptions.
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn check_segment(segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment);
    }
    if segment.starts_with('/') {
        return Err(TopicError::LeadingSlash {
            segment: segment.to_string(),
        });
    }
    Ok(())
}

/// Errors raised by the topic builders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Topic segment must not be empty
    #[error("topic segment must not be empty")]
    EmptySegment,
    /// Topic segment must not start with '/'
    #[error("topic segment must not start with '/': {segment:?}")]
    LeadingSlash {
        /// The offending segment
        segment: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_surface() {
        assert_eq!(events("door/main").unwrap(), "edgebus/events/door/main");
        assert_eq!(values("door/main").unwrap(), "edgebus/values/door/main");
        assert_eq!(properties("gate").unwrap(), "edgebus/properties/gate");
        assert_eq!(states("gate").unwrap(), "edgebus/states/gate");
        assert_eq!(statistics("gate").unwrap(), "edgebus/statistics/gate");
        assert_eq!(
            request_send("doorctl", "gate").unwrap(),
            "edgebus/requests/doorctl/gate"
        );
        assert_eq!(
            reply_send("gate", "doorctl").unwrap(),
            "edgebus/replies/gate/doorctl"
        );
        assert_eq!(
            offline("endpoint", "doorctl").unwrap(),
            "edgebus/nodes/offline/endpoint/doorctl"
        );
    }

    #[test]
    fn listen_filters_use_one_wildcard_level() {
        assert_eq!(request_listen("doorctl").unwrap(), "edgebus/requests/doorctl/+");
        assert_eq!(reply_listen("gate").unwrap(), "edgebus/replies/gate/+");
    }

    #[test]
    fn builders_reject_bad_segments() {
        assert_eq!(events(""), Err(TopicError::EmptySegment));
        assert!(matches!(
            events("/door"),
            Err(TopicError::LeadingSlash { .. })
        ));
        assert!(matches!(
            request_send("/x", "y"),
            Err(TopicError::LeadingSlash { .. })
        ));
    }

    #[test]
    fn caller_extraction() {
        assert_eq!(
            caller_from_request("edgebus/requests/doorctl/gate"),
            Some("gate")
        );
        assert_eq!(caller_from_request("edgebus/requests/doorctl/"), None);
    }

    #[test]
    fn filter_matching() {
        assert!(filter_matches("edgebus/requests/doorctl/+", "edgebus/requests/doorctl/gate"));
        assert!(!filter_matches(
            "edgebus/requests/doorctl/+",
            "edgebus/requests/other/gate"
        ));
        assert!(!filter_matches(
            "edgebus/requests/doorctl/+",
            "edgebus/requests/doorctl/gate/extra"
        ));
        assert!(filter_matches("edgebus/events/#", "edgebus/events/door/main"));
        assert!(filter_matches("edgebus/events/#", "edgebus/events"));
        assert!(filter_matches("a/+/c", "a/b/c"));
        assert!(!filter_matches("a/+/c", "a/b/d"));
        assert!(filter_matches("exact/topic", "exact/topic"));
        assert!(!filter_matches("exact/topic", "exact"));
    }
}
