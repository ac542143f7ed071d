//! Pure MQTT topic-wildcard matching, independent of any broker connection.
//!
//! `+` matches exactly one path segment; `#` matches zero or more trailing
//! segments and is only meaningful as the final segment of a pattern.

/// Returns `true` if `topic` matches `pattern` under MQTT wildcard rules.
/// A pattern with no wildcards matches only by string equality.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }
    if !pattern.contains('+') && !pattern.contains('#') {
        return false;
    }

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    match_segments(&pattern_segments, &topic_segments)
}

fn match_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.first(), topic.first()) {
        (Some(&"#"), _) => pattern.len() == 1,
        (Some(&"+"), Some(_)) => match_segments(&pattern[1..], &topic[1..]),
        (Some(&"+"), None) => false,
        (Some(p), Some(t)) if p == t => match_segments(&pattern[1..], &topic[1..]),
        (Some(_), _) => false,
        (None, None) => true,
        (None, Some(_)) => false,
    }
}

/// Whether a pattern contains MQTT wildcard characters at all.
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains('+') || pattern.contains('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plus_matches_exactly_one_segment() {
        assert!(topic_matches("ios/v1/status/+/heartbeat", "ios/v1/status/scheduler/heartbeat"));
        assert!(!topic_matches("ios/v1/status/+/heartbeat", "ios/v1/status/a/b/heartbeat"));
        assert!(!topic_matches("ios/v1/status/+/heartbeat", "ios/v1/status/heartbeat"));
    }

    #[test]
    fn hash_matches_zero_or_more_trailing_segments() {
        assert!(topic_matches("ios/v1/#", "ios/v1"));
        assert!(topic_matches("ios/v1/#", "ios/v1/status"));
        assert!(topic_matches("ios/v1/#", "ios/v1/status/scheduler/heartbeat"));
    }

    #[test]
    fn hash_only_matches_as_the_final_segment() {
        // A pattern with `#` in the middle is not a valid MQTT filter; it is
        // treated as a literal segment and so fails to match non-literally.
        assert!(!topic_matches("ios/#/status", "ios/v1/status"));
    }

    #[test]
    fn non_wildcard_patterns_match_only_by_equality() {
        assert!(topic_matches("ios/v1/sensor/grating/trigger", "ios/v1/sensor/grating/trigger"));
        assert!(!topic_matches("ios/v1/sensor/grating/trigger", "ios/v1/sensor/grating/triggered"));
    }

    #[test]
    fn single_hash_matches_everything() {
        assert!(topic_matches("#", "ios/v1/anything/at/all"));
    }

    proptest! {
        #[test]
        fn exact_patterns_always_match_themselves(topic in "[a-z]{1,5}(/[a-z]{1,5}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn plus_wildcard_never_matches_a_different_segment_count(
            prefix in "[a-z]{1,5}",
            extra in "[a-z]{1,5}/[a-z]{1,5}",
        ) {
            let pattern = format!("{prefix}/+");
            let topic = format!("{prefix}/{extra}");
            prop_assert!(!topic_matches(&pattern, &topic));
        }
    }
}
