#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Topic ID cannot be empty")]
    EmptyTopic,

    #[error("Invalid topic ID {0:?}: {1}")]
    InvalidTopic(String, &'static str),

    #[error("Invalid service account name {0:?}: must be a DNS-1123 label")]
    InvalidServiceAccount(String),

    #[error("Invalid sink URI {0:?}: must be an absolute http(s) URI")]
    InvalidSinkUri(String),
}

/// Pub/Sub topic ID rules: at most 255 chars, starts with a letter,
/// restricted charset, and no `goog` prefix.
pub fn validate_topic_id(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.len() > 255 {
        return Err(ValidationError::InvalidTopic(
            topic.to_string(),
            "longer than 255 characters",
        ));
    }
    if !topic.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidTopic(
            topic.to_string(),
            "must start with a letter",
        ));
    }
    if topic.to_ascii_lowercase().starts_with("goog") {
        return Err(ValidationError::InvalidTopic(
            topic.to_string(),
            "must not start with \"goog\"",
        ));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "-_.~+%".contains(c);
    if !topic.chars().all(allowed) {
        return Err(ValidationError::InvalidTopic(
            topic.to_string(),
            "contains a disallowed character",
        ));
    }
    Ok(())
}

pub fn validate_service_account_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidServiceAccount(name.to_string()))
    }
}

pub fn validate_sink_uri(uri: &str) -> Result<(), ValidationError> {
    let rest = uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ValidationError::InvalidSinkUri(uri.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_rules() {
        assert!(validate_topic_id("t1x").is_ok());
        assert!(validate_topic_id("my-topic_1.a~b+c%d").is_ok());
        assert_eq!(validate_topic_id(""), Err(ValidationError::EmptyTopic));
        assert!(validate_topic_id("t1").is_ok());
        assert!(validate_topic_id(&"t".repeat(256)).is_err());
        assert!(validate_topic_id("1abc").is_err());
        assert!(validate_topic_id("google-topic").is_err());
        assert!(validate_topic_id("bad/topic").is_err());
    }

    #[test]
    fn service_account_rules() {
        assert!(validate_service_account_name("events-sa").is_ok());
        assert!(validate_service_account_name("Events").is_err());
        assert!(validate_service_account_name("-sa").is_err());
        assert!(validate_service_account_name("").is_err());
    }

    #[test]
    fn sink_uri_rules() {
        assert!(validate_sink_uri("http://display.default.svc.cluster.local").is_ok());
        assert!(validate_sink_uri("https://example.com/path").is_ok());
        assert!(validate_sink_uri("ftp://example.com").is_err());
        assert!(validate_sink_uri("http://").is_err());
    }
}
