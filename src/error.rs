//! Error types for moderation operations
//!
//! Every failure a command can hit is one of these. None of them are fatal:
//! the command layer turns each into a message for the invoking user.

use thiserror::Error;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Malformed user input, such as a bad duration string
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requester is not allowed to do this
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The platform rejected or failed an action
    #[error("Platform action failed: {0}")]
    PlatformActionFailed(String),

    /// Subject, grant or resource is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reading or writing a snapshot failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ModerationError {
    /// Short text suitable for an ephemeral reply
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(message) => format!("❌ {message}"),
            Self::PermissionDenied(message) => format!("⛔ {message}"),
            Self::PlatformActionFailed(message) => format!("❌ Discord refused the action: {message}"),
            Self::NotFound(message) => format!("⚠️ {message}"),
            Self::Storage(_) => {
                "⚠️ The change could not be saved to disk and may be forgotten after a restart."
                    .to_string()
            }
            Self::Config(_) => "❌ Something went wrong on my side.".to_string(),
        }
    }
}

impl From<poise::serenity_prelude::Error> for ModerationError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::PlatformActionFailed(error.to_string())
    }
}

impl From<std::io::Error> for ModerationError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_yaml::Error> for ModerationError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModerationError::NotFound("grant-1".to_string());
        assert_eq!(error.to_string(), "Not found: grant-1");

        let error = ModerationError::InvalidInput("bad duration".to_string());
        assert_eq!(error.to_string(), "Invalid input: bad duration");
    }

    #[test]
    fn test_user_message_hides_storage_details() {
        let error = ModerationError::Storage("disk full at /var/data".to_string());
        assert!(!error.user_message().contains("/var/data"));
        // A storage failure can follow an action that already took effect
        assert!(!error.user_message().contains("not recorded"));
        assert!(error.user_message().contains("restart"));

        let error = ModerationError::PermissionDenied("blacklisted".to_string());
        assert!(error.user_message().contains("blacklisted"));
    }

    #[test]
    fn test_yaml_error_becomes_storage() {
        let yaml_error = serde_yaml::from_str::<Vec<u64>>("{ not: a list").unwrap_err();
        let error = ModerationError::from(yaml_error);
        assert!(matches!(error, ModerationError::Storage(_)));
    }
}
