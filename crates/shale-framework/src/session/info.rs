//! Read-only per-session information.

use std::time::SystemTime;

/// The login user type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    /// Administrators have access to all resources without authorization
    /// restrictions.
    Administrator,
    /// Standard users are restricted to authorized operations on their
    /// respective resources.
    Standard,
}

/// Read-only information about one session.
///
/// Built by the endpoint when the session is created. When session ids are
/// denoted in text they start with `:` and trim leading zeros; labels must
/// not start with `:`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    id: u64,
    label: String,
    application_name: String,
    start_at: SystemTime,
    connection_type_name: String,
    connection_information: String,
    username: Option<String>,
    user_type: UserType,
}

impl SessionInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        label: impl Into<String>,
        application_name: impl Into<String>,
        connection_type_name: impl Into<String>,
        connection_information: impl Into<String>,
        username: Option<String>,
        user_type: UserType,
    ) -> Self {
        SessionInfo {
            id,
            label: label.into(),
            application_name: application_name.into(),
            start_at: SystemTime::now(),
            connection_type_name: connection_type_name.into(),
            connection_information: connection_information.into(),
            username,
            user_type,
        }
    }

    /// The numeric session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The session label; empty when the client declared none.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name of the application that started this session; may be empty.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// When the session started.
    pub fn start_at(&self) -> SystemTime {
        self.start_at
    }

    /// Connection type tag, e.g. `tcp` or `loopback`.
    pub fn connection_type_name(&self) -> &str {
        &self.connection_type_name
    }

    /// Endpoint-specific connection description (peer address for TCP).
    pub fn connection_information(&self) -> &str {
        &self.connection_information
    }

    /// The authenticated user name, when authentication is enabled.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The login user type; administrator when authentication is disabled.
    pub fn user_type(&self) -> UserType {
        self.user_type
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let info = SessionInfo::new(
            9,
            "labelled",
            "psql-like",
            "tcp",
            "127.0.0.1:54321",
            Some("alice".to_string()),
            UserType::Standard,
        );
        assert_eq!(info.id(), 9);
        assert_eq!(info.label(), "labelled");
        assert_eq!(info.application_name(), "psql-like");
        assert_eq!(info.connection_type_name(), "tcp");
        assert_eq!(info.connection_information(), "127.0.0.1:54321");
        assert_eq!(info.username(), Some("alice"));
        assert_eq!(info.user_type(), UserType::Standard);
    }
}
