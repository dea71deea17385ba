use crate::error::ChannelError;

/// The chat server always listens on this port; clients only ever ask the
/// user for a host.
pub const SERVER_PORT: u16 = 12345;

/// A logged-in connection target. Lives from a successful login until
/// logout; changing either field means building a new session (and with it
/// a fresh channel subscription), never mutating in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub host: String,
    pub base_url: String,
}

impl Session {
    /// Validate the login form and derive the base URL.
    ///
    /// Both fields are required; the URL is always `http://{host}:12345`.
    pub fn new(identity: impl Into<String>, host: impl Into<String>) -> Result<Self, ChannelError> {
        let identity = identity.into().trim().to_string();
        let host = host.into().trim().to_string();

        if identity.is_empty() || host.is_empty() {
            return Err(ChannelError::Validation(
                "Please enter both server IP and username.".into(),
            ));
        }

        let base_url = format!("http://{}:{}", host, SERVER_PORT);
        Ok(Self {
            identity,
            host,
            base_url,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
