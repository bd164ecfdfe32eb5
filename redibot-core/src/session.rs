// ABOUTME: Per-dispatcher session holding the endpoint selected by `connect`
// ABOUTME: Cloned into each routed action so spawned tasks see a stable value

use crate::error::RelayError;

/// The "current endpoint" of one dispatch session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    endpoint: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = Some(endpoint.into());
    }

    /// Forget the current endpoint, returning it
    pub fn clear(&mut self) -> Option<String> {
        self.endpoint.take()
    }

    pub fn current_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// The current endpoint, or `NotConnected`
    pub fn require_endpoint(&self) -> Result<&str, RelayError> {
        self.current_endpoint().ok_or(RelayError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_session_is_not_connected() {
        let session = SessionState::new();
        assert!(matches!(
            session.require_endpoint(),
            Err(RelayError::NotConnected)
        ));
    }

    #[test]
    fn test_set_and_clear() {
        let mut session = SessionState::new();
        session.set_endpoint("h:1");
        assert_eq!(session.require_endpoint().unwrap(), "h:1");

        let snapshot = session.clone();
        session.set_endpoint("h:2");
        assert_eq!(snapshot.current_endpoint(), Some("h:1"));

        assert_eq!(session.clear(), Some("h:2".to_string()));
        assert_eq!(session.current_endpoint(), None);
    }
}
