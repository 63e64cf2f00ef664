use thiserror::Error;

/// Peer-level failures, distinct from BLE link faults: nothing here means a
/// session must be torn down.
#[derive(Debug, Error)]
pub enum PeerError {
    /// A send was attempted while no session is installed.
    #[error("not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::PeerError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(PeerError::NotConnected.to_string(), "not connected");
    }
}
