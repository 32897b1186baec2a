//! Per-connection subscriber slot.

use sluice_core::{ClientIdentity, Destination};

/// Which subscriber, if any, a connection is bound to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Attachment {
    /// No successful `SUBSCRIPTION` yet, or it was withdrawn.
    #[default]
    Unbound,
    /// Bound by the most recent successful `SUBSCRIPTION`.
    Bound(ClientIdentity),
}

/// Single-slot session state owned by one connection task.
#[derive(Debug, Default)]
pub struct SessionState {
    attachment: Attachment,
}

impl SessionState {
    /// Fresh, unbound state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current attachment.
    pub fn get(&self) -> &Attachment {
        &self.attachment
    }

    /// The bound identity, if any.
    pub fn identity(&self) -> Option<&ClientIdentity> {
        match &self.attachment {
            Attachment::Bound(identity) => Some(identity),
            Attachment::Unbound => None,
        }
    }

    /// Bind to `identity`, replacing any previous binding.
    pub fn set(&mut self, identity: ClientIdentity) {
        self.attachment = Attachment::Bound(identity);
    }

    /// Unbind, returning the previous identity.
    pub fn clear(&mut self) -> Option<ClientIdentity> {
        match std::mem::take(&mut self.attachment) {
            Attachment::Bound(identity) => Some(identity),
            Attachment::Unbound => None,
        }
    }

    /// Unbind only when bound to `destination`.
    pub fn clear_if_destination(&mut self, destination: &Destination) -> Option<ClientIdentity> {
        if self.identity().is_some_and(|id| id.destination() == destination) {
            self.clear()
        } else {
            None
        }
    }

    /// Whether a subscriber is bound.
    pub fn is_bound(&self) -> bool {
        matches!(self.attachment, Attachment::Bound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ClientId;

    fn id(destination: &str, client: i16) -> ClientIdentity {
        ClientIdentity::new(Destination::new(destination).unwrap(), ClientId::new(client), None)
    }

    #[test]
    fn starts_unbound() {
        let state = SessionState::new();
        assert_eq!(state.get(), &Attachment::Unbound);
        assert!(!state.is_bound());
    }

    #[test]
    fn set_replaces_binding() {
        let mut state = SessionState::new();
        state.set(id("db1", 1));
        state.set(id("db2", 1));
        assert_eq!(state.identity(), Some(&id("db2", 1)));
    }

    #[test]
    fn clear_returns_previous() {
        let mut state = SessionState::new();
        state.set(id("db1", 1));
        assert_eq!(state.clear(), Some(id("db1", 1)));
        assert!(state.clear().is_none());
    }

    #[test]
    fn clear_if_destination_matches_only() {
        let mut state = SessionState::new();
        state.set(id("db1", 1));
        assert!(state.clear_if_destination(&Destination::new("db2").unwrap()).is_none());
        assert!(state.is_bound());
        assert!(state.clear_if_destination(&Destination::new("db1").unwrap()).is_some());
        assert!(!state.is_bound());
    }
}
