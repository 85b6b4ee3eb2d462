//! Room roster bookkeeping
//!
//! Tracks who is in the room, keyed by transport id. A user who rejoins
//! (new transport, same user id) evicts their stale entry: last join wins,
//! and the evicted transport is handed back so the coordinator can tear
//! down its link.

use std::collections::HashMap;

use crate::signaling::protocol::Participant;

/// Participants currently visible in the room
#[derive(Debug, Default)]
pub struct Roster {
    participants: HashMap<String, Participant>,
}

impl Roster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a participant
    ///
    /// Returns the stale entry when the same user was already present on a
    /// different transport (they rejoined before their old presence aged
    /// out). Re-announcing the same transport just refreshes the entry.
    pub fn insert(&mut self, participant: Participant) -> Option<Participant> {
        let stale_transport = self
            .participants
            .values()
            .find(|p| {
                p.user_id == participant.user_id && p.transport_id != participant.transport_id
            })
            .map(|p| p.transport_id.clone());

        let evicted = stale_transport.and_then(|t| self.participants.remove(&t));
        self.participants
            .insert(participant.transport_id.clone(), participant);
        evicted
    }

    /// Remove the participant on `transport_id`
    pub fn remove(&mut self, transport_id: &str) -> Option<Participant> {
        self.participants.remove(transport_id)
    }

    /// Look up a participant by transport
    pub fn get(&self, transport_id: &str) -> Option<&Participant> {
        self.participants.get(transport_id)
    }

    /// Whether `transport_id` is present
    pub fn contains(&self, transport_id: &str) -> bool {
        self.participants.contains_key(transport_id)
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// All participants, unordered
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    /// All transport ids, unordered
    pub fn transport_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Drop every participant
    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(user_id: &str, transport_id: &str) -> Participant {
        Participant::joined_now(user_id, transport_id)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut roster = Roster::new();
        assert!(roster.is_empty());

        assert!(roster.insert(participant("alice", "t1")).is_none());
        assert!(roster.insert(participant("bob", "t2")).is_none());

        assert_eq!(roster.len(), 2);
        assert!(roster.contains("t1"));
        assert_eq!(roster.get("t2").unwrap().user_id, "bob");
        assert!(roster.get("t9").is_none());
    }

    #[test]
    fn test_rejoin_evicts_stale_transport() {
        let mut roster = Roster::new();
        roster.insert(participant("alice", "t1"));
        roster.insert(participant("bob", "t2"));

        // Alice rejoins on a fresh transport before t1 ages out
        let evicted = roster.insert(participant("alice", "t3")).unwrap();
        assert_eq!(evicted.transport_id, "t1");

        assert_eq!(roster.len(), 2);
        assert!(!roster.contains("t1"));
        assert!(roster.contains("t3"));
        assert_eq!(roster.get("t3").unwrap().user_id, "alice");
    }

    #[test]
    fn test_same_transport_refresh_is_not_eviction() {
        let mut roster = Roster::new();
        roster.insert(participant("alice", "t1"));

        assert!(roster.insert(participant("alice", "t1")).is_none());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut roster = Roster::new();
        roster.insert(participant("alice", "t1"));

        let removed = roster.remove("t1").unwrap();
        assert_eq!(removed.user_id, "alice");
        assert!(roster.remove("t1").is_none());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut roster = Roster::new();
        roster.insert(participant("alice", "t1"));
        roster.insert(participant("bob", "t2"));

        roster.clear();
        assert!(roster.is_empty());
        assert!(roster.transport_ids().is_empty());
    }
}
