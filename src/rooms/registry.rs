use std::collections::HashSet;

use dashmap::DashMap;

/// Bidirectional room membership.
///
/// Two indices keep both directions O(1): broadcast enumerates a room's
/// participants, disconnect enumerates a user's rooms. The map shards by
/// key hash, so join/leave/broadcast on different rooms do not serialize
/// against each other. Invariant: `user ∈ participants_of(room)` iff
/// `room ∈ rooms_of(user)`.
pub struct RoomRegistry {
    /// room_id -> Set<user_id>
    participants: DashMap<String, HashSet<String>>,
    /// user_id -> Set<room_id>
    memberships: DashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Add a user to a room, creating the room on first join.
    /// Idempotent; returns the participant count after the join.
    pub fn join(&self, room_id: &str, user_id: &str) -> usize {
        let mut room = self.participants.entry(room_id.to_string()).or_default();
        room.insert(user_id.to_string());
        let count = room.len();
        drop(room);

        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());

        tracing::debug!(room_id = %room_id, user_id = %user_id, participants = count, "Joined room");

        count
    }

    /// Remove a user from a room. Returns `None` when the user was not a
    /// member, otherwise the remaining participant count. An emptied room
    /// is deleted outright so the next join starts clean.
    pub fn leave(&self, room_id: &str, user_id: &str) -> Option<usize> {
        let remaining = {
            let mut room = self.participants.get_mut(room_id)?;
            if !room.remove(user_id) {
                return None;
            }
            room.len()
        };

        if remaining == 0 {
            // Only delete if still empty, a concurrent join may have landed
            self.participants.remove_if(room_id, |_, users| users.is_empty());
        }

        if let Some(mut rooms) = self.memberships.get_mut(user_id) {
            rooms.remove(room_id);
        }
        self.memberships.remove_if(user_id, |_, rooms| rooms.is_empty());

        tracing::debug!(room_id = %room_id, user_id = %user_id, remaining = remaining, "Left room");

        Some(remaining)
    }

    /// Remove a user from every room they are in, returning
    /// `(room_id, remaining_count)` per departed room for the caller to
    /// announce. Used by the disconnect cascade and the stale sweep.
    pub fn leave_all(&self, user_id: &str) -> Vec<(String, usize)> {
        let rooms: Vec<String> = self
            .memberships
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        rooms
            .into_iter()
            .filter_map(|room_id| {
                self.leave(&room_id, user_id)
                    .map(|remaining| (room_id, remaining))
            })
            .collect()
    }

    pub fn participants_of(&self, room_id: &str) -> Vec<String> {
        self.participants
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        self.memberships
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Authorization check for room-scoped events
    pub fn is_member(&self, room_id: &str, user_id: &str) -> bool {
        self.participants
            .get(room_id)
            .map(|set| set.contains(user_id))
            .unwrap_or(false)
    }

    pub fn participant_count(&self, room_id: &str) -> usize {
        self.participants.get(room_id).map(|s| s.len()).unwrap_or(0)
    }

    /// All live rooms with their participant counts
    pub fn all_rooms(&self) -> Vec<(String, usize)> {
        self.participants
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect()
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            total_rooms: self.participants.len(),
            total_memberships: self.participants.iter().map(|e| e.value().len()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomStats {
    pub total_rooms: usize,
    pub total_memberships: usize,
}
