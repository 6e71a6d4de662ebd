//! Connection registry: bidirectional index of connection ↔ event room.
//!
//! Owned exclusively by the presence actor; nothing here is shared or locked.
//!
//! Invariants:
//! - A connection belongs to exactly one room.
//! - A room with zero members is never kept: it is removed the instant its
//!   last member leaves.
//! - Each connection carries its own `eventEndTime`. Expiry removes only the
//!   connections whose own deadline has passed.

use crate::protocol::{ConnectionId, ConnectionSink, EventId};

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Event timing metadata supplied by the client on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMeta {
    /// Declared event start (epoch ms).
    pub event_start_time: i64,
    /// Declared event end (epoch ms).
    pub event_end_time: i64,
}

/// A registered viewer connection.
#[derive(Debug)]
struct Connection {
    event_id: EventId,
    meta: ConnectionMeta,
    sink: ConnectionSink,
}

/// Live room for one event.
#[derive(Debug, Default)]
struct EventRoom {
    members: HashSet<ConnectionId>,
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    /// `eventEndTime` is not in the future.
    EventEnded,
    /// The connection id is already registered.
    DuplicateConnection,
}

impl JoinRejection {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinRejection::EventEnded => "event_ended",
            JoinRejection::DuplicateConnection => "duplicate_connection",
        }
    }
}

/// Result of `ConnectionRegistry::join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Added to the room. `room_created` is true for the first member.
    Joined {
        room_size: usize,
        room_created: bool,
    },
    /// Refused before touching any room.
    Rejected(JoinRejection),
}

/// Result of `ConnectionRegistry::leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Unknown connection (never joined, or already removed by force-end).
    NotRegistered,
    /// Removed; the room still has members.
    Left { event_id: EventId, room_size: usize },
    /// Removed the last member; the room entry is gone.
    RoomEmptied { event_id: EventId },
}

/// Connections of one room removed by [`ConnectionRegistry::remove_expired`].
#[derive(Debug)]
pub struct ExpiredMembers {
    pub event_id: EventId,
    pub members: Vec<(ConnectionId, ConnectionSink)>,
    /// No members remained and the room entry was deleted.
    pub room_removed: bool,
}

/// Connection ↔ room index.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<EventId, EventRoom>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in the room for `event_id`.
    ///
    /// Rejected without side effects if `meta.event_end_time` is at or before
    /// `now_ms`, or if the connection id is already registered.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        event_id: EventId,
        meta: ConnectionMeta,
        sink: ConnectionSink,
        now_ms: i64,
    ) -> JoinOutcome {
        if meta.event_end_time <= now_ms {
            return JoinOutcome::Rejected(JoinRejection::EventEnded);
        }

        if self.connections.contains_key(&connection_id) {
            return JoinOutcome::Rejected(JoinRejection::DuplicateConnection);
        }

        let room_created = !self.rooms.contains_key(&event_id);
        let room = self.rooms.entry(event_id).or_default();
        room.members.insert(connection_id.clone());
        let room_size = room.members.len();

        self.connections.insert(
            connection_id,
            Connection {
                event_id,
                meta,
                sink,
            },
        );

        JoinOutcome::Joined {
            room_size,
            room_created,
        }
    }

    /// Remove a connection. Deletes its room if it was the last member.
    pub fn leave(&mut self, connection_id: &str) -> LeaveOutcome {
        let Some(connection) = self.connections.remove(connection_id) else {
            return LeaveOutcome::NotRegistered;
        };
        let event_id = connection.event_id;

        let Some(room) = self.rooms.get_mut(&event_id) else {
            // Unreachable while invariants hold; treat as already gone.
            debug!(
                target: "ps.registry",
                event_id = event_id,
                "Connection referenced a missing room"
            );
            return LeaveOutcome::NotRegistered;
        };

        room.members.remove(connection_id);
        if room.members.is_empty() {
            self.rooms.remove(&event_id);
            LeaveOutcome::RoomEmptied { event_id }
        } else {
            LeaveOutcome::Left {
                event_id,
                room_size: room.members.len(),
            }
        }
    }

    /// Number of connections in the room for `event_id` (0 if absent).
    #[must_use]
    pub fn room_size(&self, event_id: EventId) -> usize {
        self.rooms.get(&event_id).map_or(0, |room| room.members.len())
    }

    /// Total registered connections across all rooms.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Whether a room entry exists for `event_id`.
    #[must_use]
    pub fn has_room(&self, event_id: EventId) -> bool {
        self.rooms.contains_key(&event_id)
    }

    /// The event a connection is registered under.
    #[must_use]
    pub fn event_of(&self, connection_id: &str) -> Option<EventId> {
        self.connections.get(connection_id).map(|c| c.event_id)
    }

    /// Event ids of all live rooms.
    pub fn event_ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.rooms.keys().copied()
    }

    /// Outbound sinks of every member of a room.
    pub fn room_sinks(&self, event_id: EventId) -> impl Iterator<Item = &ConnectionSink> + '_ {
        self.rooms
            .get(&event_id)
            .into_iter()
            .flat_map(|room| room.members.iter())
            .filter_map(|id| self.connections.get(id).map(|c| &c.sink))
    }

    /// Remove every connection whose own `eventEndTime` is at or before
    /// `now_ms`, grouped by room in event id order.
    ///
    /// Rooms left without members are deleted. Members with a later deadline
    /// stay registered.
    pub fn remove_expired(&mut self, now_ms: i64) -> Vec<ExpiredMembers> {
        let mut by_event: BTreeMap<EventId, Vec<ConnectionId>> = BTreeMap::new();
        for (connection_id, connection) in &self.connections {
            if connection.meta.event_end_time <= now_ms {
                by_event
                    .entry(connection.event_id)
                    .or_default()
                    .push(connection_id.clone());
            }
        }

        let mut expired = Vec::with_capacity(by_event.len());
        for (event_id, connection_ids) in by_event {
            let members: Vec<(ConnectionId, ConnectionSink)> = connection_ids
                .into_iter()
                .filter_map(|id| {
                    self.connections
                        .remove(&id)
                        .map(|connection| (id, connection.sink))
                })
                .collect();

            let room_removed = match self.rooms.get_mut(&event_id) {
                Some(room) => {
                    for (id, _) in &members {
                        room.members.remove(id);
                    }
                    room.members.is_empty()
                }
                None => true,
            };
            if room_removed {
                self.rooms.remove(&event_id);
            }

            expired.push(ExpiredMembers {
                event_id,
                members,
                room_removed,
            });
        }
        expired
    }

    /// Remove everything (shutdown), returning every connection's sink.
    pub fn drain(&mut self) -> Vec<(ConnectionId, ConnectionSink)> {
        self.rooms.clear();
        self.connections
            .drain()
            .map(|(id, connection)| (id, connection.sink))
            .collect()
    }
}
