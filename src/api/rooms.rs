//! Read-only room introspection endpoints.
//!
//! Live membership views for operators; room resources themselves are
//! owned by the storage service, nothing here creates or deletes rooms.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::HubError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub participant_count: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomParticipantsResponse {
    pub room_id: String,
    pub participants: Vec<String>,
}

/// GET /api/v1/rooms - all live rooms with participant counts
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    let mut rooms: Vec<RoomInfo> = state
        .rooms
        .all_rooms()
        .into_iter()
        .map(|(room_id, participant_count)| RoomInfo {
            room_id,
            participant_count,
        })
        .collect();
    rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

    Json(rooms)
}

/// GET /api/v1/rooms/{room_id} - current participants of one room.
/// Empty rooms are garbage collected, so absence means 404.
pub async fn room_participants(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomParticipantsResponse>, HubError> {
    let mut participants = state.rooms.participants_of(&room_id);
    if participants.is_empty() {
        return Err(HubError::NotFound(format!("Unknown room: {}", room_id)));
    }
    participants.sort();

    Ok(Json(RoomParticipantsResponse {
        room_id,
        participants,
    }))
}
