//! Read-only HTTP view of room state, for debugging live sessions.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use http::Method;
use netsync_core::ClientNo;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::hub::Hub;
use crate::room::Room;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: String,
    pub client_count: u32,
    pub global_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientView {
    pub client_no: ClientNo,
    pub device_id: String,
    pub joined_at: DateTime<Utc>,
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomDetail {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub globals: BTreeMap<String, String>,
    pub clients: Vec<ClientView>,
}

#[derive(thiserror::Error, Debug)]
pub enum InspectorError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Client {client_no} not found in room {room_id}")]
    ClientNotFound { room_id: String, client_no: ClientNo },
}

impl InspectorError {
    fn status_code(&self) -> StatusCode {
        match self {
            InspectorError::RoomNotFound(_) | InspectorError::ClientNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
        }
    }
}

impl IntoResponse for InspectorError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

fn summarize(room: &Room) -> RoomSummary {
    RoomSummary {
        id: room.id().to_string(),
        client_count: room.count_clients(),
        global_count: room.variables().globals().len(),
        created_at: room.created_at(),
    }
}

fn client_variables(room: &Room, client_no: ClientNo) -> BTreeMap<String, String> {
    room.variables()
        .client(client_no)
        .map(netsync_core::VariableTable::to_map)
        .unwrap_or_default()
}

fn detail(room: &Room) -> RoomDetail {
    RoomDetail {
        id: room.id().to_string(),
        created_at: room.created_at(),
        globals: room.variables().globals().to_map(),
        clients: room
            .iter_members()
            .map(|member| ClientView {
                client_no: member.client_no,
                device_id: member.device_id.clone(),
                joined_at: member.joined_at,
                variables: client_variables(room, member.client_no),
            })
            .collect(),
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn list_rooms(State(hub): State<Hub>) -> Json<Vec<RoomSummary>> {
    Json(hub.inspect_all(summarize))
}

async fn get_room(
    State(hub): State<Hub>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetail>, InspectorError> {
    hub.inspect(&room_id, detail)
        .map(Json)
        .ok_or(InspectorError::RoomNotFound(room_id))
}

async fn get_client_variables(
    State(hub): State<Hub>,
    Path((room_id, client_no)): Path<(String, ClientNo)>,
) -> Result<Json<BTreeMap<String, String>>, InspectorError> {
    let found = hub
        .inspect(&room_id, |room| {
            room.has_client(client_no)
                .then(|| client_variables(room, client_no))
        })
        .ok_or_else(|| InspectorError::RoomNotFound(room_id.clone()))?;
    found
        .map(Json)
        .ok_or(InspectorError::ClientNotFound { room_id, client_no })
}

pub fn router(hub: Hub) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{room_id}", get(get_room))
        .route(
            "/rooms/{room_id}/clients/{client_no}/variables",
            get(get_client_variables),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(hub)
}

/// Serve the inspector until the listener fails.
pub async fn serve(listener: TcpListener, hub: Hub) -> std::io::Result<()> {
    axum::serve(listener, router(hub).into_make_service()).await
}
