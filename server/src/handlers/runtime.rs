use actix_web::{get, web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::room::RoomStats;
use crate::runtime::LobbyRuntime;

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomStats>,
}

#[get("/runtime/rooms")]
pub async fn runtime_rooms(runtime: web::Data<Arc<LobbyRuntime>>) -> Result<HttpResponse> {
    let rooms = runtime.room_stats().await;
    Ok(HttpResponse::Ok().json(RoomsResponse { rooms }))
}
