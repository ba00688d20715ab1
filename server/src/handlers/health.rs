use actix_web::{get, web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::LobbyRuntime;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub active_rooms: usize,
}

#[get("/health")]
pub async fn health_check(runtime: web::Data<Arc<LobbyRuntime>>) -> Result<HttpResponse> {
    let response = HealthCheckResponse {
        status: "healthy".to_string(),
        active_rooms: runtime.active_rooms(),
    };

    Ok(HttpResponse::Ok().json(response))
}
