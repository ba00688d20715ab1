//! Internal directory endpoints. Rooms publish through the in-process
//! handle; these routes exist for out-of-process publishers and list
//! consumers.

use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

use crate::error::Result;
use crate::runtime::directory::{DirectoryHandle, DirectoryUpsert};

#[post("/upsert")]
pub async fn upsert(
    req: web::Json<DirectoryUpsert>,
    directory: web::Data<DirectoryHandle>,
) -> Result<HttpResponse> {
    let update = req.into_inner();
    if update.name.is_empty() {
        return Ok(HttpResponse::BadRequest().body("bad"));
    }

    directory.upsert(update).await?;
    Ok(HttpResponse::Ok().body("ok"))
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub name: String,
}

#[post("/remove")]
pub async fn remove(
    req: web::Json<RemoveRequest>,
    directory: web::Data<DirectoryHandle>,
) -> Result<HttpResponse> {
    if req.name.is_empty() {
        return Ok(HttpResponse::BadRequest().body("bad"));
    }

    directory.remove(req.into_inner().name).await?;
    Ok(HttpResponse::Ok().body("ok"))
}

#[get("/list.bin")]
pub async fn list_bin(directory: web::Data<DirectoryHandle>) -> Result<HttpResponse> {
    let frame = directory.list_frame().await?;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(("cache-control", "no-store"))
        .body(frame))
}
