use std::sync::Arc;

use actix_web::{test, web, App};
use protocol::{encode_packet, GameEntry, Packet};
use serde_json::json;
use server::handlers;
use server::runtime::directory::{start_directory, DirectoryHandle};
use server::runtime::storage::InMemoryStorage;

fn directory() -> DirectoryHandle {
    start_directory(Arc::new(InMemoryStorage::new()))
}

#[actix_web::test]
async fn upsert_then_list_bin_serves_the_encoded_frame() {
    let directory = directory();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(directory.clone()))
            .service(handlers::upsert)
            .service(handlers::list_bin),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upsert")
        .set_json(json!({
            "name": "room1",
            "type": 0,
            "slotsUsed": 1,
            "slotsTotal": 4
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, "ok");

    let req = test::TestRequest::get().uri("/list.bin").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");

    let body = test::read_body(resp).await;
    let expected = encode_packet(&Packet::GameList {
        entries: vec![GameEntry {
            game_type: 0,
            name: "room1".to_string(),
        }],
    });
    assert_eq!(body.as_ref(), expected.as_slice());
}

#[actix_web::test]
async fn upsert_with_empty_name_is_rejected() {
    let directory = directory();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(directory.clone()))
            .service(handlers::upsert),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upsert")
        .set_json(json!({
            "name": "",
            "type": 0,
            "slotsUsed": 0,
            "slotsTotal": 4
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(test::read_body(resp).await, "bad");
}

#[actix_web::test]
async fn upsert_without_a_name_field_is_rejected() {
    let directory = directory();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(directory.clone()))
            .service(handlers::upsert),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upsert")
        .set_json(json!({
            "type": 0,
            "slotsUsed": 0,
            "slotsTotal": 4
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn remove_deletes_the_entry() {
    let directory = directory();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(directory.clone()))
            .service(handlers::upsert)
            .service(handlers::remove)
            .service(handlers::list_bin),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upsert")
        .set_json(json!({
            "name": "room1",
            "type": 0,
            "slotsUsed": 1,
            "slotsTotal": 4
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post()
        .uri("/remove")
        .set_json(json!({ "name": "room1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, "ok");

    let req = test::TestRequest::get().uri("/list.bin").to_request();
    let resp = test::call_service(&app, req).await;
    let body = test::read_body(resp).await;
    assert_eq!(
        body.as_ref(),
        encode_packet(&Packet::GameList { entries: vec![] }).as_slice()
    );
}

#[actix_web::test]
async fn remove_with_empty_name_is_rejected() {
    let directory = directory();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(directory.clone()))
            .service(handlers::remove),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/remove")
        .set_json(json!({ "name": "" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(test::read_body(resp).await, "bad");
}
