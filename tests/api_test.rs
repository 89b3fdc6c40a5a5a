use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use courseware_storage::config::{StorageConfig, UploadPolicy};
use courseware_storage::entities::prelude::*;
use courseware_storage::entities::materials;
use courseware_storage::infrastructure::{database::setup_database, storage::setup_storage};
use courseware_storage::services::short_link_service::ShortLinkService;
use courseware_storage::{AppState, create_app};
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    app: Router,
    db: DatabaseConnection,
    config: StorageConfig,
}

async fn setup_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
    let db = setup_database(&url).await.unwrap();

    let config = StorageConfig::development(dir.path().join("static"));
    let storage = setup_storage(&config, UploadPolicy::default()).await.unwrap();
    let state = AppState::new(db.clone(), storage, config.clone());

    TestApp {
        _dir: dir,
        app: create_app(state),
        db,
        config,
    }
}

fn write_upload(config: &StorageConfig, relative: &str, content: &[u8]) {
    let path = config.upload_folder.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn create_material(
    db: &DatabaseConnection,
    subject_id: i32,
    solution_file: Option<&str>,
) -> materials::Model {
    materials::ActiveModel {
        subject_id: Set(subject_id),
        title: Set("Lab 1".to_string()),
        kind: Set("assignment".to_string()),
        file: Set(None),
        solution_file: Set(solution_file.map(|s| s.to_string())),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_with_range(app: &Router, uri: &str, range: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_health() {
    let t = setup_app().await;
    let response = get(&t.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["storage"], "available");
}

#[tokio::test]
async fn test_serve_material_file() {
    let t = setup_app().await;
    write_upload(&t.config, "42/otchyot_po_IB.pdf", b"0123456789");

    let response = get(&t.app, "/files/42/otchyot_po_IB.pdf").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/pdf");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "10");
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL),
        "public, max-age=3600"
    );
    assert_eq!(header_str(&response, header::X_CONTENT_TYPE_OPTIONS), "nosniff");
    assert_eq!(header_str(&response, header::X_FRAME_OPTIONS), "SAMEORIGIN");
    assert!(header_str(&response, header::CONTENT_DISPOSITION).starts_with("attachment;"));

    assert_eq!(body_bytes(response).await, b"0123456789");
}

#[tokio::test]
async fn test_head_request() {
    let t = setup_app().await;
    write_upload(&t.config, "1/notes.png", b"png-bytes");

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/files/1/notes.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/png");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "9");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_range_requests() {
    let t = setup_app().await;
    write_upload(&t.config, "7/data.bin", b"0123456789");

    let response = get_with_range(&t.app, "/files/7/data.bin", "bytes=2-5").await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 2-5/10");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "4");
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        "application/octet-stream"
    );
    assert_eq!(body_bytes(response).await, b"2345");

    let open_ended = get_with_range(&t.app, "/files/7/data.bin", "bytes=7-").await;
    assert_eq!(open_ended.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(open_ended).await, b"789");

    let unsatisfiable = get_with_range(&t.app, "/files/7/data.bin", "bytes=20-30").await;
    assert_eq!(unsatisfiable.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&unsatisfiable, header::CONTENT_RANGE), "bytes */10");

    let malformed = get_with_range(&t.app, "/files/7/data.bin", "pages=1-2").await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submission_lookup() {
    let t = setup_app().await;
    write_upload(&t.config, "3/users/7/answer.docx", b"mine");
    write_upload(&t.config, "3/users/8/other.docx", b"theirs");

    let direct = get(&t.app, "/files/3/users/7/answer.docx").await;
    assert_eq!(direct.status(), StatusCode::OK);
    assert_eq!(body_bytes(direct).await, b"mine");

    // A bare name falls back to searching every submission folder
    let searched = get(&t.app, "/files/3/other.docx").await;
    assert_eq!(searched.status(), StatusCode::OK);
    assert_eq!(body_bytes(searched).await, b"theirs");

    // Wrong user folder still finds the file through the search
    let misplaced = get(&t.app, "/files/3/users/9/answer.docx").await;
    assert_eq!(misplaced.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_and_hostile_paths() {
    let t = setup_app().await;
    write_upload(&t.config, "5/present.pdf", b"x");

    let missing = get(&t.app, "/files/5/absent.pdf").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(missing).await).unwrap();
    assert_eq!(body["error"], "File not found");

    let traversal = get(&t.app, "/files/5/..%2F..%2F..%2Fetc%2Fpasswd").await;
    assert_eq!(traversal.status(), StatusCode::NOT_FOUND);

    let other_subject = get(&t.app, "/files/6/present.pdf").await;
    assert_eq!(other_subject.status(), StatusCode::NOT_FOUND);
}

async fn post_share(app: &Router, material_id: i32) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/shares")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "material_id": material_id }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_share() {
    let t = setup_app().await;
    let material = create_material(&t.db, 2, None).await;

    let response = post_share(&t.app, material.id).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();

    let code = body["code"].as_str().unwrap().to_string();
    assert_eq!(
        body["original_url"],
        format!("http://localhost:3000/material/{}", material.id)
    );
    assert_eq!(body["short_url"], format!("http://localhost:3000/s/{}", code));
    assert_eq!(body["clicks"], 0);

    // Sharing again hands back the same link
    let again = post_share(&t.app, material.id).await;
    let again: serde_json::Value = serde_json::from_slice(&body_bytes(again).await).unwrap();
    assert_eq!(again["code"], code.as_str());

    assert_eq!(post_share(&t.app, 9999).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(post_share(&t.app, 0).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_short_link_to_solution_skips_counter() {
    let t = setup_app().await;
    let material = create_material(&t.db, 4, Some("4/solution.pdf")).await;
    let url = ShortLinkService::material_detail_url(&t.config.public_base_url, material.id);
    let link = ShortLinkService::get_or_create(&t.db, &url).await.unwrap();

    let response = get(&t.app, &format!("/s/{}", link.code)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header_str(&response, header::LOCATION), "/files/4/solution.pdf");

    let stored = ShortLinks::find_by_id(link.id).one(&t.db).await.unwrap().unwrap();
    assert_eq!(stored.clicks, 0);
}

#[tokio::test]
async fn test_short_link_redirect_counts_click() {
    let t = setup_app().await;
    let material = create_material(&t.db, 4, None).await;
    let url = ShortLinkService::material_detail_url(&t.config.public_base_url, material.id);
    let link = ShortLinkService::get_or_create(&t.db, &url).await.unwrap();

    let response = get(&t.app, &format!("/s/{}", link.code)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header_str(&response, header::LOCATION), url);

    let stored = ShortLinks::find_by_id(link.id).one(&t.db).await.unwrap().unwrap();
    assert_eq!(stored.clicks, 1);
}

#[tokio::test]
async fn test_blocked_and_unknown_links() {
    let t = setup_app().await;
    let link = ShortLinkService::get_or_create(&t.db, "https://example.org/docs")
        .await
        .unwrap();
    ShortLinkService::set_rule(&t.db, link.id, None, Some(1))
        .await
        .unwrap();

    let first = get(&t.app, &format!("/s/{}", link.code)).await;
    assert_eq!(first.status(), StatusCode::FOUND);
    assert_eq!(header_str(&first, header::LOCATION), "https://example.org/docs");

    let second = get(&t.app, &format!("/s/{}", link.code)).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);

    let unknown = get(&t.app, "/s/nope1234").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
