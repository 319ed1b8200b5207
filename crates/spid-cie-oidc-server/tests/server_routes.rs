use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use spid_cie_oidc_server::{AppConfig, ServerBuilder};

fn server(dir: &tempfile::TempDir) -> spid_cie_oidc_server::RelyingPartyServer {
    let mut cfg = AppConfig::default();
    cfg.relying_party.base_url = "https://comune.example.it".to_string();
    cfg.federation.key_dir = dir.path().to_path_buf();
    ServerBuilder::new(cfg).build().expect("server should build")
}

#[tokio::test]
async fn healthz_responds() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let response = server(&dir)
        .router()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn federation_routes_are_mounted() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let app = server(&dir).router();

    let response = app
        .clone()
        .oneshot(
            Request::get("/.well-known/openid-federation")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/entity-statement+jwt; charset=utf-8"
    );

    let response = app
        .oneshot(Request::get("/jwks.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(dir.path().join("private.key").exists());
}
