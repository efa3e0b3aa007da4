mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, StatusCode};

use common::request;
use restful_api_rust::sample::EDITOR;

#[tokio::test]
async fn unversioned_path_uses_latest_allowed_version() -> Result<()> {
    let app = common::spawn_app().await?;

    // v2.0 requires a token, so the editor lands on v1.1 only when asked for major 1
    let res = app.get_as("/api/articles/v1/1", EDITOR).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body.get("word_count").is_some());

    // Latest overall is v2.0, which refuses Basic credentials
    let res = app.get_as("/api/articles/1", EDITOR).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn exact_version_in_path() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get_as("/api/articles/v1.0/1", EDITOR).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["tags"], serde_json::json!([3, 7]));
    assert!(res.body.get("word_count").is_none());

    let res = app.get_as("/api/articles/1.1/1", EDITOR).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND, "bare numbers are ids, not versions");
    Ok(())
}

#[tokio::test]
async fn version_header_applies_without_path_segment() -> Result<()> {
    let app = common::spawn_app().await?;

    for value in ["1.0", "v1.0"] {
        let res = app
            .send(
                request(Method::GET, "/api/articles/1")
                    .header("authorization", common::basic(EDITOR))
                    .header("X-API-Version", value)
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["tags"], serde_json::json!([3, 7]));
    }

    // The path segment wins over the header
    let res = app
        .send(
            request(Method::GET, "/api/articles/v1.1/1")
                .header("authorization", common::basic(EDITOR))
                .header("X-API-Version", "1.0")
                .body(Body::empty())?,
        )
        .await?;
    assert!(res.body.get("word_count").is_some());
    Ok(())
}

#[tokio::test]
async fn unregistered_versions_are_not_found() -> Result<()> {
    let app = common::spawn_app().await?;

    for path in ["/api/articles/v3/1", "/api/articles/v1.5/1", "/api/articles/v3"] {
        let res = app.get_as(path, EDITOR).await?;
        assert_eq!(res.status, StatusCode::NOT_FOUND, "{}", path);
        assert_eq!(res.body["code"], 404);
    }

    let res = app
        .send(
            request(Method::GET, "/api/articles/1")
                .header("authorization", common::basic(EDITOR))
                .header("X-API-Version", "banana")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn unknown_resources_and_deep_paths_are_not_found() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get("/api/widgets").await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["message"], "Unknown resource 'widgets'");

    let res = app.get("/api/tags/3/extra").await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn negotiation_is_stable_across_requests() -> Result<()> {
    let app = common::spawn_app().await?;
    let first = app.get_as("/api/articles/v1/2", EDITOR).await?;
    let second = app.get_as("/api/articles/v1/2", EDITOR).await?;
    assert_eq!(first.body, second.body);
    assert_eq!(first.body["label"], "Versioning");
    Ok(())
}
