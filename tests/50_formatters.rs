mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{request, TestApp, TestResponse};
use restful_api_rust::sample::{self, EDITOR};

async fn get_accepting(app: &TestApp, path: &str, accept: &str) -> Result<TestResponse> {
    app.send(
        request(Method::GET, path)
            .header("authorization", common::basic(EDITOR))
            .header("accept", accept)
            .body(Body::empty())?,
    )
    .await
}

#[tokio::test]
async fn json_is_the_default() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get_as("/api/tags/3", EDITOR).await?;
    assert_eq!(res.header("content-type"), Some("application/json; charset=utf-8"));
    assert_eq!(res.body, json!({"id": 3, "label": "rust"}));

    for accept in ["*/*", "text/html", "application/*", "text/html;q=0.9, */*;q=0.1"] {
        let res = get_accepting(&app, "/api/tags/3", accept).await?;
        assert_eq!(
            res.header("content-type"),
            Some("application/json; charset=utf-8"),
            "{}",
            accept
        );
    }
    Ok(())
}

#[tokio::test]
async fn yaml_on_request() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = get_accepting(&app, "/api/tags/3", "application/x-yaml").await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/x-yaml"));
    let parsed: serde_json::Value = serde_yaml::from_str(&res.text())?;
    assert_eq!(parsed, json!({"id": 3, "label": "rust"}));
    Ok(())
}

#[tokio::test]
async fn first_matching_candidate_wins() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = get_accepting(&app, "/api/tags/3", "text/html, application/hal+json, application/json").await?;
    assert_eq!(res.header("content-type"), Some("application/hal+json; charset=utf-8"));
    assert_eq!(res.body["_links"]["self"]["href"], "/api/tags/v1.0/3");
    assert_eq!(res.body["label"], "rust");
    Ok(())
}

#[tokio::test]
async fn hal_listing_embeds_items() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = get_accepting(&app, "/api/tags?range=2", "application/hal+json").await?;
    assert_eq!(res.body["count"], 3);
    assert_eq!(
        res.body["_embedded"]["tags"],
        json!([{"id": 3, "label": "rust"}, {"id": 7, "label": "http"}])
    );
    assert_eq!(res.body["_links"]["next"]["href"], "/api/tags/v1.0?page=2&range=2");
    Ok(())
}

#[tokio::test]
async fn pinned_formatter_ignores_accept() -> Result<()> {
    let app = common::spawn_app().await?;
    let token = app.token_for(&sample::editor())?;

    let res = app
        .send(
            request(Method::GET, "/api/articles/v2/1")
                .header("authorization", format!("Bearer {}", token))
                .header("accept", "application/json")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/hal+json; charset=utf-8"));
    assert_eq!(res.body["headline"], "Hello");
    assert_eq!(res.body["_links"]["self"]["href"], "/api/articles/v2.0/1");
    Ok(())
}

#[tokio::test]
async fn errors_are_always_json() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = get_accepting(&app, "/api/tags/404", "application/x-yaml").await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(res
        .header("content-type")
        .is_some_and(|v| v.starts_with("application/json")));
    assert_eq!(res.body["message"], "tags 404 not found");
    Ok(())
}
