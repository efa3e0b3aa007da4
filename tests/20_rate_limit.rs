mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::request;
use restful_api_rust::config::AppConfig;
use restful_api_rust::sample::{ADMIN, EDITOR};

const ARTICLE: &str = "/api/articles/v1.0/1";

#[tokio::test]
async fn anonymous_quota_is_two_per_day() -> Result<()> {
    let app = common::spawn_app().await?;

    let first = app.get(ARTICLE).await?;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-ratelimit-limit"), Some("2"));
    assert_eq!(first.header("x-ratelimit-remaining"), Some("1"));
    assert_eq!(first.header("x-ratelimit-reset"), Some("86400"));

    let second = app.get(ARTICLE).await?;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-ratelimit-remaining"), Some("0"));

    let third = app.get(ARTICLE).await?;
    assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.body["code"], 429);
    let retry_after: i64 = third.header("retry-after").unwrap_or("0").parse()?;
    assert!(retry_after > 0);
    Ok(())
}

#[tokio::test]
async fn window_resets_after_expiration() -> Result<()> {
    let app = common::spawn_app().await?;
    app.get(ARTICLE).await?;
    app.get(ARTICLE).await?;
    assert_eq!(app.get(ARTICLE).await?.status, StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(86_401);
    let res = app.get(ARTICLE).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("1"));
    Ok(())
}

#[tokio::test]
async fn retry_after_counts_down_within_window() -> Result<()> {
    let app = common::spawn_app().await?;
    app.get(ARTICLE).await?;
    app.get(ARTICLE).await?;

    app.clock.advance(86_000);
    let res = app.get(ARTICLE).await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("retry-after"), Some("400"));
    Ok(())
}

#[tokio::test]
async fn anonymous_callers_are_counted_per_address() -> Result<()> {
    let app = common::spawn_app().await?;
    let from = |ip: &str| {
        request(Method::GET, ARTICLE)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
    };

    for _ in 0..2 {
        assert_eq!(app.send(from("198.51.100.1")?).await?.status, StatusCode::OK);
    }
    assert_eq!(
        app.send(from("198.51.100.1")?).await?.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.send(from("198.51.100.2")?).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn unlimited_role_sends_no_quota_headers() -> Result<()> {
    let app = common::spawn_app().await?;
    for _ in 0..5 {
        let res = app.get_as(ARTICLE, ADMIN).await?;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.header("x-ratelimit-limit"), None);
    }
    Ok(())
}

#[tokio::test]
async fn write_event_only_counts_writes() -> Result<()> {
    let app = common::spawn_app().await?;

    // Reads leave the write quota alone
    let res = app.get_as("/api/articles/v1.1/1", EDITOR).await?;
    assert_eq!(res.header("x-ratelimit-limit"), Some("100"));

    for n in 0..5 {
        let res = app
            .write_as(Method::POST, "/api/articles/v1.1", EDITOR, json!({"label": format!("Post {}", n)}))
            .await?;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.header("x-ratelimit-limit"), Some("5"));
        assert_eq!(res.header("x-ratelimit-remaining"), Some((4 - n).to_string().as_str()));
    }

    let res = app
        .write_as(Method::POST, "/api/articles/v1.1", EDITOR, json!({"label": "One too many"}))
        .await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("retry-after"), Some("3600"));
    Ok(())
}

#[tokio::test]
async fn rejected_requests_never_reach_the_provider() -> Result<()> {
    let app = common::spawn_app().await?;
    app.get(ARTICLE).await?;
    app.get(ARTICLE).await?;

    // Would be 404 if the lookup ran
    let res = app.get("/api/articles/v1.0/999").await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn global_event_spans_resources() -> Result<()> {
    let mut config = AppConfig::development();
    config.rate_limit.enable_global = true;
    config.rate_limit.global_limit = 1;
    config.rate_limit.global_period_secs = 60;
    let app = common::spawn_app_with(config).await?;

    assert_eq!(app.get("/api/tags").await?.status, StatusCode::OK);
    let res = app.get("/api/users/1").await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("retry-after"), Some("60"));

    // Authenticated callers fall back to the anonymous entry too
    assert_eq!(
        app.get_as("/api/tags", EDITOR).await?.status,
        StatusCode::OK
    );
    assert_eq!(
        app.get_as("/api/tags", EDITOR).await?.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    Ok(())
}
