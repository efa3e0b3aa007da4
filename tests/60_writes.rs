mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use restful_api_rust::config::AppConfig;
use restful_api_rust::sample::{ADMIN, EDITOR, READER};

#[tokio::test]
async fn create_returns_rendered_record_and_location() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::POST, "/api/tags", EDITOR, json!({"label": "  databases "}))
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.header("location"), Some("/api/tags/v1.0/10"));
    assert_eq!(res.body, json!({"id": 10, "label": "databases"}));

    let res = app.get_as("/api/tags/10", READER).await?;
    assert_eq!(res.body["label"], "databases");
    Ok(())
}

#[tokio::test]
async fn create_accepts_embedded_objects_as_references() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(
            Method::POST,
            "/api/articles/v1.1",
            EDITOR,
            json!({"label": "Fresh", "tags": [9, {"id": 3, "label": "ignored"}], "author": {"id": 2}}),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["id"], 4);
    assert_eq!(
        res.body["tags"],
        json!([{"id": 9, "label": "async"}, {"id": 3, "label": "rust"}])
    );
    assert_eq!(res.body["author"]["name"], "Grace Hopper");

    let res = app.get_as("/api/articles/v1.0/4", EDITOR).await?;
    assert_eq!(res.body["tags"], json!([9, 3]));
    assert_eq!(res.body["author"], 2);
    Ok(())
}

#[tokio::test]
async fn invalid_input_lists_every_field_error() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(
            Method::POST,
            "/api/articles/v1.1",
            EDITOR,
            json!({"color": "red", "word_count": 3, "tags": 5, "revision_info": {}}),
        )
        .await?;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.body["message"], "Invalid input");
    let errors = &res.body["fieldErrors"];
    assert_eq!(errors["color"], json!(["Unknown field"]));
    assert_eq!(errors["word_count"], json!(["Field cannot be written with this method"]));
    assert_eq!(errors["tags"], json!(["Expected a list of values"]));
    assert_eq!(errors["label"], json!(["This field is required"]));
    assert!(errors.get("revision_info").is_some());

    let res = app
        .write_as(Method::POST, "/api/tags", EDITOR, json!({"label": null}))
        .await?;
    assert_eq!(res.body["fieldErrors"]["label"], json!(["This field is required"]));

    let res = app.write_as(Method::POST, "/api/tags", EDITOR, json!(["rust"])).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn patch_updates_only_given_fields() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::PATCH, "/api/articles/v1.1/2", EDITOR, json!({"views": 13}))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["views"], 13);
    assert_eq!(res.body["label"], "Versioning");
    assert_eq!(res.body["draft"], true);

    let res = app
        .write_as(Method::PATCH, "/api/articles/v1.1/42", EDITOR, json!({"views": 1}))
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn put_replaces_the_whole_record() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::PUT, "/api/articles/v1.1/2", EDITOR, json!({"label": "Replaced"}))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["label"], "Replaced");
    assert_eq!(res.body["tags"], json!([]));
    assert!(res.body.get("views").is_none());
    assert!(res.body.get("draft").is_none());

    let res = app
        .write_as(Method::PUT, "/api/articles/v1.1/2", EDITOR, json!({"views": 1}))
        .await?;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn writes_need_exactly_one_id_and_a_body() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::PATCH, "/api/tags/3,7", EDITOR, json!({"label": "x"}))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app
        .send(
            common::request(Method::PATCH, "/api/tags/3")
                .header("authorization", common::basic(EDITOR))
                .body(axum::body::Body::empty())?,
        )
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["message"], "Request body is required");
    Ok(())
}

#[tokio::test]
async fn read_only_versions_reject_writes() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::POST, "/api/articles/v1.0", ADMIN, json!({"label": "Nope"}))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["message"], "Resource 'articles' does not support Create");
    Ok(())
}

#[tokio::test]
async fn delete_needs_admin_on_articles() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .write_as(Method::DELETE, "/api/articles/v1.1/3", EDITOR, json!(null))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .write_as(Method::DELETE, "/api/articles/v1.1/3", ADMIN, json!(null))
        .await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(res.raw.is_empty());

    let res = app.get_as("/api/articles/v1.1/3", ADMIN).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = app
        .write_as(Method::DELETE, "/api/articles/v1.1/3", ADMIN, json!(null))
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn writes_to_embedded_records_refresh_cached_renders() -> Result<()> {
    let mut config = AppConfig::development();
    config.cache.enable_render_cache = true;
    let app = common::spawn_app_with(config).await?;

    let before = app.get_as("/api/articles/v1.1/1", EDITOR).await?;
    assert_eq!(before.body["tags"][0]["label"], "rust");
    let cached = app.get_as("/api/articles/v1.1/1", EDITOR).await?;
    assert_eq!(cached.body, before.body);

    let res = app
        .write_as(Method::PATCH, "/api/tags/3", EDITOR, json!({"label": "systems"}))
        .await?;
    assert_eq!(res.status, StatusCode::OK);

    let after = app.get_as("/api/articles/v1.1/1", EDITOR).await?;
    assert_eq!(after.body["tags"][0]["label"], "systems");
    assert_eq!(after.body["label"], "Hello");

    let res = app
        .write_as(Method::PATCH, "/api/articles/v1.1/1", EDITOR, json!({"label": "Hello again"}))
        .await?;
    assert_eq!(res.body["label"], "Hello again");
    let after = app.get_as("/api/articles/v1.1/1", EDITOR).await?;
    assert_eq!(after.body["label"], "Hello again");
    Ok(())
}
