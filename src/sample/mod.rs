//! Sample resources served by the binary and exercised by the integration tests.
//!
//! `articles` (entity backend) comes in three versions, embeds `tags`
//! (array backend) and `users` (object backend), and carries rate limits.

use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::{
    AuthenticationPolicy, AuthenticationProviders, BasicAuthProvider, CookieAuthProvider, Identity,
    MemoryAccountStore, MemorySessionStore, Session, TokenAuthProvider, ANONYMOUS_ROLE,
};
use crate::config::{AppConfig, AuthConfig};
use crate::error::ApiError;
use crate::formatter::FormatterManager;
use crate::pipeline::Pipeline;
use crate::provider::{DbQueryDataProvider, EntityDataProvider, MemoryDataProvider, ObjectDataProvider};
use crate::rate_limit::{Clock, EventScope, RateLimitEvent, RateLimitManager, RateLimitStore, UNLIMITED};
use crate::resource::source::id_value;
use crate::resource::{
    BackendKind, CallbackRegistry, CallbackSpec, EntityField, EntityRecord, FieldDefinition,
    ObjectRecord, PropertySource, ResourceDefinition, ResourceManager, ResourceReference,
};
use crate::types::Operation;

pub const ADMIN: (&str, &str) = ("root", "toor");
pub const EDITOR: (&str, &str) = ("ada", "lovelace");
pub const READER: (&str, &str) = ("alan", "turing");

pub const DEMO_SESSION: &str = "demo-session";
pub const DEMO_CSRF: &str = "demo-csrf";

const DAY_SECS: i64 = 86_400;
const WRITE_ROLES: [&str; 2] = ["editor", "admin"];

/// Identities behind the sample accounts
pub fn admin() -> Identity {
    Identity::new("1", "root", ["admin"])
}

pub fn editor() -> Identity {
    Identity::new("2", "ada", ["editor"])
}

pub fn reader() -> Identity {
    Identity::new("3", "alan", ["reader"])
}

/// The whole sample application: resources, providers, limits and formatters
pub async fn build_pipeline(
    config: &AppConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
) -> Result<Pipeline, ApiError> {
    let resources = resources(config)?;
    let providers = authentication(&config.auth).await;
    let rate_limits = RateLimitManager::from_config(store, clock, &config.rate_limit);
    let formatters = FormatterManager::with_defaults(&config.api);
    formatters.default_formatter()?;

    Ok(Pipeline::new(resources, providers, rate_limits, formatters, config))
}

/// Token, then cookie session, then HTTP Basic
pub async fn authentication(config: &AuthConfig) -> AuthenticationProviders {
    let accounts = Arc::new(MemoryAccountStore::new());
    accounts.insert(ADMIN.0, ADMIN.1, admin()).await;
    accounts.insert(EDITOR.0, EDITOR.1, editor()).await;
    accounts.insert(READER.0, READER.1, reader()).await;

    let sessions = Arc::new(MemorySessionStore::new());
    sessions
        .insert(
            DEMO_SESSION,
            Session {
                identity: editor(),
                csrf_token: DEMO_CSRF.to_string(),
            },
        )
        .await;

    AuthenticationProviders::new()
        .with(Arc::new(TokenAuthProvider::new(config)))
        .with(Arc::new(CookieAuthProvider::new(sessions, config)))
        .with(Arc::new(BasicAuthProvider::new(accounts)))
}

pub fn callbacks() -> CallbackRegistry {
    let mut registry = CallbackRegistry::with_builtins();
    registry.register_value("word_count", |source: &PropertySource, _: &[Value]| {
        let count = source
            .get("body", None, None)
            .and_then(|body| body.as_str().map(|s| s.split_whitespace().count()))
            .unwrap_or(0);
        Ok(Some(json!(count)))
    });
    registry.register_value("handle", |source: &PropertySource, _: &[Value]| {
        Ok(source
            .get("name", None, None)
            .and_then(|name| name.as_str().and_then(|s| s.split_whitespace().next()).map(str::to_lowercase))
            .map(|first| json!(format!("@{}", first))))
    });
    registry
}

/// Every sample resource, registered and cross-checked
pub fn resources(config: &AppConfig) -> Result<ResourceManager, ApiError> {
    let mut manager = ResourceManager::new(callbacks(), &config.api);

    manager.register(tags())?;
    manager.register(users())?;

    let articles = Arc::new(EntityDataProvider::with_entities(articles_seed()));
    manager.register(articles_v1_0(articles.clone()))?;
    manager.register(articles_v1_1(articles.clone()))?;
    manager.register(articles_v2_0(articles))?;

    manager.validate()?;
    Ok(manager)
}

fn request_limit() -> RateLimitEvent {
    RateLimitEvent::new("request", DAY_SECS)
        .limit(ANONYMOUS_ROLE, 2)
        .limit("reader", 50)
        .limit("editor", 100)
        .limit("admin", UNLIMITED)
}

fn tags() -> ResourceDefinition {
    let provider = MemoryDataProvider::with_records([
        json!({"id": 3, "name": "rust"}),
        json!({"id": 7, "name": "http"}),
        json!({"id": 9, "name": "async"}),
    ]);
    ResourceDefinition::new("tags", 1, 0, BackendKind::Array, Arc::new(provider))
        .field(FieldDefinition::property("id", "id").read_only())
        .field(FieldDefinition::property("label", "name").process("trim").required())
        .writable()
        .require_roles(Operation::Create, WRITE_ROLES)
        .require_roles(Operation::Update, WRITE_ROLES)
        .require_roles(Operation::Replace, WRITE_ROLES)
        .require_roles(Operation::Remove, WRITE_ROLES)
}

#[derive(Debug)]
struct User {
    id: u64,
    name: &'static str,
    email: &'static str,
}

impl ObjectRecord for User {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(json!(self.id)),
            "name" => Some(json!(self.name)),
            "email" => Some(json!(self.email)),
            _ => None,
        }
    }
}

fn users() -> ResourceDefinition {
    let users: Vec<Arc<dyn ObjectRecord>> = vec![
        Arc::new(User { id: 1, name: "Ada Lovelace", email: "ada@example.com" }),
        Arc::new(User { id: 2, name: "Grace Hopper", email: "grace@example.com" }),
        Arc::new(User { id: 3, name: "Alan Turing", email: "alan@example.com" }),
    ];
    ResourceDefinition::new("users", 1, 0, BackendKind::Object, Arc::new(ObjectDataProvider::new(users)))
        .field(FieldDefinition::property("id", "id"))
        .field(FieldDefinition::property("name", "name"))
        .field(FieldDefinition::computed("handle", "handle"))
        .field(FieldDefinition::property("email", "email").roles(["admin"]))
}

fn articles_seed() -> Vec<EntityRecord> {
    let revision = |number: u64, editor: &str| EntityField {
        main_column: "number".to_string(),
        ..EntityField::single(json!({"number": number, "editor": editor}))
    };
    vec![
        EntityRecord::new("1")
            .with_value("title", json!("Hello"))
            .with_value("body", json!("Hello world from the resource pipeline"))
            .with_values("tags", [json!(3), json!(7)])
            .with_value("author", id_value("1"))
            .with_value("views", json!(0))
            .with_value("draft", json!(false))
            .with_field("revision", revision(4, "ada")),
        EntityRecord::new("2")
            .with_value("title", json!("Versioning"))
            .with_value("body", json!("Minor versions add fields"))
            .with_values("tags", [json!(9)])
            .with_value("author", id_value("2"))
            .with_value("views", json!(12))
            .with_value("draft", json!(true))
            .with_field("revision", revision(1, "grace")),
        EntityRecord::new("3")
            .with_value("title", json!("Limits"))
            .with_value("body", json!(""))
            .with_values("tags", Vec::<Value>::new())
            .with_value("author", id_value("3"))
            .with_value("views", json!(5))
            .with_value("draft", json!(false)),
    ]
}

fn tag_reference(full_view: bool) -> ResourceReference {
    let reference = ResourceReference::new("tags", 1, 0);
    if full_view {
        reference.full_view()
    } else {
        reference
    }
}

fn user_reference(full_view: bool) -> ResourceReference {
    let reference = ResourceReference::new("users", 1, 0);
    if full_view {
        reference.full_view()
    } else {
        reference
    }
}

/// Read-only, identifiers for relations
fn articles_v1_0(provider: Arc<EntityDataProvider>) -> ResourceDefinition {
    ResourceDefinition::new("articles", 1, 0, BackendKind::Entity, provider)
        .field(FieldDefinition::property("id", "id"))
        .field(FieldDefinition::property("label", "title"))
        .field(FieldDefinition::property("tags", "tags").multiple().embed(tag_reference(false)))
        .field(FieldDefinition::property("author", "author").embed(user_reference(false)))
        .field(FieldDefinition::property("views", "views"))
        .field(FieldDefinition::property("draft", "draft"))
        .rate_limit(request_limit())
}

/// Writable, full views for relations, computed fields, cached renders
fn articles_v1_1(provider: Arc<EntityDataProvider>) -> ResourceDefinition {
    ResourceDefinition::new("articles", 1, 1, BackendKind::Entity, provider)
        .field(FieldDefinition::property("id", "id").read_only())
        .field(FieldDefinition::property("label", "title").process("trim").required())
        .field(FieldDefinition::property("body", "body"))
        .field(
            FieldDefinition::property("summary", "body")
                .process("null_if_blank")
                .process(CallbackSpec::new("truncate").with_args([json!(11)]))
                .read_only(),
        )
        .field(FieldDefinition::computed("word_count", "word_count").read_only())
        .field(FieldDefinition::property("tags", "tags").multiple().embed(tag_reference(true)))
        .field(FieldDefinition::property("author", "author").embed(user_reference(true)))
        .field(FieldDefinition::property("views", "views"))
        .field(FieldDefinition::property("draft", "draft"))
        .field(FieldDefinition::property("revision", "revision").read_only())
        .field(
            FieldDefinition::property("revision_info", "revision")
                .metadata_view()
                .read_only()
                .roles(WRITE_ROLES),
        )
        .writable()
        .require_roles(Operation::Create, WRITE_ROLES)
        .require_roles(Operation::Update, WRITE_ROLES)
        .require_roles(Operation::Replace, WRITE_ROLES)
        .require_roles(Operation::Remove, ["admin"])
        .rate_limit(request_limit())
        .rate_limit(
            RateLimitEvent::new("write", 3_600)
                .limit("editor", 5)
                .limit("admin", UNLIMITED)
                .scoped(EventScope::WriteMethods),
        )
        .cache_rendered()
}

/// Token-only, HAL output, renamed label
fn articles_v2_0(provider: Arc<EntityDataProvider>) -> ResourceDefinition {
    ResourceDefinition::new("articles", 2, 0, BackendKind::Entity, provider)
        .field(FieldDefinition::property("id", "id"))
        .field(FieldDefinition::property("headline", "title"))
        .field(FieldDefinition::property("tags", "tags").multiple().embed(tag_reference(true)))
        .authentication(AuthenticationPolicy::required().only([TokenAuthProvider::NAME]))
        .formatter("hal_json")
        .rate_limit(request_limit())
}

/// Expose a Postgres table as a row-backed resource; every column is a
/// public field of the same name
pub fn table_resource(
    pool: PgPool,
    table: &str,
    columns: &[String],
) -> Result<ResourceDefinition, ApiError> {
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let provider = DbQueryDataProvider::new(pool, table, "id", &column_refs, &[])?;

    let mut definition = ResourceDefinition::new(table, 1, 0, BackendKind::Row, Arc::new(provider))
        .field(FieldDefinition::property("id", "id").read_only())
        .writable()
        .require_roles(Operation::Create, WRITE_ROLES)
        .require_roles(Operation::Update, WRITE_ROLES)
        .require_roles(Operation::Replace, WRITE_ROLES)
        .require_roles(Operation::Remove, WRITE_ROLES);
    for column in columns {
        definition = definition.field(FieldDefinition::property(column.as_str(), column.as_str()));
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_resources_register_and_validate() {
        let manager = resources(&AppConfig::development()).unwrap();
        assert_eq!(
            manager.versions("articles").iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            ["1.0", "1.1", "2.0"]
        );
        assert_eq!(manager.latest("articles", Some(1)).map(|v| v.to_string()), Some("1.1".into()));
    }

    #[tokio::test]
    async fn providers_are_ordered_token_cookie_basic() {
        let providers = authentication(&AppConfig::development().auth).await;
        assert_eq!(providers.names(), ["token", "cookie", "basic"]);
    }
}
