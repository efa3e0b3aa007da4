//! Resources: versioned field schemas over a data provider.

pub mod callback;
pub mod definition;
pub mod engine;
pub mod field;
pub mod manager;
pub mod retriever;
pub mod source;
pub mod version;

pub use callback::{CallbackRegistry, CallbackSpec};
pub use definition::{Resource, ResourceDefinition};
pub use engine::{FieldResolutionEngine, ResolveContext};
pub use field::{FieldDefinition, ResourceReference};
pub use manager::{ResolvedRoute, ResourceManager};
pub use retriever::PropertyRetriever;
pub use source::{
    BackendKind, BackendRecord, Cardinality, EntityField, EntityRecord, ObjectRecord, PropertySource,
};
pub use version::{ResourceVersion, VersionRequest};
