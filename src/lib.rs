pub mod compose;
pub mod error;
pub mod executor;
pub mod extension;
pub mod gateway;
pub mod merge;
pub mod opencrud;
pub mod pushdown;
pub mod relation;
pub mod resolver;
pub mod schema;
pub mod selection;
pub mod transport;

pub use compose::compose;
pub use error::{CompositionError, ConfigurationError, MergeError, UpstreamError};
pub use executor::Executor;
pub use gateway::{StitchingConfig, StitchingGateway, SubgraphConfig};
pub use merge::{ComposedSchema, SchemaMerger, SdlMerger};
pub use pushdown::{FilterPushdownSpec, RawPushdown, RawPushdownTarget};
pub use relation::{RawRelation, RawRelationTarget, RelationDescriptor, RelationKind};
pub use resolver::{DelegationPlan, StitchedField};
pub use schema::ServiceSchema;
pub use transport::{
    DelegatedRequest, HttpQueryDelegate, OperationKind, QueryDelegate, RequestContext,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An incoming GraphQL-over-HTTP request body.
#[derive(Serialize, Deserialize, Debug)]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
}
