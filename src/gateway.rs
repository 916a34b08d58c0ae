use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::GraphQLRequest;
use crate::compose::compose;
use crate::error::{CompositionError, ConfigurationError};
use crate::executor::Executor;
use crate::merge::SdlMerger;
use crate::pushdown::RawPushdown;
use crate::relation::RawRelation;
use crate::schema::ServiceSchema;
use crate::transport::{HttpQueryDelegate, QueryDelegate, RequestContext};

/// The gateway configuration file: subgraphs to stitch, relations to add,
/// filter pushdowns to open up.
#[derive(Debug, Deserialize)]
pub struct StitchingConfig {
    pub subgraphs: HashMap<String, SubgraphConfig>,
    #[serde(default)]
    pub relations: Vec<RawRelation>,
    #[serde(default)]
    pub pushdowns: Vec<RawPushdown>,
}

#[derive(Debug, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    pub schema: SchemaConfig,
}

#[derive(Debug, Deserialize)]
pub struct SchemaConfig {
    /// SDL file path, relative to the configuration file.
    pub file: String,
}

/// A composed, ready-to-serve stitching gateway.
pub struct StitchingGateway {
    executor: Executor,
}

impl StitchingGateway {
    /// Reads the gateway configuration, parses every subgraph schema and
    /// composes the stitched schema. Any failure aborts startup; a gateway
    /// never comes up partially stitched.
    pub fn from_config_path(
        config_path: &Path,
        delegate_timeout: Duration,
    ) -> Result<Self, CompositionError> {
        let contents =
            fs::read_to_string(config_path).map_err(|io_error| ConfigurationError::InvalidConfig {
                message: format!("failed to read {}: {io_error}", config_path.display()),
            })?;
        let config: StitchingConfig =
            serde_yaml::from_str(&contents).map_err(|yaml_error| ConfigurationError::InvalidConfig {
                message: format!("failed to parse {}: {yaml_error}", config_path.display()),
            })?;
        let base_dir = config_path.parent().unwrap_or_else(|| Path::new(""));

        // Load in name order so last-wins merges are reproducible across
        // restarts.
        let mut names: Vec<&String> = config.subgraphs.keys().collect();
        names.sort();

        let mut schemas = Vec::with_capacity(names.len());
        let mut endpoints = HashMap::new();
        for name in names {
            let subgraph = &config.subgraphs[name];
            let schema_path = base_dir.join(&subgraph.schema.file);
            info!(subgraph = %name, path = %schema_path.display(), "loading subgraph schema");
            let sdl = fs::read_to_string(&schema_path).map_err(|io_error| {
                ConfigurationError::InvalidSchemaDocument {
                    service: name.clone(),
                    message: format!("failed to read {}: {io_error}", schema_path.display()),
                }
            })?;
            schemas.push(ServiceSchema::parse(name.clone(), sdl)?);
            endpoints.insert(name.clone(), subgraph.routing_url.clone());
        }

        let delegate = Arc::new(HttpQueryDelegate::new(endpoints, delegate_timeout));
        Self::compose_with(schemas, &config.relations, &config.pushdowns, delegate)
    }

    /// Composes a gateway from already-parsed schemas and a transport.
    /// Tests drive this with in-process fake delegates.
    pub fn compose_with(
        schemas: Vec<ServiceSchema>,
        relations: &[RawRelation],
        pushdowns: &[RawPushdown],
        delegate: Arc<dyn QueryDelegate>,
    ) -> Result<Self, CompositionError> {
        let composed = compose(&schemas, relations, pushdowns, &SdlMerger)?;
        Ok(StitchingGateway {
            executor: Executor::new(schemas, composed, delegate),
        })
    }

    /// Executes one GraphQL request and returns the response body.
    pub async fn process_request(&self, request: &GraphQLRequest, context: &RequestContext) -> Value {
        debug!(operation = ?request.operation_name, "processing request");
        self.executor.execute(request, context).await
    }

    /// The composed schema as SDL.
    pub fn sdl(&self) -> &str {
        self.executor.composed().sdl()
    }
}
