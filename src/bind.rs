//! Binding: resolving (and caching) the schema for one logical collection,
//! and accepting the host engine's pushdown envelope.

use crate::{
    cache::{BindCache, BindCacheKey},
    client::{RetryClient, Transport},
    filter::{validate_filter_set, FilterSet},
    options::{self, ConnectionOptions},
    result::Result,
    scan::{Projection, ScanRequest},
    schema::{self, Schema},
};
use serde_json::Value;

/// Everything the host engine hands down for one scan. Limit and offset are
/// constant values only — non-constant limits must not be pushed and stay
/// with the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pushdown {
    pub filters: FilterSet,
    pub projection: Projection,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// An immutable bind result: the resolved schema plus everything needed to
/// compile scan requests against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub options: ConnectionOptions,
    pub collection: String,
    pub base_query: Option<Value>,
    pub schema: Schema,
}

/// Resolves the schema for a collection, consulting the cache first.
/// Configuration errors surface before any request is made.
pub fn bind<T: Transport>(
    client: &RetryClient<T>,
    options: &ConnectionOptions,
    collection: &str,
    base_query: Option<&Value>,
    cache: &BindCache,
) -> Result<Bind> {
    options.validate()?;
    if collection.is_empty() {
        return Err(options::Error::MissingParameter("collection").into());
    }

    let key = BindCacheKey::new(options, collection, base_query);
    let schema = match cache.get(&key) {
        Some(schema) => schema,
        None => {
            let schema = schema::resolve(client, collection, base_query, options.sample_size)?;
            cache.put(key, schema.clone());
            schema
        }
    };

    Ok(Bind {
        options: options.clone(),
        collection: collection.to_string(),
        base_query: base_query.cloned(),
        schema,
    })
}

impl Bind {
    /// Validates the pushdown eagerly (unsafe filters fail here, at plan
    /// compile time) and compiles the immutable scan request.
    pub fn compile(&self, pushdown: &Pushdown) -> Result<ScanRequest> {
        validate_filter_set(&pushdown.filters, &self.schema)?;
        ScanRequest::compile(
            &self.schema,
            &self.collection,
            self.base_query.as_ref(),
            &pushdown.filters,
            &pushdown.projection,
            pushdown.limit,
            pushdown.offset,
            &self.options,
        )
    }
}
