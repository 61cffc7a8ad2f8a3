//! A KRM function that transforms resources with a KCL program.
//!
//! The function reads a `ResourceList`, resolves the program named by its `functionConfig`,
//! evaluates it against the items, and writes back the program's output filtered by the
//! run's match constraints.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod eval;
pub mod manifest;
pub mod matcher;
pub mod reslist;
pub mod resource;
pub mod source;
pub mod transform;
pub mod yaml;

mod serde_ex;

pub use self::error::{Category, Error, Result};
use self::{
    eval::Evaluator, reslist::ResourceList, source::Resolver, transform::KclRunTransformer,
    transform::Transformer as _,
};

/// Runs the function over one input envelope. The output echoes the input `functionConfig`.
#[tracing::instrument(skip_all, fields(items = list.items().len()))]
pub async fn process(
    list: ResourceList,
    evaluator: Arc<dyn Evaluator>,
    resolver: Resolver,
) -> Result<ResourceList> {
    let spec = config::normalize(list.function_config())?;
    let (mut resources, function_config) = list.into_parts();

    KclRunTransformer::new(spec, function_config.clone(), resolver, evaluator)
        .transform(&mut resources)
        .await?;

    Ok(ResourceList::new(resources, function_config))
}

/// Parses `input`, processes it and renders the output envelope as YAML.
pub async fn run(input: &str, evaluator: Arc<dyn Evaluator>, resolver: Resolver) -> Result<String> {
    let list = ResourceList::parse(input)?;
    let output = process(list, evaluator, resolver).await?;
    yaml::to_string(&output).map_err(|err| Error::envelope(format!("rendering output: {err}")))
}
