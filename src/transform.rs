use std::sync::Arc;

use crate::{
    Result,
    config::RunSpec,
    eval::{self, EvalOptions, Evaluator},
    matcher,
    reslist,
    resource::{Object, Resource},
    source::{FetchOptions, Resolver},
};

#[async_trait::async_trait]
pub trait Transformer {
    async fn transform(&mut self, resources: &mut Vec<Resource>) -> Result<()>;
}

/// Replaces the resources with the output of a KCL program, filtered by the run's match
/// constraints.
pub struct KclRunTransformer {
    spec: RunSpec,
    function_config: Option<Object>,
    resolver: Resolver,
    evaluator: Arc<dyn Evaluator>,
}

impl KclRunTransformer {
    pub fn new(
        spec: RunSpec,
        function_config: Option<Object>,
        resolver: Resolver,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            spec,
            function_config,
            resolver,
            evaluator,
        }
    }

    fn resolver(&self) -> Resolver {
        let options = FetchOptions {
            allow_plain_transport: self.spec.allow_insecure_source
                || self.resolver.options().allow_plain_transport,
            credentials: self.spec.credentials.clone().with_env_overrides(),
        };
        self.resolver.clone().with_options(options)
    }
}

#[async_trait::async_trait]
impl Transformer for KclRunTransformer {
    #[tracing::instrument(skip_all)]
    async fn transform(&mut self, resources: &mut Vec<Resource>) -> Result<()> {
        let envelope = reslist::wrap(resources.iter().cloned(), self.function_config.clone());
        let options = EvalOptions::build(&self.spec, &envelope)?;

        let resolved = self.resolver().resolve(&self.spec.source).await?;
        let documents = eval::invoke(self.evaluator.as_ref(), &resolved.entry, &options).await?;
        drop(resolved);

        let (output, _) = reslist::unwrap(documents)?;
        let constraints = self.spec.match_constraints.as_ref();
        let before = output.len();
        *resources = output
            .into_iter()
            .filter(|resource| matcher::matches(resource, constraints))
            .collect();

        tracing::debug!(name = %self.spec.name, output = before, kept = resources.len(), "transformed resources");
        Ok(())
    }
}
