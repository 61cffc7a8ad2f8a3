mod kcl;
mod options;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub use self::kcl::KclCli;
pub use self::options::{Binding, EvalOptions, RESERVED, to_kcl_literal};
use crate::{Error, Result, source::Entry};

/// Runs a program. Implementations write the program's YAML output to `output` and report
/// diagnostics as errors.
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        entry: &Entry,
        options: &EvalOptions,
        output: &mut Vec<u8>,
    ) -> anyhow::Result<()>;
}

/// Evaluates once and parses the output into documents.
#[tracing::instrument(skip_all, fields(files = entry.files().len()))]
pub async fn invoke(
    evaluator: &dyn Evaluator,
    entry: &Entry,
    options: &EvalOptions,
) -> Result<Vec<Value>> {
    let mut output = Vec::new();
    evaluator
        .evaluate(entry, options, &mut output)
        .await
        .map_err(|err| Error::Eval(strip_ansi(&format!("{err:#}"))))?;

    let mut documents = crate::yaml::from_slice_multi(&output)
        .map_err(|err| Error::envelope(format!("parsing program output: {err}")))?;
    if options.flags.disable_none {
        documents.iter_mut().for_each(prune_nulls);
    }

    tracing::debug!(documents = documents.len(), "evaluated program");
    Ok(documents)
}

pub fn strip_ansi(s: &str) -> String {
    static ANSI: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid regex")
    });
    ANSI.replace_all(s, "").into_owned()
}

/// Drops null-valued mapping entries at any depth.
fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(elements) => elements.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Canned(Result<&'static str, &'static str>);

    #[async_trait::async_trait]
    impl Evaluator for Canned {
        async fn evaluate(
            &self,
            _: &Entry,
            _: &EvalOptions,
            output: &mut Vec<u8>,
        ) -> anyhow::Result<()> {
            match self.0 {
                Ok(text) => {
                    output.extend_from_slice(text.as_bytes());
                    Ok(())
                }
                Err(diagnostic) => Err(anyhow::anyhow!(diagnostic)),
            }
        }
    }

    fn entry() -> Entry {
        Entry::new("/", vec![])
    }

    #[tokio::test]
    async fn multi_document_output() {
        let docs = invoke(&Canned(Ok("a: 1\n---\nb: null\n")), &entry(), &EvalOptions::default())
            .await
            .unwrap();
        assert_eq!(docs, [json!({"a": 1}), json!({"b": null})]);
    }

    #[tokio::test]
    async fn disable_none_prunes() {
        let options = EvalOptions {
            flags: crate::manifest::CompileFlags {
                disable_none: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let docs = invoke(
            &Canned(Ok("a: null\nb:\n  c: null\n  d: [null, {e: null}]\n")),
            &entry(),
            &options,
        )
        .await
        .unwrap();
        assert_eq!(docs, [json!({"b": {"d": [null, {}]}})]);
    }

    #[tokio::test]
    async fn diagnostics_are_stripped() {
        let err = invoke(
            &Canned(Err("\x1b[31merror\x1b[0m[E2G22]: expected int")),
            &entry(),
            &EvalOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), crate::Category::Evaluation);
        assert_eq!(err.to_string(), "error[E2G22]: expected int");
    }

    #[tokio::test]
    async fn unparseable_output() {
        let err = invoke(&Canned(Ok("a: [")), &entry(), &EvalOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::Category::Envelope);
    }
}
