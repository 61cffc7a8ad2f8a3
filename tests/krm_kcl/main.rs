use std::{error::Error as _, path::Path, sync::Arc};

use anyhow::Context;
use krm_kcl::{
    eval::{EvalOptions, Evaluator},
    source::{Entry, Resolver},
};

datatest_stable::harness! {
    { test = test, root = "tests/krm_kcl/testdata", pattern = r".*/input.yaml" },
}

/// Treats the program text as its own output, so test programs are written as YAML.
struct Verbatim;

#[async_trait::async_trait]
impl Evaluator for Verbatim {
    async fn evaluate(
        &self,
        entry: &Entry,
        _options: &EvalOptions,
        output: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        output.extend_from_slice(entry.source()?.as_bytes());
        Ok(())
    }
}

fn test(path: &Path) -> datatest_stable::Result<()> {
    let dir = path.parent().unwrap();
    let input = std::fs::read_to_string(path).context("reading input")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(krm_kcl::run(&input, Arc::new(Verbatim), Resolver::default()));

    match result {
        Ok(actual) => snapshot(&dir.join("expected.yaml"), &actual),
        Err(err) => {
            let mut message = err.to_string();
            let mut source = err.source();
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }

            let expected_path = dir.join("expected.stderr");
            if !expected_path.exists() {
                return Err(format!("unexpected error for {}: {message}", path.display()).into());
            }
            let expected = std::fs::read_to_string(&expected_path).context("reading snapshot")?;
            if !message.contains(expected.trim()) {
                return Err(format!(
                    "error mismatch for {}:\n{}",
                    path.display(),
                    format_chunks(dissimilar::diff(expected.trim(), &message))
                )
                .into());
            }
            Ok(())
        }
    }
}

/// Compares documents rather than text. The diff is only for display.
fn snapshot(path: &Path, actual: &str) -> datatest_stable::Result<()> {
    if !path.exists() || std::env::var("UPDATE_SNAPSHOTS").is_ok() {
        std::fs::write(path, actual).context("writing snapshot")?;
        return Ok(());
    }

    let expected = std::fs::read_to_string(path).context("reading snapshot")?;
    let expected_value = serde_yaml::from_str::<serde_json::Value>(&expected)?;
    let actual_value = serde_yaml::from_str::<serde_json::Value>(actual)?;
    if expected_value == actual_value {
        return Ok(());
    }

    let expected = serde_yaml::to_string(&expected_value)?;
    let formatted = format_chunks(dissimilar::diff(&expected, actual));
    eprintln!("Snapshot mismatch for {}:\n{}", path.display(), formatted);

    Err(format!("Snapshot mismatch for {}", path.display()).into())
}

fn format_chunks(chunks: Vec<dissimilar::Chunk>) -> String {
    let mut buf = String::new();
    for chunk in chunks {
        let formatted = match chunk {
            dissimilar::Chunk::Equal(text) => text.into(),
            dissimilar::Chunk::Delete(text) => format!("\x1b[4m\x1b[31m{}\x1b[0m", text),
            dissimilar::Chunk::Insert(text) => format!("\x1b[4m\x1b[32m{}\x1b[0m", text),
        };
        buf.push_str(&formatted);
    }
    buf
}
