use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::{Binding, EvalOptions, Evaluator};
use crate::source::Entry;

/// Settings file layout understood by `kcl -Y`.
#[derive(Serialize)]
struct OptionsFile<'a> {
    kcl_options: Vec<KeyValue<'a>>,
}

#[derive(Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: &'a Value,
}

/// Evaluates with the `kcl` command line.
#[derive(Debug, Clone)]
pub struct KclCli {
    program: PathBuf,
}

impl Default for KclCli {
    fn default() -> Self {
        Self::new("kcl")
    }
}

impl KclCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Writes the bindings that carry data to a settings file. Returns `None` when there are
    /// none.
    fn options_file(options: &EvalOptions) -> anyhow::Result<Option<NamedTempFile>> {
        let kcl_options = effective(&options.bindings)
            .filter_map(|b| b.data.as_ref().map(|value| KeyValue { key: &b.name, value }))
            .collect::<Vec<_>>();
        if kcl_options.is_empty() {
            return Ok(None);
        }

        let yaml = serde_yaml::to_string(&OptionsFile { kcl_options })?;
        let mut file = tempfile::Builder::new()
            .prefix("krm-kcl-options-")
            .suffix(".yaml")
            .tempfile()
            .context("creating options file")?;
        file.write_all(yaml.as_bytes())
            .context("writing options file")?;
        Ok(Some(file))
    }

    fn command(
        &self,
        entry: &Entry,
        options: &EvalOptions,
        options_file: Option<&Path>,
    ) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("run").args(entry.files());

        for binding in effective(&options.bindings).filter(|b| b.data.is_none()) {
            cmd.arg("-D").arg(format!("{}={}", binding.name, binding.value));
        }
        for (flag, values) in [
            ("-O", &options.overrides),
            ("-Y", &options.settings),
            ("-S", &options.path_selectors),
        ] {
            for value in values {
                cmd.arg(flag).arg(value.as_str());
            }
        }
        if let Some(path) = options_file {
            cmd.arg("-Y").arg(path);
        }
        for (name, location) in &options.external_pkgs {
            cmd.arg("-E").arg(format!("{name}={location}"));
        }

        let flags = options.flags;
        for (enabled, flag) in [
            (flags.vendor, "--vendor"),
            (flags.sort_keys, "--sort_keys"),
            (flags.show_hidden, "--show_hidden"),
            (flags.disable_none, "--disable_none"),
            (flags.debug, "--debug"),
            (flags.strict_range_check, "--strict_range_check"),
        ] {
            if enabled {
                cmd.arg(flag);
            }
        }

        cmd.arg("--no_style")
            .current_dir(entry.workdir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Evaluator for KclCli {
    async fn evaluate(
        &self,
        entry: &Entry,
        options: &EvalOptions,
        output: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        let options_file = Self::options_file(options)?;
        let mut cmd = self.command(entry, options, options_file.as_ref().map(|f| f.path()));
        let now = Instant::now();
        let out = cmd
            .output()
            .await
            .with_context(|| format!("spawn kcl at `{}`", self.program.display()))?;

        tracing::info!(
            duration = ?now.elapsed(),
            program = %self.program.display(),
            files = ?entry.files(),
            "executed process"
        );

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!("{}", stderr.trim());
        }

        output.extend_from_slice(&out.stdout);
        Ok(())
    }
}

/// The last binding of each name.
fn effective(bindings: &[Binding]) -> impl Iterator<Item = &Binding> {
    bindings
        .iter()
        .enumerate()
        .filter(|(i, b)| !bindings[i + 1..].iter().any(|later| later.name == b.name))
        .map(|(_, b)| b)
}
