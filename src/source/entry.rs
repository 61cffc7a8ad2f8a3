use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::{Error, Result};

pub const MOD_FILE: &str = "kcl.mod";
pub const SETTINGS_FILE: &str = "kcl.yaml";
pub const MAIN_FILE: &str = "main.k";
pub const INLINE_FILE: &str = "prog.k";
pub const EXTENSION: &str = "k";

/// The program files the evaluator runs, in order, and the directory it runs them from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    workdir: PathBuf,
    files: Vec<PathBuf>,
}

impl Entry {
    pub fn new(workdir: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            files,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The concatenated program text.
    pub fn source(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        for file in &self.files {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("reading entry file `{}`", file.display()))?;
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&text);
        }
        Ok(buf)
    }

    /// Locates the program in `dir`:
    /// 1. the files listed by `kcl.yaml`, in declared order
    /// 2. `main.k`
    /// 3. every `*.k` file in `dir` except `_*` and `test_*`, in lexical order
    pub fn discover(dir: &Path) -> Result<Entry> {
        let settings = dir.join(SETTINGS_FILE);
        if settings.is_file() {
            let files = settings_files(&settings)?;
            if !files.is_empty() {
                let files = files
                    .into_iter()
                    .map(|file| {
                        let path = dir.join(file);
                        if path.is_file() {
                            Ok(path)
                        } else {
                            Err(Error::MissingEntryFile(path))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Entry::new(dir, files));
            }
        }

        let main = dir.join(MAIN_FILE);
        if main.is_file() {
            return Ok(Entry::new(dir, vec![main]));
        }

        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(Error::NoEntry),
            Err(err) => return Err(err.into()),
        };

        let mut files = vec![];
        for dirent in read_dir {
            let path = dirent?.path();
            if path.is_file() && is_program_file(&path) {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(Error::NoEntry);
        }

        files.sort();
        Ok(Entry::new(dir, files))
    }
}

fn is_program_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    path.extension().is_some_and(|ext| ext == EXTENSION)
        && !name.starts_with('_')
        && !name.starts_with("test_")
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    kcl_cli_configs: CliConfigs,
}

#[derive(Debug, Default, Deserialize)]
struct CliConfigs {
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    files: Vec<String>,
    #[serde(default, deserialize_with = "crate::serde_ex::nullable::deserialize")]
    file: Vec<String>,
}

fn settings_files(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(vec![]);
    }

    let settings = crate::yaml::from_str::<Option<Settings>>(&text)
        .map_err(|err| Error::config(format!("parsing `{}`: {err}", path.display())))?
        .unwrap_or_default();
    let CliConfigs { mut files, file } = settings.kcl_cli_configs;
    files.extend(file);
    Ok(files)
}
