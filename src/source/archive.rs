use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use crate::Error;

pub fn is_archive(name: &str) -> bool {
    [".tar", ".tar.gz", ".tgz"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Finds the one `*.tar` file in `dir` and unpacks it into a sibling directory named after it.
pub async fn unpack_single_tar(dir: &Path, cancel: &CancellationToken) -> anyhow::Result<PathBuf> {
    let mut tars = vec![];
    for dirent in std::fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tar") {
            tars.push(path);
        }
    }

    if tars.len() != 1 {
        return Err(Error::ArchiveCount {
            dir: dir.to_path_buf(),
            count: tars.len(),
        }
        .into());
    }

    let tar = tars.remove(0);
    let dst = tar.with_extension("");
    let out = dst.clone();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || unpack(&tar, &out, &cancel)).await??;
    Ok(dst)
}

/// Unpacks a `.tar`, `.tar.gz` or `.tgz` file into `dst`, stopping between entries once
/// `cancel` fires.
pub fn unpack(archive: &Path, dst: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("opening archive `{}`", archive.display()))?;
    let name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    std::fs::create_dir_all(dst)?;
    let mut tar = tar::Archive::new(reader);
    let entries = tar
        .entries()
        .with_context(|| format!("reading archive `{}`", archive.display()))?;
    for entry in entries {
        if cancel.is_cancelled() {
            bail!("unpacking `{}` cancelled", archive.display());
        }
        entry
            .and_then(|mut entry| entry.unpack_in(dst))
            .with_context(|| format!("unpacking archive `{}`", archive.display()))?;
    }
    Ok(())
}
