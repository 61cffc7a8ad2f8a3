use std::{path::Path, process::Stdio, time::Instant};

use anyhow::{Context, bail};
use tokio::io::AsyncReadExt as _;
use tokio_util::sync::CancellationToken;

use super::FetchRequest;

/// Forced-getter prefix, `git::https://host/repo.git`.
pub const FORCED: &str = "git::";
pub const SCHEME: &str = "git://";
pub const HOSTS: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

pub fn is_git(reference: &str) -> bool {
    reference.starts_with(FORCED)
        || reference.starts_with(SCHEME)
        || HOSTS.iter().any(|host| reference.starts_with(host))
}

/// Strips the forced-getter prefix and expands bare hosting-service references to https.
pub fn normalize(reference: &str) -> String {
    let reference = reference.strip_prefix(FORCED).unwrap_or(reference);
    if HOSTS.iter().any(|host| reference.starts_with(host)) {
        format!("https://{reference}")
    } else {
        reference.to_string()
    }
}

/// Shallow clone of `request.url` at `request.revision` into `dst`. On cancellation the
/// process is killed and reaped before returning.
pub async fn clone(
    request: &FetchRequest,
    dst: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut url = url::Url::parse(&request.url)
        .with_context(|| format!("parsing git url `{}`", request.url))?;
    if let Some(creds) = &request.credentials {
        // Errors only for urls without an authority.
        let _ = url.set_username(&creds.username);
        let _ = url.set_password(Some(&creds.password));
    }

    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("clone").arg("--quiet").arg("--depth").arg("1");
    if let Some(revision) = &request.revision {
        cmd.arg("--branch").arg(revision);
    }
    cmd.arg(url.as_str())
        .arg(dst)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let now = Instant::now();
    let mut child = cmd.spawn().context("spawn git")?;
    let mut stderr = child.stderr.take().context("git stderr is not piped")?;
    let stderr = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await.map(|_| buf)
    });

    let status = tokio::select! {
        status = child.wait() => Some(status.context("waiting for git")?),
        () = cancel.cancelled() => None,
    };
    let Some(status) = status else {
        if let Err(err) = child.kill().await {
            tracing::warn!(%err, "failed to kill git");
        }
        bail!("git clone cancelled");
    };

    let stderr = stderr.await??;
    if !status.success() {
        bail!(
            "git clone failed with status {status}: {}",
            String::from_utf8_lossy(&stderr).trim()
        );
    }

    tracing::info!(
        duration = ?now.elapsed(),
        url = %request.url,
        revision = ?request.revision,
        "executed git clone"
    );

    Ok(())
}
