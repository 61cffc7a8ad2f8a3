use std::{path::Path, time::Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use super::{FetchRequest, archive, cancellable};

pub const SCHEMES: &[&str] = &["http://", "https://"];

pub fn is_http(reference: &str) -> bool {
    SCHEMES.iter().any(|scheme| reference.starts_with(scheme))
}

/// Downloads `request.url` into `dst`, unpacking archives in place.
pub async fn download(
    client: &reqwest::Client,
    request: &FetchRequest,
    dst: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let url = url::Url::parse(&request.url)
        .with_context(|| format!("parsing url `{}`", request.url))?;
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string();

    let mut builder = client.get(url);
    if let Some(creds) = &request.credentials {
        builder = builder.basic_auth(&creds.username, Some(&creds.password));
    }

    let now = Instant::now();
    let body = cancellable(cancel, async {
        builder
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await
            .context("reading response body")
    })
    .await?;
    tracing::info!(duration = ?now.elapsed(), url = %request.url, bytes = body.len(), "downloaded");

    let file = dst.join(&name);
    tokio::fs::write(&file, &body).await?;
    if archive::is_archive(&name) {
        let out = dst.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            archive::unpack(&file, &out, &cancel)?;
            std::fs::remove_file(&file)?;
            anyhow::Ok(())
        })
        .await??;
    }

    Ok(())
}
