use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{Context, bail};
use indexmap::IndexMap;
use regex::Regex;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::{FetchRequest, archive, cancellable};
use crate::manifest::CredSpec;

pub const SCHEME: &str = "oci://";
pub const DEFAULT_TAG: &str = "latest";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
                               application/vnd.docker.distribution.manifest.v2+json";
const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// `registry/repository[:tag|@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciRef {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl OciRef {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let s = s.strip_prefix(SCHEME).unwrap_or(s);
        let Some((registry, rest)) = s.split_once('/') else {
            bail!("oci reference `{s}` has no repository");
        };

        let (repository, reference) = if let Some((repo, digest)) = rest.split_once('@') {
            (repo, digest)
        } else {
            match rest.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => (repo, tag),
                _ => (rest, DEFAULT_TAG),
            }
        };

        if registry.is_empty() || repository.is_empty() || reference.is_empty() {
            bail!("invalid oci reference `{s}`");
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }

    /// The registry API root.
    pub fn endpoint(&self) -> String {
        format!("https://{}", self.registry)
    }

    fn url(&self, endpoint: &str, path: &str) -> String {
        format!("{endpoint}/v2/{}/{path}", self.repository)
    }
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    digest: String,
    #[serde(default)]
    annotations: IndexMap<String, String>,
}

/// Pulls every layer of the artifact into `<dst>/<registry>/<repository>` and unpacks the
/// single `*.tar` among them.
pub async fn pull(
    client: &reqwest::Client,
    request: &FetchRequest,
    dst: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<PathBuf> {
    let reference = OciRef::parse(&request.url)?;
    pull_from(client, &reference.endpoint(), &reference, request, dst, cancel).await
}

async fn pull_from(
    client: &reqwest::Client,
    endpoint: &str,
    reference: &OciRef,
    request: &FetchRequest,
    dst: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<PathBuf> {
    let layers = cancellable(cancel, download_layers(client, endpoint, reference, request)).await?;

    let dir = dst.join(&reference.registry).join(&reference.repository);
    tokio::fs::create_dir_all(&dir).await?;
    for (name, blob) in layers {
        tokio::fs::write(dir.join(name), blob).await?;
    }
    archive::unpack_single_tar(&dir, cancel).await
}

/// Fetches the manifest and every verified layer, keyed by file name.
async fn download_layers(
    client: &reqwest::Client,
    endpoint: &str,
    reference: &OciRef,
    request: &FetchRequest,
) -> anyhow::Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut session = Session {
        client,
        credentials: request.credentials.as_ref(),
        token: None,
    };

    let manifest_url = reference.url(endpoint, &format!("manifests/{}", reference.reference));
    let manifest = session
        .get(&manifest_url, Some(MANIFEST_ACCEPT))
        .await?
        .json::<ImageManifest>()
        .await
        .context("decoding image manifest")?;

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for layer in &manifest.layers {
        let blob_url = reference.url(endpoint, &format!("blobs/{}", layer.digest));
        let blob = session
            .get(&blob_url, None)
            .await?
            .bytes()
            .await
            .with_context(|| format!("downloading blob {}", layer.digest))?;
        verify(&layer.digest, &blob)?;

        let name = layer
            .annotations
            .get(TITLE_ANNOTATION)
            .and_then(|title| Path::new(title).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(layer.digest.replace(':', "_")));
        layers.push((name, blob.to_vec()));
    }

    tracing::info!(
        reference = %format!("{}/{}", reference.registry, reference.repository),
        layers = manifest.layers.len(),
        "pulled oci artifact"
    );
    Ok(layers)
}

fn verify(digest: &str, blob: &[u8]) -> anyhow::Result<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        bail!("unsupported digest algorithm in `{digest}`");
    };
    let actual = hex::encode(Sha256::digest(blob));
    if actual != expected {
        bail!("digest mismatch: expected {expected}, got {actual}");
    }
    Ok(())
}

struct Session<'a> {
    client: &'a reqwest::Client,
    credentials: Option<&'a CredSpec>,
    token: Option<String>,
}

impl Session<'_> {
    /// GET with registry auth. A 401 is answered once per challenge, either with a bearer
    /// token from the advertised realm or with basic credentials.
    async fn get(&mut self, url: &str, accept: Option<&str>) -> anyhow::Result<reqwest::Response> {
        let response = self.send(url, accept).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response.error_for_status()?);
        }

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(Challenge::parse)
            .context("registry returned 401 without an authentication challenge")?;

        match challenge {
            Challenge::Bearer(params) => self.token = Some(self.fetch_token(&params).await?),
            Challenge::Basic => bail!("registry refused access to `{url}`"),
        }

        Ok(self.send(url, accept).await?.error_for_status()?)
    }

    async fn send(&self, url: &str, accept: Option<&str>) -> anyhow::Result<reqwest::Response> {
        let mut builder = self.client.get(url);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        } else if let Some(creds) = self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        Ok(builder.send().await?)
    }

    async fn fetch_token(&self, params: &IndexMap<String, String>) -> anyhow::Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }

        let realm = params.get("realm").context("bearer challenge without realm")?;
        let query = params
            .iter()
            .filter(|(k, _)| matches!(k.as_str(), "service" | "scope"))
            .collect::<Vec<_>>();
        let mut builder = self.client.get(realm).query(&query);
        if let Some(creds) = self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = builder
            .send()
            .await?
            .error_for_status()?
            .json::<TokenResponse>()
            .await
            .context("decoding registry token")?;
        response
            .token
            .or(response.access_token)
            .context("registry token response carried no token")
    }
}

#[derive(Debug, PartialEq)]
enum Challenge {
    Bearer(IndexMap<String, String>),
    Basic,
}

impl Challenge {
    fn parse(header: &str) -> Self {
        static PARAM: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"));

        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Challenge::Basic;
        }
        Challenge::Bearer(
            PARAM
                .captures_iter(rest)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .collect(),
        )
    }
}
