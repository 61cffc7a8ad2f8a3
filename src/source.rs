//! Turns a program reference into runnable entry files.

mod archive;
mod entry;
mod git;
mod http;
mod oci;

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::anyhow;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub use self::entry::{Entry, INLINE_FILE, MAIN_FILE, MOD_FILE, SETTINGS_FILE};
pub use self::oci::OciRef;
use crate::{Error, Result, manifest::CredSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Literal program text.
    Inline(String),
    Local(PathBuf),
    /// `oci://registry/repository[:tag]`
    Oci(String),
    Git(String),
    Http(String),
}

impl Source {
    pub fn classify(reference: &str) -> Source {
        let source = if reference.starts_with(oci::SCHEME) {
            Source::Oci(reference.to_string())
        } else if Path::new(reference).is_absolute() || reference.starts_with('.') {
            Source::Local(PathBuf::from(reference))
        } else if git::is_git(reference) {
            Source::Git(reference.to_string())
        } else if http::is_http(reference) {
            Source::Http(reference.to_string())
        } else {
            Source::Inline(reference.to_string())
        };
        tracing::debug!(kind = source.kind(), "classified program reference");
        source
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Source::Inline(_) => "inline",
            Source::Local(_) => "local",
            Source::Oci(_) => "oci",
            Source::Git(_) => "git",
            Source::Http(_) => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Oci,
    Git,
    Http,
}

/// A remote fetch, with go-getter style `//subdir` and `?ref=` suffixes split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The reference as written by the user.
    pub source: String,
    pub protocol: Protocol,
    pub url: String,
    pub subdir: Option<String>,
    pub revision: Option<String>,
    pub credentials: Option<CredSpec>,
}

impl FetchRequest {
    pub fn new(source: &Source) -> anyhow::Result<Self> {
        let (protocol, raw) = match source {
            Source::Oci(raw) => (Protocol::Oci, raw),
            Source::Git(raw) => (Protocol::Git, raw),
            Source::Http(raw) => (Protocol::Http, raw),
            Source::Inline(_) | Source::Local(_) => {
                return Err(anyhow!("{} sources are not fetched", source.kind()));
            }
        };

        let mut request = Self {
            source: raw.clone(),
            protocol,
            url: raw.clone(),
            subdir: None,
            revision: None,
            credentials: None,
        };
        if protocol == Protocol::Oci {
            return Ok(request);
        }

        let normalized = match protocol {
            Protocol::Git => git::normalize(raw),
            _ => raw.clone(),
        };
        let mut url = url::Url::parse(&normalized)?;

        if let Some((base, subdir)) = url.path().split_once("//") {
            let (base, subdir) = (base.to_string(), subdir.trim_matches('/').to_string());
            url.set_path(&base);
            request.subdir = Some(subdir).filter(|s| !s.is_empty());
        }

        if protocol == Protocol::Git {
            let mut rest = vec![];
            for (key, value) in url.query_pairs() {
                if key == "ref" {
                    request.revision = Some(value.into_owned());
                } else {
                    rest.push((key.into_owned(), value.into_owned()));
                }
            }
            if rest.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(rest);
            }
        }

        request.url = url.into();
        Ok(request)
    }

    /// `http://` and `git://` send everything in the clear.
    pub fn is_plain_transport(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with(git::SCHEME)
    }
}

/// Fetches a remote program into a directory.
#[async_trait::async_trait]
pub trait Getter: Send + Sync {
    /// Populates `dst` and returns the directory to discover entry files in. Implementations
    /// should stop promptly once `cancel` fires, and must not touch `dst` after returning.
    async fn get(
        &self,
        request: &FetchRequest,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultGetter {
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl Getter for DefaultGetter {
    async fn get(
        &self,
        request: &FetchRequest,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PathBuf> {
        let root = match request.protocol {
            Protocol::Oci => return oci::pull(&self.client, request, dst, cancel).await,
            Protocol::Git => git::clone(request, dst, cancel)
                .await
                .map(|()| dst.to_path_buf())?,
            Protocol::Http => http::download(&self.client, request, dst, cancel)
                .await
                .map(|()| dst.to_path_buf())?,
        };

        match &request.subdir {
            Some(subdir) => {
                let dir = root.join(subdir);
                anyhow::ensure!(dir.is_dir(), "subdirectory `{subdir}` not found in fetched source");
                Ok(dir)
            }
            None => Ok(root),
        }
    }
}

/// Races `work` against `cancel`. Only for work that leaves nothing running once dropped.
async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::select! {
        res = work => res,
        () = cancel.cancelled() => Err(anyhow!("fetch cancelled")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Permits `http://` and `git://`.
    pub allow_plain_transport: bool,
    pub credentials: CredSpec,
}

/// An entry plus the scratch directory backing it, removed on drop.
#[derive(Debug)]
pub struct Resolved {
    pub entry: Entry,
    scratch: Option<TempDir>,
}

impl Resolved {
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|dir| dir.path())
    }
}

#[derive(Clone)]
pub struct Resolver {
    getter: Arc<dyn Getter>,
    options: FetchOptions,
    interrupt: CancellationToken,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(DefaultGetter::default()))
    }
}

impl Resolver {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            getter,
            options: FetchOptions::default(),
            interrupt: CancellationToken::new(),
        }
    }

    /// Cancelling `token` aborts any in-flight fetch.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    #[tracing::instrument(skip_all, fields(kind = tracing::field::Empty))]
    pub async fn resolve(&self, reference: &str) -> Result<Resolved> {
        let source = Source::classify(reference);
        tracing::Span::current().record("kind", source.kind());

        match source {
            Source::Inline(code) => {
                let scratch = scratch_dir()?;
                let file = scratch.path().join(INLINE_FILE);
                tokio::fs::write(&file, code).await?;
                Ok(Resolved {
                    entry: Entry::new(scratch.path(), vec![file]),
                    scratch: Some(scratch),
                })
            }
            Source::Local(path) => Ok(Resolved {
                entry: resolve_local(&path)?,
                scratch: None,
            }),
            remote => {
                let mut request = FetchRequest::new(&remote).map_err(|source| Error::Fetch {
                    src: reference.to_string(),
                    source,
                })?;

                if request.is_plain_transport() && !self.options.allow_plain_transport {
                    return Err(Error::Fetch {
                        src: reference.to_string(),
                        source: anyhow!(
                            "plain transport is disabled, set the `{}` annotation to allow it",
                            crate::resource::annotation::ALLOW_INSECURE_SOURCE
                        ),
                    });
                }

                let target = match request.protocol {
                    Protocol::Oci => OciRef::parse(&request.url)
                        .map(|r| format!("{}/{}", r.registry, r.repository))
                        .unwrap_or_default(),
                    _ => request.url.clone(),
                };
                if self.options.credentials.applies_to(&target) {
                    request.credentials = Some(self.options.credentials.clone());
                }

                let scratch = scratch_dir()?;
                let root = self.fetch(request, scratch.path()).await?;
                Ok(Resolved {
                    entry: Entry::discover(&root)?,
                    scratch: Some(scratch),
                })
            }
        }
    }

    /// Runs the getter as its own task and races it against the interrupt token.
    async fn fetch(&self, request: FetchRequest, dst: &Path) -> Result<PathBuf> {
        let src = request.source.clone();
        let cancel = self.interrupt.child_token();
        let mut task = tokio::spawn({
            let getter = Arc::clone(&self.getter);
            let cancel = cancel.clone();
            let dst = dst.to_path_buf();
            async move { getter.get(&request, &dst, &cancel).await }
        });

        tokio::select! {
            biased;
            () = self.interrupt.cancelled() => {
                cancel.cancel();
                // Wait for the getter to let go of `dst` before the scratch dir is removed.
                let _ = (&mut task).await;
                tracing::warn!(%src, "fetch interrupted");
                Err(Error::Interrupted(src))
            }
            joined = &mut task => match joined {
                Ok(Ok(root)) => Ok(root),
                Ok(Err(err)) => Err(match err.downcast::<Error>() {
                    Ok(err) => err,
                    Err(source) => Error::Fetch { src, source },
                }),
                Err(err) => Err(Error::Fetch { src, source: err.into() }),
            },
        }
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("krm-kcl-").tempdir()?)
}

/// Searches upward for `kcl.mod` and discovers the entry from that package root, or from the
/// reference's own directory when there is none.
fn resolve_local(path: &Path) -> Result<Entry> {
    if !path.exists() {
        return Err(Error::NoEntry);
    }

    let path = std::path::absolute(path)?;
    let start = if path.is_dir() {
        path.as_path()
    } else {
        path.parent().ok_or(Error::NoEntry)?
    };

    let root = start
        .ancestors()
        .find(|dir| dir.join(MOD_FILE).is_file())
        .unwrap_or(start);
    Entry::discover(root)
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use super::*;

    #[test]
    fn classify() {
        assert_eq!(
            Source::classify("./local/dir"),
            Source::Local(PathBuf::from("./local/dir"))
        );
        assert_eq!(
            Source::classify("/abs/main.k"),
            Source::Local(PathBuf::from("/abs/main.k"))
        );
        assert!(matches!(Source::classify("oci://registry/repo:tag"), Source::Oci(_)));
        assert!(matches!(Source::classify("git::https://host/repo.git"), Source::Git(_)));
        assert!(matches!(Source::classify("github.com/org/repo"), Source::Git(_)));
        assert!(matches!(Source::classify("https://host/file"), Source::Http(_)));
        assert_eq!(
            Source::classify("{ a = 1 }"),
            Source::Inline("{ a = 1 }".to_string())
        );
    }

    #[test]
    fn fetch_request_suffixes() {
        let request =
            FetchRequest::new(&Source::classify("git::https://host/org/repo.git//pkg/sub?ref=v1.2"))
                .unwrap();
        assert_eq!(request.protocol, Protocol::Git);
        assert_eq!(request.url, "https://host/org/repo.git");
        assert_eq!(request.subdir.as_deref(), Some("pkg/sub"));
        assert_eq!(request.revision.as_deref(), Some("v1.2"));
        assert!(!request.is_plain_transport());

        let request = FetchRequest::new(&Source::classify("github.com/org/repo")).unwrap();
        assert_eq!(request.url, "https://github.com/org/repo");
        assert_eq!(request.subdir, None);

        let request = FetchRequest::new(&Source::classify("http://host/prog.k?x=1")).unwrap();
        assert_eq!(request.url, "http://host/prog.k?x=1");
        assert!(request.is_plain_transport());

        let request = FetchRequest::new(&Source::classify("oci://ghcr.io/org/fn:1.0")).unwrap();
        assert_eq!(request.url, "oci://ghcr.io/org/fn:1.0");
    }

    #[tokio::test]
    async fn inline_is_materialized() {
        let resolved = Resolver::default().resolve("a = 1").await.unwrap();
        let scratch = resolved.scratch_dir().unwrap().to_path_buf();
        assert_eq!(resolved.entry.files(), [scratch.join(INLINE_FILE)]);
        assert_eq!(resolved.entry.source().unwrap(), "a = 1");

        drop(resolved);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn local_package_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MOD_FILE), "[package]\n").unwrap();
        std::fs::write(dir.path().join(MAIN_FILE), "a = 1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/other.k"), "b = 1").unwrap();

        let resolved = Resolver::default()
            .resolve(dir.path().join("sub/other.k").to_str().unwrap())
            .await
            .unwrap();
        assert!(resolved.scratch_dir().is_none());
        assert_eq!(resolved.entry.files(), [dir.path().join(MAIN_FILE)]);
    }

    #[tokio::test]
    async fn local_without_package_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("prog")).unwrap();
        std::fs::write(dir.path().join("prog/b.k"), "").unwrap();
        std::fs::write(dir.path().join("prog/a.k"), "").unwrap();

        let resolved = Resolver::default()
            .resolve(dir.path().join("prog").to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(
            resolved.entry.files(),
            [dir.path().join("prog/a.k"), dir.path().join("prog/b.k")]
        );
    }

    #[tokio::test]
    async fn local_missing_is_no_entry() {
        let err = Resolver::default()
            .resolve("./does/not/exist")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoEntry), "{err}");
        assert!(err.to_string().contains("no kcl entry found"));
    }

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<(FetchRequest, PathBuf)>>,
        stall: bool,
    }

    #[async_trait::async_trait]
    impl Getter for Recording {
        async fn get(
            &self,
            request: &FetchRequest,
            dst: &Path,
            cancel: &CancellationToken,
        ) -> anyhow::Result<PathBuf> {
            self.requests
                .lock()
                .unwrap()
                .push((request.clone(), dst.to_path_buf()));
            if self.stall {
                cancel.cancelled().await;
                anyhow::bail!("cancelled");
            }
            std::fs::write(dst.join(MAIN_FILE), "fetched = True")?;
            Ok(dst.to_path_buf())
        }
    }

    #[tokio::test]
    async fn remote_fetch_discovers_entry() {
        let getter = Arc::new(Recording::default());
        let resolver = Resolver::new(getter.clone()).with_options(FetchOptions {
            allow_plain_transport: false,
            credentials: CredSpec {
                url: "ghcr.io".into(),
                username: "u".into(),
                password: "p".into(),
            },
        });

        let resolved = resolver.resolve("oci://ghcr.io/org/fn:1.0").await.unwrap();
        assert_eq!(resolved.entry.source().unwrap(), "fetched = True");

        let requests = getter.requests.lock().unwrap();
        let (request, dst) = &requests[0];
        assert_eq!(request.protocol, Protocol::Oci);
        assert_eq!(request.credentials.as_ref().unwrap().username, "u");
        assert_eq!(Some(dst.as_path()), resolved.scratch_dir());
    }

    #[tokio::test]
    async fn credentials_scoped_to_url() {
        let getter = Arc::new(Recording::default());
        let resolver = Resolver::new(getter.clone()).with_options(FetchOptions {
            credentials: CredSpec {
                url: "ghcr.io".into(),
                username: "u".into(),
                password: "p".into(),
            },
            ..Default::default()
        });

        resolver.resolve("https://example.com/main.k").await.unwrap();
        resolver.resolve("oci://ghcr.io.attacker.example/fn").await.unwrap();
        resolver.resolve("oci://ghcr.io/org/fn").await.unwrap();

        let requests = getter.requests.lock().unwrap();
        assert!(requests[0].0.credentials.is_none());
        assert!(requests[1].0.credentials.is_none());
        assert!(requests[2].0.credentials.is_some());
    }

    #[tokio::test]
    async fn plain_transport_needs_opt_in() {
        let getter = Arc::new(Recording::default());
        let resolver = Resolver::new(getter.clone());
        let err = resolver.resolve("http://example.com/main.k").await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }), "{err}");
        assert!(getter.requests.lock().unwrap().is_empty());

        let resolver = resolver.with_options(FetchOptions {
            allow_plain_transport: true,
            ..Default::default()
        });
        resolver.resolve("http://example.com/main.k").await.unwrap();
        resolver.resolve("git://example.com/repo").await.unwrap();
        assert_eq!(getter.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn getter_errors_are_fetch_errors() {
        struct Failing;

        #[async_trait::async_trait]
        impl Getter for Failing {
            async fn get(
                &self,
                _: &FetchRequest,
                dst: &Path,
                _: &CancellationToken,
            ) -> anyhow::Result<PathBuf> {
                anyhow::bail!("connection refused to {}", dst.display())
            }
        }

        let err = Resolver::new(Arc::new(Failing))
            .resolve("https://example.com/main.k")
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::Category::Resolution);
        assert!(matches!(err, Error::Fetch { ref src, .. } if src == "https://example.com/main.k"));
    }

    #[tokio::test]
    async fn interrupt_cancels_fetch_and_cleans_up() {
        let getter = Arc::new(Recording {
            stall: true,
            ..Default::default()
        });
        let interrupt = CancellationToken::new();
        let resolver = Resolver::new(getter.clone()).with_interrupt(interrupt.clone());

        let handle =
            tokio::spawn(async move { resolver.resolve("https://example.com/main.k").await });

        let dst = loop {
            if let Some((_, dst)) = getter.requests.lock().unwrap().first() {
                break dst.clone();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        assert!(dst.exists());

        interrupt.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)), "{err}");
        assert!(!dst.exists());
    }
}
