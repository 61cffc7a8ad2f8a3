use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by a single KCL function run.
///
/// Every variant is fatal for the call that produced it. Nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),
    #[error("no kcl entry found, please check the code package")]
    NoEntry,
    #[error("entry file `{}` listed in kcl.yaml does not exist", .0.display())]
    MissingEntryFile(PathBuf),
    #[error("expected exactly one package archive under `{}`, found {count}", dir.display())]
    ArchiveCount { dir: PathBuf, count: usize },
    #[error("fetching source `{src}`")]
    Fetch {
        src: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("fetching source `{0}` was interrupted")]
    Interrupted(String),
    #[error("{0}")]
    Eval(String),
    #[error("{0}")]
    Envelope(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Category {
    Configuration,
    Resolution,
    Evaluation,
    Envelope,
}

impl Error {
    pub fn category(&self) -> Category {
        match self {
            Error::Config(_) => Category::Configuration,
            Error::NoEntry
            | Error::MissingEntryFile(_)
            | Error::ArchiveCount { .. }
            | Error::Fetch { .. }
            | Error::Interrupted(_)
            | Error::Io(_) => Category::Resolution,
            Error::Eval(_) => Category::Evaluation,
            Error::Envelope(_) => Category::Envelope,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn envelope(msg: impl Into<String>) -> Self {
        Error::Envelope(msg.into())
    }
}
