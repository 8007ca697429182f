use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to run preflight check of tracer `{binary}`: {source}")]
    Preflight {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn tracer `{binary}`: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tracer stdout was not captured")]
    MissingStdout,
    #[error("tracer was already started")]
    AlreadyStarted,
    #[error("failed to read tracer output: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to decode tracer event `{line}`: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tracer event stream ended (exit status: {status:?})")]
    StreamEnded { status: Option<ExitStatus> },
}

pub type Result<T> = std::result::Result<T, Error>;
