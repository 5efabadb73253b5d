use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read region header {path}: {source}")]
    HeaderRead { path: PathBuf, source: io::Error },

    #[error("failed to write region header {path}: {source}")]
    HeaderWrite { path: PathBuf, source: io::Error },

    #[error("region file {path} is read-only and could not be made writable: {source}")]
    NotWritable { path: PathBuf, source: io::Error },

    #[error("region folder missing for world {world}: {path}")]
    MissingRegionFolder { world: String, path: PathBuf },

    #[error("main-thread query did not complete in time")]
    MainThreadTimeout,

    #[error("main-thread queue is disconnected")]
    MainThreadClosed,

    #[error("protection hook {0} failed: {1}")]
    Hook(String, String),

    #[error("flag storage error: {0}")]
    Storage(String),
}
