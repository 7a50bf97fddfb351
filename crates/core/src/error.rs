//! Error types for the reader core

use dualread_render::{DocumentId, RenderError};
use dualread_scheduler::ScheduleError;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::persistence::PersistenceError;

/// Errors surfaced by [`ReaderSession`](crate::ReaderSession) and its parts
///
/// Budget overruns and out-of-range pairing targets are handled internally
/// and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to open {}: {source}", path.display())]
    DocumentOpen {
        path: PathBuf,
        #[source]
        source: RenderError,
    },

    #[error("failed to decode page {page} of {document}: {reason}")]
    PageDecode { document: DocumentId, page: u16, reason: String },

    #[error("cannot pair {document}: {reason}")]
    PairingConflict { document: DocumentId, reason: String },

    #[error("document {0} is not open")]
    UnknownDocument(DocumentId),

    #[error("page {page} out of range for {document} (page_count={page_count})")]
    PageOutOfRange { document: DocumentId, page: u16, page_count: u16 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("failed to start background threads: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
