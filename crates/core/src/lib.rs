//! Dualread Core Library
//!
//! Reader state on top of the render scheduler: open documents, pairings
//! between an original and its translation, the synchronized dual view,
//! highlight annotations with debounced persistence, page rotations and
//! text selection. [`ReaderSession`] ties them together for a UI.

pub mod annotation;
pub mod config;
pub mod document;
pub mod error;
pub mod flush;
pub mod pairing;
pub mod persistence;
pub mod rotation;
pub mod session;
pub mod sync;
pub mod text_index;

pub use annotation::{
    AnnotationStore, BrushSettings, Color, PageTransform, Point, Stroke, StrokeId, StrokeKind,
};
pub use config::{AnnotationConfig, ConfigError, ReaderConfig};
pub use document::{CatalogEntry, DocumentRegistry, OpenDocument};
pub use error::{CoreError, CoreResult};
pub use flush::{FlushConfig, FlushCoordinator, FlushWarning};
pub use pairing::{
    proportional_page, DocumentPairing, MappingPolicy, PageAnchor, PairRole, PairingRegistry,
};
pub use persistence::{
    AnnotationRecord, DocumentRecord, JsonRecordStore, MetadataRecord, PersistenceError,
    PersistenceResult, RecordStore,
};
pub use rotation::RotationState;
pub use session::{CatalogChanges, ReaderSession, SessionEvent};
pub use sync::{DualViewSync, Pane, PaneCursor, RotationChange, ScrollPosition, SyncUpdate};
pub use text_index::{join_spans, TextSpan, TextSpanIndex};

pub use dualread_render::{DocumentId, NormRect, PageSize, Rotation};
pub use dualread_scheduler::{PageWindow, RenderOutcome, RenderPriority, RenderTicket};
