//! Per-document annotation and metadata records
//!
//! Each document gets a directory under the data root holding two JSON
//! files:
//!
//! - `annotations.json`: strokes per page
//! - `metadata.json`: source path, page rotations and pairing link
//!
//! Files are replaced atomically (temp file + rename). A missing file loads
//! as an empty record.

use dualread_render::DocumentId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::annotation::Stroke;
use crate::pairing::{PageAnchor, PairRole};

/// Current on-disk schema version
pub const RECORD_VERSION: u32 = 1;

const ANNOTATIONS_FILE: &str = "annotations.json";
const METADATA_FILE: &str = "metadata.json";

/// Errors raised while reading or writing records
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {} has unsupported version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

fn version_one() -> u32 {
    RECORD_VERSION
}

/// Strokes of one document, keyed by page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    #[serde(default = "version_one")]
    pub version: u32,
    #[serde(default)]
    pub pages: BTreeMap<u16, Vec<Stroke>>,
}

impl Default for AnnotationRecord {
    fn default() -> Self {
        Self { version: RECORD_VERSION, pages: BTreeMap::new() }
    }
}

/// Everything about a document besides its strokes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default = "version_one")]
    pub version: u32,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Page → degrees, upright pages omitted
    #[serde(default)]
    pub rotations: BTreeMap<u16, u16>,
    #[serde(default)]
    pub paired_with: Option<String>,
    #[serde(default)]
    pub role: Option<PairRole>,
    #[serde(default)]
    pub anchor: Option<PageAnchor>,
    #[serde(default)]
    pub link_rotation: bool,
    #[serde(default)]
    pub mirror_annotations: bool,
}

impl Default for MetadataRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            path: None,
            rotations: BTreeMap::new(),
            paired_with: None,
            role: None,
            anchor: None,
            link_rotation: false,
            mirror_annotations: false,
        }
    }
}

/// Both records of one document, written together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentRecord {
    pub annotations: AnnotationRecord,
    pub metadata: MetadataRecord,
}

/// Durable storage for document records
pub trait RecordStore: Send + Sync {
    fn load(&self, document: &DocumentId) -> PersistenceResult<DocumentRecord>;

    fn save(&self, document: &DocumentId, record: &DocumentRecord) -> PersistenceResult<()>;

    /// Replace only the metadata, leaving stored annotations as they are
    fn save_metadata(
        &self,
        document: &DocumentId,
        metadata: &MetadataRecord,
    ) -> PersistenceResult<()>;
}

/// JSON files under one root directory
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    root: PathBuf,
}

impl JsonRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a document's records
    pub fn document_dir(&self, document: &DocumentId) -> PathBuf {
        let name: String = document
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(name)
    }

    pub fn annotations_path(&self, document: &DocumentId) -> PathBuf {
        self.document_dir(document).join(ANNOTATIONS_FILE)
    }

    pub fn metadata_path(&self, document: &DocumentId) -> PathBuf {
        self.document_dir(document).join(METADATA_FILE)
    }

    fn create_document_dir(&self, document: &DocumentId) -> PersistenceResult<()> {
        let dir = self.document_dir(document);
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io { path: dir, source })
    }
}

impl RecordStore for JsonRecordStore {
    fn load(&self, document: &DocumentId) -> PersistenceResult<DocumentRecord> {
        let annotations: AnnotationRecord =
            read_json(&self.annotations_path(document))?.unwrap_or_default();
        let metadata: MetadataRecord =
            read_json(&self.metadata_path(document))?.unwrap_or_default();

        for (path, version) in [
            (self.annotations_path(document), annotations.version),
            (self.metadata_path(document), metadata.version),
        ] {
            if version > RECORD_VERSION {
                return Err(PersistenceError::UnsupportedVersion { path, version });
            }
        }
        Ok(DocumentRecord { annotations, metadata })
    }

    fn save(&self, document: &DocumentId, record: &DocumentRecord) -> PersistenceResult<()> {
        self.create_document_dir(document)?;
        write_json_atomic(&self.annotations_path(document), &record.annotations)?;
        write_json_atomic(&self.metadata_path(document), &record.metadata)?;
        Ok(())
    }

    fn save_metadata(
        &self,
        document: &DocumentId,
        metadata: &MetadataRecord,
    ) -> PersistenceResult<()> {
        self.create_document_dir(document)?;
        write_json_atomic(&self.metadata_path(document), metadata)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> PersistenceResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PersistenceError::Io { path: path.to_path_buf(), source }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Json { path: path.to_path_buf(), source })
}

/// Serialize `value` next to `path` and rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|source| PersistenceError::Json { path: path.to_path_buf(), source })?;

    let temp_path = path.with_extension("json.tmp");
    let io_err = |source| PersistenceError::Io { path: path.to_path_buf(), source };
    fs::write(&temp_path, json).map_err(io_err)?;
    fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Color, Point};
    use tempfile::TempDir;

    fn sample_record() -> DocumentRecord {
        let mut pages = BTreeMap::new();
        pages.insert(
            2,
            vec![
                Stroke::mark(
                    Color::HIGHLIGHT,
                    0.02,
                    vec![Point::new(0.1, 0.2), Point::new(0.3, 0.2)],
                ),
                Stroke::mark(Color::new(255, 0, 0, 80), 0.01, vec![Point::new(0.5, 0.5)]),
            ],
        );
        DocumentRecord {
            annotations: AnnotationRecord { version: RECORD_VERSION, pages },
            metadata: MetadataRecord {
                path: Some(PathBuf::from("/papers/original.pdf")),
                rotations: [(3, 90)].into_iter().collect(),
                paired_with: Some("translation".into()),
                role: Some(PairRole::Primary),
                anchor: Some(PageAnchor { primary_page: 1, secondary_page: 0 }),
                link_rotation: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let doc = DocumentId::new("original");
        let record = sample_record();

        store.save(&doc, &record).unwrap();
        assert_eq!(store.load(&doc).unwrap(), record);
        assert!(!store.annotations_path(&doc).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let record = store.load(&DocumentId::new("never-saved")).unwrap();
        assert_eq!(record, DocumentRecord::default());
    }

    #[test]
    fn test_corrupt_file_is_an_error_and_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let doc = DocumentId::new("broken");
        let path = store.annotations_path(&doc);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(store.load(&doc), Err(PersistenceError::Json { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"{ not json");
    }

    #[test]
    fn test_metadata_save_leaves_annotations_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let doc = DocumentId::new("broken");
        let path = store.annotations_path(&doc);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        let metadata = sample_record().metadata;
        store.save_metadata(&doc, &metadata).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{ not json");
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(store.metadata_path(&doc)).unwrap()).unwrap();
        assert_eq!(json["paired_with"], "translation");
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let doc = DocumentId::new("future");
        let path = store.metadata_path(&doc);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, br#"{"version": 7}"#).unwrap();

        assert!(matches!(
            store.load(&doc),
            Err(PersistenceError::UnsupportedVersion { version: 7, .. })
        ));
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let store = JsonRecordStore::new(dir.path());
        let doc = DocumentId::new("original");
        store.save(&doc, &sample_record()).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(store.annotations_path(&doc)).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["pages"]["2"].as_array().unwrap().len(), 2);

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(store.metadata_path(&doc)).unwrap()).unwrap();
        assert_eq!(json["rotations"]["3"], 90);
        assert_eq!(json["role"], "primary");
        assert_eq!(json["anchor"]["primary_page"], 1);
    }

    #[test]
    fn test_document_dir_is_sanitized() {
        let store = JsonRecordStore::new("/data");
        let dir = store.document_dir(&DocumentId::new("../etc/passwd"));
        assert_eq!(dir, PathBuf::from("/data/___etc_passwd"));
    }
}
