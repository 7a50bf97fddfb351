//! Open documents and the file layer's catalog
//!
//! A document is opened through a [`DocumentLoader`] and stays open until
//! the catalog stops listing it. A path that failed to open is remembered,
//! so the failure is reported once and the document stays excluded until
//! it shows up with a different path.

use dualread_render::{DocumentId, DocumentLoader, PageSize, PageSource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::text_index::TextSpanIndex;

/// One row of the file layer's document list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: DocumentId,
    pub path: PathBuf,
    /// Translation counterpart; this entry is the primary
    pub paired_with: Option<DocumentId>,
}

impl CatalogEntry {
    pub fn new(id: DocumentId, path: impl Into<PathBuf>) -> Self {
        Self { id, path: path.into(), paired_with: None }
    }

    /// Entry whose id is derived from its path
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { id: DocumentId::from_path(&path), path, paired_with: None }
    }

    pub fn paired_with(mut self, secondary: DocumentId) -> Self {
        self.paired_with = Some(secondary);
        self
    }
}

/// An opened, read-only document
pub struct OpenDocument {
    id: DocumentId,
    path: PathBuf,
    source: Arc<dyn PageSource>,
    text: TextSpanIndex,
}

impl std::fmt::Debug for OpenDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenDocument")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("page_count", &self.page_count())
            .finish()
    }
}

impl OpenDocument {
    pub fn new(id: DocumentId, path: PathBuf, source: Arc<dyn PageSource>) -> Self {
        let text = TextSpanIndex::new(Arc::clone(&source));
        Self { id, path, source, text }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    pub fn page_count(&self) -> u16 {
        self.source.page_count()
    }

    /// Intrinsic size of `page` in points
    pub fn page_size(&self, page: u16) -> CoreResult<PageSize> {
        self.check_page(page)?;
        self.source.page_size(page).map_err(|e| CoreError::PageDecode {
            document: self.id.clone(),
            page,
            reason: e.to_string(),
        })
    }

    pub fn text(&self) -> &TextSpanIndex {
        &self.text
    }

    pub fn check_page(&self, page: u16) -> CoreResult<()> {
        let page_count = self.page_count();
        if page >= page_count {
            return Err(CoreError::PageOutOfRange {
                document: self.id.clone(),
                page,
                page_count,
            });
        }
        Ok(())
    }
}

/// The active set of open documents
pub struct DocumentRegistry {
    loader: Arc<dyn DocumentLoader>,
    documents: HashMap<DocumentId, Arc<OpenDocument>>,
    failed: HashMap<DocumentId, PathBuf>,
}

impl DocumentRegistry {
    pub fn new(loader: Arc<dyn DocumentLoader>) -> Self {
        Self { loader, documents: HashMap::new(), failed: HashMap::new() }
    }

    /// Open `path` as `id`
    ///
    /// Opening an id that is already open at the same path returns the
    /// existing handle. An id open at a different path must be closed
    /// first.
    ///
    /// # Errors
    /// [`CoreError::DocumentOpen`] when the loader fails; the path is then
    /// remembered, see [`has_failed`](Self::has_failed).
    pub fn open(&mut self, id: &DocumentId, path: &Path) -> CoreResult<Arc<OpenDocument>> {
        if let Some(document) = self.documents.get(id) {
            if document.path() == path {
                return Ok(Arc::clone(document));
            }
            log::warn!(
                "{id} reopened from {} while open from {}",
                path.display(),
                document.path().display()
            );
        }

        match self.loader.open(path) {
            Ok(source) => {
                self.failed.remove(id);
                let document = Arc::new(OpenDocument::new(id.clone(), path.to_path_buf(), source));
                log::info!(
                    "opened {id} ({} pages) from {}",
                    document.page_count(),
                    path.display()
                );
                self.documents.insert(id.clone(), Arc::clone(&document));
                Ok(document)
            }
            Err(source) => {
                self.documents.remove(id);
                self.failed.insert(id.clone(), path.to_path_buf());
                Err(CoreError::DocumentOpen { path: path.to_path_buf(), source })
            }
        }
    }

    /// Whether opening `id` from `path` already failed
    pub fn has_failed(&self, id: &DocumentId, path: &Path) -> bool {
        self.failed.get(id).is_some_and(|failed| failed == path)
    }

    /// Forget remembered failures for which `keep` returns false
    pub fn retain_failures(&mut self, mut keep: impl FnMut(&DocumentId) -> bool) {
        self.failed.retain(|id, _| keep(id));
    }

    pub fn close(&mut self, id: &DocumentId) -> Option<Arc<OpenDocument>> {
        let document = self.documents.remove(id)?;
        log::info!("closed {id}");
        Some(document)
    }

    pub fn get(&self, id: &DocumentId) -> CoreResult<&Arc<OpenDocument>> {
        self.documents.get(id).ok_or_else(|| CoreError::UnknownDocument(id.clone()))
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualread_render::SyntheticLoader;
    use dualread_render::SyntheticSource;

    fn registry() -> DocumentRegistry {
        let loader = SyntheticLoader::new();
        loader.insert("/docs/a.pdf", SyntheticSource::uniform(3, PageSize::new(612.0, 792.0)));
        loader.insert("/docs/b.pdf", SyntheticSource::uniform(5, PageSize::new(595.0, 842.0)));
        DocumentRegistry::new(Arc::new(loader))
    }

    #[test]
    fn test_open_and_get() {
        let mut registry = registry();
        let id = DocumentId::new("a");
        let document = registry.open(&id, Path::new("/docs/a.pdf")).unwrap();

        assert_eq!(document.page_count(), 3);
        assert_eq!(document.page_size(1).unwrap(), PageSize::new(612.0, 792.0));
        assert!(registry.is_open(&id));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(registry.get(&id).unwrap(), &document));
    }

    #[test]
    fn test_reopen_same_path_returns_existing() {
        let mut registry = registry();
        let id = DocumentId::new("a");
        let first = registry.open(&id, Path::new("/docs/a.pdf")).unwrap();
        let second = registry.open(&id, Path::new("/docs/a.pdf")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_open_failure_is_remembered() {
        let mut registry = registry();
        let id = DocumentId::new("missing");
        let path = Path::new("/docs/missing.pdf");

        let err = registry.open(&id, path).unwrap_err();
        assert!(matches!(err, CoreError::DocumentOpen { .. }));
        assert!(registry.has_failed(&id, path));
        assert!(!registry.has_failed(&id, Path::new("/docs/a.pdf")));
        assert!(!registry.is_open(&id));

        // A different path for the same id gets a fresh attempt.
        registry.open(&id, Path::new("/docs/a.pdf")).unwrap();
        assert!(!registry.has_failed(&id, path));
    }

    #[test]
    fn test_close_and_unknown() {
        let mut registry = registry();
        let id = DocumentId::new("b");
        registry.open(&id, Path::new("/docs/b.pdf")).unwrap();

        assert!(registry.close(&id).is_some());
        assert!(registry.close(&id).is_none());
        assert!(matches!(registry.get(&id), Err(CoreError::UnknownDocument(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_page_out_of_range() {
        let mut registry = registry();
        let document = registry.open(&DocumentId::new("a"), Path::new("/docs/a.pdf")).unwrap();
        assert!(matches!(
            document.page_size(3),
            Err(CoreError::PageOutOfRange { page: 3, page_count: 3, .. })
        ));
    }

    #[test]
    fn test_catalog_entry_builders() {
        let entry = CatalogEntry::new(DocumentId::new("a"), "/docs/a.pdf")
            .paired_with(DocumentId::new("b"));
        assert_eq!(entry.paired_with, Some(DocumentId::new("b")));

        let derived = CatalogEntry::from_path("/docs/nowhere.pdf");
        assert_eq!(derived.id, DocumentId::from_path(Path::new("/docs/nowhere.pdf")));
    }
}
