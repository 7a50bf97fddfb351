//! The reader core behind one UI
//!
//! [`ReaderSession`] owns every piece of state the UI talks to: open
//! documents, pairings, annotations, rotations and the dual view. It is
//! driven from a single UI thread. Rendering happens on the worker pool and
//! persistence on the flush thread; both report back through channels
//! rather than callbacks.

use dualread_cache::{DiskPageCache, PageKey, RenderCache};
use dualread_render::{DocumentId, DocumentLoader, NormRect, PageSize, Rotation};
use dualread_scheduler::{
    thumbnail_pages, PageWindow, RenderPriority, RenderRequest, RenderScheduler, RenderTicket,
    RequesterId, ScheduleError, ViewportPlan, WorkerPool, WorkerPoolConfig,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::annotation::{AnnotationStore, BrushSettings, Point, Stroke};
use crate::config::ReaderConfig;
use crate::document::{CatalogEntry, DocumentRegistry, OpenDocument};
use crate::error::{CoreError, CoreResult};
use crate::flush::{FlushConfig, FlushCoordinator, FlushWarning};
use crate::pairing::{DocumentPairing, PageAnchor, PairRole, PairingRegistry};
use crate::persistence::{
    AnnotationRecord, DocumentRecord, JsonRecordStore, MetadataRecord, PersistenceError,
    RecordStore, RECORD_VERSION,
};
use crate::rotation::RotationState;
use crate::sync::{DualViewSync, Pane, RotationChange, ScrollPosition, SyncUpdate};
use crate::text_index::{join_spans, TextSpan};

/// Zoom used for thumbnail prerenders
const THUMBNAIL_ZOOM: f32 = 0.2;

/// Something the UI should tell the user about
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The document could not be opened and is left out of the session
    DocumentOpenFailure { document: DocumentId, path: PathBuf, reason: String },
    /// Stored records could not be read; the document opened without them
    RecordUnreadable { document: DocumentId, reason: String },
    /// Saving keeps failing; changes are still held in memory
    PersistenceWarning { document: DocumentId, failures: u32, reason: String },
}

/// What [`ReaderSession::apply_catalog`] changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogChanges {
    pub opened: Vec<DocumentId>,
    pub closed: Vec<DocumentId>,
    pub failed: Vec<DocumentId>,
}

pub struct ReaderSession {
    config: ReaderConfig,
    documents: DocumentRegistry,
    pairings: PairingRegistry,
    annotations: AnnotationStore,
    rotations: HashMap<DocumentId, RotationState>,
    /// Metadata as loaded, consulted when a pairing is (re)established
    saved_metadata: HashMap<DocumentId, MetadataRecord>,
    /// Latest metadata stored or queued for storing
    recorded_metadata: HashMap<DocumentId, MetadataRecord>,
    /// Documents whose stored strokes could not be read. Their annotations
    /// file is not rewritten until their strokes are edited.
    held_annotations: HashSet<DocumentId>,
    /// Document each pane last reported through `update_viewport`
    panes: HashMap<RequesterId, DocumentId>,
    scheduler: Arc<RenderScheduler>,
    workers: Option<WorkerPool>,
    flusher: FlushCoordinator,
    flush_warnings: flume::Receiver<FlushWarning>,
    events: VecDeque<SessionEvent>,
    dual_view: Option<DualViewSync>,
    brush: BrushSettings,
}

impl ReaderSession {
    /// Session storing records under the configured data directory
    pub fn new(config: ReaderConfig, loader: Arc<dyn DocumentLoader>) -> CoreResult<Self> {
        let store = Arc::new(JsonRecordStore::new(config.resolved_data_dir()?));
        Self::with_store(config, loader, store)
    }

    pub fn with_store(
        config: ReaderConfig,
        loader: Arc<dyn DocumentLoader>,
        store: Arc<dyn RecordStore>,
    ) -> CoreResult<Self> {
        let cache = RenderCache::new(config.cache.ram_cache_bytes());
        let disk = config.cache.disk_cache_dir.as_ref().and_then(|dir| {
            let opened = DiskPageCache::new(dir, config.cache.disk_cache_bytes())
                .and_then(|disk| disk.load_from_disk().map(|()| disk));
            match opened {
                Ok(disk) => Some(disk),
                Err(e) => {
                    log::warn!("disk render tier at {} disabled: {e}", dir.display());
                    None
                }
            }
        });

        let scheduler = Arc::new(RenderScheduler::new(cache, disk, config.scheduler.clone()));
        let workers = WorkerPool::start(
            Arc::clone(&scheduler),
            WorkerPoolConfig::from(&config.scheduler),
        )
        .map_err(CoreError::Spawn)?;

        let (warning_tx, flush_warnings) = flume::unbounded();
        let flusher =
            FlushCoordinator::spawn(store, FlushConfig::from(&config.annotations), warning_tx)
                .map_err(CoreError::Spawn)?;

        log::info!("reader session started with {} render workers", workers.num_workers());
        Ok(Self {
            config,
            documents: DocumentRegistry::new(loader),
            pairings: PairingRegistry::new(),
            annotations: AnnotationStore::new(),
            rotations: HashMap::new(),
            saved_metadata: HashMap::new(),
            recorded_metadata: HashMap::new(),
            held_annotations: HashSet::new(),
            panes: HashMap::new(),
            scheduler,
            workers: Some(workers),
            flusher,
            flush_warnings,
            events: VecDeque::new(),
            dual_view: None,
            brush: BrushSettings::default(),
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<RenderScheduler> {
        &self.scheduler
    }

    /// Pending notifications, oldest first
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        for warning in self.flush_warnings.try_iter() {
            self.events.push_back(SessionEvent::PersistenceWarning {
                document: warning.document,
                failures: warning.failures,
                reason: warning.error,
            });
        }
        self.events.drain(..).collect()
    }

    // ---- documents ----

    pub fn document(&self, id: &DocumentId) -> CoreResult<&Arc<OpenDocument>> {
        self.documents.get(id)
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.is_open(id)
    }

    /// Open `path` as `id` and restore its stored annotations and rotations
    ///
    /// A failure is reported once per path through
    /// [`SessionEvent::DocumentOpenFailure`].
    pub fn open_document(&mut self, id: &DocumentId, path: &Path) -> CoreResult<()> {
        if let Ok(document) = self.documents.get(id) {
            if document.path() == path {
                return Ok(());
            }
            self.close_document(id)?;
        }

        let already_reported = self.documents.has_failed(id, path);
        let document = match self.documents.open(id, path) {
            Ok(document) => document,
            Err(e) => {
                if !already_reported {
                    log::warn!("{e}");
                    self.events.push_back(SessionEvent::DocumentOpenFailure {
                        document: id.clone(),
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
                return Err(e);
            }
        };
        self.scheduler.register_document(id.clone(), Arc::clone(document.source()));

        self.held_annotations.remove(id);
        let record = match self.flusher.store().load(id) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("opening {id} without stored records: {e}");
                self.held_annotations.insert(id.clone());
                self.events.push_back(SessionEvent::RecordUnreadable {
                    document: id.clone(),
                    reason: e.to_string(),
                });
                DocumentRecord::default()
            }
        };

        let page_count = document.page_count();
        let mut pages = record.annotations.pages;
        pages.retain(|page, _| *page < page_count);
        self.annotations.load_document(id.clone(), pages);
        let sizes: Vec<PageSize> = (0..page_count)
            .map(|page| document.page_size(page).unwrap_or(PageSize::new(1.0, 1.0)))
            .collect();
        self.annotations.set_page_sizes(id, &sizes);

        let mut rotations = RotationState::from_degrees(&record.metadata.rotations);
        rotations.truncate(page_count);
        self.rotations.insert(id.clone(), rotations);
        self.recorded_metadata.insert(id.clone(), record.metadata.clone());
        self.saved_metadata.insert(id.clone(), record.metadata);
        Ok(())
    }

    /// Remove a document from the session
    ///
    /// Its pairing is dropped, queued renders cancelled, cached rasters
    /// invalidated and unsaved changes written out.
    pub fn close_document(&mut self, id: &DocumentId) -> CoreResult<()> {
        self.documents.get(id)?;

        if self.dual_view.as_ref().is_some_and(|view| view.pairing().role_of(id).is_some()) {
            self.dual_view = None;
        }
        if let Some(pairing) = self.pairings.unpair(id) {
            self.mark_dirty(pairing.primary());
            self.mark_dirty(pairing.secondary());
        }

        self.flush_on_close(id);

        self.scheduler.close_document(id);
        self.annotations.remove_document(id);
        self.rotations.remove(id);
        self.saved_metadata.remove(id);
        self.recorded_metadata.remove(id);
        self.panes.retain(|_, shown| shown != id);
        self.held_annotations.remove(id);
        self.documents.close(id);
        Ok(())
    }

    /// Bring the session in line with the file layer's document list
    pub fn apply_catalog(&mut self, entries: &[CatalogEntry]) -> CatalogChanges {
        let mut changes = CatalogChanges::default();
        let listed: HashMap<&DocumentId, &CatalogEntry> =
            entries.iter().map(|entry| (&entry.id, entry)).collect();

        let stale: Vec<DocumentId> = self
            .documents
            .ids()
            .filter(|id| match listed.get(id) {
                Some(entry) => {
                    self.documents.get(id).map(|doc| doc.path() != entry.path).unwrap_or(true)
                }
                None => true,
            })
            .cloned()
            .collect();
        for id in stale {
            if self.close_document(&id).is_ok() {
                changes.closed.push(id);
            }
        }
        self.documents.retain_failures(|id| listed.contains_key(id));

        for entry in entries {
            if self.documents.is_open(&entry.id) {
                continue;
            }
            if self.documents.has_failed(&entry.id, &entry.path) {
                changes.failed.push(entry.id.clone());
                continue;
            }
            match self.open_document(&entry.id, &entry.path) {
                Ok(()) => changes.opened.push(entry.id.clone()),
                Err(_) => changes.failed.push(entry.id.clone()),
            }
        }

        let wanted: HashSet<(&DocumentId, &DocumentId)> = entries
            .iter()
            .filter_map(|entry| entry.paired_with.as_ref().map(|secondary| (&entry.id, secondary)))
            .collect();
        let unwanted: Vec<DocumentId> = self
            .pairings
            .iter()
            .filter(|pairing| !wanted.contains(&(pairing.primary(), pairing.secondary())))
            .map(|pairing| pairing.primary().clone())
            .collect();
        for primary in unwanted {
            self.unpair(&primary);
        }
        for (primary, secondary) in wanted {
            if !self.documents.is_open(primary) || !self.documents.is_open(secondary) {
                continue;
            }
            if let Err(e) = self.pair(primary, secondary) {
                log::warn!("catalog pairing skipped: {e}");
            }
        }
        changes
    }

    // ---- pairing ----

    /// Pair two open documents, restoring stored link settings
    pub fn pair(&mut self, primary: &DocumentId, secondary: &DocumentId) -> CoreResult<()> {
        let primary_pages = self.documents.get(primary)?.page_count();
        let secondary_pages = self.documents.get(secondary)?.page_count();
        let is_new = self.pairings.pairing_of(primary).is_none();

        let pairing =
            self.pairings.pair((primary, primary_pages), (secondary, secondary_pages))?;
        if is_new {
            if let Some(saved) = self.saved_metadata.get(primary) {
                let same_partner = saved.paired_with.as_deref() == Some(secondary.as_str());
                if same_partner && saved.role == Some(PairRole::Primary) {
                    if let Some(anchor) = saved.anchor {
                        pairing.set_anchor(anchor);
                    }
                    pairing.link_rotation = saved.link_rotation;
                    pairing.mirror_annotations = saved.mirror_annotations;
                }
            }
        }

        self.mark_dirty_if_changed(primary);
        self.mark_dirty_if_changed(secondary);
        self.refresh_dual_view(primary);
        Ok(())
    }

    /// Dissolve the pairing `document` takes part in
    pub fn unpair(&mut self, document: &DocumentId) -> bool {
        let Some(pairing) = self.pairings.unpair(document) else {
            return false;
        };
        if self.dual_view.as_ref().is_some_and(|view| view.pairing().role_of(document).is_some())
        {
            self.dual_view = None;
        }
        self.mark_dirty(pairing.primary());
        self.mark_dirty(pairing.secondary());
        true
    }

    pub fn pairing_of(&self, document: &DocumentId) -> Option<(&DocumentPairing, PairRole)> {
        self.pairings.pairing_of(document)
    }

    pub fn set_anchor(&mut self, document: &DocumentId, anchor: PageAnchor) -> CoreResult<()> {
        self.update_pairing(document, |pairing| pairing.set_anchor(anchor))
    }

    pub fn clear_anchor(&mut self, document: &DocumentId) -> CoreResult<()> {
        self.update_pairing(document, DocumentPairing::clear_anchor)
    }

    pub fn set_link_rotation(&mut self, document: &DocumentId, linked: bool) -> CoreResult<()> {
        self.update_pairing(document, |pairing| pairing.link_rotation = linked)
    }

    pub fn set_mirror_annotations(
        &mut self,
        document: &DocumentId,
        mirror: bool,
    ) -> CoreResult<()> {
        self.update_pairing(document, |pairing| pairing.mirror_annotations = mirror)
    }

    fn update_pairing(
        &mut self,
        document: &DocumentId,
        update: impl FnOnce(&mut DocumentPairing),
    ) -> CoreResult<()> {
        let pairing = self.pairings.pairing_of_mut(document).ok_or_else(|| {
            CoreError::PairingConflict { document: document.clone(), reason: "not paired".into() }
        })?;
        update(pairing);
        let (primary, secondary) = (pairing.primary().clone(), pairing.secondary().clone());

        self.mark_dirty(&primary);
        self.mark_dirty(&secondary);
        self.refresh_dual_view(&primary);
        Ok(())
    }

    fn refresh_dual_view(&mut self, document: &DocumentId) {
        let Some(view) = self.dual_view.as_mut() else {
            return;
        };
        if view.pairing().role_of(document).is_none() {
            return;
        }
        if let Some((pairing, _)) = self.pairings.pairing_of(document) {
            view.update_pairing(pairing.clone());
        }
    }

    // ---- rendering ----

    /// Rotation the page is shown at
    pub fn rotation(&self, document: &DocumentId, page: u16) -> Rotation {
        self.rotations.get(document).map(|state| state.get(page)).unwrap_or_default()
    }

    /// Ask for a raster of one page
    ///
    /// The ticket resolves on a worker thread, see [`RenderTicket`].
    pub fn request_render(
        &self,
        document: &DocumentId,
        page: u16,
        zoom: f32,
        rotation: Rotation,
        priority: RenderPriority,
        requester: RequesterId,
    ) -> CoreResult<RenderTicket> {
        let key = PageKey::new(document.clone(), page, zoom, rotation);
        let generation = self.scheduler.generation(requester);
        self.scheduler
            .request(RenderRequest { key, priority, requester, generation })
            .map_err(schedule_error)
    }

    /// Report what a pane now shows and request it
    ///
    /// Starts a new generation for `requester`, so renders it asked for
    /// earlier and no longer needs are dropped. Visible pages are pinned in
    /// the cache. Pages use their stored rotation.
    pub fn update_viewport(
        &mut self,
        requester: RequesterId,
        document: &DocumentId,
        window: PageWindow,
        zoom: f32,
    ) -> CoreResult<Vec<RenderTicket>> {
        let page_count = self.documents.get(document)?.page_count();
        let generation = self.scheduler.begin_generation(requester);
        let plan = ViewportPlan::new(window, page_count, self.config.scheduler.lookahead_pages);

        let mut tickets = Vec::with_capacity(plan.pages().len());
        let mut visible = HashSet::new();
        for planned in plan.pages() {
            let rotation = self.rotation(document, planned.page);
            let key = PageKey::new(document.clone(), planned.page, zoom, rotation);
            if planned.priority == RenderPriority::Visible {
                visible.insert(key.clone());
            }
            let request =
                RenderRequest { key, priority: planned.priority, requester, generation };
            tickets.push(self.scheduler.request(request).map_err(schedule_error)?);
        }
        self.scheduler.set_visible(requester, visible);
        self.panes.insert(requester, document.clone());
        Ok(tickets)
    }

    /// A pane went away; drop its pending renders and pins and write out
    /// the document it showed
    pub fn release_pane(&mut self, requester: RequesterId) {
        self.scheduler.release_requester(requester);
        if let Some(document) = self.panes.remove(&requester) {
            self.flush_on_close(&document);
        }
    }

    /// Queue small prerenders for a thumbnail strip, nearest pages first
    ///
    /// These run behind every visible and lookahead render and share the
    /// requester's current generation.
    pub fn prerender_thumbnails(
        &self,
        requester: RequesterId,
        document: &DocumentId,
        around: u16,
        radius: u16,
    ) -> CoreResult<Vec<RenderTicket>> {
        let page_count = self.documents.get(document)?.page_count();
        thumbnail_pages(page_count, around, radius)
            .into_iter()
            .map(|page| {
                let rotation = self.rotation(document, page);
                self.request_render(
                    document,
                    page,
                    THUMBNAIL_ZOOM,
                    rotation,
                    RenderPriority::Thumbnail,
                    requester,
                )
            })
            .collect()
    }

    /// Ask again for a page that fell back to a placeholder
    pub fn retry_render(&self, key: &PageKey) -> bool {
        self.scheduler.retry(key)
    }

    // ---- rotation ----

    /// Turn one page a quarter clockwise
    pub fn rotate_page(
        &mut self,
        document: &DocumentId,
        page: u16,
    ) -> CoreResult<Vec<RotationChange>> {
        let rotation = self.rotation(document, page).rotate_cw();
        self.set_rotation(document, page, rotation)
    }

    /// Set one page's rotation, following it on the paired page when the
    /// pairing links rotation
    pub fn set_rotation(
        &mut self,
        document: &DocumentId,
        page: u16,
        rotation: Rotation,
    ) -> CoreResult<Vec<RotationChange>> {
        self.documents.get(document)?.check_page(page)?;

        let mut changes = vec![RotationChange { document: document.clone(), page, rotation }];
        if let Some((pairing, role)) = self.pairings.pairing_of(document) {
            if pairing.link_rotation {
                if let Some(mapped) = pairing.map_page(role, page) {
                    let partner = pairing.document(role.other()).clone();
                    changes.push(RotationChange { document: partner, page: mapped, rotation });
                }
            }
        }
        self.apply_rotations(&changes);
        Ok(changes)
    }

    fn apply_rotations(&mut self, changes: &[RotationChange]) {
        for change in changes {
            let previous = self
                .rotations
                .entry(change.document.clone())
                .or_default()
                .set(change.page, change.rotation);
            if previous == change.rotation {
                continue;
            }

            let cache = self.scheduler.cache();
            for key in cache.lru_order() {
                if key.document == change.document
                    && key.page == change.page
                    && key.rotation == previous
                {
                    cache.remove(&key);
                }
            }
            log::debug!(
                "rotated {}#{} to {}°",
                change.document,
                change.page,
                change.rotation.degrees()
            );
            self.mark_dirty(&change.document);
        }
    }

    // ---- annotations ----

    pub fn brush(&self) -> &BrushSettings {
        &self.brush
    }

    pub fn brush_mut(&mut self) -> &mut BrushSettings {
        &mut self.brush
    }

    /// Strokes of one page in drawing order
    pub fn annotations(&self, document: &DocumentId, page: u16) -> &[Stroke] {
        self.annotations.strokes(document, page)
    }

    /// Add a stroke, mirroring it onto the paired page when enabled
    ///
    /// Returns whether the page changed.
    pub fn append_stroke(
        &mut self,
        document: &DocumentId,
        page: u16,
        stroke: Stroke,
    ) -> CoreResult<bool> {
        self.documents.get(document)?.check_page(page)?;

        let mirror = self.mirror_pairing(document);
        let changed = self.annotations.append_stroke(document, page, stroke.clone());
        if changed {
            self.strokes_changed(document);
        }
        if let Some(pairing) = mirror {
            if let Some((target, _)) = self.annotations.mirror_to(&pairing, document, page, &stroke)
            {
                self.strokes_changed(&target);
            }
        }
        Ok(changed)
    }

    /// Erase marks around a point. Returns how many marks were cut or
    /// removed on `page` itself.
    pub fn erase_at(
        &mut self,
        document: &DocumentId,
        page: u16,
        point: Point,
        radius: f32,
    ) -> CoreResult<usize> {
        self.documents.get(document)?.check_page(page)?;

        let touched = self.annotations.erase_at(document, page, point, radius);
        if touched > 0 {
            self.strokes_changed(document);
        }
        if let Some(pairing) = self.mirror_pairing(document) {
            let eraser = Stroke::erase(radius, vec![point]);
            if let Some((target, _)) = self.annotations.mirror_to(&pairing, document, page, &eraser)
            {
                self.strokes_changed(&target);
            }
        }
        Ok(touched)
    }

    pub fn clear_page(&mut self, document: &DocumentId, page: u16) -> CoreResult<bool> {
        self.documents.get(document)?.check_page(page)?;
        let cleared = self.annotations.clear_page(document, page);
        if cleared {
            self.strokes_changed(document);
        }
        Ok(cleared)
    }

    pub fn clear_document(&mut self, document: &DocumentId) -> CoreResult<bool> {
        self.documents.get(document)?;
        let cleared = self.annotations.clear_document(document);
        if cleared {
            self.strokes_changed(document);
        }
        Ok(cleared)
    }

    fn mirror_pairing(&self, document: &DocumentId) -> Option<DocumentPairing> {
        self.pairings
            .pairing_of(document)
            .filter(|(pairing, _)| pairing.mirror_annotations)
            .map(|(pairing, _)| pairing.clone())
    }

    // ---- text ----

    /// Text spans under `rect`, in reading order
    pub fn select_text(
        &self,
        document: &DocumentId,
        page: u16,
        rect: &NormRect,
    ) -> CoreResult<Vec<TextSpan>> {
        let open = self.documents.get(document)?;
        open.check_page(page)?;
        open.text().spans_intersecting(page, rect).map_err(|e| CoreError::PageDecode {
            document: document.clone(),
            page,
            reason: e.to_string(),
        })
    }

    /// Plain text under `rect`, ready for the note editor or a translator
    pub fn selected_text(
        &self,
        document: &DocumentId,
        page: u16,
        rect: &NormRect,
    ) -> CoreResult<String> {
        Ok(join_spans(&self.select_text(document, page, rect)?))
    }

    // ---- dual view ----

    /// Show `document` side by side with its partner
    pub fn open_dual_view(&mut self, document: &DocumentId) -> CoreResult<&DualViewSync> {
        let (pairing, _) = self.pairings.pairing_of(document).ok_or_else(|| {
            CoreError::PairingConflict { document: document.clone(), reason: "not paired".into() }
        })?;
        let view = DualViewSync::new(pairing.clone());
        Ok(self.dual_view.insert(view))
    }

    /// Leave the side-by-side view, writing out both documents
    pub fn close_dual_view(&mut self) {
        let Some(view) = self.dual_view.take() else {
            return;
        };
        let pairing = view.pairing();
        for document in [pairing.primary(), pairing.secondary()] {
            self.flush_on_close(document);
        }
    }

    pub fn dual_view(&self) -> Option<&DualViewSync> {
        self.dual_view.as_ref()
    }

    /// A pane scrolled; where the other pane should go, if anywhere
    pub fn sync_scroll(&mut self, pane: Pane, position: ScrollPosition) -> Option<SyncUpdate> {
        self.dual_view.as_mut()?.on_scroll(pane, position)
    }

    /// The driven pane finished its programmatic scroll
    pub fn settle_scroll(&mut self) {
        if let Some(view) = self.dual_view.as_mut() {
            view.settle();
        }
    }

    /// Zoom one pane. Returns the pane's new zoom.
    pub fn sync_zoom(&mut self, pane: Pane, factor: f32) -> Option<f32> {
        Some(self.dual_view.as_mut()?.on_zoom(pane, factor))
    }

    /// Rotate a page shown in one pane of the dual view
    pub fn sync_rotate(
        &mut self,
        pane: Pane,
        page: u16,
        rotation: Rotation,
    ) -> Option<Vec<RotationChange>> {
        let changes = self.dual_view.as_ref()?.on_rotate(pane, page, rotation);
        self.apply_rotations(&changes);
        Some(changes)
    }

    // ---- persistence ----

    fn snapshot(&self, document: &DocumentId) -> Option<DocumentRecord> {
        let open = self.documents.get(document).ok()?;
        let pairing = self.pairings.pairing_of(document);

        let metadata = MetadataRecord {
            version: RECORD_VERSION,
            path: Some(open.path().to_path_buf()),
            rotations: self
                .rotations
                .get(document)
                .map(RotationState::to_degrees)
                .unwrap_or_default(),
            paired_with: pairing.map(|(p, role)| p.document(role.other()).as_str().to_string()),
            role: pairing.map(|(_, role)| role),
            anchor: pairing.and_then(|(p, _)| p.anchor()),
            link_rotation: pairing.is_some_and(|(p, _)| p.link_rotation),
            mirror_annotations: pairing.is_some_and(|(p, _)| p.mirror_annotations),
        };
        Some(DocumentRecord {
            annotations: AnnotationRecord {
                version: RECORD_VERSION,
                pages: self.annotations.pages(document),
            },
            metadata,
        })
    }

    fn mark_dirty(&mut self, document: &DocumentId) {
        let Some(record) = self.snapshot(document) else {
            return;
        };
        self.recorded_metadata.insert(document.clone(), record.metadata.clone());
        if self.held_annotations.contains(document) {
            self.flusher.mark_metadata_dirty(document, record.metadata);
        } else {
            self.flusher.mark_dirty(document, record);
        }
    }

    /// Queue a write only if `document`'s metadata differs from what is
    /// already stored or queued
    fn mark_dirty_if_changed(&mut self, document: &DocumentId) {
        let unchanged = self.snapshot(document).is_some_and(|record| {
            self.recorded_metadata.get(document) == Some(&record.metadata)
        });
        if !unchanged {
            self.mark_dirty(document);
        }
    }

    fn strokes_changed(&mut self, document: &DocumentId) {
        self.held_annotations.remove(document);
        self.mark_dirty(document);
    }

    pub fn has_unsaved_changes(&self, document: &DocumentId) -> bool {
        self.flusher.is_dirty(document)
    }

    fn flush_on_close(&self, document: &DocumentId) {
        if let Err(e) = self.flusher.flush(document) {
            log::warn!("could not save {document} on close, will keep retrying: {e}");
        }
    }

    /// Write `document`'s pending changes now
    pub fn flush(&self, document: &DocumentId) -> CoreResult<bool> {
        Ok(self.flusher.flush(document)?)
    }

    /// Write every pending change now
    pub fn flush_all(&self) -> Vec<(DocumentId, PersistenceError)> {
        self.flusher.flush_all()
    }

    /// Stop the workers and write everything out
    pub fn shutdown(mut self) -> Vec<(DocumentId, PersistenceError)> {
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
        let failures = self.flusher.flush_all();
        for (document, error) in &failures {
            log::error!("unsaved changes for {document}: {error}");
        }
        failures
    }
}

fn schedule_error(error: ScheduleError) -> CoreError {
    match error {
        ScheduleError::UnknownDocument(document) => CoreError::UnknownDocument(document),
        ScheduleError::PageOutOfRange { document, page, page_count } => {
            CoreError::PageOutOfRange { document, page, page_count }
        }
        other => CoreError::Schedule(other),
    }
}
