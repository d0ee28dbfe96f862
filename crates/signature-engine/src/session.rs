//! Signing session
//!
//! One session per opened document view. It owns the annotation store, the
//! pointer interaction state and the recipient list, restores the persisted
//! snapshot on open and persists after every change.
//!
//! Detection and submission run outside the session. Both are tagged with a
//! [`ViewToken`]; results that come back after the view was closed are
//! dropped instead of being applied to whatever is on screen now.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::capture::SignatureImage;
use crate::config::EngineConfig;
use crate::coords::CoordinateNormalizer;
use crate::detect::{DetectedField, FieldDetector};
use crate::error::{Result, SigningError};
use crate::geometry::{Geometry, Point, RenderSurface};
use crate::overlay::{Commit, InteractionState, OverlayInteraction};
use crate::persistence::{load_snapshot, AnnotationPersistence, PersistenceWriter};
use crate::recipients::{RecipientEntry, RecipientList, RecipientRole};
use crate::store::{AnnotationStore, PlacedAnnotation};
use crate::submission::{
    send, DocumentPayload, SubmissionAssembler, SubmissionRequest, SubmissionResponse, Submitter,
};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

const SUBMITTED_MESSAGE: &str = "Document signed and sent successfully!";

/// Identifies one document view for the lifetime of an async operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewToken {
    document_id: String,
    generation: u64,
}

impl ViewToken {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

/// A request ready to hand to the submitter, tied to the view that built it
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub token: ViewToken,
    pub request: SubmissionRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Delivered; annotations and the stored snapshot were cleared
    Sent { message: String },
    /// The view was closed before the result arrived
    Discarded,
}

pub struct SigningSession {
    document_id: String,
    page_count: u32,
    generation: u64,
    active: bool,
    visible_page: u32,
    placement: Geometry,
    store: AnnotationStore,
    overlay: OverlayInteraction,
    detector: FieldDetector,
    assembler: SubmissionAssembler,
    recipients: RecipientList,
    detected: Vec<DetectedField>,
    writer: PersistenceWriter,
    last_message: Option<String>,
}

impl SigningSession {
    pub fn open(
        document_id: impl Into<String>,
        page_count: u32,
        persistence: &dyn AnnotationPersistence,
        writer: PersistenceWriter,
    ) -> Self {
        Self::open_with_config(
            &EngineConfig::default(),
            document_id,
            page_count,
            persistence,
            writer,
        )
    }

    /// Open a view and restore whatever was saved for the document.
    ///
    /// An unreadable snapshot is logged and the session starts empty.
    pub fn open_with_config(
        config: &EngineConfig,
        document_id: impl Into<String>,
        page_count: u32,
        persistence: &dyn AnnotationPersistence,
        writer: PersistenceWriter,
    ) -> Self {
        let document_id = document_id.into();
        let mut store = AnnotationStore::new(document_id.clone());

        match load_snapshot(persistence, &document_id) {
            Ok(Some(snapshot)) => match store.restore(snapshot) {
                Ok(count) => debug!(document_id = %document_id, count, "restored annotations"),
                Err(e) => warn!(document_id = %document_id, "Ignoring saved annotations: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!(document_id = %document_id, "Ignoring saved annotations: {}", e),
        }

        info!(document_id = %document_id, page_count, "opened signing session");
        Self {
            document_id,
            page_count,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            active: true,
            visible_page: 1,
            placement: config.placement.default_geometry(),
            store,
            overlay: OverlayInteraction::new(config.overlay.clone()),
            detector: FieldDetector::new(&config.detection),
            assembler: SubmissionAssembler::new(CoordinateNormalizer::new(config.fallback)),
            recipients: RecipientList::new(),
            detected: Vec::new(),
            writer,
            last_message: None,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn interaction(&self) -> &InteractionState {
        self.overlay.state()
    }

    pub fn selected(&self) -> Option<&str> {
        self.overlay.selected()
    }

    pub fn recipients(&self) -> &RecipientList {
        &self.recipients
    }

    /// Message from the last completed submission
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    fn token(&self) -> ViewToken {
        ViewToken {
            document_id: self.document_id.clone(),
            generation: self.generation,
        }
    }

    fn is_current(&self, token: &ViewToken) -> bool {
        self.active && token.generation == self.generation && token.document_id == self.document_id
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(SigningError::validation("session", "the document view is closed"))
        }
    }

    fn persist(&self) {
        if let Err(e) = self.writer.save(&self.store.snapshot()) {
            warn!(document_id = %self.document_id, "Failed to queue annotation save: {}", e);
        }
    }

    // ============================================================
    // Field detection
    // ============================================================

    /// Detector configured for this session; run it and hand the result
    /// to [`Self::apply_detection`] with the token from
    /// [`Self::begin_detection`].
    pub fn detector(&self) -> &FieldDetector {
        &self.detector
    }

    pub fn begin_detection(&self) -> ViewToken {
        self.token()
    }

    /// Apply scan results if the view that started the scan is still open
    pub fn apply_detection(&mut self, token: &ViewToken, fields: Vec<DetectedField>) -> bool {
        if !self.is_current(token) {
            debug!(document_id = %token.document_id, "discarding stale detection results");
            return false;
        }
        debug!(document_id = %self.document_id, fields = fields.len(), "applied detection results");
        self.detected = fields;
        true
    }

    pub fn detected_fields(&self) -> &[DetectedField] {
        &self.detected
    }

    // ============================================================
    // Page navigation
    // ============================================================

    pub fn visible_page(&self) -> u32 {
        self.visible_page
    }

    /// Returns `false` for pages outside the document
    pub fn set_visible_page(&mut self, page: u32) -> bool {
        if page == 0 || page > self.page_count {
            return false;
        }
        if page != self.visible_page {
            self.overlay.cancel_gesture();
            self.visible_page = page;
        }
        true
    }

    pub fn visible_fields(&self) -> Vec<&DetectedField> {
        self.detected
            .iter()
            .filter(|f| f.page == self.visible_page)
            .collect()
    }

    pub fn visible_annotations(&self) -> Vec<&PlacedAnnotation> {
        self.store.on_page(self.visible_page)
    }

    // ============================================================
    // Placement and interaction
    // ============================================================

    /// Place `image` at the default position on the visible page and select it
    pub fn place_signature(&mut self, image: SignatureImage) -> Result<String> {
        self.ensure_active()?;
        if image.is_empty() {
            return Err(SigningError::EmptyCapture);
        }
        let id = self.store.place(image, self.visible_page, self.placement)?;
        self.overlay.select(&self.store, &id);
        self.persist();
        Ok(id)
    }

    pub fn select(&mut self, id: &str) -> bool {
        self.overlay.select(&self.store, id)
    }

    pub fn deselect(&mut self) {
        self.overlay.deselect();
    }

    pub fn pointer_down(&mut self, point: Point) -> &InteractionState {
        if !self.active {
            return self.overlay.state();
        }
        self.overlay
            .pointer_down(&self.store, self.visible_page, point)
    }

    /// Preview geometry, or `None` without a gesture or a rendered page
    pub fn pointer_move(&mut self, point: Point, surface: &dyn RenderSurface) -> Option<Geometry> {
        let bounds = surface.render_size(self.visible_page)?;
        self.overlay.pointer_move(point, bounds)
    }

    pub fn pointer_up(&mut self, surface: &dyn RenderSurface) -> Option<Commit> {
        if !self.active {
            return None;
        }
        let bounds = surface.render_size(self.visible_page);
        let commit = self.overlay.pointer_up(&mut self.store, bounds)?;
        self.persist();
        Some(commit)
    }

    pub fn delete(&mut self, id: &str) -> bool {
        if !self.active {
            return false;
        }
        let removed = self.overlay.delete(&mut self.store, id);
        if removed {
            self.persist();
        }
        removed
    }

    // ============================================================
    // Recipients
    // ============================================================

    pub fn add_recipient(&mut self, email: &str, name: &str, role: RecipientRole) -> Result<usize> {
        let entry = RecipientEntry::new(email, name, role)?;
        self.recipients.add(entry)
    }

    pub fn update_recipient(
        &mut self,
        index: usize,
        email: &str,
        name: &str,
        role: RecipientRole,
    ) -> Result<()> {
        let entry = RecipientEntry::new(email, name, role)?;
        self.recipients.update(index, entry)
    }

    pub fn remove_recipient(&mut self, index: usize) -> bool {
        self.recipients.remove(index).is_some()
    }

    // ============================================================
    // Submission
    // ============================================================

    pub fn prepare_submission(
        &self,
        document: DocumentPayload,
        surface: &dyn RenderSurface,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<PendingSubmission> {
        self.ensure_active()?;
        let request = self.assembler.assemble(
            &self.store.snapshot(),
            &self.recipients,
            surface,
            document,
            subject,
            body,
        )?;
        Ok(PendingSubmission {
            token: self.token(),
            request,
        })
    }

    /// Apply the submitter's result. Failures leave every annotation in place.
    pub fn complete_submission(
        &mut self,
        token: &ViewToken,
        result: Result<SubmissionResponse>,
    ) -> Result<SubmissionOutcome> {
        if !self.is_current(token) {
            debug!(document_id = %token.document_id, "discarding late submission result");
            return Ok(SubmissionOutcome::Discarded);
        }

        result?;
        self.store.clear();
        self.overlay.deselect();
        if let Err(e) = self.writer.remove(&self.document_id) {
            warn!(document_id = %self.document_id, "Failed to queue snapshot removal: {}", e);
        }
        self.last_message = Some(SUBMITTED_MESSAGE.to_string());
        Ok(SubmissionOutcome::Sent {
            message: SUBMITTED_MESSAGE.to_string(),
        })
    }

    /// Assemble, send and complete in one step
    pub async fn submit(
        &mut self,
        submitter: &dyn Submitter,
        document: DocumentPayload,
        surface: &dyn RenderSurface,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<SubmissionOutcome> {
        let pending = self.prepare_submission(document, surface, subject, body)?;
        let result = send(submitter, pending.request).await;
        self.complete_submission(&pending.token, result)
    }

    /// Close the view; every outstanding token becomes stale
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        self.overlay.deselect();
        self.detected.clear();
        info!(document_id = %self.document_id, "closed signing session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SignatureCapture, SignatureFont};
    use crate::geometry::{PageLayout, RenderSize};
    use crate::persistence::MemoryPersistence;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn image() -> SignatureImage {
        SignatureCapture::default()
            .capture_typed("Jane Doe", SignatureFont::Script, "#000000")
            .unwrap()
    }

    fn open(persistence: &Arc<MemoryPersistence>) -> SigningSession {
        let writer = PersistenceWriter::spawn(persistence.clone());
        SigningSession::open("doc-1", 3, persistence.as_ref(), writer)
    }

    fn layout() -> PageLayout {
        PageLayout::uniform(3, RenderSize::new(800.0, 1000.0))
    }

    #[tokio::test]
    async fn test_place_selects_and_persists() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        session.set_visible_page(2);
        let id = session.place_signature(image()).unwrap();

        assert_eq!(session.selected(), Some(id.as_str()));
        let placed = session.store().get(&id).unwrap();
        assert_eq!(placed.page, 2);
        assert_eq!(placed.geometry, Geometry::new(100.0, 100.0, 200.0, 75.0));

        session.writer.flush().await.unwrap();
        let saved = load_snapshot(persistence.as_ref(), "doc-1").unwrap().unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_restores_snapshot() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let id = session.place_signature(image()).unwrap();
        session.writer.flush().await.unwrap();
        session.close();

        let reopened = open(&persistence);
        assert_eq!(reopened.store().ids(), vec![id.as_str()]);
        assert_eq!(reopened.selected(), None);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_ignored() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.save("doc-1", "[[[").unwrap();
        let session = open(&persistence);
        assert!(session.store().is_empty());
    }

    #[tokio::test]
    async fn test_drag_commit_persists() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let id = session.place_signature(image()).unwrap();
        let layout = layout();

        session.pointer_down(Point::new(150.0, 120.0));
        assert!(matches!(session.interaction(), InteractionState::Dragging(..)));
        session.pointer_move(Point::new(250.0, 220.0), &layout);
        let commit = session.pointer_up(&layout).unwrap();
        assert_eq!(commit.id, id);

        session.writer.flush().await.unwrap();
        let saved = load_snapshot(persistence.as_ref(), "doc-1").unwrap().unwrap();
        assert_eq!(
            saved.annotations[0].geometry,
            Geometry::new(200.0, 200.0, 200.0, 75.0)
        );
    }

    #[tokio::test]
    async fn test_pointer_move_needs_rendered_page() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        session.place_signature(image()).unwrap();
        session.pointer_down(Point::new(150.0, 120.0));
        assert!(session
            .pointer_move(Point::new(250.0, 220.0), &PageLayout::new())
            .is_none());
    }

    #[tokio::test]
    async fn test_visible_filters() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        session.place_signature(image()).unwrap();
        session.set_visible_page(2);
        session.place_signature(image()).unwrap();
        session.place_signature(image()).unwrap();

        let token = session.begin_detection();
        assert!(session.apply_detection(
            &token,
            vec![DetectedField {
                page: 2,
                bounds: Geometry::new(72.0, 600.0, 100.0, 30.0),
                text: "Signature".to_string(),
            }],
        ));

        assert_eq!(session.visible_annotations().len(), 2);
        assert_eq!(session.visible_fields().len(), 1);
        assert!(session.set_visible_page(1));
        assert_eq!(session.visible_annotations().len(), 1);
        assert!(session.visible_fields().is_empty());
        assert!(!session.set_visible_page(0));
        assert!(!session.set_visible_page(4));
        assert_eq!(session.visible_page(), 1);
    }

    #[tokio::test]
    async fn test_stale_tokens_after_close() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let token = session.begin_detection();
        session.close();

        assert!(!session.apply_detection(&token, Vec::new()));
        assert!(session.place_signature(image()).is_err());
        assert!(session.pointer_up(&layout()).is_none());
    }

    #[tokio::test]
    async fn test_token_from_other_session_is_stale() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut first = open(&persistence);
        let token = first.begin_detection();
        first.close();

        let mut second = open(&persistence);
        assert!(!second.apply_detection(&token, Vec::new()));
        assert!(second.apply_detection(&second.begin_detection(), Vec::new()));
    }

    #[tokio::test]
    async fn test_delete_persists_and_clears_selection() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let id = session.place_signature(image()).unwrap();
        assert!(session.delete(&id));
        assert!(!session.delete(&id));
        assert_eq!(session.selected(), None);

        session.writer.flush().await.unwrap();
        let saved = load_snapshot(persistence.as_ref(), "doc-1").unwrap().unwrap();
        assert!(saved.is_empty());
    }

    /// Counts every request that reaches the transport
    #[derive(Default)]
    struct CountingSubmitter {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Submitter for CountingSubmitter {
        async fn submit(&self, _request: SubmissionRequest) -> Result<SubmissionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SubmissionResponse::ok("sent"))
        }
    }

    #[tokio::test]
    async fn test_submit_with_empty_store_skips_submitter() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let submitter = CountingSubmitter::default();
        let document = || DocumentPayload::Reference {
            name: "Lien Waiver.pdf".to_string(),
            url: "https://files.example.com/lien-waiver.pdf".to_string(),
        };

        let err = session
            .submit(&submitter, document(), &layout(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::NoAnnotations));

        // Emptied by deletion rather than never filled
        let id = session.place_signature(image()).unwrap();
        assert!(session.delete(&id));
        let err = session
            .submit(&submitter, document(), &layout(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::NoAnnotations));
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.last_message(), None);
    }

    #[tokio::test]
    async fn test_recipient_management() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut session = open(&persistence);
        let index = session
            .add_recipient("owner@site.com", "Owner", RecipientRole::Signer)
            .unwrap();
        assert!(session
            .add_recipient("bad", "Bad", RecipientRole::Cc)
            .is_err());
        session
            .update_recipient(index, "gc@site.com", "GC", RecipientRole::Signer)
            .unwrap();
        assert_eq!(session.recipients().entries()[0].email, "gc@site.com");
        assert!(session.remove_recipient(index));
        assert!(!session.remove_recipient(index));
    }
}
