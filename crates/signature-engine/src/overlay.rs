//! Pointer interaction with placed signatures
//!
//! Selection, drag and resize of annotations on the visible page. Geometry
//! is previewed while the pointer moves and written to the
//! [`AnnotationStore`] once, when the pointer is released.

use tracing::debug;

use crate::config::OverlayConfig;
use crate::geometry::{Geometry, Point, RenderSize};
use crate::store::AnnotationStore;

/// An in-progress drag or resize
#[derive(Debug, Clone, PartialEq)]
pub struct Gesture {
    pub page: u32,
    pub start_pointer: Point,
    pub start_geometry: Geometry,
    /// Latest clamped preview
    pub current: Geometry,
}

impl Gesture {
    fn new(page: u32, start_pointer: Point, start_geometry: Geometry) -> Self {
        Self {
            page,
            start_pointer,
            start_geometry,
            current: start_geometry,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionState {
    Idle,
    Selected(String),
    Dragging(String, Gesture),
    Resizing(String, Gesture),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Drag,
    Resize,
}

/// Geometry written to the store at the end of a gesture
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: String,
    pub page: u32,
    pub geometry: Geometry,
    pub kind: GestureKind,
}

/// What the pointer landed on
#[derive(Debug, Clone, PartialEq)]
enum Hit {
    Handle(String, Geometry),
    Body(String, Geometry),
    Background,
}

#[derive(Debug, Clone)]
pub struct OverlayInteraction {
    config: OverlayConfig,
    state: InteractionState,
}

impl Default for OverlayInteraction {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl OverlayInteraction {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            state: InteractionState::Idle,
        }
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// Id of the annotation being selected, dragged or resized
    pub fn selected(&self) -> Option<&str> {
        match &self.state {
            InteractionState::Idle => None,
            InteractionState::Selected(id)
            | InteractionState::Dragging(id, _)
            | InteractionState::Resizing(id, _) => Some(id),
        }
    }

    /// Select an annotation; unknown ids leave the state unchanged
    pub fn select(&mut self, store: &AnnotationStore, id: &str) -> bool {
        if store.get(id).is_none() {
            return false;
        }
        self.state = InteractionState::Selected(id.to_string());
        true
    }

    pub fn deselect(&mut self) {
        self.state = InteractionState::Idle;
    }

    pub fn pointer_down(
        &mut self,
        store: &AnnotationStore,
        page: u32,
        point: Point,
    ) -> &InteractionState {
        // A press without a release in between abandons the old gesture.
        self.cancel_gesture();

        let hit = self.hit_test(store, page, point);
        let next = match (&self.state, hit) {
            (InteractionState::Selected(selected), Hit::Handle(id, geometry)) if *selected == id => {
                InteractionState::Resizing(id, Gesture::new(page, point, geometry))
            }
            (InteractionState::Selected(selected), Hit::Body(id, geometry)) if *selected == id => {
                InteractionState::Dragging(id, Gesture::new(page, point, geometry))
            }
            (_, Hit::Handle(id, _)) | (_, Hit::Body(id, _)) => InteractionState::Selected(id),
            (_, Hit::Background) => InteractionState::Idle,
        };
        self.state = next;
        &self.state
    }

    /// Update the preview of the current gesture, clamped to the page.
    ///
    /// Returns `None` when no gesture is in progress.
    pub fn pointer_move(&mut self, point: Point, page_bounds: RenderSize) -> Option<Geometry> {
        let config = &self.config;
        match &mut self.state {
            InteractionState::Dragging(_, gesture) => {
                gesture.current = drag_geometry(gesture, point, page_bounds);
                Some(gesture.current)
            }
            InteractionState::Resizing(_, gesture) => {
                gesture.current = resize_geometry(gesture, point, page_bounds, config);
                Some(gesture.current)
            }
            InteractionState::Idle | InteractionState::Selected(_) => None,
        }
    }

    /// Finish the current gesture and commit its geometry to the store.
    ///
    /// Without page bounds the last preview is committed as is.
    pub fn pointer_up(
        &mut self,
        store: &mut AnnotationStore,
        page_bounds: Option<RenderSize>,
    ) -> Option<Commit> {
        let state = std::mem::replace(&mut self.state, InteractionState::Idle);
        let (id, gesture, kind) = match state {
            InteractionState::Dragging(id, gesture) => (id, gesture, GestureKind::Drag),
            InteractionState::Resizing(id, gesture) => (id, gesture, GestureKind::Resize),
            other => {
                self.state = other;
                return None;
            }
        };

        let geometry = match page_bounds.filter(RenderSize::is_usable) {
            Some(bounds) => gesture.current.clamp_within(bounds),
            None => gesture.current,
        };
        if !store.update_geometry(&id, geometry) {
            debug!(id = %id, "gesture target disappeared");
            return None;
        }

        debug!(id = %id, kind = ?kind, "committed gesture");
        self.state = InteractionState::Selected(id.clone());
        Some(Commit {
            id,
            page: gesture.page,
            geometry,
            kind,
        })
    }

    /// Drop an in-progress gesture without committing it
    pub fn cancel_gesture(&mut self) {
        if let InteractionState::Dragging(id, _) | InteractionState::Resizing(id, _) = &self.state {
            self.state = InteractionState::Selected(id.clone());
        }
    }

    /// Remove an annotation; valid in any state and always ends in `Idle`
    pub fn delete(&mut self, store: &mut AnnotationStore, id: &str) -> bool {
        self.state = InteractionState::Idle;
        store.remove(id)
    }

    fn handle_bounds(&self, geometry: &Geometry) -> Geometry {
        let size = self
            .config
            .handle_size
            .min(geometry.width)
            .min(geometry.height);
        Geometry::new(geometry.right() - size, geometry.bottom() - size, size, size)
    }

    fn hit_test(&self, store: &AnnotationStore, page: u32, point: Point) -> Hit {
        let on_page = store.on_page(page);

        if let Some(selected) = self.selected() {
            if let Some(annotation) = on_page.iter().find(|a| a.id == selected) {
                if self.handle_bounds(&annotation.geometry).contains(point) {
                    return Hit::Handle(annotation.id.clone(), annotation.geometry);
                }
                if annotation.geometry.contains(point) {
                    return Hit::Body(annotation.id.clone(), annotation.geometry);
                }
            }
        }

        // Later placements render on top.
        on_page
            .iter()
            .rev()
            .find(|a| a.geometry.contains(point))
            .map(|a| Hit::Body(a.id.clone(), a.geometry))
            .unwrap_or(Hit::Background)
    }
}

fn drag_geometry(gesture: &Gesture, point: Point, bounds: RenderSize) -> Geometry {
    let start = gesture.start_geometry;
    let moved = Geometry::new(
        start.x + (point.x - gesture.start_pointer.x),
        start.y + (point.y - gesture.start_pointer.y),
        start.width,
        start.height,
    );
    moved.clamp_within(bounds)
}

/// Resize from the bottom-right corner keeping the starting aspect ratio.
/// Minimum sizes give way to the page bounds when both cannot hold.
fn resize_geometry(
    gesture: &Gesture,
    point: Point,
    bounds: RenderSize,
    config: &OverlayConfig,
) -> Geometry {
    let start = gesture.start_geometry.clamp_within(bounds);
    let aspect = gesture.start_geometry.aspect_ratio();

    let desired = start.width + (point.x - gesture.start_pointer.x);
    let floor = config.min_width.max(config.min_height * aspect);
    let cap = (bounds.width - start.x).min((bounds.height - start.y) * aspect);

    let width = desired.max(floor).min(cap);
    Geometry::new(start.x, start.y, width, width / aspect)
}
