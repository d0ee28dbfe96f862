//! Authoritative collection of placed signature annotations for one document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capture::{SignatureImage, SignatureSource};
use crate::error::{Result, SigningError};
use crate::geometry::Geometry;

/// A signature image positioned on one page
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedAnnotation {
    pub id: String,
    pub document_id: String,
    /// 1-based
    pub page: u32,
    pub geometry: Geometry,
    pub image: SignatureImage,
}

/// Ordered annotations of one document; the unit of persistence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSnapshot {
    pub document_id: String,
    pub annotations: Vec<PlacedAnnotation>,
}

/// Stored form of one annotation; the image travels as a data URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAnnotation {
    pub id: String,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<SignatureSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_created_at: Option<DateTime<Utc>>,
}

/// `{ documentId: [annotation, ...] }`
pub type PersistedRecord = BTreeMap<String, Vec<PersistedAnnotation>>;

impl AnnotationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn to_record(&self) -> PersistedRecord {
        let entries = self
            .annotations
            .iter()
            .map(|a| PersistedAnnotation {
                id: a.id.clone(),
                page: a.page,
                x: a.geometry.x,
                y: a.geometry.y,
                width: a.geometry.width,
                height: a.geometry.height,
                image_ref: a.image.data_url(),
                image_source: Some(a.image.source().clone()),
                image_created_at: Some(a.image.created_at()),
            })
            .collect();
        BTreeMap::from([(self.document_id.clone(), entries)])
    }

    /// Rebuild the snapshot for `document_id` from a stored record.
    ///
    /// A record without an entry for the document yields an empty snapshot;
    /// an entry whose image cannot be decoded fails the whole record.
    pub fn from_record(document_id: &str, record: &PersistedRecord) -> Result<Self> {
        let annotations = record
            .get(document_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| -> Result<PlacedAnnotation> {
                        let image = SignatureImage::from_data_url(
                            &entry.image_ref,
                            entry.image_source.clone(),
                            entry.image_created_at,
                        )?;
                        Ok(PlacedAnnotation {
                            id: entry.id.clone(),
                            document_id: document_id.to_string(),
                            page: entry.page,
                            geometry: Geometry::new(entry.x, entry.y, entry.width, entry.height),
                            image,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            document_id: document_id.to_string(),
            annotations,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(document_id: &str, json: &str) -> Result<Self> {
        let record: PersistedRecord = serde_json::from_str(json)?;
        Self::from_record(document_id, &record)
    }
}

/// Placed annotations of one document, in placement order
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    document_id: String,
    annotations: Vec<PlacedAnnotation>,
}

impl AnnotationStore {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            annotations: Vec::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Place a new annotation and return its id
    pub fn place(&mut self, image: SignatureImage, page: u32, geometry: Geometry) -> Result<String> {
        if page == 0 {
            return Err(SigningError::validation("page", "pages are numbered from 1"));
        }
        if !geometry.is_valid() {
            return Err(SigningError::validation(
                "geometry",
                "width and height must be positive",
            ));
        }

        let id = Uuid::new_v4().to_string();
        self.annotations.push(PlacedAnnotation {
            id: id.clone(),
            document_id: self.document_id.clone(),
            page,
            geometry,
            image,
        });
        debug!(id = %id, page, "placed annotation");
        Ok(id)
    }

    /// Replace the geometry of an annotation.
    ///
    /// Returns `false` when the id is unknown or the geometry is degenerate.
    pub fn update_geometry(&mut self, id: &str, geometry: Geometry) -> bool {
        if !geometry.is_valid() {
            return false;
        }
        match self.annotations.iter_mut().find(|a| a.id == id) {
            Some(annotation) => {
                annotation.geometry = geometry;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id != id);
        self.annotations.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&PlacedAnnotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn annotations(&self) -> &[PlacedAnnotation] {
        &self.annotations
    }

    pub fn on_page(&self, page: u32) -> Vec<&PlacedAnnotation> {
        self.annotations.iter().filter(|a| a.page == page).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.annotations.iter().map(|a| a.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn clear(&mut self) {
        self.annotations.clear();
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            document_id: self.document_id.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Replace the contents with `snapshot`, keeping the first entry for a
    /// repeated id and dropping entries that break the page/size invariants.
    /// Returns the number of annotations restored.
    pub fn restore(&mut self, snapshot: AnnotationSnapshot) -> Result<usize> {
        if snapshot.document_id != self.document_id {
            return Err(SigningError::validation(
                "document",
                format!(
                    "snapshot belongs to {}, not {}",
                    snapshot.document_id, self.document_id
                ),
            ));
        }

        let mut seen = HashSet::new();
        let mut restored = Vec::with_capacity(snapshot.annotations.len());
        for annotation in snapshot.annotations {
            if !seen.insert(annotation.id.clone()) {
                warn!(id = %annotation.id, "Dropping duplicate annotation id");
                continue;
            }
            if annotation.page == 0 || !annotation.geometry.is_valid() {
                warn!(id = %annotation.id, "Dropping annotation with invalid placement");
                continue;
            }
            restored.push(PlacedAnnotation {
                document_id: self.document_id.clone(),
                ..annotation
            });
        }

        self.annotations = restored;
        Ok(self.annotations.len())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::capture::SignatureCapture;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Place(u32),
        Remove(usize),
        Move(usize, f64, f64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..5).prop_map(Op::Place),
            (0usize..10).prop_map(Op::Remove),
            (0usize..10, 0.0f64..500.0, 0.0f64..500.0).prop_map(|(i, x, y)| Op::Move(i, x, y)),
        ]
    }

    proptest! {
        /// Property: membership equals places minus removes, in placement order
        #[test]
        fn prop_membership_tracks_place_and_remove(ops in prop::collection::vec(op(), 0..40)) {
            let image = SignatureCapture::default()
                .capture_uploaded(b"\x89PNG\r\n\x1a\n".to_vec(), "image/png")
                .unwrap();
            let mut store = AnnotationStore::new("doc");
            let mut expected: Vec<String> = Vec::new();
            let mut issued: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Place(page) => {
                        let id = store
                            .place(image.clone(), page, Geometry::new(100.0, 100.0, 200.0, 75.0))
                            .unwrap();
                        expected.push(id.clone());
                        issued.push(id);
                    }
                    Op::Remove(i) => {
                        if let Some(id) = issued.get(i) {
                            let was_present = expected.contains(id);
                            prop_assert_eq!(store.remove(id), was_present);
                            expected.retain(|e| e != id);
                        }
                    }
                    Op::Move(i, x, y) => {
                        if let Some(id) = issued.get(i) {
                            store.update_geometry(id, Geometry::new(x, y, 200.0, 75.0));
                        }
                    }
                }
                let ids: Vec<String> = store.ids().into_iter().map(String::from).collect();
                prop_assert_eq!(&ids, &expected);
            }
        }
    }
}
