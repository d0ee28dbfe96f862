//! Document signature annotation engine
//!
//! Captures signatures (drawn, typed or uploaded), places them on document
//! pages as movable annotations, persists placements per document and turns
//! them into resolution-independent percentages for submission. Signature
//! line detection and PDF stamping work directly on PDF bytes with lopdf;
//! typed names are typeset to PNG with Typst.
//!
//! [`SigningSession`] ties the pieces together for one open document.

pub mod capture;
pub mod config;
pub mod coords;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod overlay;
pub mod pdf_text;
pub mod persistence;
pub mod recipients;
pub mod session;
pub mod stamp;
pub mod store;
pub mod submission;
pub mod typeset;

pub use capture::{
    DrawingSession, DrawingSurface, ImageFormat, Rgb, SignatureCapture, SignatureFont,
    SignatureImage, SignatureSource,
};
pub use config::EngineConfig;
pub use coords::{CoordinateNormalizer, NormalizedGeometry, PageBox};
pub use detect::{DetectedField, FieldDetector, TextLayer, TextRun};
pub use error::{Result, SigningError};
pub use geometry::{Geometry, PageLayout, Point, RenderSize, RenderSurface};
pub use overlay::{Commit, GestureKind, InteractionState, OverlayInteraction};
pub use pdf_text::PdfTextLayer;
pub use persistence::{
    storage_key, AnnotationPersistence, JsonFilePersistence, MemoryPersistence, PersistenceWriter,
};
pub use recipients::{RecipientEntry, RecipientList, RecipientRole};
pub use session::{PendingSubmission, SigningSession, SubmissionOutcome, ViewToken};
pub use stamp::{stamp_signatures, stamp_signatures_with, StampOptions};
pub use store::{AnnotationSnapshot, AnnotationStore, PlacedAnnotation};
pub use submission::{
    DocumentPayload, NormalizedAnnotation, SubmissionAssembler, SubmissionRequest,
    SubmissionResponse, Submitter,
};
pub use typeset::Typeface;
