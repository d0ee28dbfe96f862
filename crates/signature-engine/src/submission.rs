//! Submission package assembly
//!
//! Converts the placed annotations into their resolution-independent form
//! and hands the package to the host's [`Submitter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coords::{CoordinateNormalizer, NormalizedGeometry};
use crate::error::{Result, SigningError};
use crate::geometry::RenderSurface;
use crate::recipients::{RecipientEntry, RecipientList};
use crate::store::AnnotationSnapshot;

/// The document being signed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocumentPayload {
    /// The PDF bytes travel with the request
    Bytes {
        name: String,
        #[serde(with = "crate::capture::payload_base64")]
        bytes: Vec<u8>,
    },
    /// The collaborator fetches the PDF itself
    Reference { name: String, url: String },
}

impl DocumentPayload {
    pub fn name(&self) -> &str {
        match self {
            DocumentPayload::Bytes { name, .. } | DocumentPayload::Reference { name, .. } => name,
        }
    }
}

/// One signature in page-relative form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAnnotation {
    pub page: u32,
    #[serde(flatten)]
    pub geometry: NormalizedGeometry,
    /// `data:` URL of the signature image
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub document_id: String,
    pub document: DocumentPayload,
    pub normalized_annotations: Vec<NormalizedAnnotation>,
    pub recipients: Vec<RecipientEntry>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmissionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// The external collaborator that stamps and delivers the signed document
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, request: SubmissionRequest) -> Result<SubmissionResponse>;
}

/// Default email subject for a document
pub fn default_subject(document_name: &str) -> String {
    format!("Signed Document: {}", document_name)
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionAssembler {
    normalizer: CoordinateNormalizer,
}

impl SubmissionAssembler {
    pub fn new(normalizer: CoordinateNormalizer) -> Self {
        Self { normalizer }
    }

    /// Normalize every annotation against the current render sizes.
    ///
    /// Pages without a render size use the fallback placement.
    pub fn normalize(
        &self,
        snapshot: &AnnotationSnapshot,
        recipients: &RecipientList,
        surface: &dyn RenderSurface,
    ) -> Result<Vec<NormalizedAnnotation>> {
        if snapshot.is_empty() {
            return Err(SigningError::NoAnnotations);
        }

        let signer = recipients.first_signer();
        let signed_at = Utc::now();
        Ok(snapshot
            .annotations
            .iter()
            .map(|annotation| NormalizedAnnotation {
                page: annotation.page,
                geometry: self.normalizer.to_percent(
                    &annotation.geometry,
                    annotation.page,
                    surface.render_size(annotation.page),
                ),
                image_url: annotation.image.data_url(),
                name: signer.map(|s| s.name.clone()).filter(|n| !n.is_empty()),
                email: signer.map(|s| s.email.clone()),
                signed_at,
            })
            .collect())
    }

    /// Build the full request. Blank subjects fall back to the default.
    pub fn assemble(
        &self,
        snapshot: &AnnotationSnapshot,
        recipients: &RecipientList,
        surface: &dyn RenderSurface,
        document: DocumentPayload,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<SubmissionRequest> {
        let normalized_annotations = self.normalize(snapshot, recipients, surface)?;
        let subject = subject
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| default_subject(document.name()));
        let body = body
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(String::from);

        Ok(SubmissionRequest {
            document_id: snapshot.document_id.clone(),
            document,
            normalized_annotations,
            recipients: recipients.entries().to_vec(),
            subject,
            body,
        })
    }
}

/// Deliver `request`, mapping every failure to a retryable transport error.
///
/// A request without annotations is refused before the submitter sees it.
pub async fn send(submitter: &dyn Submitter, request: SubmissionRequest) -> Result<SubmissionResponse> {
    let document_id = request.document_id.clone();
    let count = request.normalized_annotations.len();
    if count == 0 {
        debug!(document_id = %document_id, "Refusing to send a request without signatures");
        return Err(SigningError::NoAnnotations);
    }

    match submitter.submit(request).await {
        Ok(response) if response.success => {
            info!(document_id = %document_id, signatures = count, "submitted signed document");
            Ok(response)
        }
        Ok(response) => {
            let reason = response
                .message
                .unwrap_or_else(|| "Failed to send signed document".to_string());
            warn!(document_id = %document_id, "Submission rejected: {}", reason);
            Err(SigningError::SubmissionTransport(reason))
        }
        Err(SigningError::SubmissionTransport(reason)) => {
            warn!(document_id = %document_id, "Submission failed: {}", reason);
            Err(SigningError::SubmissionTransport(reason))
        }
        Err(other) => {
            warn!(document_id = %document_id, "Submission failed: {}", other);
            Err(SigningError::SubmissionTransport(other.to_string()))
        }
    }
}
