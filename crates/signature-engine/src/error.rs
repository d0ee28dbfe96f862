//! Error types for the signature engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SigningError>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("No strokes recorded on the drawing surface")]
    EmptyCapture,

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("No signatures have been placed")]
    NoAnnotations,

    #[error("Page {page} is not currently rendered")]
    RenderUnavailable { page: u32 },

    #[error("Submission failed: {0}")]
    SubmissionTransport(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(String),

    #[error("PDF error: {0}")]
    Pdf(String),
}

impl SigningError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        SigningError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Message shown inline next to the control that caused the error.
    pub fn user_message(&self) -> String {
        match self {
            SigningError::EmptyCapture => "Please create or upload a signature first".to_string(),
            SigningError::Validation { field, message } => match *field {
                "name" => "Please enter your name".to_string(),
                "email" => format!("Please enter a valid email address ({})", message),
                _ => message.clone(),
            },
            SigningError::UnsupportedFormat(_) => "Please upload a PNG or JPG image".to_string(),
            SigningError::NoAnnotations => "Please add at least one signature".to_string(),
            SigningError::SubmissionTransport(reason) => {
                format!("Failed to save signatures: {}", reason)
            }
            // Internal kinds are resolved where they occur; keep the wording generic.
            SigningError::RenderUnavailable { .. }
            | SigningError::Persistence(_)
            | SigningError::Serialization(_)
            | SigningError::Image(_)
            | SigningError::Pdf(_) => "Something went wrong, please try again".to_string(),
        }
    }

    /// Only transport failures are worth offering a retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SigningError::SubmissionTransport(_))
    }
}
