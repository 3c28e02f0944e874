//! Error types for the PDF reflow server

use thiserror::Error;

/// Result type alias for the PDF reflow server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the PDF reflow server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// The input cannot be parsed as a PDF at all
    #[error("Unreadable PDF source: {reason}")]
    SourceUnreadable { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// A single image could not be decoded or saved
    #[error("Image extraction failed on page {page}, image {index}: {reason}")]
    ImageExtraction { page: u32, index: u32, reason: String },

    /// The HTML-to-PDF capability failed
    #[error("Render failed: {reason}")]
    Render { reason: String },

    /// Settings store returned something unusable
    #[error("Settings store error: {reason}")]
    Settings { reason: String },

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Path access denied (outside the allowed directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// Requested output artifact does not exist
    #[error("Output not found: {path}")]
    OutputNotFound { path: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::SourceUnreadable { .. } => "Could not open the PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::Pdfium { .. } => "PDF processing error".to_string(),
            Error::ImageExtraction { page, index, .. } => {
                format!("Image {} on page {} could not be extracted", index, page)
            }
            Error::Render { .. } => "PDF reconstruction failed".to_string(),
            Error::Settings { .. } => "Settings store error".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Image(_) => "Image processing error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::OutputNotFound { .. } => "File not found".to_string(),
            Error::InvalidConfig { reason } => format!("Invalid configuration: {}", reason),
        }
    }
}
