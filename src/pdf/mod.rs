//! PDF processing layer
//!
//! This module reads PDFs through PDFium and extracts reading-ordered page
//! elements.

pub mod backend;
mod extract;
mod pdfium;

pub use backend::{
    PdfBackend, PixelBuffer, RawBlock, RawImage, RawLine, RawPage, RawSpan, Rect, StaticBackend,
};
pub use extract::{
    extract_document, extract_page, image_file_name, infer_source_font, sort_reading_order,
    to_png_compatible, ElementKind, ExtractedDocument, ExtractedPage, FontWeight, PageElement,
    SkippedImage, SourceFont, FALLBACK_FONT_NAME, FALLBACK_FONT_SIZE,
};
pub use pdfium::PdfiumBackend;
