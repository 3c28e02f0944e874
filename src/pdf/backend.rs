//! PDF backend abstraction layer.
//!
//! The extractor only sees pages as positioned text spans and raster buffers.
//! A backend turns a concrete PDF engine into that shape; PDFium is the
//! production one, tests feed synthetic pages.

use crate::error::Result;
use image::DynamicImage;

/// Axis-aligned rectangle in page space (origin top-left, y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Smallest rectangle covering both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// True when the horizontal extents share any span
    pub fn overlaps_horizontally(&self, other: &Rect) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1
    }

    /// Convert a bottom-left origin rectangle (PDF native) to top-left origin
    pub fn from_bottom_left(left: f32, bottom: f32, right: f32, top: f32, page_height: f32) -> Rect {
        Rect {
            x0: left.min(right),
            y0: page_height - top.max(bottom),
            x1: left.max(right),
            y1: page_height - top.min(bottom),
        }
    }
}

/// Smallest run of text the engine reports with a single font
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpan {
    pub text: String,
    /// Font name as reported by the engine; empty when unknown
    pub font_name: String,
    /// Nominal font size in points
    pub size: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLine {
    pub spans: Vec<RawSpan>,
}

/// A group of lines the engine (or backend) treats as one text block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBlock {
    pub bbox: Rect,
    pub lines: Vec<RawLine>,
}

impl RawBlock {
    /// All span texts in line order, unstripped
    pub fn concatenated_text(&self) -> String {
        self.lines
            .iter()
            .flat_map(|line| line.spans.iter())
            .map(|span| span.text.as_str())
            .collect()
    }
}

/// Pixel data of an embedded raster image
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    /// Already decoded by the engine
    Decoded(DynamicImage),
    /// Interleaved 8-bit samples with `channels` components per pixel.
    /// Four or more channels are CMYK (extra DeviceN channels ignored).
    Raw {
        width: u32,
        height: u32,
        channels: u8,
        samples: Vec<u8>,
    },
}

/// One image placement on a page
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Placement in page space; `None` when the engine has no placement info
    pub bbox: Option<Rect>,
    /// Decoded pixels, or the reason decoding failed
    pub pixels: std::result::Result<PixelBuffer, String>,
}

/// Everything the extractor needs from one page
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// Page index (0-based)
    pub index: u16,
    pub width: f32,
    pub height: f32,
    /// Plain text as the engine linearizes it
    pub plain_text: String,
    pub blocks: Vec<RawBlock>,
    pub images: Vec<RawImage>,
}

/// Abstract interface for PDF document access.
///
/// Dropping the backend releases the underlying document handle.
pub trait PdfBackend {
    /// Number of pages in the document
    fn page_count(&self) -> u16;

    /// Read one page (0-based index)
    fn page(&self, index: u16) -> Result<RawPage>;
}

/// In-memory backend over prebuilt pages
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    pages: Vec<RawPage>,
}

impl StaticBackend {
    pub fn new(pages: Vec<RawPage>) -> Self {
        Self { pages }
    }
}

impl PdfBackend for StaticBackend {
    fn page_count(&self) -> u16 {
        self.pages.len() as u16
    }

    fn page(&self, index: u16) -> Result<RawPage> {
        self.pages
            .get(index as usize)
            .cloned()
            .ok_or_else(|| crate::error::Error::Pdfium {
                reason: format!("page {} out of range", index + 1),
            })
    }
}
