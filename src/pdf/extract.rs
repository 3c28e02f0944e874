//! Page element extraction
//!
//! Turns backend pages into reading-ordered [`PageElement`]s: text blocks with
//! a best-effort source font, and images saved as PNG files into the run
//! directory.

use crate::error::{Error, Result};
use crate::pdf::backend::{PdfBackend, PixelBuffer, RawImage, RawPage, Rect};
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb};
use std::fmt;
use std::path::{Path, PathBuf};

/// Font name used when no source span matches a block
pub const FALLBACK_FONT_NAME: &str = "unknown";

/// Font size (pt) used when no source size is known
pub const FALLBACK_FONT_SIZE: f32 = 12.0;

/// Font weight as carried through the NEO markup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

impl FontWeight {
    /// "Bold" iff the font name carries the case-sensitive `Bold` marker
    pub fn from_font_name(name: &str) -> Self {
        if name.contains("Bold") {
            FontWeight::Bold
        } else {
            FontWeight::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FontWeight::Normal => "normal",
            FontWeight::Bold => "bold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "normal" => Some(FontWeight::Normal),
            "bold" => Some(FontWeight::Bold),
            _ => None,
        }
    }
}

impl fmt::Display for FontWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the substring-matching font heuristic
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFont {
    /// A span of the page matched the block text
    Inferred {
        name: String,
        size: f32,
        weight: FontWeight,
    },
    /// Nothing matched
    Fallback,
}

impl SourceFont {
    pub fn name(&self) -> &str {
        match self {
            SourceFont::Inferred { name, .. } => name,
            SourceFont::Fallback => FALLBACK_FONT_NAME,
        }
    }

    pub fn size(&self) -> f32 {
        match self {
            SourceFont::Inferred { size, .. } => *size,
            SourceFont::Fallback => FALLBACK_FONT_SIZE,
        }
    }

    pub fn weight(&self) -> FontWeight {
        match self {
            SourceFont::Inferred { weight, .. } => *weight,
            SourceFont::Fallback => FontWeight::Normal,
        }
    }

    pub fn is_inferred(&self) -> bool {
        matches!(self, SourceFont::Inferred { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Text {
        /// Block text, stripped and flattened onto one line
        content: String,
        source_font: SourceFont,
    },
    Image {
        /// Absolute path of the saved PNG
        path: PathBuf,
    },
}

/// One extracted text block or image
#[derive(Debug, Clone, PartialEq)]
pub struct PageElement {
    /// Page number (1-indexed)
    pub page: u32,
    pub bbox: Rect,
    pub kind: ElementKind,
}

/// Elements of one page in reading order
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// Page number (1-indexed)
    pub number: u32,
    pub elements: Vec<PageElement>,
}

/// An image that could not be extracted
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub page: u32,
    pub index: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
    /// Engine plain text of all pages, page after page
    pub og_text: String,
    pub skipped_images: Vec<SkippedImage>,
}

impl ExtractedDocument {
    /// All elements in page order, each page already in reading order
    pub fn elements(&self) -> impl Iterator<Item = &PageElement> {
        self.pages.iter().flat_map(|page| page.elements.iter())
    }

    /// Paths of every saved image
    pub fn image_paths(&self) -> Vec<&Path> {
        self.elements()
            .filter_map(|element| match &element.kind {
                ElementKind::Image { path } => Some(path.as_path()),
                ElementKind::Text { .. } => None,
            })
            .collect()
    }
}

/// Deterministic file name of an extracted image
pub fn image_file_name(page: u32, index: u32) -> String {
    format!("image_p{}_{}.png", page, index)
}

/// Extract every page of a document, saving images into `output_dir`
pub fn extract_document<B: PdfBackend + ?Sized>(
    backend: &B,
    output_dir: &Path,
) -> Result<ExtractedDocument> {
    let mut document = ExtractedDocument::default();

    for index in 0..backend.page_count() {
        let raw = match backend.page(index) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(page = index + 1, error = %e, "skipping unreadable page");
                continue;
            }
        };

        document.og_text.push_str(&raw.plain_text);
        if !raw.plain_text.ends_with('\n') {
            document.og_text.push('\n');
        }

        let (page, skipped) = extract_page(&raw, output_dir);
        document.skipped_images.extend(skipped);
        document.pages.push(page);
    }

    tracing::info!(
        pages = document.pages.len(),
        elements = document.elements().count(),
        skipped_images = document.skipped_images.len(),
        "extraction finished"
    );
    Ok(document)
}

/// Extract one page. Image failures are reported, never fatal.
pub fn extract_page(raw: &RawPage, output_dir: &Path) -> (ExtractedPage, Vec<SkippedImage>) {
    let number = raw.index as u32 + 1;
    let mut elements = Vec::new();
    let mut skipped = Vec::new();

    for block in &raw.blocks {
        let content = flatten_line_breaks(block.concatenated_text().trim());
        if content.is_empty() {
            continue;
        }
        let source_font = infer_source_font(&content, raw);
        elements.push(PageElement {
            page: number,
            bbox: block.bbox,
            kind: ElementKind::Text {
                content,
                source_font,
            },
        });
    }

    let page_rect = Rect::new(0.0, 0.0, raw.width, raw.height);
    for (index, image) in raw.images.iter().enumerate() {
        let index = index as u32;
        match save_image(image, number, index, &page_rect, output_dir) {
            Ok(element) => elements.push(element),
            Err(e) => {
                tracing::warn!(page = number, index, error = %e, "image extraction failed");
                skipped.push(SkippedImage {
                    page: number,
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    sort_reading_order(&mut elements);

    (
        ExtractedPage { number, elements },
        skipped,
    )
}

/// Top-to-bottom, then left-to-right
pub fn sort_reading_order(elements: &mut [PageElement]) {
    elements.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then_with(|| a.bbox.x0.total_cmp(&b.bbox.x0))
    });
}

/// Best-effort font of a block: the first span on the page whose text occurs
/// in the block text.
///
/// Block concatenation loses span boundaries, so this can pick a span from a
/// different block that happens to share text.
pub fn infer_source_font(block_text: &str, page: &RawPage) -> SourceFont {
    page.blocks
        .iter()
        .flat_map(|block| block.lines.iter())
        .flat_map(|line| line.spans.iter())
        .find(|span| {
            let text = span.text.trim();
            !text.is_empty() && block_text.contains(text)
        })
        .map(|span| SourceFont::Inferred {
            name: span.font_name.clone(),
            size: span.size,
            weight: FontWeight::from_font_name(&span.font_name),
        })
        .unwrap_or(SourceFont::Fallback)
}

fn flatten_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// An image without bounds is placed over the whole page
fn save_image(
    image: &RawImage,
    page: u32,
    index: u32,
    page_rect: &Rect,
    output_dir: &Path,
) -> Result<PageElement> {
    let pixels = image.pixels.as_ref().map_err(|reason| Error::ImageExtraction {
        page,
        index,
        reason: reason.clone(),
    })?;
    let encodable = to_png_compatible(pixels).ok_or_else(|| Error::ImageExtraction {
        page,
        index,
        reason: "pixel buffer does not match its dimensions".to_string(),
    })?;

    let path = output_dir.join(image_file_name(page, index));
    encodable.save_with_format(&path, image::ImageFormat::Png)?;
    let path = std::fs::canonicalize(&path).unwrap_or(path);

    Ok(PageElement {
        page,
        bbox: image.bbox.unwrap_or(*page_rect),
        kind: ElementKind::Image { path },
    })
}

/// Convert a buffer into a layout the PNG encoder accepts.
///
/// Returns `None` when a raw buffer is shorter than its dimensions require.
pub fn to_png_compatible(pixels: &PixelBuffer) -> Option<DynamicImage> {
    match pixels {
        PixelBuffer::Decoded(image) => Some(match image {
            DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb8(image.to_rgb8()),
            DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba8(image.to_rgba8()),
            other => other.clone(),
        }),
        PixelBuffer::Raw {
            width,
            height,
            channels,
            samples,
        } => {
            let (width, height) = (*width, *height);
            match channels {
                1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, samples.clone())
                    .map(DynamicImage::ImageLuma8),
                2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, samples.clone())
                    .map(DynamicImage::ImageLumaA8),
                3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, samples.clone())
                    .map(DynamicImage::ImageRgb8),
                0 => None,
                n => cmyk_to_rgb(width, height, *n as usize, samples).map(DynamicImage::ImageRgb8),
            }
        }
    }
}

fn cmyk_to_rgb(
    width: u32,
    height: u32,
    channels: usize,
    samples: &[u8],
) -> Option<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    let pixel_count = width as usize * height as usize;
    if samples.len() < pixel_count * channels {
        return None;
    }

    let rgb = samples
        .chunks_exact(channels)
        .take(pixel_count)
        .flat_map(|px| {
            let k = 255 - px[3] as u16;
            [px[0], px[1], px[2]].map(|c| ((255 - c as u16) * k / 255) as u8)
        })
        .collect();

    ImageBuffer::from_raw(width, height, rgb)
}
