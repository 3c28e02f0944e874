//! PDFium-backed implementation of [`PdfBackend`]

use crate::error::{Error, Result};
use crate::pdf::backend::{PdfBackend, PixelBuffer, RawBlock, RawImage, RawLine, RawPage, RawSpan, Rect};
use pdfium_render::prelude::*;
use std::path::Path;

/// Lines closer than this fraction of the line height belong to the same block
const BLOCK_GAP_RATIO: f32 = 0.5;

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    // Try to bind to system library or use static linking
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Document pages read through PDFium.
///
/// All pages are read while the document is open; the PDFium handle is
/// released before `open` returns, on success and on error alike.
pub struct PdfiumBackend {
    pages: Vec<RawPage>,
}

impl PdfiumBackend {
    /// Open a PDF from a file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::PdfNotFound {
                path: path.display().to_string(),
            });
        }

        let data = std::fs::read(path)?;
        Self::open_bytes(&data)
    }

    /// Open a PDF from bytes
    pub fn open_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(Error::SourceUnreadable {
                reason: "Not a valid PDF file".to_string(),
            });
        }

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(Self::map_pdfium_error)?;

        let pages = document.pages();
        let mut raw_pages = Vec::with_capacity(pages.len() as usize);

        for index in 0..pages.len() {
            let page = pages.get(index).map_err(|e| Error::Pdfium {
                reason: format!("Failed to get page {}: {}", index + 1, e),
            })?;
            raw_pages.push(Self::read_page(index, &page));
        }

        tracing::debug!(pages = raw_pages.len(), "PDF loaded through PDFium");
        Ok(Self { pages: raw_pages })
    }

    fn read_page(index: u16, page: &PdfPage) -> RawPage {
        let width = page.width().value;
        let height = page.height().value;

        let mut text_objects = Vec::new();
        let mut images = Vec::new();

        for object in page.objects().iter() {
            if let Some(text_object) = object.as_text_object() {
                let Ok(bounds) = object.bounds() else {
                    continue;
                };
                let rect = Rect::from_bottom_left(
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.right().value,
                    bounds.top().value,
                    height,
                );
                text_objects.push((
                    rect,
                    RawSpan {
                        text: text_object.text(),
                        font_name: text_object.font().name(),
                        size: text_object.scaled_font_size().value,
                    },
                ));
            } else if let Some(image_object) = object.as_image_object() {
                let bbox = object.bounds().ok().map(|bounds| {
                    Rect::from_bottom_left(
                        bounds.left().value,
                        bounds.bottom().value,
                        bounds.right().value,
                        bounds.top().value,
                        height,
                    )
                });
                let pixels = image_object
                    .get_raw_image()
                    .map(PixelBuffer::Decoded)
                    .map_err(|e| e.to_string());
                images.push(RawImage { bbox, pixels });
            }
        }

        let (plain_text, lines) = match page.text() {
            Ok(text) => {
                let lines = text
                    .segments()
                    .iter()
                    .map(|segment| {
                        let bounds = segment.bounds();
                        let rect = Rect::from_bottom_left(
                            bounds.left().value,
                            bounds.bottom().value,
                            bounds.right().value,
                            bounds.top().value,
                            height,
                        );
                        let line = spans_for_segment(&segment.text(), &rect, &text_objects);
                        (rect, line)
                    })
                    .collect::<Vec<_>>();
                (text.all(), lines)
            }
            Err(e) => {
                tracing::warn!(page = index + 1, error = %e, "page has no text layer");
                (String::new(), Vec::new())
            }
        };

        RawPage {
            index,
            width,
            height,
            plain_text,
            blocks: group_lines_into_blocks(lines),
            images,
        }
    }

    /// Map PDFium errors to our error type
    fn map_pdfium_error(err: PdfiumError) -> Error {
        match err {
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                Error::PasswordRequired
            }
            _ => Error::SourceUnreadable {
                reason: format!("{}", err),
            },
        }
    }
}

impl PdfBackend for PdfiumBackend {
    fn page_count(&self) -> u16 {
        self.pages.len() as u16
    }

    fn page(&self, index: u16) -> Result<RawPage> {
        self.pages
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::Pdfium {
                reason: format!("Failed to get page {}", index + 1),
            })
    }
}

/// Build the spans of one text segment.
///
/// The segment text is authoritative for content; text objects only
/// contribute font information. When the objects centred inside the segment
/// spell out the same text they become the spans, otherwise the whole
/// segment is one span carrying the first object's font.
fn spans_for_segment(segment_text: &str, rect: &Rect, objects: &[(Rect, RawSpan)]) -> RawLine {
    let mut inside: Vec<&(Rect, RawSpan)> = objects
        .iter()
        .filter(|(bounds, _)| {
            let (cx, cy) = bounds.center();
            rect.contains_point(cx, cy)
        })
        .collect();
    inside.sort_by(|a, b| a.0.x0.total_cmp(&b.0.x0));

    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    let joined: String = inside.iter().map(|(_, span)| span.text.as_str()).collect();

    if !inside.is_empty() && squash(&joined) == squash(segment_text) {
        return RawLine {
            spans: inside.into_iter().map(|(_, span)| span.clone()).collect(),
        };
    }

    let (font_name, size) = inside
        .first()
        .map(|(_, span)| (span.font_name.clone(), span.size))
        .unwrap_or_else(|| (String::new(), rect.height()));

    RawLine {
        spans: vec![RawSpan {
            text: segment_text.to_string(),
            font_name,
            size,
        }],
    }
}

/// Merge consecutive lines into blocks when they are vertically adjacent and
/// share horizontal extent
pub(crate) fn group_lines_into_blocks(lines: Vec<(Rect, RawLine)>) -> Vec<RawBlock> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut last_line: Option<Rect> = None;

    for (rect, line) in lines {
        let joins_previous = match (last_line, blocks.last()) {
            (Some(prev), Some(_)) => {
                let gap = rect.y0 - prev.y1;
                let line_height = prev.height().max(rect.height());
                gap >= -line_height
                    && gap <= line_height * BLOCK_GAP_RATIO
                    && rect.overlaps_horizontally(&prev)
            }
            _ => false,
        };

        match blocks.last_mut() {
            Some(block) if joins_previous => {
                block.bbox = block.bbox.union(&rect);
                block.lines.push(line);
            }
            _ => blocks.push(RawBlock {
                bbox: rect,
                lines: vec![line],
            }),
        }
        last_line = Some(rect);
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, font: &str) -> RawSpan {
        RawSpan {
            text: text.to_string(),
            font_name: font.to_string(),
            size: 11.0,
        }
    }

    #[test]
    fn test_invalid_pdf_detection() {
        let result = PdfiumBackend::open_bytes(b"not a pdf");
        assert!(matches!(result, Err(Error::SourceUnreadable { .. })));
    }

    #[test]
    fn test_open_missing_file() {
        let result = PdfiumBackend::open("/nonexistent/path/file.pdf");
        assert!(matches!(result, Err(Error::PdfNotFound { .. })));
    }

    #[test]
    fn test_group_adjacent_lines() {
        let lines = vec![
            (Rect::new(10.0, 10.0, 200.0, 22.0), RawLine { spans: vec![span("first", "")] }),
            (Rect::new(10.0, 24.0, 180.0, 36.0), RawLine { spans: vec![span("second", "")] }),
            (Rect::new(10.0, 80.0, 180.0, 92.0), RawLine { spans: vec![span("third", "")] }),
        ];
        let blocks = group_lines_into_blocks(lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines.len(), 2);
        assert_eq!(blocks[0].bbox, Rect::new(10.0, 10.0, 200.0, 36.0));
        assert_eq!(blocks[1].concatenated_text(), "third");
    }

    #[test]
    fn test_side_by_side_lines_stay_apart() {
        let lines = vec![
            (Rect::new(10.0, 10.0, 100.0, 22.0), RawLine { spans: vec![span("left", "")] }),
            (Rect::new(300.0, 12.0, 400.0, 24.0), RawLine { spans: vec![span("right", "")] }),
        ];
        assert_eq!(group_lines_into_blocks(lines).len(), 2);
    }

    #[test]
    fn test_spans_from_matching_objects() {
        let rect = Rect::new(0.0, 0.0, 100.0, 12.0);
        let objects = vec![
            (Rect::new(40.0, 1.0, 90.0, 11.0), span("world", "Arial")),
            (Rect::new(0.0, 1.0, 38.0, 11.0), span("Hello ", "Arial-BoldMT")),
        ];
        let line = spans_for_segment("Hello world", &rect, &objects);
        assert_eq!(line.spans.len(), 2);
        assert_eq!(line.spans[0].font_name, "Arial-BoldMT");
    }

    #[test]
    fn test_spans_fall_back_to_segment_text() {
        let rect = Rect::new(0.0, 0.0, 100.0, 12.0);
        let objects = vec![(Rect::new(0.0, 1.0, 38.0, 11.0), span("Hel", "Times"))];
        let line = spans_for_segment("Hello", &rect, &objects);
        assert_eq!(line.spans.len(), 1);
        assert_eq!(line.spans[0].text, "Hello");
        assert_eq!(line.spans[0].font_name, "Times");
    }
}
