//! Element sequence to NEO markup

use crate::neo::directive::{to_neo_text, Directive};
use crate::pdf::{
    ElementKind, ExtractedDocument, FontWeight, PageElement, SourceFont, FALLBACK_FONT_SIZE,
};
use crate::settings::OverrideSettings;
use std::fmt::Write;

/// Family emitted when no `fontSelect` override is present
pub const DEFAULT_FAMILY: &str = "IPAexGothic, sans-serif";

/// Smallest emitted size; a negative `fontSize` delta bottoms out here
pub const MIN_FONT_SIZE: f32 = 1.0;

/// How the emitted base size and weight are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFontPolicy {
    /// Base size 12pt; bold iff the block text mentions "bold"
    #[default]
    Normalize,
    /// Inferred source size and weight, falling back to 12pt normal
    Preserve,
}

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub default_family: String,
    pub policy: SourceFontPolicy,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            default_family: DEFAULT_FAMILY.to_string(),
            policy: SourceFontPolicy::default(),
        }
    }
}

/// Result of encoding one document
#[derive(Debug, Clone, Default)]
pub struct EncodedDocument {
    pub directives: Vec<Directive>,
    /// NEO text, one directive per line
    pub neo: String,
    /// Human-readable trace of the element order
    pub sorted: String,
}

/// Streaming encoder; elements must arrive in reading order
pub struct NeoEncoder<'a> {
    options: &'a EncodeOptions,
    overrides: Option<&'a OverrideSettings>,
    previous_bottom: Option<f32>,
    directives: Vec<Directive>,
    sorted: String,
}

impl<'a> NeoEncoder<'a> {
    pub fn new(options: &'a EncodeOptions, overrides: Option<&'a OverrideSettings>) -> Self {
        Self {
            options,
            overrides,
            previous_bottom: None,
            directives: Vec::new(),
            sorted: String::new(),
        }
    }

    /// Start a new page; spacing is never carried across a page boundary
    pub fn begin_page(&mut self, number: u32) {
        self.previous_bottom = None;
        let _ = writeln!(self.sorted, "\n--- Page {} ---", number);
    }

    pub fn push(&mut self, element: &PageElement) {
        let options = self.options;
        let overrides = self.overrides;

        if let Some(previous_bottom) = self.previous_bottom {
            let multiplier = overrides.and_then(|o| o.line_height).unwrap_or(1.0);
            let gap = round_hundredths((element.bbox.y0 - previous_bottom) * multiplier);
            if gap > 0.0 && gap.is_finite() {
                self.directives.push(Directive::Spacing { gap });
            }
        }

        match &element.kind {
            ElementKind::Text {
                content,
                source_font,
            } => {
                let (size, weight) = self.base_style(content, source_font);
                let family = overrides
                    .and_then(|o| o.font_select.as_deref())
                    .unwrap_or(options.default_family.as_str());
                let delta = overrides.and_then(|o| o.font_size).unwrap_or(0.0);

                let size = round_hundredths(size + delta).max(MIN_FONT_SIZE);
                self.directives
                    .push(Directive::text(family, size, weight, content));
                let _ = write!(self.sorted, "Text: {}\n\n", content);
            }
            ElementKind::Image { path } => {
                let bbox = &element.bbox;
                self.directives.push(Directive::Image {
                    path: path.clone(),
                    x: bbox.x0,
                    y: bbox.y0,
                    width: bbox.width(),
                    height: bbox.height(),
                });
                let _ = write!(
                    self.sorted,
                    "[Image] {} | BBOX: [{:.2}, {:.2}, {:.2}, {:.2}]\n\n",
                    path.display(),
                    bbox.x0,
                    bbox.y0,
                    bbox.x1,
                    bbox.y1
                );
            }
        }

        self.previous_bottom = Some(element.bbox.y1);
    }

    fn base_style(&self, content: &str, source_font: &SourceFont) -> (f32, FontWeight) {
        match self.options.policy {
            SourceFontPolicy::Normalize => {
                let weight = if content.to_lowercase().contains("bold") {
                    FontWeight::Bold
                } else {
                    FontWeight::Normal
                };
                (FALLBACK_FONT_SIZE, weight)
            }
            SourceFontPolicy::Preserve => (source_font.size(), source_font.weight()),
        }
    }

    pub fn finish(self) -> EncodedDocument {
        let neo = to_neo_text(&self.directives);
        EncodedDocument {
            directives: self.directives,
            neo,
            sorted: self.sorted,
        }
    }
}

/// Values are written with two decimals; round first so what is checked is
/// what lands on the line
fn round_hundredths(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Encode a whole extracted document, page after page
pub fn encode_document(
    document: &ExtractedDocument,
    options: &EncodeOptions,
    overrides: Option<&OverrideSettings>,
) -> EncodedDocument {
    let mut encoder = NeoEncoder::new(options, overrides);
    for page in &document.pages {
        encoder.begin_page(page.number);
        for element in &page.elements {
            encoder.push(element);
        }
    }

    let encoded = encoder.finish();
    tracing::info!(
        directives = encoded.directives.len(),
        pages = document.pages.len(),
        "NEO markup encoded"
    );
    encoded
}

/// Encode a flat element slice; a page change resets spacing like
/// [`encode_document`] does
pub fn encode_elements(
    elements: &[PageElement],
    options: &EncodeOptions,
    overrides: Option<&OverrideSettings>,
) -> EncodedDocument {
    let mut encoder = NeoEncoder::new(options, overrides);
    let mut current_page = None;
    for element in elements {
        if current_page != Some(element.page) {
            encoder.begin_page(element.page);
            current_page = Some(element.page);
        }
        encoder.push(element);
    }
    encoder.finish()
}
