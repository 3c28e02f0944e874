//! NEO markup to styled blocks
//!
//! Each line is matched against a dispatch table of directive markers. A line
//! whose marker matches but whose body does not parse is dropped; decoding
//! itself cannot fail.

use crate::neo::directive::{FONT_MARKER, IMAGE_MARKER, SIZE_MARKER, SPACING_MARKER, WEIGHT_MARKER};
use crate::neo::encode::DEFAULT_FAMILY;
use crate::pdf::{FontWeight, FALLBACK_FONT_SIZE};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Font state active while decoding
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub family: String,
    pub size: f32,
    pub weight: FontWeight,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            family: DEFAULT_FAMILY.to_string(),
            size: FALLBACK_FONT_SIZE,
            weight: FontWeight::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub path: PathBuf,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Spacing(f32),
    Text { style: TextStyle, text: String },
    Image(ImagePlacement),
    /// Image directive whose file does not exist
    MissingImage { path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Style of literal lines before any font directive
    pub default_style: TextStyle,
    /// Base for relative image paths
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedDocument {
    pub blocks: Vec<Block>,
    /// Distinct families referenced by text blocks
    pub families: BTreeSet<String>,
    /// Lines dropped as malformed
    pub skipped_lines: usize,
}

impl DecodedDocument {
    /// Visible text, one entry per text block
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

type LineParser = fn(&str, &mut TextStyle, &DecodeOptions) -> Option<Block>;

/// Checked in order; the first matching marker owns the line
const DISPATCH: &[(&str, LineParser)] = &[
    (SPACING_MARKER, parse_spacing as LineParser),
    (FONT_MARKER, parse_font as LineParser),
    (IMAGE_MARKER, parse_image as LineParser),
];

/// Decode NEO text into blocks
pub fn decode(neo: &str, options: &DecodeOptions) -> DecodedDocument {
    let mut document = DecodedDocument::default();
    let mut style = options.default_style.clone();

    for (number, line) in neo.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let block = match DISPATCH.iter().find(|(marker, _)| line.starts_with(marker)) {
            Some((marker, parser)) => parser(&line[marker.len()..], &mut style, options),
            None => Some(Block::Text {
                style: style.clone(),
                text: line.to_string(),
            }),
        };

        match block {
            Some(block) => {
                if let Block::Text { style, .. } = &block {
                    document.families.insert(style.family.clone());
                }
                document.blocks.push(block);
            }
            None => {
                tracing::debug!(line = number + 1, "skipping malformed NEO line");
                document.skipped_lines += 1;
            }
        }
    }

    document
}

fn parse_float(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

fn parse_spacing(body: &str, _style: &mut TextStyle, _options: &DecodeOptions) -> Option<Block> {
    parse_float(body).filter(|gap| *gap > 0.0).map(Block::Spacing)
}

/// `{family}][サイズ:{size}][ウェイト:{weight}]{text}`
fn parse_font(body: &str, style: &mut TextStyle, _options: &DecodeOptions) -> Option<Block> {
    let mut segments = body.splitn(4, ']');
    let family = segments.next()?;
    let size = segments.next()?.strip_prefix(SIZE_MARKER)?;
    let weight = segments.next()?.strip_prefix(WEIGHT_MARKER)?;
    let text = segments.next()?;

    if family.trim().is_empty() {
        return None;
    }
    let size = parse_float(size).filter(|size| *size > 0.0)?;
    let weight = FontWeight::parse(weight)?;

    *style = TextStyle {
        family: family.to_string(),
        size,
        weight,
    };

    Some(Block::Text {
        style: style.clone(),
        text: text.to_string(),
    })
}

/// `{path}:{x}:{y}:{w}:{h}]`, split from the right so the path may hold `:`
fn parse_image(body: &str, _style: &mut TextStyle, options: &DecodeOptions) -> Option<Block> {
    let body = body.strip_suffix(']')?;
    let mut fields = body.rsplitn(5, ':');
    let height = parse_float(fields.next()?)?;
    let width = parse_float(fields.next()?)?;
    let y = parse_float(fields.next()?)?;
    let x = parse_float(fields.next()?)?;
    let path = fields.next()?;
    if path.is_empty() {
        return None;
    }

    let path = resolve_image_path(path, options.base_dir.as_deref());
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "image referenced by NEO markup is missing");
        return Some(Block::MissingImage { path });
    }

    Some(Block::Image(ImagePlacement {
        path,
        x,
        y,
        width,
        height,
    }))
}

fn resolve_image_path(path: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(path);
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}
