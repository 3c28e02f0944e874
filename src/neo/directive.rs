//! NEO line format
//!
//! One directive per line:
//!
//! ```text
//! [行間]20.00
//! [フォント:IPAexGothic, sans-serif][サイズ:12.00][ウェイト:normal]Hello
//! [画像:/abs/path/image_p1_0.png:20.00:100.00:100.00:50.00]
//! ```
//!
//! Any other line is literal text in the current font.

use crate::pdf::FontWeight;
use std::fmt;
use std::path::PathBuf;

pub const SPACING_MARKER: &str = "[行間]";
pub const FONT_MARKER: &str = "[フォント:";
pub const SIZE_MARKER: &str = "[サイズ:";
pub const WEIGHT_MARKER: &str = "[ウェイト:";
pub const IMAGE_MARKER: &str = "[画像:";

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Vertical gap before the next block; always positive
    Spacing { gap: f32 },
    Text {
        font: String,
        size: f32,
        weight: FontWeight,
        text: String,
    },
    /// Placement in top-left origin page units
    Image {
        path: PathBuf,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

impl Directive {
    /// Build a text directive; the family loses `]` and line breaks, the text
    /// loses line breaks, so the line stays parseable
    pub fn text(font: &str, size: f32, weight: FontWeight, text: &str) -> Self {
        Directive::Text {
            font: font.replace([']', '\n', '\r'], ""),
            size,
            weight,
            text: text.replace("\r\n", " ").replace(['\n', '\r'], " "),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Spacing { gap } => write!(f, "{}{:.2}", SPACING_MARKER, gap),
            Directive::Text {
                font,
                size,
                weight,
                text,
            } => write!(
                f,
                "{}{}]{}{:.2}]{}{}]{}",
                FONT_MARKER, font, SIZE_MARKER, size, WEIGHT_MARKER, weight, text
            ),
            Directive::Image {
                path,
                x,
                y,
                width,
                height,
            } => write!(
                f,
                "{}{}:{:.2}:{:.2}:{:.2}:{:.2}]",
                IMAGE_MARKER,
                path.display(),
                x,
                y,
                width,
                height
            ),
        }
    }
}

/// Serialize directives, one newline-terminated line each
pub fn to_neo_text(directives: &[Directive]) -> String {
    let mut out = String::new();
    for directive in directives {
        out.push_str(&directive.to_string());
        out.push('\n');
    }
    out
}
