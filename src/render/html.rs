//! Decoded NEO blocks to an HTML fragment

use crate::neo::{Block, TextStyle};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

/// CSS line-height of rendered paragraphs. Spacing between blocks already
/// carries any user line-height multiplier.
pub const PARAGRAPH_LINE_HEIGHT: f32 = 1.6;

/// Escape text for HTML element content and attribute values
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub struct HtmlOptions<'a> {
    pub line_height: f32,
    /// Family to `@font-face` alias; when set, paragraphs prefer the alias
    /// and fall back to `sans-serif`
    pub font_aliases: Option<&'a BTreeMap<String, String>>,
    /// Maps an image path to the `src` the consumer can load
    pub image_src: &'a dyn Fn(&Path) -> String,
}

impl<'a> HtmlOptions<'a> {
    pub fn new(image_src: &'a dyn Fn(&Path) -> String) -> Self {
        Self {
            line_height: PARAGRAPH_LINE_HEIGHT,
            font_aliases: None,
            image_src,
        }
    }
}

const CSS_FAMILY_REJECT: &[char] = &[';', '{', '}', '(', ')', '\\', '"', '\'', '<', '>', ':', '@'];

/// Family list safe inside an inline `style` attribute: characters that could
/// end the declaration, open a block, call a CSS function or escape are dropped
pub fn sanitize_css_family(family: &str) -> String {
    let cleaned: String = family
        .chars()
        .filter(|c| !c.is_control() && !CSS_FAMILY_REJECT.contains(c))
        .collect();
    let names: Vec<&str> = cleaned
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        "sans-serif".to_string()
    } else {
        names.join(", ")
    }
}

fn font_family_css(style: &TextStyle, aliases: Option<&BTreeMap<String, String>>) -> String {
    let family = escape_html(&sanitize_css_family(&style.family));
    match aliases {
        None => family,
        Some(aliases) => match aliases.get(&style.family) {
            Some(alias) => format!("'{}', {}, sans-serif", alias, family),
            None => format!("{}, sans-serif", family),
        },
    }
}

/// Render blocks in order; every piece of extracted text is escaped
pub fn render_blocks(blocks: &[Block], options: &HtmlOptions<'_>) -> String {
    let mut html = String::new();

    for block in blocks {
        let _ = match block {
            Block::Spacing(gap) => write!(
                html,
                r#"<div style="margin-top: {:.2}px; height: 0;"></div>"#,
                gap
            ),
            Block::Text { style, text } => write!(
                html,
                r#"<p style="font-family: {}; font-size: {:.2}px; font-weight: {}; line-height: {}; margin: 0; padding: 0;">{}</p>"#,
                font_family_css(style, options.font_aliases),
                style.size,
                style.weight,
                options.line_height,
                escape_html(text)
            ),
            Block::Image(image) => write!(
                html,
                r#"<p><img src="{}" width="{:.2}" height="{:.2}"></p>"#,
                escape_html(&(options.image_src)(&image.path)),
                image.width,
                image.height
            ),
            Block::MissingImage { path } => write!(
                html,
                r#"<p style="color:red;">[image unavailable: {}]</p>"#,
                escape_html(&path.display().to_string())
            ),
        };
        html.push('\n');
    }

    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo::ImagePlacement;
    use crate::pdf::FontWeight;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn file_src(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    fn text_block(family: &str, text: &str) -> Block {
        Block::Text {
            style: TextStyle {
                family: family.to_string(),
                size: 12.0,
                weight: FontWeight::Bold,
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x") & 'y'</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;) &amp; &#39;y&#39;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_paragraph_style() {
        let html = render_blocks(&[text_block("MS Gothic", "a < b")], &HtmlOptions::new(&file_src));
        assert_eq!(
            html,
            "<p style=\"font-family: MS Gothic; font-size: 12.00px; font-weight: bold; line-height: 1.6; margin: 0; padding: 0;\">a &lt; b</p>\n"
        );
    }

    #[test]
    fn test_spacing_image_and_placeholder() {
        let blocks = vec![
            Block::Spacing(20.0),
            Block::Image(ImagePlacement {
                path: PathBuf::from("/out/image_p1_0.png"),
                x: 20.0,
                y: 100.0,
                width: 100.0,
                height: 50.0,
            }),
            Block::MissingImage {
                path: PathBuf::from("/out/<gone>.png"),
            },
        ];
        let html = render_blocks(&blocks, &HtmlOptions::new(&file_src));
        let lines: Vec<&str> = html.lines().collect();
        assert_eq!(lines[0], r#"<div style="margin-top: 20.00px; height: 0;"></div>"#);
        assert_eq!(
            lines[1],
            r#"<p><img src="file:///out/image_p1_0.png" width="100.00" height="50.00"></p>"#
        );
        assert_eq!(
            lines[2],
            r#"<p style="color:red;">[image unavailable: /out/&lt;gone&gt;.png]</p>"#
        );
    }

    #[test]
    fn test_family_cannot_inject_declarations() {
        let hostile = "Evil; background: url(file:///etc/passwd); x";
        let html = render_blocks(&[text_block(hostile, "t")], &HtmlOptions::new(&file_src));
        assert!(html.starts_with(
            "<p style=\"font-family: Evil background urlfile///etc/passwd x; font-size: 12.00px;"
        ));
        assert!(!html.contains("url("));
        assert_eq!(html.matches(';').count(), 6);
    }

    #[test]
    fn test_sanitize_css_family() {
        assert_eq!(sanitize_css_family("IPAexGothic, sans-serif"), "IPAexGothic, sans-serif");
        assert_eq!(sanitize_css_family("'MS Gothic' , ,serif"), "MS Gothic, serif");
        assert_eq!(sanitize_css_family("{};()"), "sans-serif");
    }

    #[test]
    fn test_font_aliases() {
        let mut aliases = BTreeMap::new();
        aliases.insert("MS Gothic".to_string(), "neo-font-0".to_string());
        let options = HtmlOptions {
            font_aliases: Some(&aliases),
            ..HtmlOptions::new(&file_src)
        };
        let html = render_blocks(
            &[text_block("MS Gothic", "x"), text_block("Unknown", "y")],
            &options,
        );
        assert!(html.contains("font-family: 'neo-font-0', MS Gothic, sans-serif;"));
        assert!(html.contains("font-family: Unknown, sans-serif;"));
    }
}
