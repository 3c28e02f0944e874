//! Render targets for decoded NEO markup
//!
//! - [`html`]: preview fragment
//! - [`pdf`]: recreated PDF through an HTML-to-PDF engine
//! - [`fonts`]: family to font file resolution used by the PDF target

pub mod fonts;
pub mod html;
mod page;
pub mod pdf;

pub use fonts::{FontMap, FontOrigin, FontResolver, ResolvedFont, DEFAULT_FONT_FILE};
pub use html::{
    escape_html, render_blocks, sanitize_css_family, HtmlOptions, PARAGRAPH_LINE_HEIGHT,
};
pub use page::ResultPage;
pub use pdf::{
    build_pdf_html, render_pdf, CommandHtmlToPdf, HtmlToPdf, HtmlToPdfEngine, RenderReport,
    UnavailableHtmlToPdf,
};
