//! Decoded NEO blocks to a recreated PDF through an HTML-to-PDF engine

use crate::error::{Error, Result};
use crate::neo::DecodedDocument;
use crate::render::fonts::FontResolver;
use crate::render::html::{render_blocks, HtmlOptions, PARAGRAPH_LINE_HEIGHT};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Turns a standalone HTML document into PDF bytes
pub trait HtmlToPdf: Send + Sync {
    /// `base_dir` resolves relative references inside `html`
    fn render(&self, html: &str, base_dir: &Path) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlToPdfEngine {
    WeasyPrint,
    Wkhtmltopdf,
}

impl HtmlToPdfEngine {
    fn program(&self) -> &'static str {
        match self {
            HtmlToPdfEngine::WeasyPrint => "weasyprint",
            HtmlToPdfEngine::Wkhtmltopdf => "wkhtmltopdf",
        }
    }
}

/// Runs an external HTML-to-PDF command
#[derive(Debug, Clone)]
pub struct CommandHtmlToPdf {
    program: PathBuf,
    engine: HtmlToPdfEngine,
}

impl CommandHtmlToPdf {
    pub fn new(program: impl Into<PathBuf>, engine: HtmlToPdfEngine) -> Self {
        Self {
            program: program.into(),
            engine,
        }
    }

    /// First engine found on `PATH`, WeasyPrint preferred
    pub fn detect() -> Option<Self> {
        [HtmlToPdfEngine::WeasyPrint, HtmlToPdfEngine::Wkhtmltopdf]
            .into_iter()
            .find(|engine| command_exists(engine.program()))
            .map(|engine| Self::new(engine.program(), engine))
    }

    /// `weasyprint`, `wkhtmltopdf`, or a path to either binary
    pub fn from_setting(value: &str) -> Self {
        let program = PathBuf::from(value.trim());
        let stem = program
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let engine = if stem.contains("wkhtmltopdf") {
            HtmlToPdfEngine::Wkhtmltopdf
        } else {
            HtmlToPdfEngine::WeasyPrint
        };
        Self::new(program, engine)
    }

    pub fn engine(&self) -> HtmlToPdfEngine {
        self.engine
    }
}

impl HtmlToPdf for CommandHtmlToPdf {
    fn render(&self, html: &str, base_dir: &Path) -> Result<Vec<u8>> {
        let input = tempfile::Builder::new()
            .prefix("neo-")
            .suffix(".html")
            .tempfile_in(base_dir)?;
        std::fs::write(input.path(), html)?;
        let output = tempfile::Builder::new()
            .prefix("neo-")
            .suffix(".pdf")
            .tempfile_in(base_dir)?;

        let mut command = Command::new(&self.program);
        match self.engine {
            HtmlToPdfEngine::WeasyPrint => {
                command.arg("--base-url").arg(base_dir);
            }
            HtmlToPdfEngine::Wkhtmltopdf => {
                command
                    .arg("--quiet")
                    .arg("--encoding")
                    .arg("utf-8")
                    .arg("--enable-local-file-access");
            }
        }
        let result = command
            .arg(input.path())
            .arg(output.path())
            .output()
            .map_err(|e| Error::Render {
                reason: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Render {
                reason: format!("{} failed: {}", self.engine.program(), stderr.trim()),
            });
        }

        let bytes = std::fs::read(output.path())?;
        if bytes.is_empty() {
            return Err(Error::Render {
                reason: format!("{} produced an empty file", self.engine.program()),
            });
        }
        Ok(bytes)
    }
}

/// Stand-in when no engine is installed; every render fails
#[derive(Debug, Clone, Default)]
pub struct UnavailableHtmlToPdf;

impl HtmlToPdf for UnavailableHtmlToPdf {
    fn render(&self, _html: &str, _base_dir: &Path) -> Result<Vec<u8>> {
        Err(Error::Render {
            reason: "no HTML-to-PDF engine available (install weasyprint or wkhtmltopdf)"
                .to_string(),
        })
    }
}

fn command_exists(cmd: &str) -> bool {
    match Command::new(cmd).arg("--version").output() {
        Ok(_) => true,
        Err(err) => err.kind() != std::io::ErrorKind::NotFound,
    }
}

/// Outcome of the PDF render; failures are reported, never raised
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub success: bool,
    pub error: Option<String>,
    pub output: Option<PathBuf>,
}

impl RenderReport {
    fn failed(error: &Error) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            output: None,
        }
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

/// `@font-face` rules and the family to alias table for every resolvable family
pub fn font_faces(
    families: &BTreeSet<String>,
    fonts: &FontResolver,
) -> (String, BTreeMap<String, String>) {
    let mut css = String::new();
    let mut aliases = BTreeMap::new();

    for family in families {
        let Some(font) = fonts.resolve(family) else {
            continue;
        };
        let alias = format!("neo-font-{}", aliases.len());
        let _ = writeln!(
            css,
            "@font-face {{ font-family: '{}'; src: url('{}'); font-weight: normal; font-style: normal; }}",
            alias,
            file_url(&font.path)
        );
        aliases.insert(family.clone(), alias);
    }

    (css, aliases)
}

/// Standalone HTML document for the PDF engine
pub fn build_pdf_html(
    document: &DecodedDocument,
    override_family: Option<&str>,
    fonts: &FontResolver,
) -> String {
    let mut families = document.families.clone();
    if let Some(family) = override_family {
        families.insert(family.to_string());
    }

    let (faces, aliases) = font_faces(&families, fonts);
    let image_src = |path: &Path| file_url(path);
    let options = HtmlOptions {
        line_height: PARAGRAPH_LINE_HEIGHT,
        font_aliases: Some(&aliases),
        image_src: &image_src,
    };
    let body = render_blocks(&document.blocks, &options);

    format!(
        "<!DOCTYPE html>\n<html lang=\"ja\">\n<head>\n<meta charset=\"utf-8\">\n<style>\n{}body {{ font-family: sans-serif; line-height: {}; word-wrap: break-word; }}\n</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        faces, PARAGRAPH_LINE_HEIGHT, body
    )
}

/// Render `document` into `output_path`
pub fn render_pdf(
    document: &DecodedDocument,
    override_family: Option<&str>,
    fonts: &FontResolver,
    engine: &dyn HtmlToPdf,
    output_path: &Path,
) -> RenderReport {
    let html = build_pdf_html(document, override_family, fonts);
    let base_dir = output_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let result = engine
        .render(&html, base_dir)
        .and_then(|bytes| std::fs::write(output_path, bytes).map_err(Error::from));

    match result {
        Ok(()) => {
            tracing::info!(path = %output_path.display(), "recreated PDF written");
            RenderReport {
                success: true,
                error: None,
                output: Some(output_path.to_path_buf()),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "PDF reconstruction failed");
            RenderReport::failed(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo::{decode, DecodeOptions};
    use crate::render::fonts::FontMap;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingEngine {
        html: Mutex<Option<String>>,
    }

    impl HtmlToPdf for CapturingEngine {
        fn render(&self, html: &str, _base_dir: &Path) -> Result<Vec<u8>> {
            *self.html.lock() = Some(html.to_string());
            Ok(b"%PDF-1.7 test".to_vec())
        }
    }

    fn fonts() -> (tempfile::TempDir, FontResolver) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ipaexg.ttf"), b"ttf").unwrap();
        let resolver = FontResolver::new(dir.path(), FontMap::default());
        (dir, resolver)
    }

    #[test]
    fn test_font_faces_for_every_family() {
        let (_dir, resolver) = fonts();
        let doc = decode(
            "[フォント:MS Gothic][サイズ:12.00][ウェイト:normal]a\n[フォント:IPAexGothic][サイズ:12.00][ウェイト:normal]b",
            &DecodeOptions::default(),
        );
        let html = build_pdf_html(&doc, Some("Noto Sans JP"), &resolver);
        assert_eq!(html.matches("@font-face").count(), 3);
        assert!(html.contains("font-family: 'neo-font-1', MS Gothic, sans-serif;"));
        assert!(html.contains("src: url('file://"));
    }

    #[test]
    fn test_no_fonts_falls_back_to_sans_serif() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FontResolver::new(dir.path(), FontMap::default());
        let doc = decode(
            "[フォント:MS Gothic][サイズ:12.00][ウェイト:normal]a",
            &DecodeOptions::default(),
        );
        let html = build_pdf_html(&doc, None, &resolver);
        assert!(!html.contains("@font-face"));
        assert!(html.contains("font-family: MS Gothic, sans-serif;"));
    }

    #[test]
    fn test_render_success_writes_file() {
        let (dir, resolver) = fonts();
        let engine = CapturingEngine::default();
        let output = dir.path().join("doc_recreated.pdf");
        let doc = decode("hello", &DecodeOptions::default());

        let report = render_pdf(&doc, None, &resolver, &engine, &output);
        assert!(report.success);
        assert_eq!(report.error, None);
        assert_eq!(report.output.as_deref(), Some(output.as_path()));
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.7 test");
        assert!(engine.html.lock().as_deref().unwrap().contains(">hello</p>"));
    }

    #[test]
    fn test_render_failure_is_reported() {
        let (dir, resolver) = fonts();
        let output = dir.path().join("doc_recreated.pdf");
        let doc = decode("hello", &DecodeOptions::default());

        let report = render_pdf(&doc, None, &resolver, &UnavailableHtmlToPdf, &output);
        assert!(!report.success);
        assert_eq!(report.output, None);
        assert!(report.error.unwrap().contains("HTML-to-PDF"));
        assert!(!output.exists());
    }

    #[test]
    fn test_engine_from_setting() {
        assert_eq!(
            CommandHtmlToPdf::from_setting("/usr/local/bin/wkhtmltopdf").engine(),
            HtmlToPdfEngine::Wkhtmltopdf
        );
        assert_eq!(
            CommandHtmlToPdf::from_setting("weasyprint").engine(),
            HtmlToPdfEngine::WeasyPrint
        );
    }

    #[test]
    fn test_missing_program_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandHtmlToPdf::new("/nonexistent/weasyprint", HtmlToPdfEngine::WeasyPrint);
        assert!(matches!(
            engine.render("<p>x</p>", dir.path()),
            Err(Error::Render { .. })
        ));
    }
}
