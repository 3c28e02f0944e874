//! End-to-end reflow: PDF -> elements -> NEO -> blocks -> preview and PDF

use crate::error::Result;
use crate::neo::{self, DecodeOptions, EncodeOptions, TextStyle};
use crate::output::{sanitize_base_name, OutputRoot};
use crate::pdf::{extract_document, PdfBackend, PdfiumBackend};
use crate::render::{
    render_blocks, render_pdf, FontResolver, HtmlOptions, HtmlToPdf, RenderReport, ResultPage,
};
use crate::settings::OverrideSettings;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct ReflowConfig {
    pub output_dir: PathBuf,
    pub encode: EncodeOptions,
}

impl Default for ReflowConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            encode: EncodeOptions::default(),
        }
    }
}

/// Paths of the written artifacts, relative to the output root
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReflowArtifacts {
    pub og_text: String,
    pub neo_text: String,
    pub sorted_text: String,
    pub result_page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recreated_pdf: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SkippedImageInfo {
    pub page: u32,
    pub index: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReflowReport {
    pub source: String,
    /// Run directory, relative to the output root
    pub run_dir: String,
    /// RFC 3339 time the run finished
    pub created_at: String,
    pub page_count: u32,
    pub element_count: u32,
    pub artifacts: ReflowArtifacts,
    pub skipped_images: Vec<SkippedImageInfo>,
    /// Whether the recreated PDF was produced
    pub pdf_rendered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
    pub families: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<OverrideSettings>,
    /// NEO markup of the run
    pub neo: String,
}

/// Reflow pipeline bound to one output root, font table and PDF engine
pub struct ReflowPipeline {
    output: OutputRoot,
    fonts: FontResolver,
    html_to_pdf: Arc<dyn HtmlToPdf>,
    options: EncodeOptions,
}

impl ReflowPipeline {
    pub fn new(
        config: ReflowConfig,
        fonts: FontResolver,
        html_to_pdf: Arc<dyn HtmlToPdf>,
    ) -> Result<Self> {
        Ok(Self {
            output: OutputRoot::new(&config.output_dir)?,
            fonts,
            html_to_pdf,
            options: config.encode,
        })
    }

    pub fn output(&self) -> &OutputRoot {
        &self.output
    }

    pub fn fonts(&self) -> &FontResolver {
        &self.fonts
    }

    pub fn encode_options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Reflow a PDF file. An unreadable source aborts before anything is written.
    pub fn run(&self, pdf_path: &Path, overrides: Option<&OverrideSettings>) -> Result<ReflowReport> {
        let backend = PdfiumBackend::open(pdf_path)?;
        let name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        self.run_with_backend(&backend, &name, overrides)
    }

    /// Reflow PDF bytes; `name` names the run directory and artifacts
    pub fn run_bytes(
        &self,
        data: &[u8],
        name: &str,
        overrides: Option<&OverrideSettings>,
    ) -> Result<ReflowReport> {
        let backend = PdfiumBackend::open_bytes(data)?;
        self.run_with_backend(&backend, name, overrides)
    }

    #[instrument(skip_all, fields(source = source_name))]
    pub fn run_with_backend<B: PdfBackend + ?Sized>(
        &self,
        backend: &B,
        source_name: &str,
        overrides: Option<&OverrideSettings>,
    ) -> Result<ReflowReport> {
        let run_dir = self.output.create_run_dir(source_name)?;
        let result = self.run_in_dir(backend, source_name, &run_dir, overrides);
        if result.is_err() {
            if let Err(e) = std::fs::remove_dir_all(&run_dir) {
                tracing::warn!(dir = %run_dir.display(), error = %e, "failed to remove run directory");
            }
        }
        result
    }

    fn run_in_dir<B: PdfBackend + ?Sized>(
        &self,
        backend: &B,
        source_name: &str,
        run_dir: &Path,
        overrides: Option<&OverrideSettings>,
    ) -> Result<ReflowReport> {
        let base = sanitize_base_name(source_name);
        tracing::info!(pages = backend.page_count(), dir = %run_dir.display(), "reflow started");

        let extracted = extract_document(backend, run_dir)?;
        let encoded = neo::encode_document(&extracted, &self.options, overrides);

        let og_path = run_dir.join(format!("{}_OG.txt", base));
        let neo_path = run_dir.join(format!("{}_NEO.txt", base));
        let sorted_path = run_dir.join(format!("{}_SORTED.txt", base));
        std::fs::write(&og_path, &extracted.og_text)?;
        std::fs::write(&neo_path, &encoded.neo)?;
        std::fs::write(&sorted_path, &encoded.sorted)?;

        let decoded = neo::decode(
            &encoded.neo,
            &DecodeOptions {
                default_style: TextStyle {
                    family: self.options.default_family.clone(),
                    ..TextStyle::default()
                },
                base_dir: Some(run_dir.to_path_buf()),
            },
        );

        let image_src = |path: &Path| {
            self.output
                .url_for(path)
                .unwrap_or_else(|| path.display().to_string())
        };
        let preview = render_blocks(&decoded.blocks, &HtmlOptions::new(&image_src));

        let pdf_path = run_dir.join(format!("{}_recreated.pdf", base));
        let override_family = overrides.and_then(|o| o.font_select.as_deref());
        let render: RenderReport = render_pdf(
            &decoded,
            override_family,
            &self.fonts,
            self.html_to_pdf.as_ref(),
            &pdf_path,
        );

        let image_urls: Vec<String> = extracted
            .image_paths()
            .into_iter()
            .filter_map(|path| self.output.url_for(path))
            .collect();
        let recreated_pdf_url = render
            .output
            .as_deref()
            .and_then(|path| self.output.url_for(path));

        let run_dir_display = run_dir.display().to_string();
        let page = ResultPage {
            source_name,
            run_dir: &run_dir_display,
            preview_html: &preview,
            neo: &encoded.neo,
            og: &extracted.og_text,
            sorted: &encoded.sorted,
            image_urls: &image_urls,
            recreated_pdf_url: recreated_pdf_url.as_deref(),
            render_error: render.error.as_deref(),
        };
        let page_path = run_dir.join(format!("{}_result.html", base));
        std::fs::write(&page_path, page.to_html())?;

        let relative = |path: &Path| {
            self.output
                .relative(path)
                .unwrap_or_else(|| path.display().to_string())
        };
        let report = ReflowReport {
            source: source_name.to_string(),
            run_dir: relative(run_dir),
            created_at: chrono::Utc::now().to_rfc3339(),
            page_count: extracted.pages.len() as u32,
            element_count: extracted.elements().count() as u32,
            artifacts: ReflowArtifacts {
                og_text: relative(&og_path),
                neo_text: relative(&neo_path),
                sorted_text: relative(&sorted_path),
                result_page: relative(&page_path),
                recreated_pdf: render.output.as_deref().map(|path| relative(path)),
                images: extracted
                    .image_paths()
                    .into_iter()
                    .map(|path| relative(path))
                    .collect(),
            },
            skipped_images: extracted
                .skipped_images
                .iter()
                .map(|skipped| SkippedImageInfo {
                    page: skipped.page,
                    index: skipped.index,
                    reason: skipped.reason.clone(),
                })
                .collect(),
            pdf_rendered: render.success,
            render_error: render.error.clone(),
            families: decoded.families.clone(),
            overrides: overrides.cloned(),
            neo: encoded.neo,
        };

        tracing::info!(
            elements = report.element_count,
            pdf_rendered = report.pdf_rendered,
            "reflow finished"
        );
        Ok(report)
    }
}
