//! MCP Server implementation using rmcp

use crate::neo::{self, DecodeOptions, EncodeOptions, SourceFontPolicy, TextStyle};
use crate::output::content_type;
use crate::pipeline::{ReflowConfig, ReflowPipeline, ReflowReport};
use crate::render::{
    render_blocks, CommandHtmlToPdf, FontMap, FontResolver, HtmlOptions, HtmlToPdf,
    UnavailableHtmlToPdf, DEFAULT_FONT_FILE,
};
use crate::settings::{
    lookup_overrides, HttpSettingsStore, MemorySettingsStore, OverrideSettings, SettingsProvider,
};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, service::RequestContext, tool, tool_handler, tool_router, RoleServer,
    ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// URI scheme of run artifacts exposed as resources
const OUTPUT_URI_PREFIX: &str = "output://";

/// Where a PDF to reflow comes from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        if let Some(obj) = value.as_object() {
            if let Some(v) = obj.get("path") {
                if let Some(s) = v.as_str() {
                    return Ok(PdfSource::Path {
                        path: s.to_string(),
                    });
                }
                return Err(serde::de::Error::custom("\"path\" must be a string"));
            }
            if let Some(v) = obj.get("base64") {
                if let Some(s) = v.as_str() {
                    return Ok(PdfSource::Base64 {
                        base64: s.to_string(),
                    });
                }
                return Err(serde::de::Error::custom("\"base64\" must be a string"));
            }
            let keys: Vec<&String> = obj.keys().collect();
            Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with \"path\" or \"base64\", but got keys: {:?}",
                keys
            )))
        } else {
            Err(serde::de::Error::custom(
                "Invalid source: expected an object with \"path\" or \"base64\"",
            ))
        }
    }
}

/// Server configuration, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories PDF paths must live in; empty allows any path
    pub resource_dirs: Vec<String>,
    /// Root of all run directories
    pub output_dir: PathBuf,
    /// Base directory of relative font files
    pub font_dir: PathBuf,
    /// JSON font map replacing the built-in table
    pub font_map: Option<PathBuf>,
    pub default_font: PathBuf,
    pub default_family: String,
    /// Remote settings store; in-memory store when absent
    pub settings_url: Option<String>,
    pub settings_collection: String,
    /// `weasyprint`, `wkhtmltopdf` or a path; auto-detected when absent
    pub html_to_pdf: Option<String>,
    /// Keep inferred source sizes and weights instead of normalizing to 12pt
    pub preserve_fonts: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            output_dir: PathBuf::from("./output"),
            font_dir: PathBuf::from("."),
            font_map: None,
            default_font: PathBuf::from(DEFAULT_FONT_FILE),
            default_family: neo::DEFAULT_FAMILY.to_string(),
            settings_url: None,
            settings_collection: "messages".to_string(),
            html_to_pdf: None,
            preserve_fonts: false,
        }
    }
}

impl ServerConfig {
    /// Read `REFLOW_*` environment variables
    pub fn from_env() -> crate::error::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> crate::error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let preserve_fonts = match get("REFLOW_PRESERVE_FONTS") {
            None => defaults.preserve_fonts,
            Some(value) => parse_bool(&value).ok_or_else(|| crate::error::Error::InvalidConfig {
                reason: format!("REFLOW_PRESERVE_FONTS must be a boolean, got {:?}", value),
            })?,
        };

        Ok(Self {
            resource_dirs: get("REFLOW_RESOURCE_DIRS")
                .map(|dirs| {
                    std::env::split_paths(&dirs)
                        .map(|p| p.to_string_lossy().into_owned())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            output_dir: get("REFLOW_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            font_dir: get("REFLOW_FONT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.font_dir),
            font_map: get("REFLOW_FONT_MAP").map(PathBuf::from),
            default_font: get("REFLOW_DEFAULT_FONT")
                .map(PathBuf::from)
                .unwrap_or(defaults.default_font),
            default_family: get("REFLOW_DEFAULT_FAMILY").unwrap_or(defaults.default_family),
            settings_url: get("REFLOW_SETTINGS_URL"),
            settings_collection: get("REFLOW_SETTINGS_COLLECTION")
                .unwrap_or(defaults.settings_collection),
            html_to_pdf: get("REFLOW_HTML_TO_PDF"),
            preserve_fonts,
        })
    }

    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            default_family: self.default_family.clone(),
            policy: if self.preserve_fonts {
                SourceFontPolicy::Preserve
            } else {
                SourceFontPolicy::Normalize
            },
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReflowPdfParams {
    /// PDF to reflow
    pub source: PdfSource,
    /// File name used for artifacts when the source is base64 (default: document.pdf)
    #[serde(default)]
    pub file_name: Option<String>,
    /// User whose stored settings apply
    #[serde(default)]
    pub user_id: Option<String>,
    /// Explicit overrides; take precedence over stored settings
    #[serde(default)]
    pub overrides: Option<OverrideSettings>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReflowPdfResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReflowReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderNeoParams {
    /// NEO markup, one directive per line
    pub neo: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RenderNeoResult {
    /// HTML preview fragment
    pub html: String,
    /// Font families referenced by the markup
    pub families: BTreeSet<String>,
    /// Number of malformed lines that were skipped
    pub skipped_lines: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetSettingsParams {
    pub user_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveSettingsParams {
    pub user_id: String,
    pub settings: OverrideSettings,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SettingsResult {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<OverrideSettings>,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadOutputParams {
    /// Artifact path relative to the output root (a `/outputs/...` URL is accepted too)
    pub path: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReadOutputResult {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// File content, base64 encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// PDF reflow MCP Server
#[derive(Clone)]
pub struct ReflowServer {
    pipeline: Arc<ReflowPipeline>,
    settings: Arc<dyn SettingsProvider>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

#[tool_router]
impl ReflowServer {
    /// Create a server from configuration, wiring fonts, engine and settings store
    pub fn with_config(config: ServerConfig) -> crate::error::Result<Self> {
        let font_map = match &config.font_map {
            Some(path) => FontMap::from_json_file(path)?,
            None => FontMap::default(),
        }
        .with_default(config.default_font.clone());
        let fonts = FontResolver::new(config.font_dir.clone(), font_map);

        let html_to_pdf: Arc<dyn HtmlToPdf> = match &config.html_to_pdf {
            Some(setting) => Arc::new(CommandHtmlToPdf::from_setting(setting)),
            None => match CommandHtmlToPdf::detect() {
                Some(engine) => {
                    tracing::info!(engine = ?engine.engine(), "HTML-to-PDF engine detected");
                    Arc::new(engine)
                }
                None => {
                    tracing::warn!("no HTML-to-PDF engine found, recreated PDFs are disabled");
                    Arc::new(UnavailableHtmlToPdf)
                }
            },
        };

        let settings: Arc<dyn SettingsProvider> = match &config.settings_url {
            Some(url) => Arc::new(HttpSettingsStore::new(url, config.settings_collection.clone())?),
            None => Arc::new(MemorySettingsStore::new()),
        };

        let pipeline = ReflowPipeline::new(
            ReflowConfig {
                output_dir: config.output_dir.clone(),
                encode: config.encode_options(),
            },
            fonts,
            html_to_pdf,
        )?;

        Ok(Self::from_parts(config, pipeline, settings))
    }

    /// Create a server around an existing pipeline and settings store
    pub fn from_parts(
        config: ServerConfig,
        pipeline: ReflowPipeline,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            settings,
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Reflow a PDF through the NEO markup
    #[tool(
        description = "Reflow a PDF: extract text blocks and images in reading order, encode them as NEO markup, and re-render an HTML preview and a recreated PDF. Optional user_id applies stored font/size/spacing settings; explicit overrides take precedence.

Source format: {\"path\": \"/absolute/path.pdf\"} or {\"base64\": \"...\"}"
    )]
    async fn reflow_pdf(&self, Parameters(params): Parameters<ReflowPdfParams>) -> String {
        let source = Self::source_name(&params.source);
        let result = match self.process_reflow_pdf(&params).await {
            Ok(report) => ReflowPdfResult {
                source,
                report: Some(report),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "reflow_pdf failed");
                ReflowPdfResult {
                    source,
                    report: None,
                    error: Some(e.client_message()),
                }
            }
        };

        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Render NEO markup to an HTML fragment
    #[tool(
        description = "Decode NEO markup and render it as an HTML preview fragment. Malformed lines are skipped; missing images become visible placeholders."
    )]
    async fn render_neo(&self, Parameters(params): Parameters<RenderNeoParams>) -> String {
        let result = self.process_render_neo(&params.neo);
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Fetch stored settings of a user
    #[tool(description = "Get the stored reflow settings (fontSelect, fontSize, lineHeight) of a user.")]
    async fn get_settings(&self, Parameters(params): Parameters<GetSettingsParams>) -> String {
        let result = match self.settings.get(&params.user_id).await {
            Ok(settings) => SettingsResult {
                user_id: params.user_id,
                settings,
                saved: false,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "get_settings failed");
                SettingsResult {
                    user_id: params.user_id,
                    settings: None,
                    saved: false,
                    error: Some(e.client_message()),
                }
            }
        };
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Store settings of a user
    #[tool(
        description = "Save reflow settings for a user. fontSelect replaces the font family, fontSize is added to the base size, lineHeight multiplies the spacing between blocks."
    )]
    async fn save_settings(&self, Parameters(params): Parameters<SaveSettingsParams>) -> String {
        let result = match self.settings.put(&params.user_id, &params.settings).await {
            Ok(()) => SettingsResult {
                user_id: params.user_id,
                settings: Some(params.settings),
                saved: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "save_settings failed");
                SettingsResult {
                    user_id: params.user_id,
                    settings: None,
                    saved: false,
                    error: Some(e.client_message()),
                }
            }
        };
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    /// Read a run artifact
    #[tool(
        description = "Read a file produced by reflow_pdf (NEO/OG/SORTED text, extracted images, recreated PDF, result page). The path is relative to the output root; content is returned base64 encoded."
    )]
    async fn read_output(&self, Parameters(params): Parameters<ReadOutputParams>) -> String {
        let result = self.process_read_output(&params.path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "read_output failed");
            ReadOutputResult {
                path: params.path.clone(),
                mime_type: None,
                size: None,
                content: None,
                error: Some(e.client_message()),
            }
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }
}

impl ReflowServer {
    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical);
                }
            }
        }

        Err(crate::error::Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    async fn process_reflow_pdf(
        &self,
        params: &ReflowPdfParams,
    ) -> crate::error::Result<ReflowReport> {
        let overrides = match &params.overrides {
            Some(explicit) if !explicit.is_empty() => Some(explicit.clone()),
            _ => lookup_overrides(self.settings.as_ref(), params.user_id.as_deref()).await,
        };

        let pipeline = Arc::clone(&self.pipeline);
        match &params.source {
            PdfSource::Path { path } => {
                let path = self.validate_path_access(path)?;
                tokio::task::spawn_blocking(move || pipeline.run(&path, overrides.as_ref()))
                    .await
                    .map_err(|e| crate::error::Error::Pdfium {
                        reason: format!("Task join error: {}", e),
                    })?
            }
            PdfSource::Base64 { base64 } => {
                let data = base64::engine::general_purpose::STANDARD.decode(base64)?;
                let name = params
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "document.pdf".to_string());
                tokio::task::spawn_blocking(move || {
                    pipeline.run_bytes(&data, &name, overrides.as_ref())
                })
                .await
                .map_err(|e| crate::error::Error::Pdfium {
                    reason: format!("Task join error: {}", e),
                })?
            }
        }
    }

    fn process_render_neo(&self, neo_text: &str) -> RenderNeoResult {
        let output = self.pipeline.output();
        let decoded = neo::decode(
            neo_text,
            &DecodeOptions {
                default_style: TextStyle {
                    family: self.pipeline.encode_options().default_family.clone(),
                    ..TextStyle::default()
                },
                base_dir: Some(output.path().to_path_buf()),
            },
        );
        let image_src = |path: &Path| {
            output
                .url_for(path)
                .unwrap_or_else(|| path.display().to_string())
        };

        RenderNeoResult {
            html: render_blocks(&decoded.blocks, &HtmlOptions::new(&image_src)),
            families: decoded.families,
            skipped_lines: decoded.skipped_lines as u32,
        }
    }

    fn process_read_output(&self, relative: &str) -> crate::error::Result<ReadOutputResult> {
        let path = self.pipeline.output().resolve(relative)?;
        let data = std::fs::read(&path)?;

        Ok(ReadOutputResult {
            path: relative.to_string(),
            mime_type: Some(content_type(&path).to_string()),
            size: Some(data.len() as u64),
            content: Some(base64::engine::general_purpose::STANDARD.encode(&data)),
            error: None,
        })
    }
}

#[tool_handler]
impl ServerHandler for ReflowServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF reflow server: re-typesets PDFs with user-selected font, size and spacing \
                 through the NEO markup. Run artifacts are exposed as output:// resources."
                    .into(),
            ),
        }
    }

    /// List run artifacts under the output root
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let output = self.pipeline.output();
        let files = output.list_files().map_err(|e| {
            tracing::warn!(error = %e, "list_resources failed");
            ErrorData::internal_error(e.client_message(), None)
        })?;

        let resources = files
            .iter()
            .filter_map(|path| {
                let relative = output.relative(path)?;
                let mut resource =
                    RawResource::new(format!("{}{}", OUTPUT_URI_PREFIX, relative), relative);
                resource.mime_type = Some(content_type(path).to_string());

                let metadata = std::fs::metadata(path).ok();
                resource.size = metadata.as_ref().map(|m| m.len() as u32);
                let modified = metadata
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0))
                    .map(|dt| dt.to_rfc3339());
                resource.description = Some(format!(
                    "Reflow artifact{}",
                    modified
                        .map(|m| format!(", modified: {}", m))
                        .unwrap_or_default()
                ));
                Some(Annotated {
                    raw: resource,
                    annotations: None,
                })
            })
            .collect();

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Read a run artifact; text files as text, everything else as a blob
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = &request.uri;
        let Some(relative) = uri.strip_prefix(OUTPUT_URI_PREFIX) else {
            return Err(ErrorData::invalid_params(
                "Only output:// URIs are supported",
                None,
            ));
        };

        let path = self.pipeline.output().resolve(relative).map_err(|e| {
            tracing::warn!(error = %e, "read_resource denied");
            ErrorData::invalid_params(e.client_message(), None)
        })?;
        let data = std::fs::read(&path).map_err(|e| {
            tracing::warn!(error = %e, "read_resource failed");
            ErrorData::internal_error("I/O error", None)
        })?;

        let mime_type = content_type(&path);
        let contents = if mime_type.starts_with("text/") {
            ResourceContents::TextResourceContents {
                uri: uri.clone(),
                mime_type: Some(mime_type.to_string()),
                text: String::from_utf8_lossy(&data).into_owned(),
                meta: Default::default(),
            }
        } else {
            ResourceContents::BlobResourceContents {
                uri: uri.clone(),
                mime_type: Some(mime_type.to_string()),
                blob: base64::engine::general_purpose::STANDARD.encode(&data),
                meta: Default::default(),
            }
        };

        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }
}

/// Run the MCP server with configuration from the environment
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::from_env()?).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = ReflowServer::with_config(config)?;

    tracing::info!(
        output_dir = %server.pipeline.output().path().display(),
        "PDF reflow MCP Server ready, waiting for connections..."
    );

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
