//! PDF Reflow MCP Server Library
//!
//! Reflows PDFs through the NEO intermediate markup so they can be re-typeset
//! with a user's font, size and spacing preferences:
//! - [`pdf`]: reading-ordered text blocks and images from PDF pages
//! - [`neo`]: NEO markup encoder and decoder
//! - [`render`]: HTML preview and recreated PDF
//! - [`settings`]: per-user overrides (`fontSelect`, `fontSize`, `lineHeight`)
//! - [`server`]: MCP tools `reflow_pdf`, `render_neo`, `get_settings`,
//!   `save_settings` and `read_output`

pub mod error;
pub mod neo;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod settings;

pub use error::{Error, Result};
pub use pipeline::{ReflowConfig, ReflowPipeline, ReflowReport};
pub use server::{run_server, run_server_with_config, PdfSource, ReflowServer, ServerConfig};
pub use settings::OverrideSettings;
