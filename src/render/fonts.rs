//! Logical font family to font file resolution

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Font file used when a family is unmapped or its file is missing
pub const DEFAULT_FONT_FILE: &str = "ipaexg.ttf";

const BUILTIN_FAMILIES: &[(&str, &str)] = &[
    ("MS Mincho", "fonts/MSMincho.ttf"),
    ("MS Gothic", "fonts/MSGothic.ttf"),
    ("Noto Sans JP", "fonts/NotoSansJP-Regular.ttf"),
    ("IPAexGothic", "ipaexg.ttf"),
    ("明朝体, serif", "fonts/Mincho.ttf"),
    ("Verdana, sans-serif", "fonts/Verdana.ttf"),
];

/// Family name to font file table, relative to the font root
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FontMap {
    #[serde(default)]
    pub families: BTreeMap<String, PathBuf>,
    #[serde(default = "default_font_file")]
    pub default: PathBuf,
}

fn default_font_file() -> PathBuf {
    PathBuf::from(DEFAULT_FONT_FILE)
}

impl Default for FontMap {
    fn default() -> Self {
        Self {
            families: BUILTIN_FAMILIES
                .iter()
                .map(|(family, file)| (family.to_string(), PathBuf::from(file)))
                .collect(),
            default: default_font_file(),
        }
    }
}

impl FontMap {
    /// Load `{"default": "...", "families": {"Name": "file.ttf"}}`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            reason: format!("cannot read font map {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&data).map_err(|e| Error::InvalidConfig {
            reason: format!("invalid font map {}: {}", path.display(), e),
        })
    }

    pub fn with_default(mut self, default: impl Into<PathBuf>) -> Self {
        self.default = default.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontOrigin {
    /// The family's own mapped file
    Mapped,
    /// The default font stood in
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFont {
    pub path: PathBuf,
    pub origin: FontOrigin,
}

/// Resolves families against a fixed table and the filesystem
#[derive(Debug, Clone)]
pub struct FontResolver {
    root: PathBuf,
    map: FontMap,
}

impl FontResolver {
    pub fn new(root: impl Into<PathBuf>, map: FontMap) -> Self {
        Self {
            root: root.into(),
            map,
        }
    }

    /// Mapped file if it exists, else the default file if it exists, else `None`
    pub fn resolve(&self, family: &str) -> Option<ResolvedFont> {
        if let Some(file) = self.map.families.get(family.trim()) {
            let path = self.absolute(file);
            if path.is_file() {
                tracing::debug!(family, path = %path.display(), "font resolved");
                return Some(ResolvedFont {
                    path,
                    origin: FontOrigin::Mapped,
                });
            }
            tracing::warn!(family, path = %path.display(), "mapped font file missing, using default");
        }

        let path = self.absolute(&self.map.default);
        if path.is_file() {
            tracing::debug!(family, path = %path.display(), "using default font");
            Some(ResolvedFont {
                path,
                origin: FontOrigin::Default,
            })
        } else {
            tracing::warn!(family, "no font file available, falling back to sans-serif");
            None
        }
    }

    fn absolute(&self, file: &Path) -> PathBuf {
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root.join(file)
        };
        std::fs::canonicalize(&path).unwrap_or(path)
    }
}
