//! Output root: per-run directories and traversal-safe file lookup

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// URL prefix under which run artifacts are served
pub const OUTPUTS_PREFIX: &str = "/outputs/";

#[derive(Debug, Clone)]
pub struct OutputRoot {
    root: PathBuf,
}

impl OutputRoot {
    /// Create the directory if needed; the stored root is canonical
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let root = std::fs::canonicalize(dir)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Fresh `<base>-<id>` directory for one run
    pub fn create_run_dir(&self, base_name: &str) -> Result<PathBuf> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self
            .root
            .join(format!("{}-{}", sanitize_base_name(base_name), &run_id[..8]));
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "run directory created");
        Ok(dir)
    }

    /// Resolve a path relative to the root, rejecting anything that escapes it
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let trimmed = relative
            .strip_prefix(OUTPUTS_PREFIX)
            .unwrap_or(relative)
            .trim_start_matches('/');
        let candidate = Path::new(trimmed);

        if candidate.is_absolute()
            || candidate
                .components()
                .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        {
            return Err(Error::PathAccessDenied {
                path: relative.to_string(),
            });
        }

        let joined = self.root.join(candidate);
        let canonical = match std::fs::canonicalize(&joined) {
            Ok(path) => path,
            Err(_) => {
                // Missing files inside the root are "not found"; anything
                // that lexically climbs out is denied
                return Err(if escapes_lexically(candidate) {
                    Error::PathAccessDenied {
                        path: relative.to_string(),
                    }
                } else {
                    Error::OutputNotFound {
                        path: relative.to_string(),
                    }
                });
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(Error::PathAccessDenied {
                path: relative.to_string(),
            });
        }
        if !canonical.is_file() {
            return Err(Error::OutputNotFound {
                path: relative.to_string(),
            });
        }
        Ok(canonical)
    }

    /// Path relative to the root, `/`-separated
    pub fn relative(&self, path: &Path) -> Option<String> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let relative = path.strip_prefix(&self.root).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// `/outputs/<relative>` for an in-root path
    pub fn url_for(&self, path: &Path) -> Option<String> {
        self.relative(path)
            .map(|relative| format!("{}{}", OUTPUTS_PREFIX, relative))
    }

    /// Every file under the root, sorted
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn escapes_lexically(path: &Path) -> bool {
    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return true;
        }
    }
    false
}

/// Content type by file extension
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Base name usable as a directory name; alphanumerics (any script), `-` and
/// `_` survive, everything else becomes `_`
pub fn sanitize_base_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('_').is_empty() {
        "document".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("report.pdf", "report")]
    #[case("/tmp/in/年次 報告.pdf", "年次_報告")]
    #[case("../../etc/passwd", "passwd")]
    #[case("...", "document")]
    #[case("", "document")]
    fn test_sanitize_base_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_base_name(input), expected);
    }

    #[test]
    fn test_run_dirs_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::new(dir.path()).unwrap();
        let a = root.create_run_dir("report.pdf").unwrap();
        let b = root.create_run_dir("report.pdf").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir());
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("report-"));
        assert_eq!(name.len(), "report-".len() + 8);
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::new(dir.path()).unwrap();
        let run = root.create_run_dir("doc").unwrap();
        let file = run.join("doc_NEO.txt");
        std::fs::write(&file, "x").unwrap();

        let relative = root.relative(&file).unwrap();
        assert_eq!(root.resolve(&relative).unwrap(), std::fs::canonicalize(&file).unwrap());
        let url = root.url_for(&file).unwrap();
        assert!(url.starts_with("/outputs/doc-"));
        assert_eq!(root.resolve(&url).unwrap(), std::fs::canonicalize(&file).unwrap());
    }

    #[rstest]
    #[case("../secret.txt")]
    #[case("run/../../secret.txt")]
    #[case("/etc/passwd")]
    fn test_resolve_rejects_escape(#[case] request: &str) {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("secret.txt"), "s").unwrap();
        let root = OutputRoot::new(parent.path().join("out")).unwrap();
        std::fs::create_dir(root.path().join("run")).unwrap();

        assert!(matches!(
            root.resolve(request),
            Err(Error::PathAccessDenied { .. }) | Err(Error::OutputNotFound { .. })
        ));
        if request.contains("..") {
            assert!(matches!(root.resolve(request), Err(Error::PathAccessDenied { .. })));
        }
    }

    #[test]
    fn test_resolve_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::new(dir.path()).unwrap();
        assert!(matches!(
            root.resolve("nope/missing.png"),
            Err(Error::OutputNotFound { .. })
        ));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/b_recreated.pdf")), "application/pdf");
        assert_eq!(content_type(Path::new("image_p1_0.PNG")), "image/png");
        assert_eq!(content_type(Path::new("doc_NEO.txt")), "text/plain; charset=utf-8");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_list_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = OutputRoot::new(dir.path()).unwrap();
        let run = root.create_run_dir("doc").unwrap();
        std::fs::write(run.join("a.txt"), "a").unwrap();
        std::fs::write(run.join("b.png"), "b").unwrap();
        assert_eq!(root.list_files().unwrap().len(), 2);
    }
}
