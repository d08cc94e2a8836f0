//! Content rendering seam
//!
//! The engine asks for guidance by glob pattern (`phase-implementation`,
//! then `phase-implementation-*`) and gets back text or nothing. Template substitution belongs to the
//! renderer; the engine never performs it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::{Error, Result};

/// Glob patterns used to look up guidance for a phase, in lookup order
///
/// The exact name comes first, then suffixed variants. A bare prefix is
/// never used so that `impl` cannot pick up `phase-implementation`.
pub fn phase_patterns(phase: &str) -> [String; 2] {
    [format!("phase-{}", phase), format!("phase-{}-*", phase)]
}

/// Render the guidance for `phase`, trying each of [`phase_patterns`]
pub async fn render_phase_guidance(
    renderer: &dyn ContentRenderer,
    phase: &str,
    context: &serde_json::Value,
) -> Result<Option<String>> {
    for pattern in phase_patterns(phase) {
        if let Some(text) = renderer.render(&pattern, context).await? {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Trait for content rendering collaborators
#[async_trait]
pub trait ContentRenderer: Send + Sync {
    /// Render the first template whose name matches `pattern`
    ///
    /// Returns `Ok(None)` when nothing matches.
    async fn render(&self, pattern: &str, context: &serde_json::Value) -> Result<Option<String>>;
}

/// Compiled glob supporting `*` and `?`
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        for c in pattern.chars() {
            match c {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if c == '*' { ".*" } else { "." });
                }
                _ => literal.push(c),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| Error::Render(format!("Invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { regex })
    }

    /// Check whether a name matches
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Renderer that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

#[async_trait]
impl ContentRenderer for NullRenderer {
    async fn render(&self, _pattern: &str, _context: &serde_json::Value) -> Result<Option<String>> {
        Ok(None)
    }
}

/// In-memory templates, matched in insertion order
#[derive(Debug, Clone, Default)]
pub struct StaticRenderer {
    entries: Vec<(String, String)>,
}

impl StaticRenderer {
    /// Create an empty renderer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template
    pub fn with_entry(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.entries.push((name.into(), content.into()));
        self
    }

    /// Built-in guidance for the canonical phases
    pub fn with_default_phase_guidance() -> Self {
        Self::new()
            .with_entry(
                "phase-discussion",
                "Discuss the problem with the user. Do not write or change code yet.",
            )
            .with_entry(
                "phase-planning",
                "Write down a plan for the change and confirm it with the user before implementing.",
            )
            .with_entry(
                "phase-implementation",
                "Implement the agreed plan. Keep changes focused on the active issue.",
            )
            .with_entry(
                "phase-check",
                "Run the build and the test suite and fix every failure before moving on.",
            )
            .with_entry(
                "phase-review",
                "Review the finished change with the user and wait for approval.",
            )
    }
}

#[async_trait]
impl ContentRenderer for StaticRenderer {
    async fn render(&self, pattern: &str, _context: &serde_json::Value) -> Result<Option<String>> {
        let glob = GlobPattern::new(pattern)?;
        Ok(self
            .entries
            .iter()
            .find(|(name, _)| glob.matches(name))
            .map(|(_, content)| content.clone()))
    }
}

/// Templates stored as files in a directory, matched on file stem
#[derive(Debug, Clone)]
pub struct DirectoryRenderer {
    root: PathBuf,
}

impl DirectoryRenderer {
    /// Create a renderer over a directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory searched for templates
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn matching_files(&self, glob: &GlobPattern) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if glob.matches(stem) {
                matches.push(path);
            }
        }
        matches.sort();
        Ok(matches)
    }
}

#[async_trait]
impl ContentRenderer for DirectoryRenderer {
    async fn render(&self, pattern: &str, _context: &serde_json::Value) -> Result<Option<String>> {
        let glob = GlobPattern::new(pattern)?;
        let Some(path) = self.matching_files(&glob).await?.into_iter().next() else {
            tracing::debug!(pattern, root = %self.root.display(), "No template matched");
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::Render(format!("Failed to read template {}: {}", path.display(), e))
        })?;
        Ok(Some(content.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_glob_matching() {
        let glob = GlobPattern::new("phase-impl*").unwrap();
        assert!(glob.matches("phase-implementation"));
        assert!(!glob.matches("xphase-implementation"));

        let glob = GlobPattern::new("phase-?heck").unwrap();
        assert!(glob.matches("phase-check"));
        assert!(!glob.matches("phase-chheck"));

        let glob = GlobPattern::new("a.b+(c)").unwrap();
        assert!(glob.matches("a.b+(c)"));
        assert!(!glob.matches("aXb+(c)"));
    }

    #[test]
    fn test_phase_patterns() {
        assert_eq!(phase_patterns("review"), ["phase-review", "phase-review-*"]);
    }

    #[tokio::test]
    async fn test_static_renderer() {
        let renderer = StaticRenderer::with_default_phase_guidance();
        let text = render_phase_guidance(&renderer, "check", &json!({}))
            .await
            .unwrap();
        assert!(text.unwrap().contains("test suite"));
        assert!(render_phase_guidance(&renderer, "deploy", &json!({}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_phase_name_prefix_does_not_match_longer_phase() {
        let renderer = StaticRenderer::with_default_phase_guidance();
        assert!(render_phase_guidance(&renderer, "impl", &json!({}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_null_renderer() {
        assert!(NullRenderer.render("*", &json!({})).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_renderer_picks_first_sorted_match() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("phase-review-b.md"), "second\n").unwrap();
        std::fs::write(dir.path().join("phase-review-a.md"), "first\n").unwrap();
        std::fs::write(dir.path().join("phase-check.md"), "check\n").unwrap();

        let renderer = DirectoryRenderer::new(dir.path());
        let text = render_phase_guidance(&renderer, "review", &json!({}))
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("first"));

        std::fs::write(dir.path().join("phase-review.md"), "exact\n").unwrap();
        let text = render_phase_guidance(&renderer, "review", &json!({}))
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("exact"));
    }

    #[tokio::test]
    async fn test_directory_renderer_missing_dir() {
        let dir = TempDir::new().unwrap();
        let renderer = DirectoryRenderer::new(dir.path().join("absent"));
        assert!(renderer.render("*", &json!({})).await.unwrap().is_none());
    }
}
