//! Filesystem source feed.
//!
//! Walks `notes.root` and turns matching files into [`Source`]s:
//!
//! | File | Becomes |
//! |------|---------|
//! | `*.md`, `*.txt` | note, titled by its first `# heading` or the file stem |
//! | `*.pages.json` | document, pages as written by an external extractor |
//!
//! The source id is the path relative to the root, with `/` separators.
//! `updated_at` is the file modification time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::NotesConfig;
use crate::models::{Source, SourceContent, SourcePage};

const DOCUMENT_SUFFIX: &str = ".pages.json";

/// Output of the external text extractor for one uploaded document.
#[derive(Debug, Deserialize)]
struct PagesFile {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    pages: Vec<SourcePage>,
    #[serde(default)]
    error: Option<String>,
}

pub fn scan_notes(config: &NotesConfig) -> Result<Vec<Source>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Notes root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.obsidian/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut sources = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_source(path, &rel_str, &config.owner) {
            Ok(source) => sources.push(source),
            Err(e) => warn!(path = %rel_str, error = %e, "skipping unreadable source"),
        }
    }

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

fn file_to_source(path: &Path, relative_path: &str, owner: &str) -> Result<Source> {
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let updated_at: DateTime<Utc> = modified.into();

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if let Some(stem) = relative_path.strip_suffix(DOCUMENT_SUFFIX) {
        let parsed: PagesFile = serde_json::from_str(&text)
            .with_context(|| format!("Invalid pages file: {}", path.display()))?;
        let fallback_name = stem.rsplit('/').next().unwrap_or(stem).to_string();
        return Ok(Source {
            id: relative_path.to_string(),
            owner_id: owner.to_string(),
            title: parsed.file_name.unwrap_or(fallback_name),
            content: SourceContent::Document {
                pages: parsed.pages,
                extraction_error: parsed.error,
            },
            updated_at,
        });
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let title = heading_title(&text).unwrap_or(stem);
    Ok(Source::note(owner, relative_path, title, text, updated_at))
}

/// The first level-one markdown heading, if any.
fn heading_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(root: &Path) -> NotesConfig {
        NotesConfig {
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_notes_and_documents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("cooking")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("cooking/bread.md"), "# Bread\n\nBake at 200C.").unwrap();
        fs::write(root.join("todo.txt"), "buy flour").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join(".git/config.md"), "# ignored").unwrap();
        fs::write(
            root.join("oven.pages.json"),
            r#"{"file_name": "oven.pdf", "pages": [{"page_number": 1, "text": "Preheat."}], "error": null}"#,
        )
        .unwrap();

        let sources = scan_notes(&config(root)).unwrap();
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["cooking/bread.md", "oven.pages.json", "todo.txt"]);

        assert_eq!(sources[0].title, "Bread");
        assert_eq!(sources[0].owner_id, "me");
        assert_eq!(sources[1].title, "oven.pdf");
        match &sources[1].content {
            SourceContent::Document {
                pages,
                extraction_error,
            } => {
                assert_eq!(pages.len(), 1);
                assert!(extraction_error.is_none());
            }
            other => panic!("expected document, got {:?}", other),
        }
        assert_eq!(sources[2].title, "todo");
    }

    #[test]
    fn test_failed_extraction_is_carried() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("scan.pages.json"),
            r#"{"pages": [], "error": "encrypted pdf"}"#,
        )
        .unwrap();

        let sources = scan_notes(&config(tmp.path())).unwrap();
        assert_eq!(sources[0].title, "scan");
        assert!(matches!(
            &sources[0].content,
            SourceContent::Document { extraction_error: Some(e), .. } if e == "encrypted pdf"
        ));
    }

    #[test]
    fn test_invalid_pages_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.pages.json"), "not json").unwrap();
        fs::write(tmp.path().join("ok.md"), "fine").unwrap();
        let sources = scan_notes(&config(tmp.path())).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "ok.md");
    }

    #[test]
    fn test_missing_root_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_notes(&config(&tmp.path().join("nope"))).is_err());
    }
}
