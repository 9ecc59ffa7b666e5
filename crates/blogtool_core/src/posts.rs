use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::frontmatter::{self, FieldValue};
use crate::notebook;
use crate::runtime::{NOTEBOOK_FILENAME, ResolvedPaths, normalize_for_display};

/// One post directory under posts/ that contains an index.ipynb.
#[derive(Debug, Clone)]
pub struct PostLocation {
    pub slug: String,
    pub dir: PathBuf,
    pub notebook_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedPost {
    pub slug: String,
    pub relative_path: String,
    pub title: Option<String>,
    pub date: Option<String>,
    pub draft: Option<bool>,
    pub publish: Option<bool>,
    pub has_image: bool,
    pub header_error: Option<String>,
    pub content_hash: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStats {
    pub total_posts: usize,
    pub drafts: usize,
    pub published: usize,
    pub future_dated: usize,
    pub missing_image: usize,
    pub header_errors: usize,
}

/// List post directories, sorted by folder name. Only the immediate
/// children of posts/ are considered, matching the one-folder-per-post
/// layout the site generator expects.
pub fn discover_posts(paths: &ResolvedPaths) -> Result<Vec<PostLocation>> {
    let mut posts = Vec::new();
    if !paths.posts_dir.exists() {
        return Ok(posts);
    }
    for entry in WalkDir::new(&paths.posts_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("failed to walk {}", paths.posts_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let notebook_path = entry.path().join(NOTEBOOK_FILENAME);
        if !notebook_path.exists() {
            continue;
        }
        posts.push(PostLocation {
            slug: entry.file_name().to_string_lossy().to_string(),
            dir: entry.path().to_path_buf(),
            notebook_path,
        });
    }
    Ok(posts)
}

/// Read every post's header fields, best effort: a post whose header fails
/// to parse is reported with the error attached instead of aborting the
/// scan.
pub fn scan_posts(paths: &ResolvedPaths) -> Result<Vec<ScannedPost>> {
    let mut out = Vec::new();
    for location in discover_posts(paths)? {
        out.push(read_scanned_post(paths, &location)?);
    }
    Ok(out)
}

pub fn scan_stats(posts: &[ScannedPost], today: NaiveDate) -> ScanStats {
    let mut drafts = 0usize;
    let mut published = 0usize;
    let mut future_dated = 0usize;
    let mut missing_image = 0usize;
    let mut header_errors = 0usize;

    for post in posts {
        match post.draft {
            Some(true) => drafts += 1,
            Some(false) => published += 1,
            None => {}
        }
        if post
            .date
            .as_deref()
            .and_then(|value| NaiveDate::parse_from_str(value, frontmatter::DATE_FORMAT).ok())
            .is_some_and(|date| date > today)
        {
            future_dated += 1;
        }
        if !post.has_image {
            missing_image += 1;
        }
        if post.header_error.is_some() {
            header_errors += 1;
        }
    }

    ScanStats {
        total_posts: posts.len(),
        drafts,
        published,
        future_dated,
        missing_image,
        header_errors,
    }
}

fn read_scanned_post(paths: &ResolvedPaths, location: &PostLocation) -> Result<ScannedPost> {
    let content = fs::read_to_string(&location.notebook_path)
        .with_context(|| format!("failed to read {}", location.notebook_path.display()))?;
    let metadata = fs::metadata(&location.notebook_path)
        .with_context(|| format!("failed to stat {}", location.notebook_path.display()))?;
    let relative_path = location
        .notebook_path
        .strip_prefix(&paths.project_root)
        .map(normalize_for_display)
        .unwrap_or_else(|_| normalize_for_display(&location.notebook_path));

    let mut post = ScannedPost {
        slug: location.slug.clone(),
        relative_path,
        title: None,
        date: None,
        draft: None,
        publish: None,
        has_image: false,
        header_error: None,
        content_hash: compute_hash(&content),
        bytes: metadata.len(),
    };

    let notebook: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(error) => {
            post.header_error = Some(format!("invalid notebook JSON: {error}"));
            return Ok(post);
        }
    };
    let Some(source) = notebook::first_raw_source(&notebook) else {
        return Ok(post);
    };
    match frontmatter::parse(&source) {
        Ok(Some(header)) => {
            post.title = header
                .get("title")
                .and_then(FieldValue::as_str)
                .map(str::to_string);
            post.date = header
                .get("date")
                .and_then(FieldValue::as_str)
                .map(str::to_string);
            post.draft = header.get("draft").and_then(FieldValue::as_bool);
            post.publish = header.get("publish").and_then(FieldValue::as_bool);
            post.has_image = frontmatter::has_nonempty_image(&header);
        }
        Ok(None) => {}
        Err(error) => {
            post.header_error = Some(error.to_string());
        }
    }
    Ok(post)
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
