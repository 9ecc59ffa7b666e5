use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use similar::TextDiff;

use crate::frontmatter;
use crate::notebook;
use crate::posts::{PostLocation, discover_posts};
use crate::runtime::ResolvedPaths;

#[derive(Debug, Clone)]
pub struct DraftOptions {
    /// Explicit render-all gate; the CLI derives it from the
    /// QUARTO_PROJECT_RENDER_ALL environment flag.
    pub render_all: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftPostResult {
    pub slug: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftPassReport {
    pub success: bool,
    pub gated: bool,
    pub dry_run: bool,
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub posts: Vec<DraftPostResult>,
}

impl DraftPassReport {
    fn gated_off() -> Self {
        Self {
            success: true,
            gated: true,
            dry_run: false,
            examined: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            errors: Vec::new(),
            posts: Vec::new(),
        }
    }
}

/// Walk every post and reconcile its draft flag with its date. Posts with a
/// broken header or date are reported and skipped; siblings keep
/// processing. Files are rewritten only when the header actually changed.
pub fn update_draft_status(
    paths: &ResolvedPaths,
    today: NaiveDate,
    options: &DraftOptions,
) -> Result<DraftPassReport> {
    if !options.render_all {
        return Ok(DraftPassReport::gated_off());
    }

    let mut report = DraftPassReport {
        success: true,
        gated: false,
        dry_run: options.dry_run,
        examined: 0,
        updated: 0,
        unchanged: 0,
        skipped: 0,
        errors: Vec::new(),
        posts: Vec::new(),
    };

    for location in discover_posts(paths)? {
        report.examined += 1;
        match process_post(&location, today, options.dry_run) {
            Ok(PostOutcome::Updated { diff }) => {
                report.updated += 1;
                report.posts.push(DraftPostResult {
                    slug: location.slug,
                    action: if options.dry_run {
                        "would-update".to_string()
                    } else {
                        "updated".to_string()
                    },
                    detail: diff,
                });
            }
            Ok(PostOutcome::Unchanged) => {
                report.unchanged += 1;
                report.posts.push(DraftPostResult {
                    slug: location.slug,
                    action: "unchanged".to_string(),
                    detail: None,
                });
            }
            Ok(PostOutcome::Skipped { reason }) => {
                report.skipped += 1;
                report.posts.push(DraftPostResult {
                    slug: location.slug,
                    action: "skipped".to_string(),
                    detail: Some(reason),
                });
            }
            Err(error) => {
                report.errors.push(format!("{}: {error:#}", location.slug));
                report.posts.push(DraftPostResult {
                    slug: location.slug,
                    action: "error".to_string(),
                    detail: Some(format!("{error:#}")),
                });
            }
        }
    }

    report.success = report.errors.is_empty();
    Ok(report)
}

enum PostOutcome {
    Updated { diff: Option<String> },
    Unchanged,
    Skipped { reason: String },
}

fn process_post(location: &PostLocation, today: NaiveDate, dry_run: bool) -> Result<PostOutcome> {
    let mut nb = notebook::load_notebook(&location.notebook_path)?;
    let Some(source) = notebook::first_raw_source(&nb) else {
        return Ok(PostOutcome::Skipped {
            reason: "first cell is not a front-matter block".to_string(),
        });
    };
    let Some(header) = frontmatter::parse(&source)? else {
        return Ok(PostOutcome::Skipped {
            reason: "first cell is not a front-matter block".to_string(),
        });
    };
    if header.get("date").is_none() {
        return Ok(PostOutcome::Skipped {
            reason: "no date field".to_string(),
        });
    }

    let mut updated = header.clone();
    frontmatter::apply_draft_policy(&mut updated, today)?;
    if updated == header {
        return Ok(PostOutcome::Unchanged);
    }

    let new_source = frontmatter::serialize(&updated);
    if dry_run {
        return Ok(PostOutcome::Updated {
            diff: Some(render_diff(&source, &new_source)),
        });
    }

    notebook::set_first_cell_source(&mut nb, &new_source)?;
    notebook::write_notebook(&location.notebook_path, &nb)?;
    Ok(PostOutcome::Updated { diff: None })
}

fn render_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(2)
        .header("before", "after")
        .to_string()
}
