use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::BlogConfig;
use crate::frontmatter;
use crate::notebook;
use crate::posts::{PostLocation, discover_posts};
use crate::runtime::{ResolvedPaths, normalize_for_display};

/// Styling applied to the rendered page before the screenshot: hide
/// navigation and body content, enlarge the title. Carried over verbatim
/// from the capture tool invocation this pass replaces.
pub const CARD_PAGE_JAVASCRIPT: &str = "\
document.querySelector('h1.title').style.fontSize='2em';
document.querySelector('.navbar-toggler-icon').style.display = 'none';
document.querySelectorAll('section').forEach(el => el.style.display = 'none');
document.querySelector('.navbar-brand-logo img').style.height='140px';
document.querySelector('.navbar-brand-logo').style.marginTop='10px';
document.querySelector('.quarto-title').style.marginTop='40px';
document.querySelector('h1.title').style.top = \"10px\";
document.querySelectorAll('p').forEach(el => el.style.display = 'none');
document.querySelectorAll('li').forEach(el => el.style.display = 'none');
document.querySelectorAll('pre').forEach(el => el.style.display = 'none');
document.querySelectorAll('hr').forEach(el => el.style.display = 'none');
document.querySelectorAll('div.cell').forEach(el => el.style.display = 'none');
";

#[derive(Debug, Clone, Default)]
pub struct CardOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardPostResult {
    pub slug: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardReport {
    pub success: bool,
    pub capture_available: bool,
    pub capture_command: String,
    pub examined: usize,
    pub captured: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub posts: Vec<CardPostResult>,
}

/// Capture a social-media card for every post whose header lacks a
/// non-empty `image` field, then point the header at the new file. The
/// screenshot itself is delegated to an external capture tool; a non-zero
/// exit leaves the notebook untouched and is reported with the tool's
/// stderr.
pub fn generate_cards(
    paths: &ResolvedPaths,
    config: &BlogConfig,
    options: &CardOptions,
) -> Result<CardReport> {
    let command = config.card_command();
    let mut report = CardReport {
        success: true,
        capture_available: true,
        capture_command: command.clone(),
        examined: 0,
        captured: 0,
        skipped: 0,
        errors: Vec::new(),
        posts: Vec::new(),
    };

    if !options.dry_run && !capture_tool_available(&command) {
        report.capture_available = false;
        report.success = false;
        report.errors.push(format!(
            "capture tool not found: {command} (install it or set [card] command / BLOG_SHOT_SCRAPER)"
        ));
        return Ok(report);
    }

    let render_dir = paths.project_root.join(config.render_dir());
    let filename = config.card_filename();

    for location in discover_posts(paths)? {
        if let Some(limit) = options.limit
            && report.captured >= limit
        {
            break;
        }
        report.examined += 1;
        match process_post(&location, &render_dir, config, &command, &filename, options) {
            Ok(PostOutcome::Captured { detail }) => {
                report.captured += 1;
                report.posts.push(CardPostResult {
                    slug: location.slug,
                    action: if options.dry_run {
                        "would-capture".to_string()
                    } else {
                        "captured".to_string()
                    },
                    detail,
                });
            }
            Ok(PostOutcome::Skipped { reason }) => {
                report.skipped += 1;
                report.posts.push(CardPostResult {
                    slug: location.slug,
                    action: "skipped".to_string(),
                    detail: Some(reason),
                });
            }
            Err(error) => {
                report.errors.push(format!("{}: {error:#}", location.slug));
                report.posts.push(CardPostResult {
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
    Captured { detail: Option<String> },
    Skipped { reason: String },
}

fn process_post(
    location: &PostLocation,
    render_dir: &Path,
    config: &BlogConfig,
    command: &str,
    filename: &str,
    options: &CardOptions,
) -> Result<PostOutcome> {
    let mut nb = notebook::load_notebook(&location.notebook_path)?;
    let Some(source) = notebook::first_raw_source(&nb) else {
        return Ok(PostOutcome::Skipped {
            reason: "first cell is not a front-matter block".to_string(),
        });
    };
    let Some(mut header) = frontmatter::parse(&source)? else {
        return Ok(PostOutcome::Skipped {
            reason: "first cell is not a front-matter block".to_string(),
        });
    };
    if frontmatter::has_nonempty_image(&header) {
        return Ok(PostOutcome::Skipped {
            reason: "image already present".to_string(),
        });
    }

    let page = render_dir
        .join("posts")
        .join(&location.slug)
        .join("index.html");
    if !page.exists() {
        anyhow::bail!(
            "rendered page not found: {} (render the site first)",
            normalize_for_display(&page)
        );
    }
    let output = location.dir.join(filename);

    if options.dry_run {
        return Ok(PostOutcome::Captured {
            detail: Some(format!("would capture {}", normalize_for_display(&page))),
        });
    }

    run_capture(command, &page, &output, config)?;

    frontmatter::ensure_image_field(&mut header, filename);
    notebook::set_first_cell_source(&mut nb, &frontmatter::serialize(&header))?;
    notebook::write_notebook(&location.notebook_path, &nb)?;

    let detail = config
        .base_url()
        .map(|base| format!("{base}/posts/{}/index.html", location.slug))
        .or_else(|| Some(normalize_for_display(&output)));
    Ok(PostOutcome::Captured { detail })
}

fn run_capture(command: &str, page: &Path, output: &Path, config: &BlogConfig) -> Result<()> {
    let result = Command::new(command)
        .arg(page)
        .arg("-h")
        .arg(config.card_height().to_string())
        .arg("-w")
        .arg(config.card_width().to_string())
        .arg("--javascript")
        .arg(CARD_PAGE_JAVASCRIPT)
        .arg("-o")
        .arg(output)
        .output()
        .with_context(|| format!("failed to execute {command}"))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        anyhow::bail!(
            "{command} exited with {}: {}",
            result.status,
            stderr.trim()
        );
    }
    Ok(())
}

/// The command is usable if it is a path to an existing file or resolvable
/// through PATH.
fn capture_tool_available(command: &str) -> bool {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.exists();
    }
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| resolves_in_dir(&dir, command))
}

fn resolves_in_dir(dir: &Path, command: &str) -> bool {
    let direct = dir.join(command);
    if direct.is_file() {
        return true;
    }
    if cfg!(windows) {
        return PathBuf::from(format!("{}.exe", direct.display())).is_file();
    }
    false
}
