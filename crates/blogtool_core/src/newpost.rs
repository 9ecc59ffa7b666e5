use std::fs;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use crate::config::BlogConfig;
use crate::frontmatter::{FieldValue, FrontMatter, serialize};
use crate::notebook;
use crate::runtime::{NOTEBOOK_FILENAME, ResolvedPaths, normalize_for_display};
use crate::summarize::{self, DEFAULT_MAX_FETCH_BYTES, SummaryBackend};

#[derive(Debug, Clone)]
pub struct NewPostOptions {
    pub title: String,
    pub url: Option<String>,
    pub backend: SummaryBackend,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPostReport {
    pub slug: String,
    pub notebook_path: String,
    pub date: String,
    pub summarized: bool,
    pub summary_error: Option<String>,
}

/// Posts go live on Sundays: the next strictly-future Sunday, so a post
/// created on a Sunday lands the following week.
pub fn next_sunday(today: NaiveDate) -> NaiveDate {
    let days_until = (6 - i64::from(today.weekday().num_days_from_monday())).rem_euclid(7);
    let days_until = if days_until == 0 { 7 } else { days_until };
    today + Duration::days(days_until)
}

pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn template_header(title: &str, date: &str) -> FrontMatter {
    let mut header = FrontMatter::default();
    header.push("title", FieldValue::quoted(title));
    header.push("date", FieldValue::quoted(date));
    header.push("draft", FieldValue::Bool(true));
    header.push("publish", FieldValue::Bool(false));
    header.push("image", FieldValue::quoted(""));
    header.push("callout-appearance", FieldValue::bare("simple"));
    header.push("categories", FieldValue::List(Vec::new()));
    header
}

fn build_cells(header: &FrontMatter, summary: Option<&str>) -> Vec<Value> {
    let mut cells = vec![notebook::raw_cell(&serialize(header))];
    if let Some(summary) = summary {
        cells.push(notebook::markdown_cell(summary));
    }
    cells
}

/// Create a post folder and notebook. When a URL is given, the page is
/// fetched and summarized; a collaborator failure is reported on the result
/// and the post is still created, just without a summary cell.
pub fn create_post(
    paths: &ResolvedPaths,
    config: &BlogConfig,
    options: &NewPostOptions,
    today: NaiveDate,
) -> Result<NewPostReport> {
    if options.title.trim().is_empty() {
        bail!("post title cannot be empty");
    }

    let date = next_sunday(today).format("%Y-%m-%d").to_string();
    let slug = format!("{date}-{}", slugify(&options.title));
    let post_dir = paths.posts_dir.join(&slug);
    let notebook_path = post_dir.join(NOTEBOOK_FILENAME);
    if notebook_path.exists() {
        bail!("post already exists: {}", normalize_for_display(&notebook_path));
    }

    let mut summary = None;
    let mut summary_error = None;
    if let Some(url) = options.url.as_deref() {
        match resolve_summary(config, &options.backend, url) {
            Ok(text) => summary = Some(text),
            Err(error) => summary_error = Some(format!("{error:#}")),
        }
    }

    fs::create_dir_all(&post_dir)
        .with_context(|| format!("failed to create {}", post_dir.display()))?;
    let header = template_header(options.title.trim(), &date);
    let nb = notebook::new_notebook(build_cells(&header, summary.as_deref()));
    notebook::write_notebook(&notebook_path, &nb)?;

    Ok(NewPostReport {
        slug,
        notebook_path: normalize_for_display(&notebook_path),
        date,
        summarized: summary.is_some(),
        summary_error,
    })
}

fn resolve_summary(config: &BlogConfig, backend: &SummaryBackend, url: &str) -> Result<String> {
    let page = summarize::fetch_url(url, DEFAULT_MAX_FETCH_BYTES)?;
    let content = if page.content_type.contains("text/html") {
        summarize::strip_html(&page.text)
    } else {
        page.text
    };
    summarize::summarize(backend, config, &content)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use super::{NewPostOptions, build_cells, create_post, next_sunday, slugify, template_header};
    use crate::frontmatter::{self, FieldValue};
    use crate::notebook;
    use crate::posts::tests::test_paths;
    use crate::summarize::SummaryBackend;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("test date")
    }

    #[test]
    fn next_sunday_is_strictly_future() {
        // 2024-01-01 is a Monday, 2024-01-06 a Saturday, 2024-01-07 a Sunday.
        assert_eq!(next_sunday(date("2024-01-01")), date("2024-01-07"));
        assert_eq!(next_sunday(date("2024-01-06")), date("2024-01-07"));
        assert_eq!(next_sunday(date("2024-01-07")), date("2024-01-14"));
    }

    #[test]
    fn slugify_lowercases_and_joins() {
        assert_eq!(slugify("Hello  Rust World"), "hello-rust-world");
        assert_eq!(slugify("  Spaced  Out  "), "spaced-out");
    }

    #[test]
    fn template_header_matches_new_post_convention() {
        let header = template_header("My Post", "2024-01-07");
        assert_eq!(
            frontmatter::serialize(&header),
            "---\ntitle: \"My Post\"\ndate: \"2024-01-07\"\ndraft: true\npublish: false\nimage: \"\"\ncallout-appearance: simple\ncategories: []\n---"
        );
    }

    #[test]
    fn build_cells_appends_summary_when_present() {
        let header = template_header("T", "2024-01-07");
        assert_eq!(build_cells(&header, None).len(), 1);
        let cells = build_cells(&header, Some("A summary."));
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1]["cell_type"], serde_json::json!("markdown"));
    }

    #[test]
    fn create_post_writes_parseable_notebook() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        std::fs::create_dir_all(&paths.posts_dir).expect("posts dir");

        let report = create_post(
            &paths,
            &crate::config::BlogConfig::default(),
            &NewPostOptions {
                title: "Hello World".to_string(),
                url: None,
                backend: SummaryBackend::default(),
            },
            date("2024-01-01"),
        )
        .expect("create");

        assert_eq!(report.slug, "2024-01-07-hello-world");
        assert_eq!(report.date, "2024-01-07");
        assert!(!report.summarized);

        let nb = notebook::load_notebook(
            &paths.posts_dir.join("2024-01-07-hello-world/index.ipynb"),
        )
        .expect("load");
        let source = notebook::first_raw_source(&nb).expect("raw source");
        let header = frontmatter::parse(&source)
            .expect("parse")
            .expect("header present");
        assert_eq!(
            header.get("title").and_then(FieldValue::as_str),
            Some("Hello World")
        );
        assert_eq!(header.get("draft").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(
            header.get("publish").and_then(FieldValue::as_bool),
            Some(false)
        );
        assert_eq!(header.get("categories"), Some(&FieldValue::List(Vec::new())));
    }

    #[test]
    fn create_post_refuses_to_overwrite() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let options = NewPostOptions {
            title: "Hello World".to_string(),
            url: None,
            backend: SummaryBackend::default(),
        };
        let config = crate::config::BlogConfig::default();
        std::fs::create_dir_all(&paths.posts_dir).expect("posts dir");

        create_post(&paths, &config, &options, date("2024-01-01")).expect("create");
        let err = create_post(&paths, &config, &options, date("2024-01-01"))
            .expect_err("must fail");
        assert!(err.to_string().contains("post already exists"));
    }

    #[test]
    fn empty_title_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let err = create_post(
            &paths,
            &crate::config::BlogConfig::default(),
            &NewPostOptions {
                title: "   ".to_string(),
                url: None,
                backend: SummaryBackend::default(),
            },
            date("2024-01-01"),
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("title cannot be empty"));
    }
}
