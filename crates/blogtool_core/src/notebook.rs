use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tempfile::NamedTempFile;

/// Read a notebook as plain JSON. Cells and keys this tool does not
/// understand are kept in the tree and written back untouched.
pub fn load_notebook(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let notebook: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse notebook JSON in {}", path.display()))?;
    Ok(notebook)
}

fn first_cell(notebook: &Value) -> Option<&Value> {
    notebook.get("cells").and_then(Value::as_array)?.first()
}

/// Source of the first cell if it is a raw cell, joined into one string.
/// The on-disk representation may be a single string or a list of line
/// strings; both forms are accepted.
pub fn first_raw_source(notebook: &Value) -> Option<String> {
    let cell = first_cell(notebook)?;
    if cell.get("cell_type").and_then(Value::as_str) != Some("raw") {
        return None;
    }
    cell.get("source").map(join_source)
}

pub fn join_source(source: &Value) -> String {
    match source {
        Value::String(text) => text.clone(),
        Value::Array(lines) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

/// Replace the first cell's source, keeping the representation (string vs
/// list of lines) the file already used. Every other cell and notebook key
/// is left untouched.
pub fn set_first_cell_source(notebook: &mut Value, source: &str) -> Result<()> {
    let cells = notebook
        .get_mut("cells")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| anyhow::anyhow!("notebook has no cells array"))?;
    let Some(cell) = cells.first_mut() else {
        bail!("notebook has no cells");
    };
    let object = cell
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("first cell is not an object"))?;
    let replacement = match object.get("source") {
        Some(Value::Array(_)) => Value::Array(split_source_lines(source)),
        _ => Value::String(source.to_string()),
    };
    object.insert("source".to_string(), replacement);
    Ok(())
}

/// Split into the nbformat list-of-lines convention: every element keeps its
/// trailing newline except the last.
pub fn split_source_lines(source: &str) -> Vec<Value> {
    let mut lines = Vec::new();
    let mut rest = source;
    while let Some(offset) = rest.find('\n') {
        lines.push(Value::String(rest[..=offset].to_string()));
        rest = &rest[offset + 1..];
    }
    if !rest.is_empty() {
        lines.push(Value::String(rest.to_string()));
    }
    lines
}

/// Persist a notebook atomically: serialize to a temp file in the target
/// directory, flush, then rename over the original. A crash mid-write leaves
/// either the old file or the new one, never a torn header.
pub fn write_notebook(path: &Path, notebook: &Value) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("notebook path has no parent: {}", path.display()))?;
    let rendered = serde_json::to_string_pretty(notebook)
        .with_context(|| format!("failed to serialize notebook for {}", path.display()))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(rendered.as_bytes())
        .and_then(|_| temp.write_all(b"\n"))
        .and_then(|_| temp.flush())
        .with_context(|| format!("failed to write notebook temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush notebook temp file for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Minimal nbformat-v4 notebook with the given cells.
pub fn new_notebook(cells: Vec<Value>) -> Value {
    json!({
        "cells": cells,
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5,
    })
}

pub fn raw_cell(source: &str) -> Value {
    json!({
        "cell_type": "raw",
        "metadata": {},
        "source": split_source_lines(source),
    })
}

pub fn markdown_cell(source: &str) -> Value {
    json!({
        "cell_type": "markdown",
        "metadata": {},
        "source": split_source_lines(source),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::{
        first_raw_source, join_source, load_notebook, markdown_cell, new_notebook, raw_cell,
        set_first_cell_source, split_source_lines, write_notebook,
    };

    fn fixture() -> Value {
        json!({
            "cells": [
                {
                    "cell_type": "raw",
                    "metadata": {},
                    "source": ["---\n", "title: \"Test\"\n", "---"],
                },
                {
                    "cell_type": "markdown",
                    "metadata": {"tags": ["keep-me"]},
                    "source": ["# Body\n", "text"],
                },
            ],
            "metadata": {"kernelspec": {"name": "python3"}},
            "nbformat": 4,
            "nbformat_minor": 5,
        })
    }

    #[test]
    fn first_raw_source_joins_line_list() {
        let source = first_raw_source(&fixture()).expect("raw source");
        assert_eq!(source, "---\ntitle: \"Test\"\n---");
    }

    #[test]
    fn first_raw_source_accepts_plain_string() {
        let notebook = json!({
            "cells": [{"cell_type": "raw", "source": "---\ndraft: true\n---"}],
        });
        assert_eq!(
            first_raw_source(&notebook).as_deref(),
            Some("---\ndraft: true\n---")
        );
    }

    #[test]
    fn first_raw_source_absent_for_markdown_first_cell() {
        let notebook = json!({
            "cells": [{"cell_type": "markdown", "source": "# Title"}],
        });
        assert_eq!(first_raw_source(&notebook), None);
    }

    #[test]
    fn split_source_keeps_newlines_on_all_but_last() {
        let lines = split_source_lines("a\nb\nc");
        assert_eq!(
            lines,
            vec![
                Value::String("a\n".to_string()),
                Value::String("b\n".to_string()),
                Value::String("c".to_string()),
            ]
        );
        assert_eq!(join_source(&Value::Array(lines)), "a\nb\nc");
    }

    #[test]
    fn set_first_cell_source_preserves_representation() {
        let mut notebook = fixture();
        set_first_cell_source(&mut notebook, "---\ntitle: \"New\"\n---").expect("set source");
        let source = &notebook["cells"][0]["source"];
        assert!(source.is_array());
        assert_eq!(join_source(source), "---\ntitle: \"New\"\n---");

        let mut string_notebook = json!({
            "cells": [{"cell_type": "raw", "source": "old"}],
        });
        set_first_cell_source(&mut string_notebook, "new").expect("set source");
        assert_eq!(string_notebook["cells"][0]["source"], json!("new"));
    }

    #[test]
    fn write_back_leaves_sibling_cells_and_metadata_intact() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("index.ipynb");
        write_notebook(&path, &fixture()).expect("write");

        let mut notebook = load_notebook(&path).expect("load");
        set_first_cell_source(&mut notebook, "---\ntitle: \"Edited\"\ndraft: true\n---")
            .expect("set source");
        write_notebook(&path, &notebook).expect("rewrite");

        let reread = load_notebook(&path).expect("reload");
        assert_eq!(reread["cells"][1], fixture()["cells"][1]);
        assert_eq!(reread["metadata"], fixture()["metadata"]);
        assert_eq!(
            first_raw_source(&reread).as_deref(),
            Some("---\ntitle: \"Edited\"\ndraft: true\n---")
        );
    }

    #[test]
    fn new_notebook_has_nbformat_shape() {
        let notebook = new_notebook(vec![raw_cell("---\n---"), markdown_cell("Summary.")]);
        assert_eq!(notebook["nbformat"], json!(4));
        assert_eq!(notebook["nbformat_minor"], json!(5));
        assert_eq!(notebook["cells"].as_array().map(Vec::len), Some(2));
        assert_eq!(notebook["cells"][0]["cell_type"], json!("raw"));
        assert_eq!(notebook["cells"][1]["cell_type"], json!("markdown"));
    }
}
