//! Reading annotation files and filter arguments.

use std::path::Path;

use anyhow::Context;
use clio_core::table::AnnotationInput;
use serde_json::Value;

/// Load an annotation file: a list of records, a single record, or a
/// column table. `-` reads stdin.
pub fn load_input(path: &Path) -> anyhow::Result<AnnotationInput> {
    let contents = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    parse_input(&contents).with_context(|| format!("Invalid annotation input in {}", path.display()))
}

pub fn parse_input(contents: &str) -> anyhow::Result<AnnotationInput> {
    serde_json::from_str(contents).context(
        "expected a JSON list of records, a single record, or {\"columns\": [...], \"rows\": [...]}",
    )
}

/// Parse `field=value`. The value is read as JSON when it parses, so
/// `proofread=true` filters on a boolean; otherwise it is a string.
pub fn parse_filter(arg: &str) -> Result<(String, Value), String> {
    let (field, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("filter \"{arg}\" must look like field=value"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("filter \"{arg}\" has no field name"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}
