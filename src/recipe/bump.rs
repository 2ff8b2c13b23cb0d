// src/recipe/bump.rs

//! Build number bumping
//!
//! Rewrites `build.number` in place so comments and layout of the recipe file
//! survive. Used when a recipe must be rebuilt without a version change.

use crate::error::{Error, Result};
use crate::recipe::format::RECIPE_FILE;
use crate::recipe::parser::parse_recipe;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\s*([A-Za-z0-9_.-]+)\s*\]\s*(#.*)?$").unwrap());
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*number\s*=\s*)(\d+)(.*)$").unwrap());

/// Increment the build number of the recipe in `dir`
///
/// Returns the `(old, new)` build numbers.
pub fn bump_build_number(dir: &Path) -> Result<(u32, u32)> {
    let path = dir.join(RECIPE_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;

    let old = parse_recipe(&content)?.build.number;
    let new = old
        .checked_add(1)
        .ok_or_else(|| Error::ParseError(format!("Build number overflow in {}", path.display())))?;

    let updated = rewrite_build_number(&content, new);
    parse_recipe(&updated)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), &updated)?;
    std::fs::set_permissions(tmp.path(), std::fs::metadata(&path)?.permissions())?;
    tmp.persist(&path)
        .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;

    info!("Bumped {} build number {} -> {}", dir.display(), old, new);
    Ok((old, new))
}

fn rewrite_build_number(content: &str, new: u32) -> String {
    let mut out = Vec::new();
    let mut section: Option<String> = None;
    let mut saw_build = false;
    let mut written = false;

    for line in content.lines() {
        if let Some(caps) = SECTION_RE.captures(line) {
            // Leaving [build] without a number line: add one before the next header
            if section.as_deref() == Some("build") && !written {
                out.push(format!("number = {}", new));
                written = true;
            }
            section = Some(caps[1].to_string());
            if section.as_deref() == Some("build") {
                saw_build = true;
            }
            out.push(line.to_string());
            continue;
        }

        if section.as_deref() == Some("build")
            && !written
            && let Some(caps) = NUMBER_RE.captures(line)
        {
            out.push(format!("{}{}{}", &caps[1], new, &caps[3]));
            written = true;
            continue;
        }
        out.push(line.to_string());
    }

    if !written {
        if !saw_build {
            out.push(String::new());
            out.push("[build]".to_string());
        }
        out.push(format!("number = {}", new));
    }

    let mut result = out.join("\n");
    result.push('\n');
    result
}
