use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RuleError};
use crate::rule::{Rule, RuleSet};

/// Loads a rule set from a JSON/YAML file, or from every `.json`, `.yaml`
/// and `.yml` file of a directory in file-name order.
///
/// A file may hold a full rule-set document, a list of rules, or a single
/// rule. Rules keep their file order; nothing is sorted or deduplicated.
pub fn load_rule_set(path: impl AsRef<Path>) -> Result<RuleSet> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RuleError::MissingPath(path.display().to_string()));
    }

    if path.is_dir() {
        load_from_directory(path)
    } else {
        load_from_file(path)
    }
}

fn load_from_directory(path: &Path) -> Result<RuleSet> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(path).map_err(|err| RuleError::from_io(path, err))? {
        let entry = entry.map_err(|err| RuleError::from_io(path, err))?;
        let file_type = entry
            .file_type()
            .map_err(|err| RuleError::from_io(entry.path(), err))?;
        if file_type.is_dir() {
            continue;
        }

        if let Some(ext) = entry.path().extension().and_then(|value| value.to_str()) {
            if matches!(ext, "json" | "yaml" | "yml") {
                files.push(entry.path());
            }
        }
    }
    files.sort();

    let mut merged: Option<RuleSet> = None;
    for file in files {
        let loaded = load_from_file(&file)?;
        match merged.as_mut() {
            None => merged = Some(loaded),
            Some(set) => set.rules.extend(loaded.rules),
        }
    }
    Ok(merged.unwrap_or_default())
}

fn load_from_file(path: &Path) -> Result<RuleSet> {
    let raw = fs::read_to_string(path).map_err(|err| RuleError::from_io(path, err))?;
    parse_rule_set(&raw, path)
}

/// Parses rule-set text. YAML is a superset of JSON, so one parser covers
/// both formats.
pub fn parse_rule_set(raw: &str, path: impl Into<PathBuf>) -> Result<RuleSet> {
    let mut attempts = Vec::new();

    match serde_yaml::from_str::<RuleSet>(raw) {
        Ok(doc) if !doc.rules.is_empty() || looks_like_document(raw) => return Ok(doc),
        Ok(_) => {}
        Err(err) => attempts.push(format!("rule set document ({err})")),
    }

    match serde_yaml::from_str::<Vec<Rule>>(raw) {
        Ok(list) => return Ok(RuleSet::new(list)),
        Err(err) => attempts.push(format!("list ({err})")),
    }

    match serde_yaml::from_str::<Rule>(raw) {
        Ok(rule) => return Ok(RuleSet::new(vec![rule])),
        Err(err) => attempts.push(format!("single rule ({err})")),
    }

    let message = format!("unable to parse rules using {} formats", attempts.join(", "));
    Err(RuleError::parse_error(path, message))
}

/// A document with an explicit `rules` key is a rule set even when empty.
fn looks_like_document(raw: &str) -> bool {
    serde_yaml::from_str::<serde_yaml::Mapping>(raw)
        .map(|mapping| mapping.contains_key("rules"))
        .unwrap_or(false)
}
