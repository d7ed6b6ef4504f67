//! `$variable` substitution.
//!
//! Placeholders are `$name` or `${name}` where `name` matches
//! `[A-Za-z_][A-Za-z0-9_]*`; `$$` is a literal dollar sign. A `$` followed by
//! anything else is copied through unchanged. Values are inserted verbatim,
//! without quoting.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Variable name to value.
pub type Vars = BTreeMap<String, String>;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("valid regex")
    })
}

fn name_of<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str())
}

/// Names of all variables referenced by `text`, in order of first use.
#[must_use]
pub fn placeholders(text: &str) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    placeholder_regex()
        .captures_iter(text)
        .filter_map(|caps| name_of(&caps))
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Whether `text` references any of `names`.
#[must_use]
pub fn references_any(text: &str, names: &BTreeSet<&str>) -> bool {
    placeholders(text).iter().any(|name| names.contains(name))
}

/// Replace every placeholder in `text` with its value from `vars`.
///
/// # Errors
/// Returns the set of referenced names that have no value. Nothing is
/// substituted partially on error.
pub fn substitute(text: &str, vars: &Vars) -> Result<String, BTreeSet<String>> {
    let mut missing = BTreeSet::new();

    let rendered = placeholder_regex().replace_all(text, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        match name_of(caps) {
            Some(name) => match vars.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.insert(name.to_string());
                    String::new()
                }
            },
            None => String::new(),
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(missing)
    }
}

/// Substitute a multi-line template, leaving out lines that reference any of
/// `omit`.
///
/// Used to make proxy and DNS directives inert when those values are unset.
pub fn substitute_lines(
    text: &str,
    vars: &Vars,
    omit: &BTreeSet<&str>,
) -> Result<String, BTreeSet<String>> {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !references_any(line, omit))
        .collect();

    let mut rendered = substitute(&kept.join("\n"), vars)?;
    if text.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}
