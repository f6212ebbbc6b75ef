//! Collects a template and everything it pulls in through `include`,
//! `extends` and `import`, reading only from inside the template directory.

use std::{
    collections::{BTreeSet, VecDeque},
    fs, io,
    path::Path,
};

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::RenderError;
use crate::infra::fs::resolve_within;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*(?:include|extends|import)\s+["']([^"']+)["']([^%]*)-?%\}"#)
        .expect("template reference pattern must compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reference {
    pub name: String,
    pub optional: bool,
}

/// Template names referenced by `source`, in order of appearance.
pub(crate) fn references(source: &str) -> Vec<Reference> {
    REFERENCE
        .captures_iter(source)
        .map(|captures| Reference {
            name: captures[1].to_string(),
            optional: captures[2].contains("ignore missing"),
        })
        .collect()
}

/// Load `entry` and its transitive references as `(name, source)` pairs, entry first.
pub(crate) fn load_template_set(
    root: &Path,
    entry: &str,
) -> Result<Vec<(String, String)>, RenderError> {
    let mut loaded = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([(entry.to_string(), entry.to_string(), false)]);
    seen.insert(entry.to_string());

    while let Some((name, referrer, optional)) = queue.pop_front() {
        let path = resolve_within(root, &name).map_err(|_| RenderError::Escape {
            reference: name.clone(),
            name: referrer.clone(),
        })?;

        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) if optional && err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(RenderError::Load {
                    name,
                    message: err.to_string(),
                });
            }
        };

        for reference in references(&source) {
            if seen.insert(reference.name.clone()) {
                queue.push_back((reference.name, name.clone(), reference.optional));
            }
        }
        loaded.push((name, source));
    }

    Ok(loaded)
}
