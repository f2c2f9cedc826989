//! Cross-reference resolution between the package document and the archive.
//!
//! Hrefs are resolved against the referencing document's directory,
//! percent-decoded, and stripped of query/fragment before existence checks;
//! the fragment is retained for internal-link validation. Lookup tables are
//! built once per run. Fallback chains are walked with a visited set, never
//! recursion, because the input is untrusted.

use std::collections::{HashMap, HashSet};

use crate::archive::Archive;
use crate::package::{ManifestItem, PackageDoc};

/// A resolved reference: archive path plus retained fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRef {
    /// Normalized archive path (query/fragment stripped, percent-decoded).
    pub path: String,
    /// Fragment identifier, when the href carried one.
    pub fragment: Option<String>,
}

/// Directory part of an archive path, with trailing slash ("" for root).
pub fn dir_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Whether an href points outside the container (remote resource).
pub fn is_remote(href: &str) -> bool {
    href.starts_with("http://")
        || href.starts_with("https://")
        || href.starts_with("data:")
        || href.starts_with("file:")
}

/// Resolve `href` relative to `base_dir` (a `dir_of` result). A
/// fragment-only href (`#id`) yields an empty path: it targets the
/// referencing document itself.
pub fn resolve_href(base_dir: &str, href: &str) -> ResolvedRef {
    // Fragment first, then query; "a.xhtml?x=1#f" keeps fragment "f".
    let (rest, fragment) = match href.split_once('#') {
        Some((path, frag)) => (path, Some(frag.to_string())),
        None => (href, None),
    };
    let rest = rest.split_once('?').map_or(rest, |(path, _)| path);
    if rest.is_empty() {
        return ResolvedRef {
            path: String::new(),
            fragment,
        };
    }

    let decoded = match urlencoding::decode(rest) {
        Ok(d) => d.into_owned(),
        // Malformed percent escapes: fall back to the raw text so the
        // existence check still fails on the literal name.
        Err(_) => rest.to_string(),
    };

    let joined = if decoded.starts_with('/') {
        decoded.trim_start_matches('/').to_string()
    } else {
        format!("{base_dir}{decoded}")
    };

    ResolvedRef {
        path: normalize(&joined),
        fragment,
    }
}

/// Collapse `.` and `..` path segments.
fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(8);
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// One-run lookup tables over (model, archive).
pub struct Resolver<'a> {
    archive: &'a Archive,
    doc: &'a PackageDoc,
    opf_path: &'a str,
    opf_dir: String,
    by_id: HashMap<&'a str, &'a ManifestItem>,
    by_path: HashMap<String, &'a ManifestItem>,
}

impl<'a> Resolver<'a> {
    /// Build lookup tables for one validation run.
    pub fn new(archive: &'a Archive, doc: &'a PackageDoc, opf_path: &'a str) -> Self {
        let opf_dir = dir_of(opf_path).to_string();
        let mut by_id = HashMap::with_capacity(doc.manifest.len());
        let mut by_path = HashMap::with_capacity(doc.manifest.len());
        for item in &doc.manifest {
            // First declaration wins; duplicates are flagged by the
            // package phase, not silently remapped here.
            by_id.entry(item.id.as_str()).or_insert(item);
            if !item.href.is_empty() && !is_remote(&item.href) {
                let resolved = resolve_href(&opf_dir, &item.href);
                by_path.entry(resolved.path).or_insert(item);
            }
        }
        Self {
            archive,
            doc,
            opf_path,
            opf_dir,
            by_id,
            by_path,
        }
    }

    /// Directory of the package document, trailing slash included.
    pub fn opf_dir(&self) -> &str {
        &self.opf_dir
    }

    /// Manifest item by id.
    pub fn item_by_id(&self, id: &str) -> Option<&'a ManifestItem> {
        self.by_id.get(id).copied()
    }

    /// Manifest item by resolved archive path.
    pub fn item_by_path(&self, path: &str) -> Option<&'a ManifestItem> {
        self.by_path.get(path).copied()
    }

    /// Resolve a manifest item's href to its archive path.
    pub fn item_path(&self, item: &ManifestItem) -> String {
        resolve_href(&self.opf_dir, &item.href).path
    }

    /// Manifest items whose resolved target does not exist in the archive.
    /// Remote hrefs are not existence-checked.
    pub fn missing_targets(&self) -> Vec<(&'a ManifestItem, String)> {
        let mut out = Vec::new();
        for item in &self.doc.manifest {
            if item.href.is_empty() || is_remote(&item.href) {
                continue;
            }
            let path = self.item_path(item);
            if !path.is_empty() && !self.archive.has(&path) {
                out.push((item, path));
            }
        }
        out
    }

    /// Archive entries declared in no manifest href. Reserved names
    /// (`mimetype`, everything under `META-INF/`, the package document
    /// itself) and directory markers are exempt.
    pub fn unmanifested(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in self.archive.entries() {
            let name = entry.name.as_str();
            if entry.is_dir()
                || name == "mimetype"
                || name == self.opf_path
                || name.starts_with("META-INF/")
            {
                continue;
            }
            if !self.by_path.contains_key(name) {
                out.push(name.to_string());
            }
        }
        out
    }

    /// Fallback ids that reference no manifest item.
    pub fn dangling_fallbacks(&self) -> Vec<(&'a ManifestItem, &'a str)> {
        self.doc
            .manifest
            .iter()
            .filter_map(|item| {
                let fb = item.fallback.as_deref()?;
                self.item_by_id(fb).is_none().then_some((item, fb))
            })
            .collect()
    }

    /// First cycle found in the fallback-id graph, as the full id cycle
    /// (`a -> b -> a` reported as `["a", "b", "a"]`). Bounded walk with a
    /// visited set; no recursion.
    pub fn fallback_cycle(&self) -> Option<Vec<String>> {
        for start in &self.doc.manifest {
            if start.fallback.is_none() {
                continue;
            }
            let mut visited: HashSet<&str> = HashSet::new();
            let mut chain: Vec<&str> = Vec::new();
            let mut current: &ManifestItem = start;
            loop {
                if !visited.insert(current.id.as_str()) {
                    // Trim the chain to the cycle proper and close it.
                    let pos = chain.iter().position(|&id| id == current.id)?;
                    let mut cycle: Vec<String> =
                        chain[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(current.id.clone());
                    return Some(cycle);
                }
                chain.push(current.id.as_str());
                match current.fallback.as_deref().and_then(|id| self.item_by_id(id)) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        None
    }
}
