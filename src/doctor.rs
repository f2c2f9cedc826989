//! Mechanical repair of fixable validation findings.
//!
//! The repair run is a straight-line state machine: open the archive,
//! validate it, and if anything at Warning or above was found, load every
//! entry into memory, apply the fixers in a fixed order, rewrite the
//! archive, and validate the output. A package that is already clean is
//! returned untouched with its before-report doubling as the after-report.
//!
//! Fixers are Tier 1 only: safe, deterministic, content-preserving. Each
//! one patches the smallest possible region (a single attribute, a single
//! element insertion) rather than re-serializing any document, so
//! everything the author wrote survives byte-for-byte outside the patch.
//!
//! Three container-level problems (mimetype ordering, compression, extra
//! field) are never patched at all: the archive writer holds those
//! invariants by construction, so the run only logs them as fixes when the
//! before-report shows they were present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::archive::{write_archive, Archive, WriteEntry};
use crate::error::EpubError;
use crate::mime;
use crate::package::{parse_container, parse_package, CONTAINER_PATH};
use crate::report::Report;
use crate::resolver::{dir_of, resolve_href};
use crate::validate::{self, ValidationOptions};

/// One applied (or by-construction) fix.
#[derive(Clone, Debug)]
pub struct Fix {
    /// Check id of the finding this fix addresses.
    pub check_id: &'static str,
    /// Human-readable description of what was changed.
    pub description: String,
    /// File that was modified, when the fix is file-scoped.
    pub file: Option<String>,
}

/// Outcome of one repair run.
#[derive(Clone, Debug)]
pub struct RepairOutcome {
    /// Fixes applied, in application order.
    pub fixes: Vec<Fix>,
    /// Validation report of the input.
    pub before: Report,
    /// Validation report of the output (the before-report when nothing
    /// needed fixing).
    pub after: Report,
}

/// Repair `input` and write the result to `output`, defaulting to
/// `<input>.fixed.epub`. The input file is never modified.
pub fn repair_path(
    input: impl AsRef<Path>,
    output: Option<&Path>,
) -> Result<RepairOutcome, EpubError> {
    let input = input.as_ref();
    let output: PathBuf = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let mut name = input.as_os_str().to_os_string();
            name.push(".fixed.epub");
            PathBuf::from(name)
        }
    };

    let archive = Archive::open(input)?;
    let before = validate::validate_archive(&archive, ValidationOptions::default());

    // Nothing at Warning or above: nothing to do.
    if before.is_valid() && before.warning_count() == 0 {
        return Ok(RepairOutcome {
            fixes: Vec::new(),
            before: before.clone(),
            after: before,
        });
    }

    let mut files = FileSet::load(&archive);
    let ctx = FixContext::capture(&files);

    let mut fixes = Vec::new();
    fix_mimetype(&mut files, &mut fixes);
    detect_writer_fixes(&before, &mut fixes);
    fix_modified(&mut files, &ctx, &mut fixes);
    fix_media_types(&mut files, &ctx, &mut fixes);
    fix_manifest_properties(&mut files, &ctx, &mut fixes);
    fix_doctype(&mut files, &ctx, &mut fixes);

    if fixes.is_empty() {
        log::info!("no applicable fixes for {}", input.display());
        return Ok(RepairOutcome {
            fixes,
            before: before.clone(),
            after: before,
        });
    }

    log::info!(
        "applying {} fix(es), writing {}",
        fixes.len(),
        output.display()
    );
    write_archive(&output, &files.into_entries())?;
    let after = validate::validate_path(&output);

    Ok(RepairOutcome { fixes, before, after })
}

/// In-memory copy of every archive entry, in physical order. Entries that
/// cannot be decompressed are carried over as absent (the rewrite drops
/// them; they were unreadable to begin with).
struct FileSet {
    order: Vec<String>,
    map: HashMap<String, Vec<u8>>,
}

impl FileSet {
    fn load(archive: &Archive) -> Self {
        let mut order = Vec::new();
        let mut map = HashMap::new();
        for entry in archive.entries() {
            if entry.is_dir() {
                continue;
            }
            match archive.read(&entry.name) {
                Ok(data) => {
                    order.push(entry.name.clone());
                    map.insert(entry.name.clone(), data);
                }
                Err(e) => log::warn!("dropping unreadable entry {}: {e}", entry.name),
            }
        }
        Self { order, map }
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.map.get(name).map(Vec::as_slice)
    }

    /// Replace an entry's bytes, or append a new entry at the end.
    fn set(&mut self, name: &str, data: Vec<u8>) {
        if !self.map.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.map.insert(name.to_string(), data);
    }

    fn into_entries(mut self) -> Vec<WriteEntry> {
        self.order
            .iter()
            .filter_map(|name| {
                let data = self.map.remove(name)?;
                Some(WriteEntry {
                    name: name.clone(),
                    data,
                    stored: false,
                })
            })
            .collect()
    }
}

/// Immutable snapshot of the package structure, captured once before any
/// fixer runs. Fixers patch bytes in the [`FileSet`] but read structure
/// only from here, so earlier patches cannot skew later decisions.
struct FixContext {
    package: Option<PackageSnapshot>,
}

struct PackageSnapshot {
    opf_path: String,
    is_v3: bool,
    modified_present: bool,
    items: Vec<ItemRow>,
}

struct ItemRow {
    id: String,
    href: String,
    media_type: String,
    /// Resolved archive path of the item.
    path: String,
    is_nav: bool,
    properties: Vec<String>,
}

impl FixContext {
    fn capture(files: &FileSet) -> Self {
        let package = (|| {
            let container = parse_container(files.get(CONTAINER_PATH)?).ok()?;
            let opf_path = container.rootfile_path;
            let doc = parse_package(files.get(&opf_path)?).ok()?;
            let opf_dir = dir_of(&opf_path).to_string();
            let items = doc
                .manifest
                .iter()
                .map(|item| ItemRow {
                    id: item.id.clone(),
                    href: item.href.clone(),
                    media_type: item.media_type.clone(),
                    path: resolve_href(&opf_dir, &item.href).path,
                    is_nav: item.has_property("nav"),
                    properties: item.properties.clone(),
                })
                .collect();
            Some(PackageSnapshot {
                opf_path,
                is_v3: doc.is_v3,
                modified_present: doc.metadata.modified.is_some(),
                items,
            })
        })();
        Self { package }
    }
}

// ------------------------------------------------------------------ fixers

/// Restore the mimetype entry's presence and content (`OCF-001`,
/// `OCF-003`). Ordering, compression and extra field belong to the writer.
fn fix_mimetype(files: &mut FileSet, fixes: &mut Vec<Fix>) {
    let expected = mime::EPUB_MIMETYPE.as_bytes();
    match files.get("mimetype") {
        None => {
            files.set("mimetype", expected.to_vec());
            fixes.push(Fix {
                check_id: "OCF-001",
                description: "Added missing mimetype file".to_string(),
                file: None,
            });
        }
        Some(current) if current != expected => {
            let was = String::from_utf8_lossy(current).trim().to_string();
            files.set("mimetype", expected.to_vec());
            fixes.push(Fix {
                check_id: "OCF-003",
                description: format!(
                    "Fixed mimetype content from '{was}' to '{}'",
                    mime::EPUB_MIMETYPE
                ),
                file: None,
            });
        }
        Some(_) => {}
    }
}

/// Log container-structure problems the rewrite resolves without touching
/// any bytes. The before-report is the only evidence they existed.
fn detect_writer_fixes(before: &Report, fixes: &mut Vec<Fix>) {
    for msg in before.messages() {
        let description = match msg.check_id {
            "OCF-002" => "Reordered mimetype as first ZIP entry",
            "OCF-004" => "Removed extra field from mimetype ZIP entry",
            "OCF-005" => "Changed mimetype from compressed to stored",
            _ => continue,
        };
        fixes.push(Fix {
            check_id: msg.check_id,
            description: description.to_string(),
            file: None,
        });
    }
}

/// Insert a `dcterms:modified` meta before `</metadata>` (`OPF-004`).
/// EPUB 3 only; the closing tag is matched with or without a namespace
/// prefix.
fn fix_modified(files: &mut FileSet, ctx: &FixContext, fixes: &mut Vec<Fix>) {
    let Some(pkg) = &ctx.package else { return };
    if !pkg.is_v3 || pkg.modified_present {
        return;
    }
    let Some(opf) = files.get(&pkg.opf_path) else { return };
    let opf = String::from_utf8_lossy(opf).into_owned();

    let Some(close) = metadata_close_offset(&opf) else { return };
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let insertion = format!("    <meta property=\"dcterms:modified\">{now}</meta>\n  ");
    let patched = format!("{}{}{}", &opf[..close], insertion, &opf[close..]);
    files.set(&pkg.opf_path, patched.into_bytes());

    fixes.push(Fix {
        check_id: "OPF-004",
        description: format!("Added dcterms:modified with value '{now}'"),
        file: Some(pkg.opf_path.clone()),
    });
}

fn metadata_close_offset(opf: &str) -> Option<usize> {
    if let Some(idx) = opf.find("</metadata>") {
        return Some(idx);
    }
    let re = Regex::new(r"</[A-Za-z][\w.-]*:metadata>").ok()?;
    re.find(opf).map(|m| m.start())
}

/// Correct declared media types that contradict the actual content
/// (`OPF-024`). Image bytes are trusted over extensions; for everything
/// else the extension decides. Alias-equivalent declarations are left
/// alone, and nothing is changed when neither signal is confident.
fn fix_media_types(files: &mut FileSet, ctx: &FixContext, fixes: &mut Vec<Fix>) {
    let Some(pkg) = &ctx.package else { return };
    let opf_path = pkg.opf_path.clone();

    for item in &pkg.items {
        if item.href.is_empty() || item.media_type.is_empty() {
            continue;
        }

        let expected_by_ext = mime::extension_of(&item.href).and_then(|e| mime::from_extension(&e));

        let detected_by_magic = if mime::is_raster_image(&item.media_type) {
            files.get(&item.path).and_then(mime::sniff_image)
        } else {
            None
        };

        let correct = match detected_by_magic {
            Some(detected) if !mime::equivalent(detected, &item.media_type) => Some(detected),
            Some(_) => None,
            None => match expected_by_ext {
                // Image-vs-image disagreements are magic-byte territory;
                // an extension alone is not enough to override.
                Some(expected)
                    if !mime::equivalent(expected, &item.media_type)
                        && !(item.media_type.starts_with("image/")
                            && expected.starts_with("image/")) =>
                {
                    Some(expected)
                }
                _ => None,
            },
        };

        let Some(correct) = correct else { continue };
        let Some(opf) = files.get(&opf_path) else { return };
        let opf = String::from_utf8_lossy(opf).into_owned();
        let Some(patched) = patch_item_media_type(&opf, &item.href, &item.media_type, correct)
        else {
            continue;
        };
        files.set(&opf_path, patched.into_bytes());
        fixes.push(Fix {
            check_id: "OPF-024",
            description: format!(
                "Fixed media-type for '{}' from '{}' to '{correct}'",
                item.href, item.media_type
            ),
            file: Some(opf_path.clone()),
        });
    }
}

/// Append missing `scripted`/`svg`/`mathml` property tokens to manifest
/// items whose content uses those features (`HTM-005/006/007`). EPUB 3
/// XHTML items only; the navigation document is exempt.
fn fix_manifest_properties(files: &mut FileSet, ctx: &FixContext, fixes: &mut Vec<Fix>) {
    let Some(pkg) = &ctx.package else { return };
    if !pkg.is_v3 {
        return;
    }
    let opf_path = pkg.opf_path.clone();

    for item in &pkg.items {
        if item.media_type != mime::XHTML || item.is_nav {
            continue;
        }
        let Some(data) = files.get(&item.path) else { continue };
        let features = validate::scan_content_features(data);

        let mut missing: Vec<(&'static str, &'static str)> = Vec::new();
        if features.has_script && !item.properties.iter().any(|p| p == "scripted") {
            missing.push(("scripted", "HTM-005"));
        }
        if features.has_svg && !item.properties.iter().any(|p| p == "svg") {
            missing.push(("svg", "HTM-006"));
        }
        if features.has_mathml && !item.properties.iter().any(|p| p == "mathml") {
            missing.push(("mathml", "HTM-007"));
        }
        if missing.is_empty() {
            continue;
        }

        let mut tokens = item.properties.clone();
        tokens.extend(missing.iter().map(|(t, _)| t.to_string()));
        let new_props = tokens.join(" ");

        let Some(opf) = files.get(&opf_path) else { return };
        let opf = String::from_utf8_lossy(opf).into_owned();
        let Some(patched) = patch_item_properties(&opf, &item.id, &new_props) else {
            continue;
        };
        files.set(&opf_path, patched.into_bytes());

        for (token, check_id) in missing {
            fixes.push(Fix {
                check_id,
                description: format!("Added '{token}' property to manifest item '{}'", item.id),
                file: Some(opf_path.clone()),
            });
        }
    }
}

/// Replace obsolete XHTML/DTD doctypes with `<!DOCTYPE html>` in EPUB 3
/// content documents (`HTM-010`).
fn fix_doctype(files: &mut FileSet, ctx: &FixContext, fixes: &mut Vec<Fix>) {
    let Some(pkg) = &ctx.package else { return };
    if !pkg.is_v3 {
        return;
    }
    let Ok(doctype_re) = Regex::new(r"(?i)<!DOCTYPE[^>]*>") else { return };

    for item in &pkg.items {
        if item.media_type != mime::XHTML {
            continue;
        }
        let Some(data) = files.get(&item.path) else { continue };
        let content = String::from_utf8_lossy(data).into_owned();
        let Some(m) = doctype_re.find(&content) else { continue };

        let upper = m.as_str().to_ascii_uppercase();
        if !upper.contains("XHTML") && !upper.contains("DTD") {
            continue;
        }
        let patched = doctype_re.replace_all(&content, "<!DOCTYPE html>");
        files.set(&item.path, patched.into_owned().into_bytes());
        fixes.push(Fix {
            check_id: "HTM-010",
            description: "Replaced non-HTML5 DOCTYPE with <!DOCTYPE html>".to_string(),
            file: Some(item.path.clone()),
        });
    }
}

// ----------------------------------------------------------- OPF patching

/// Rewrite the `media-type` attribute of the single `<item>` element whose
/// href matches. Returns `None` when no unambiguous element is found.
fn patch_item_media_type(opf: &str, href: &str, old: &str, new: &str) -> Option<String> {
    let item_re = Regex::new(&format!(
        r#"<item\s[^>]*href=["']{}["'][^>]*/?>"#,
        regex::escape(href)
    ))
    .ok()?;
    let element = item_re.find(opf)?.as_str();

    let attr_re = Regex::new(&format!(r#"media-type=["']{}["']"#, regex::escape(old))).ok()?;
    if !attr_re.is_match(element) {
        return None;
    }
    let patched = attr_re.replace(element, format!(r#"media-type="{new}""#));
    Some(opf.replacen(element, &patched, 1))
}

/// Replace (or insert) the `properties` attribute of the single `<item>`
/// element with the given id.
fn patch_item_properties(opf: &str, id: &str, new_props: &str) -> Option<String> {
    let item_re = Regex::new(&format!(
        r#"<item\s[^>]*id=["']{}["'][^>]*/?>"#,
        regex::escape(id)
    ))
    .ok()?;
    let element = item_re.find(opf)?.as_str();

    let attr_re = Regex::new(r#"properties=["'][^"']*["']"#).ok()?;
    let patched = if attr_re.is_match(element) {
        attr_re
            .replace(element, format!(r#"properties="{new_props}""#))
            .into_owned()
    } else if let Some(stripped) = element.strip_suffix("/>") {
        format!(r#"{stripped} properties="{new_props}"/>"#)
    } else {
        let stripped = element.strip_suffix('>')?;
        format!(r#"{stripped} properties="{new_props}">"#)
    };
    Some(opf.replacen(element, &patched, 1))
}
