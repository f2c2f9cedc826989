//! Multi-phase EPUB validation.
//!
//! Phases run in a fixed order and never gate each other, with two fatal
//! boundaries: an unreadable archive (`PKG-000`) and an unlocatable or
//! unparsable package document (`OPF-001`). Either emits a single Fatal
//! finding and skips everything after it. Every other problem is a
//! non-aborting finding; the pipeline always completes the applicable
//! phases and returns a full [`Report`].
//!
//! Phase order: container, package/metadata, cross-reference, navigation,
//! encoding, content markup, stylesheet, fixed-layout, media,
//! legacy-navigation, accessibility (opt-in).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::archive::{Archive, METHOD_STORED};
use crate::mime;
use crate::navigation::{self, flatten, max_depth};
use crate::package::{parse_container, parse_package, PackageDoc, CONTAINER_PATH};
use crate::report::{Report, Severity};
use crate::resolver::{dir_of, is_remote, resolve_href, Resolver};

/// Validation behavior switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationOptions {
    /// Enable checks stricter than the reference checker: compressed
    /// mimetype (`OCF-005`) and unmanifested archive entries (`RSC-002`).
    pub strict: bool,
    /// Enable opt-in accessibility best-practice checks (`ACC-*`).
    pub accessibility: bool,
}

/// Validate an EPUB file on disk with default options.
pub fn validate_path(path: impl AsRef<Path>) -> Report {
    validate_path_with_options(path, ValidationOptions::default())
}

/// Validate an EPUB file on disk.
pub fn validate_path_with_options(path: impl AsRef<Path>, opts: ValidationOptions) -> Report {
    run(Archive::open(path), opts)
}

/// Validate raw EPUB bytes (e.g. from an upload) with default options.
pub fn validate_bytes(data: Vec<u8>) -> Report {
    validate_bytes_with_options(data, ValidationOptions::default())
}

/// Validate raw EPUB bytes.
pub fn validate_bytes_with_options(data: Vec<u8>, opts: ValidationOptions) -> Report {
    run(Archive::from_bytes(data).map_err(Into::into), opts)
}

/// Validate an already-open archive snapshot.
pub fn validate_archive(archive: &Archive, opts: ValidationOptions) -> Report {
    let mut report = Report::new();
    pipeline(archive, &opts, &mut report);
    report
}

fn run(archive: Result<Archive, crate::error::EpubError>, opts: ValidationOptions) -> Report {
    let mut report = Report::new();
    let archive = match archive {
        Ok(archive) => archive,
        Err(e) => {
            report.add(Severity::Fatal, "PKG-000", format!("could not open EPUB: {e}"));
            return report;
        }
    };
    pipeline(&archive, &opts, &mut report);
    report
}

fn pipeline(archive: &Archive, opts: &ValidationOptions, report: &mut Report) {
    // Phase 1: OCF container.
    let rootfile = check_container(archive, opts, report);

    // Phase 2: package document. Fatal boundary: no model, no later phase
    // has anything to work on.
    let Some(opf_path) = rootfile else {
        report.add(
            Severity::Fatal,
            "OPF-001",
            "package document could not be located",
        );
        return;
    };
    let opf_bytes = match archive.read(&opf_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            report.add_in_file(
                Severity::Fatal,
                "OPF-001",
                format!("package document unreadable: {e}"),
                opf_path,
            );
            return;
        }
    };
    let doc = match parse_package(&opf_bytes) {
        Ok(doc) => doc,
        Err(e) => {
            report.add_in_file(Severity::Fatal, "OPF-001", e.to_string(), opf_path);
            return;
        }
    };
    log::debug!(
        "parsed package document {} (version {}, {} manifest items)",
        opf_path,
        doc.version,
        doc.manifest.len()
    );

    check_package(&doc, report);

    let resolver = Resolver::new(archive, &doc, &opf_path);

    // Phase 3: cross-references.
    check_references(&resolver, opts, report);

    // Phase 4: EPUB 3 navigation document.
    check_navigation(archive, &doc, &resolver, report);

    // Phase 5: encoding, before content so bad files get skipped there.
    let bad_encoding = check_encoding(archive, &doc, &resolver, report);

    // Phase 6: content documents.
    check_content(archive, &doc, &resolver, &bad_encoding, report);

    // Phase 7: stylesheets.
    check_css(archive, &doc, &resolver, report);

    // Phase 8: fixed layout.
    check_fixed_layout(archive, &doc, &resolver, &bad_encoding, report);

    // Phase 9: media types.
    check_media(archive, &doc, &resolver, report);

    // Phase 10: EPUB 2 legacy navigation.
    check_legacy_nav(archive, &doc, &resolver, report);

    // Phase 11: accessibility (opt-in).
    if opts.accessibility {
        check_accessibility(archive, &doc, &resolver, &bad_encoding, report);
    }
}

// ---------------------------------------------------------------- container

fn check_container(
    archive: &Archive,
    opts: &ValidationOptions,
    report: &mut Report,
) -> Option<String> {
    match archive.entry("mimetype") {
        None => {
            report.add(Severity::Error, "OCF-001", "missing mimetype file");
        }
        Some(entry) => {
            if archive.entries().first().map(|e| e.name.as_str()) != Some("mimetype") {
                report.add(
                    Severity::Error,
                    "OCF-002",
                    "mimetype is not the first entry in the archive",
                );
            }
            if entry.local_extra_len > 0 {
                report.add(
                    Severity::Error,
                    "OCF-004",
                    "mimetype entry has an extra field in its local header",
                );
            }
            if opts.strict && entry.method != METHOD_STORED {
                report.add(
                    Severity::Error,
                    "OCF-005",
                    "mimetype entry is compressed; it must be stored",
                );
            }
            match archive.read("mimetype") {
                Ok(content) if content != mime::EPUB_MIMETYPE.as_bytes() => {
                    report.add(
                        Severity::Error,
                        "OCF-003",
                        format!(
                            "mimetype content is '{}', expected '{}'",
                            String::from_utf8_lossy(&content).trim(),
                            mime::EPUB_MIMETYPE
                        ),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    report.add(
                        Severity::Error,
                        "OCF-003",
                        format!("mimetype entry unreadable: {e}"),
                    );
                }
            }
        }
    }

    if !archive.has(CONTAINER_PATH) {
        report.add(
            Severity::Error,
            "OCF-006",
            format!("missing {CONTAINER_PATH}"),
        );
        return None;
    }
    let bytes = match archive.read(CONTAINER_PATH) {
        Ok(bytes) => bytes,
        Err(e) => {
            report.add_in_file(
                Severity::Error,
                "OCF-007",
                format!("container descriptor unreadable: {e}"),
                CONTAINER_PATH,
            );
            return None;
        }
    };
    match parse_container(&bytes) {
        Ok(container) => Some(container.rootfile_path),
        Err(e) => {
            report.add_in_file(Severity::Error, "OCF-007", e.to_string(), CONTAINER_PATH);
            None
        }
    }
}

// ------------------------------------------------------------------ package

/// Declarative catalog of model-level predicates: a row fires its finding
/// when the predicate holds.
struct ModelCheck {
    check_id: &'static str,
    severity: Severity,
    message: &'static str,
    applies: fn(&PackageDoc) -> bool,
}

const MODEL_CHECKS: &[ModelCheck] = &[
    ModelCheck {
        check_id: "OPF-002",
        severity: Severity::Error,
        message: "missing dc:identifier metadata",
        applies: |doc| doc.metadata.identifiers.iter().all(|i| i.value.trim().is_empty()),
    },
    ModelCheck {
        check_id: "OPF-002",
        severity: Severity::Error,
        message: "missing dc:title metadata",
        applies: |doc| doc.metadata.titles.iter().all(|t| t.value.trim().is_empty()),
    },
    ModelCheck {
        check_id: "OPF-002",
        severity: Severity::Error,
        message: "missing dc:language metadata",
        applies: |doc| doc.metadata.languages.iter().all(|l| l.trim().is_empty()),
    },
    ModelCheck {
        check_id: "OPF-003",
        severity: Severity::Error,
        message: "unique-identifier does not resolve to a dc:identifier",
        applies: |doc| match doc.unique_identifier.as_deref() {
            None => !doc.metadata.identifiers.is_empty(),
            Some(uid) => !doc
                .metadata
                .identifiers
                .iter()
                .any(|i| i.id.as_deref() == Some(uid)),
        },
    },
    ModelCheck {
        check_id: "OPF-004",
        severity: Severity::Error,
        message: "missing dcterms:modified metadata",
        applies: |doc| doc.is_v3 && doc.metadata.modified.is_none(),
    },
    ModelCheck {
        check_id: "OPF-006",
        severity: Severity::Error,
        message: "EPUB 3 requires exactly one manifest item with the 'nav' property",
        applies: |doc| {
            doc.is_v3
                && doc
                    .manifest
                    .iter()
                    .filter(|i| i.has_property("nav"))
                    .count()
                    != 1
        },
    },
    ModelCheck {
        check_id: "OPF-007",
        severity: Severity::Error,
        message: "spine contains no itemref",
        applies: |doc| doc.spine.itemrefs.is_empty(),
    },
];

fn check_package(doc: &PackageDoc, report: &mut Report) {
    for check in MODEL_CHECKS {
        if (check.applies)(doc) {
            report.add(check.severity, check.check_id, check.message);
        }
    }

    let mut seen_ids: HashSet<&str> = HashSet::with_capacity(doc.manifest.len());
    for item in &doc.manifest {
        if !item.id.is_empty() && !seen_ids.insert(item.id.as_str()) {
            report.add(
                Severity::Error,
                "OPF-005",
                format!("duplicate manifest id '{}'", item.id),
            );
        }
    }

    for itemref in &doc.spine.itemrefs {
        if doc.item_by_id(&itemref.idref).is_none() {
            report.add(
                Severity::Error,
                "OPF-008",
                format!("spine itemref '{}' references no manifest item", itemref.idref),
            );
        }
    }
}

// --------------------------------------------------------------- references

fn check_references(resolver: &Resolver<'_>, opts: &ValidationOptions, report: &mut Report) {
    for (item, path) in resolver.missing_targets() {
        report.add_in_file(
            Severity::Error,
            "RSC-001",
            format!("manifest item '{}' references missing file", item.id),
            path,
        );
    }

    if opts.strict {
        for name in resolver.unmanifested() {
            report.add_in_file(
                Severity::Warning,
                "RSC-002",
                "file present in archive but not declared in the manifest",
                name,
            );
        }
    }

    for (item, fallback) in resolver.dangling_fallbacks() {
        report.add(
            Severity::Error,
            "OPF-008",
            format!(
                "manifest item '{}' declares unknown fallback id '{fallback}'",
                item.id
            ),
        );
    }

    if let Some(cycle) = resolver.fallback_cycle() {
        report.add(
            Severity::Error,
            "RSC-003",
            format!("circular manifest fallback chain: {}", cycle.join(" -> ")),
        );
    }
}

// --------------------------------------------------------------- navigation

fn check_navigation(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    report: &mut Report,
) {
    if !doc.is_v3 {
        return;
    }
    // OPF-006 already covers a missing or ambiguous nav item.
    let Some(item) = doc.nav_item() else { return };
    let nav_path = resolver.item_path(item);
    let Ok(bytes) = archive.read(&nav_path) else {
        // Existence is RSC-001 territory.
        return;
    };

    let nav = match navigation::parse_nav_xhtml(&bytes) {
        Ok(nav) => nav,
        Err(e) => {
            report.add_in_file(
                Severity::Error,
                "NAV-001",
                format!("navigation document unusable: {e}"),
                nav_path,
            );
            return;
        }
    };

    if !nav.saw_toc_nav {
        report.add_in_file(
            Severity::Error,
            "NAV-001",
            "navigation document has no nav element with epub:type 'toc'",
            nav_path,
        );
        return;
    }

    let nav_dir = dir_of(&nav_path).to_string();
    for (_, point) in flatten(&nav.toc) {
        if is_remote(&point.href) {
            continue;
        }
        let resolved = resolve_href(&nav_dir, &point.href);
        if !resolved.path.is_empty() && !archive.has(&resolved.path) {
            report.add_in_file(
                Severity::Error,
                "NAV-002",
                format!("toc entry '{}' links to missing file", point.label),
                resolved.path,
            );
        }
        if point.label.trim().is_empty() {
            report.add_in_file(
                Severity::Warning,
                "NAV-003",
                format!("toc entry for '{}' has an empty label", point.href),
                nav_path.clone(),
            );
        }
    }
}

// ----------------------------------------------------------------- encoding

fn declared_encoding(data: &[u8]) -> Option<String> {
    // Only the XML declaration in the first few hundred bytes matters.
    let head = &data[..data.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let decl_start = text.find("<?xml")?;
    let decl_end = text[decl_start..].find("?>")? + decl_start;
    let decl = &text[decl_start..decl_end];
    let enc_pos = decl.find("encoding")?;
    let after = &decl[enc_pos + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &after[1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

fn is_supported_encoding(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "utf-8" | "utf8" | "utf-16" | "utf-16le" | "utf-16be"
    )
}

fn has_utf16_bom(data: &[u8]) -> bool {
    data.starts_with(&[0xfe, 0xff]) || data.starts_with(&[0xff, 0xfe])
}

/// Flag files with invalid declared or detected encodings. Returns the set
/// of paths later phases must not deep-parse: flagged files plus valid
/// UTF-16 documents the UTF-8 readers cannot handle (a defensive skip, not
/// a fatal condition).
fn check_encoding(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    report: &mut Report,
) -> HashSet<String> {
    let mut bad = HashSet::new();
    for item in &doc.manifest {
        let textual = matches!(
            item.media_type.as_str(),
            mime::XHTML | mime::NCX | "image/svg+xml" | "text/css"
        );
        if !textual || is_remote(&item.href) {
            continue;
        }
        let path = resolver.item_path(item);
        let Ok(bytes) = archive.read(&path) else { continue };

        if let Some(encoding) = declared_encoding(&bytes) {
            if !is_supported_encoding(&encoding) {
                report.add_in_file(
                    Severity::Error,
                    "ENC-001",
                    format!("unsupported declared encoding '{encoding}'"),
                    path.clone(),
                );
                bad.insert(path);
                continue;
            }
            // UTF-16 is a valid container encoding, but the XML readers here
            // operate on UTF-8 bytes. Skip deep parsing without a finding.
            if encoding.to_ascii_lowercase().starts_with("utf-16") {
                bad.insert(path);
                continue;
            }
        }
        if has_utf16_bom(&bytes) {
            bad.insert(path);
            continue;
        }
        if std::str::from_utf8(&bytes).is_err() {
            report.add_in_file(
                Severity::Error,
                "ENC-002",
                "file is not valid UTF-8",
                path.clone(),
            );
            bad.insert(path);
        }
    }
    bad
}

// ------------------------------------------------------------------ content

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";

/// Markup features of one content document, detected from its element
/// stream by local tag name or namespace URI.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ContentFeatures {
    pub has_script: bool,
    pub has_svg: bool,
    pub has_mathml: bool,
}

struct ContentScan {
    features: ContentFeatures,
    doctype: Option<String>,
    ids: HashSet<String>,
    links: Vec<String>,
    imgs_missing_alt: usize,
    parse_error: Option<String>,
}

pub(crate) fn scan_content_features(data: &[u8]) -> ContentFeatures {
    scan_content(data).features
}

fn scan_content(data: &[u8]) -> ContentScan {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(128);

    let mut scan = ContentScan {
        features: ContentFeatures::default(),
        doctype: None,
        ids: HashSet::new(),
        links: Vec::new(),
        imgs_missing_alt: 0,
        parse_error: None,
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = e.name().local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"script" => scan.features.has_script = true,
                    b"svg" => scan.features.has_svg = true,
                    b"math" => scan.features.has_mathml = true,
                    _ => {}
                }
                let mut has_alt = false;
                for attr in e.attributes().flatten() {
                    let key = attr.key.as_ref().to_vec();
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match key.as_slice() {
                        b"id" => {
                            scan.ids.insert(value);
                        }
                        b"href" if local == b"a" => scan.links.push(value),
                        b"alt" => has_alt = true,
                        _ => {
                            // Namespaced content without a conventional tag
                            // name still counts via its xmlns URI.
                            if key.starts_with(b"xmlns") {
                                if value == SVG_NS {
                                    scan.features.has_svg = true;
                                } else if value == MATHML_NS {
                                    scan.features.has_mathml = true;
                                }
                            }
                        }
                    }
                }
                if local == b"img" && !has_alt {
                    scan.imgs_missing_alt += 1;
                }
            }
            Ok(Event::DocType(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                scan.doctype = Some(text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                scan.parse_error = Some(e.to_string());
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    scan
}

fn check_content(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    bad_encoding: &HashSet<String>,
    report: &mut Report,
) {
    let nav_path = doc
        .is_v3
        .then(|| doc.nav_item().map(|item| resolver.item_path(item)))
        .flatten();

    // First pass: parse every content document, collecting ids so the
    // second pass can validate internal fragment links.
    let mut ids_by_path: HashMap<String, HashSet<String>> = HashMap::new();
    let mut links: Vec<(String, String)> = Vec::new();

    for item in &doc.manifest {
        if item.media_type != mime::XHTML || is_remote(&item.href) {
            continue;
        }
        let path = resolver.item_path(item);
        if bad_encoding.contains(&path) {
            log::debug!("skipping content checks for {path}: bad encoding");
            continue;
        }
        let Ok(bytes) = archive.read(&path) else { continue };
        let scan = scan_content(&bytes);

        if let Some(err) = &scan.parse_error {
            report.add_in_file(
                Severity::Error,
                "HTM-001",
                format!("content document is not well-formed XML: {err}"),
                path.clone(),
            );
            continue;
        }

        // Property tokens are an EPUB 3 manifest feature; the navigation
        // document is exempt, matching the repair engine.
        if doc.is_v3 && nav_path.as_deref() != Some(path.as_str()) {
            if scan.features.has_script && !item.has_property("scripted") {
                report.add_in_file(
                    Severity::Error,
                    "HTM-005",
                    format!("manifest item '{}' is missing the 'scripted' property", item.id),
                    path.clone(),
                );
            }
            if scan.features.has_svg && !item.has_property("svg") {
                report.add_in_file(
                    Severity::Error,
                    "HTM-006",
                    format!("manifest item '{}' is missing the 'svg' property", item.id),
                    path.clone(),
                );
            }
            if scan.features.has_mathml && !item.has_property("mathml") {
                report.add_in_file(
                    Severity::Error,
                    "HTM-007",
                    format!("manifest item '{}' is missing the 'mathml' property", item.id),
                    path.clone(),
                );
            }
        }

        if doc.is_v3 {
            if let Some(doctype) = &scan.doctype {
                let upper = doctype.to_ascii_uppercase();
                if upper.contains("XHTML") || upper.contains("DTD") {
                    report.add_in_file(
                        Severity::Warning,
                        "HTM-010",
                        "obsolete XHTML doctype; EPUB 3 content should use <!DOCTYPE html>",
                        path.clone(),
                    );
                }
            }
        }

        for href in &scan.links {
            links.push((path.clone(), href.clone()));
        }
        ids_by_path.insert(path, scan.ids);
    }

    // Second pass: internal links. Files are checked for existence; a
    // retained fragment is checked against the target document's ids.
    for (from, href) in links {
        if is_remote(&href) {
            continue;
        }
        let resolved = resolve_href(dir_of(&from), &href);
        let target = if resolved.path.is_empty() {
            from.clone()
        } else {
            resolved.path
        };
        if !archive.has(&target) {
            report.add_in_file(
                Severity::Warning,
                "RSC-007",
                format!("link '{href}' in {from} points to a missing file"),
                target,
            );
            continue;
        }
        if let (Some(fragment), Some(ids)) = (&resolved.fragment, ids_by_path.get(&target)) {
            if !fragment.is_empty() && !ids.contains(fragment) {
                report.add_in_file(
                    Severity::Warning,
                    "RSC-012",
                    format!("fragment '#{fragment}' in link from {from} matches no id"),
                    target,
                );
            }
        }
    }
}

// --------------------------------------------------------------- stylesheet

/// Replace comments with spaces so later scanning cannot misread comment
/// text (e.g. a selector-looking string) as a declaration.
fn strip_css_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut in_comment = false;
    while let Some(c) = chars.next() {
        if in_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_comment = false;
                out.push(' ');
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            in_comment = true;
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn check_css(archive: &Archive, doc: &PackageDoc, resolver: &Resolver<'_>, report: &mut Report) {
    for item in &doc.manifest {
        if item.media_type != "text/css" || is_remote(&item.href) {
            continue;
        }
        let path = resolver.item_path(item);
        let Ok(bytes) = archive.read(&path) else { continue };
        let css = strip_css_comments(&String::from_utf8_lossy(&bytes));

        // Property scanning is restricted to text inside rule blocks so
        // pseudo-class selectors (`a:hover`) are never read as
        // declarations. A buffer accumulates potential declaration text
        // and is discarded whenever it turns out to be a selector.
        let mut depth: i32 = 0;
        let mut decl = String::new();
        let mut flagged_fixed = false;
        let mut flagged_bidi = false;
        for c in css.chars() {
            match c {
                '{' => {
                    depth += 1;
                    decl.clear();
                }
                '}' | ';' => {
                    if depth > 0 {
                        inspect_declaration(
                            &decl,
                            &path,
                            &mut flagged_fixed,
                            &mut flagged_bidi,
                            report,
                        );
                    }
                    decl.clear();
                    if c == '}' {
                        depth -= 1;
                    }
                }
                _ => decl.push(c),
            }
        }

        if depth != 0 {
            report.add_in_file(
                Severity::Error,
                "CSS-001",
                format!("unbalanced braces in stylesheet (depth {depth} at end of file)"),
                path,
            );
        }
    }
}

fn inspect_declaration(
    decl: &str,
    path: &str,
    flagged_fixed: &mut bool,
    flagged_bidi: &mut bool,
    report: &mut Report,
) {
    let Some((prop, value)) = decl.split_once(':') else { return };
    let prop = prop.trim().to_ascii_lowercase();
    let value = value.trim().to_ascii_lowercase();
    match prop.as_str() {
        "position" if value.starts_with("fixed") && !*flagged_fixed => {
            *flagged_fixed = true;
            report.add_in_file(
                Severity::Warning,
                "CSS-006",
                "'position: fixed' breaks reflowable pagination",
                path.to_string(),
            );
        }
        "direction" | "unicode-bidi" if !*flagged_bidi => {
            *flagged_bidi = true;
            report.add_in_file(
                Severity::Warning,
                "CSS-008",
                format!("'{prop}' should be expressed in markup, not CSS"),
                path.to_string(),
            );
        }
        _ => {}
    }
}

// ------------------------------------------------------------- fixed layout

fn check_fixed_layout(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    bad_encoding: &HashSet<String>,
    report: &mut Report,
) {
    if !doc.is_v3 {
        return;
    }
    let global_fxl = doc.metadata.meta_value("rendition:layout") == Some("pre-paginated");

    for itemref in &doc.spine.itemrefs {
        // Per-itemref rendition overrides beat the package default.
        let fxl = if itemref
            .properties
            .iter()
            .any(|p| p == "rendition:layout-pre-paginated")
        {
            true
        } else if itemref
            .properties
            .iter()
            .any(|p| p == "rendition:layout-reflowable")
        {
            false
        } else {
            global_fxl
        };
        if !fxl {
            continue;
        }
        let Some(item) = doc.item_by_id(&itemref.idref) else { continue };
        if item.media_type != mime::XHTML {
            continue;
        }
        let path = resolver.item_path(item);
        if bad_encoding.contains(&path) {
            continue;
        }
        let Ok(bytes) = archive.read(&path) else { continue };

        match viewport_content(&bytes) {
            None => {
                report.add_in_file(
                    Severity::Error,
                    "FXL-001",
                    "pre-paginated content document has no viewport meta",
                    path,
                );
            }
            Some(content) => {
                let has_width = content.contains("width=");
                let has_height = content.contains("height=");
                if !has_width || !has_height {
                    report.add_in_file(
                        Severity::Error,
                        "FXL-002",
                        format!("viewport '{content}' must declare width and height"),
                        path,
                    );
                }
            }
        }
    }
}

fn viewport_content(data: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(64);
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name().local_name().as_ref() == b"meta" {
                    let mut is_viewport = false;
                    let mut content = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"name" if attr.value.as_ref() == b"viewport" => is_viewport = true,
                            b"content" => {
                                content =
                                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                            _ => {}
                        }
                    }
                    if is_viewport {
                        return content;
                    }
                }
                // The viewport meta lives in head; stop at body.
                if e.name().local_name().as_ref() == b"body" {
                    return None;
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

// -------------------------------------------------------------------- media

fn check_media(archive: &Archive, doc: &PackageDoc, resolver: &Resolver<'_>, report: &mut Report) {
    for item in &doc.manifest {
        if item.href.is_empty() || is_remote(&item.href) || item.media_type.is_empty() {
            continue;
        }
        let path = resolver.item_path(item);

        if mime::is_raster_image(&item.media_type) {
            // Declared extensions are untrustworthy for images; the bytes
            // decide.
            let Ok(bytes) = archive.read(&path) else { continue };
            if let Some(detected) = mime::sniff_image(&bytes) {
                if !mime::equivalent(detected, &item.media_type) {
                    report.add_in_file(
                        Severity::Error,
                        "MED-001",
                        format!(
                            "declared media type '{}' but content is '{detected}'",
                            item.media_type
                        ),
                        path,
                    );
                }
            }
            continue;
        }

        match mime::extension_of(&item.href).and_then(|ext| mime::from_extension(&ext)) {
            Some(expected) => {
                if !mime::equivalent(expected, &item.media_type) {
                    report.add_in_file(
                        Severity::Error,
                        "OPF-024",
                        format!(
                            "manifest item '{}' declares '{}' but its extension implies '{expected}'",
                            item.id, item.media_type
                        ),
                        path,
                    );
                }
            }
            None => {
                if item.fallback.is_none() && !known_media_type(&item.media_type) {
                    report.add_in_file(
                        Severity::Warning,
                        "MED-003",
                        format!(
                            "unrecognized media type '{}' with no fallback",
                            item.media_type
                        ),
                        path,
                    );
                }
            }
        }
    }
}

fn known_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        mime::XHTML
            | mime::NCX
            | "text/css"
            | "application/javascript"
            | "image/svg+xml"
            | "application/smil+xml"
    ) || media_type.starts_with("image/")
        || media_type.starts_with("audio/")
        || media_type.starts_with("video/")
        || media_type.starts_with("font/")
}

// --------------------------------------------------------------- legacy nav

fn check_legacy_nav(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    report: &mut Report,
) {
    if doc.is_v3 {
        return;
    }

    let ncx_item = doc
        .spine
        .toc
        .as_deref()
        .and_then(|id| doc.item_by_id(id))
        .or_else(|| doc.manifest.iter().find(|i| i.media_type == mime::NCX));
    let Some(item) = ncx_item else {
        report.add(
            Severity::Error,
            "NCX-001",
            "EPUB 2 package declares no NCX navigation file",
        );
        return;
    };

    let path = resolver.item_path(item);
    let Ok(bytes) = archive.read(&path) else {
        report.add_in_file(Severity::Error, "NCX-001", "NCX file unreadable", path);
        return;
    };
    let ncx = match navigation::parse_ncx(&bytes) {
        Ok(ncx) => ncx,
        Err(e) => {
            report.add_in_file(Severity::Error, "NCX-001", e.to_string(), path);
            return;
        }
    };

    // Depth comes from the real nesting tree, never from document order.
    let real_depth = max_depth(&ncx.toc);
    if let Some(declared) = ncx.declared_depth {
        if declared != real_depth {
            report.add_in_file(
                Severity::Warning,
                "NCX-002",
                format!("dtb:depth declares {declared} but the navMap nests {real_depth} deep"),
                path.clone(),
            );
        }
    }

    let ncx_dir = dir_of(&path).to_string();
    for (depth, point) in flatten(&ncx.toc) {
        if point.href.is_empty() || is_remote(&point.href) {
            continue;
        }
        let resolved = resolve_href(&ncx_dir, &point.href);
        if !resolved.path.is_empty() && !archive.has(&resolved.path) {
            report.add_in_file(
                Severity::Error,
                "NCX-003",
                format!(
                    "navPoint '{}' (depth {depth}) links to missing file",
                    point.label
                ),
                resolved.path,
            );
        }
    }
}

// ------------------------------------------------------------ accessibility

fn check_accessibility(
    archive: &Archive,
    doc: &PackageDoc,
    resolver: &Resolver<'_>,
    bad_encoding: &HashSet<String>,
    report: &mut Report,
) {
    let has_meta = |property: &str| {
        doc.metadata
            .metas
            .iter()
            .any(|m| m.property.as_deref() == Some(property))
    };

    if !has_meta("schema:accessMode") {
        report.add(
            Severity::Warning,
            "ACC-001",
            "missing schema:accessMode metadata",
        );
    }
    if !has_meta("schema:accessibilityFeature") {
        report.add(
            Severity::Warning,
            "ACC-002",
            "missing schema:accessibilityFeature metadata",
        );
    }
    if !has_meta("schema:accessibilitySummary") {
        report.add(
            Severity::Info,
            "ACC-003",
            "missing schema:accessibilitySummary metadata",
        );
    }

    for item in &doc.manifest {
        if item.media_type != mime::XHTML || is_remote(&item.href) {
            continue;
        }
        let path = resolver.item_path(item);
        if bad_encoding.contains(&path) {
            continue;
        }
        let Ok(bytes) = archive.read(&path) else { continue };
        let scan = scan_content(&bytes);
        if scan.parse_error.is_none() && scan.imgs_missing_alt > 0 {
            report.add_in_file(
                Severity::Warning,
                "ACC-004",
                format!("{} img element(s) without alt text", scan.imgs_missing_alt),
                path,
            );
        }
    }
}
