//! Container-descriptor and package-document (OPF) parsing.
//!
//! Both parsers match elements by local name so namespace-prefix variation
//! (`opf:package`, `dc:title`, unprefixed) never changes the result. The
//! package version is exposed as a derived [`PackageDoc::is_v3`] boolean;
//! call sites never compare version strings ordinally.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;

/// Fixed location of the container descriptor inside the archive.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Parsed container descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    /// Archive path of the package document (`full-path` of the first
    /// usable rootfile).
    pub rootfile_path: String,
}

/// A dc element value with its optional id (refinement target).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DcEntry {
    /// Element text content.
    pub value: String,
    /// `id` attribute, when present.
    pub id: Option<String>,
}

/// A `<meta>` entry from the metadata section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaEntry {
    /// EPUB 3 `property` attribute.
    pub property: Option<String>,
    /// EPUB 3 `refines` attribute (target id, `#` stripped).
    pub refines: Option<String>,
    /// Element text content (EPUB 3 style metas).
    pub value: String,
    /// EPUB 2 `name` attribute.
    pub name: Option<String>,
    /// EPUB 2 `content` attribute.
    pub content: Option<String>,
}

/// Package metadata.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    /// dc:identifier entries.
    pub identifiers: Vec<DcEntry>,
    /// dc:title entries.
    pub titles: Vec<DcEntry>,
    /// dc:language values.
    pub languages: Vec<String>,
    /// dc:creator entries.
    pub creators: Vec<DcEntry>,
    /// dc:contributor entries.
    pub contributors: Vec<DcEntry>,
    /// `dcterms:modified` value, when declared.
    pub modified: Option<String>,
    /// All `<meta>` entries in document order.
    pub metas: Vec<MetaEntry>,
}

impl Metadata {
    /// First meta value for a property without a refines target.
    pub fn meta_value(&self, property: &str) -> Option<&str> {
        self.metas.iter().find_map(|m| {
            (m.refines.is_none() && m.property.as_deref() == Some(property))
                .then_some(m.value.as_str())
        })
    }
}

/// One manifest item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestItem {
    /// Unique manifest id.
    pub id: String,
    /// Raw href as declared (relative to the OPF directory).
    pub href: String,
    /// Declared media type.
    pub media_type: String,
    /// Space-separated property tokens, split.
    pub properties: Vec<String>,
    /// Fallback manifest id, when declared.
    pub fallback: Option<String>,
}

impl ManifestItem {
    /// Whether the item carries a property token.
    pub fn has_property(&self, token: &str) -> bool {
        self.properties.iter().any(|p| p == token)
    }
}

/// One spine itemref.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemRef {
    /// Referenced manifest id.
    pub idref: String,
    /// `linear` flag (`no` means false; absent means true).
    pub linear: bool,
    /// Space-separated itemref properties (rendition overrides live here).
    pub properties: Vec<String>,
}

/// The spine: ordered reading sequence.
#[derive(Clone, Debug, Default)]
pub struct Spine {
    /// EPUB 2 `toc` attribute referencing the NCX manifest id.
    pub toc: Option<String>,
    /// Ordered itemrefs.
    pub itemrefs: Vec<ItemRef>,
}

/// Typed model of the package document.
#[derive(Clone, Debug, Default)]
pub struct PackageDoc {
    /// Raw `version` attribute.
    pub version: String,
    /// Derived version gate: true when the major version is 3 or later.
    /// The only version comparison call sites are allowed to use.
    pub is_v3: bool,
    /// `unique-identifier` attribute (an id reference into metadata).
    pub unique_identifier: Option<String>,
    /// Parsed metadata section.
    pub metadata: Metadata,
    /// Manifest items in document order.
    pub manifest: Vec<ManifestItem>,
    /// Spine.
    pub spine: Spine,
}

impl PackageDoc {
    /// Lookup a manifest item by id.
    pub fn item_by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|i| i.id == id)
    }

    /// The single nav-property item, when exactly one exists.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        let mut found = None;
        for item in &self.manifest {
            if item.has_property("nav") {
                if found.is_some() {
                    return None;
                }
                found = Some(item);
            }
        }
        found
    }
}

fn is_v3_version(version: &str) -> bool {
    version
        .split('.')
        .next()
        .and_then(|major| major.trim().parse::<u32>().ok())
        .is_some_and(|major| major >= 3)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key || attr.key.local_name().as_ref() == key {
            return Some(String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    None
}

fn split_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Parse `META-INF/container.xml` into a [`Container`].
///
/// Fails only when the document is unparsable or declares no rootfile;
/// the validator converts that into an OCF finding.
pub fn parse_container(content: &[u8]) -> Result<Container, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(64);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().local_name().as_ref() == b"rootfile" {
                    if let Some(path) = attr_value(&e, b"full-path") {
                        if !path.is_empty() {
                            return Ok(Container { rootfile_path: path });
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::Xml(format!("container.xml parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::Xml(
        "container.xml declares no rootfile full-path".to_string(),
    ))
}

/// Which dc element is currently collecting text.
#[derive(Clone, Copy, PartialEq, Eq)]
enum DcKind {
    Identifier,
    Title,
    Language,
    Creator,
    Contributor,
}

/// Parse a package document into a [`PackageDoc`].
///
/// Errors only when the XML is not well-formed or contains no `package`
/// element; every softer problem is left for the check phases to find on
/// the returned model.
pub fn parse_package(content: &[u8]) -> Result<PackageDoc, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(128);

    let mut doc = PackageDoc::default();
    let mut saw_package = false;

    // Collection state while walking the metadata section.
    let mut current_dc: Option<(DcKind, Option<String>)> = None;
    let mut dc_text = String::new();
    let mut current_meta: Option<MetaEntry> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| EpubError::Xml(format!("package document parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                match e.name().local_name().as_ref() {
                    b"package" => {
                        saw_package = true;
                        doc.version = attr_value(e, b"version").unwrap_or_default();
                        doc.is_v3 = is_v3_version(&doc.version);
                        doc.unique_identifier = attr_value(e, b"unique-identifier");
                    }
                    b"identifier" if !empty => {
                        current_dc = Some((DcKind::Identifier, attr_value(e, b"id")));
                        dc_text.clear();
                    }
                    b"title" if !empty => {
                        current_dc = Some((DcKind::Title, attr_value(e, b"id")));
                        dc_text.clear();
                    }
                    b"language" if !empty => {
                        current_dc = Some((DcKind::Language, None));
                        dc_text.clear();
                    }
                    b"creator" if !empty => {
                        current_dc = Some((DcKind::Creator, attr_value(e, b"id")));
                        dc_text.clear();
                    }
                    b"contributor" if !empty => {
                        current_dc = Some((DcKind::Contributor, attr_value(e, b"id")));
                        dc_text.clear();
                    }
                    b"meta" => {
                        let entry = MetaEntry {
                            property: attr_value(e, b"property"),
                            refines: attr_value(e, b"refines")
                                .map(|r| r.trim_start_matches('#').to_string()),
                            value: String::new(),
                            name: attr_value(e, b"name"),
                            content: attr_value(e, b"content"),
                        };
                        if empty {
                            doc.metadata.metas.push(entry);
                        } else {
                            current_meta = Some(entry);
                        }
                    }
                    b"item" => {
                        doc.manifest.push(ManifestItem {
                            id: attr_value(e, b"id").unwrap_or_default(),
                            href: attr_value(e, b"href").unwrap_or_default(),
                            media_type: attr_value(e, b"media-type").unwrap_or_default(),
                            properties: attr_value(e, b"properties")
                                .map(|p| split_tokens(&p))
                                .unwrap_or_default(),
                            fallback: attr_value(e, b"fallback"),
                        });
                    }
                    b"spine" => {
                        doc.spine.toc = attr_value(e, b"toc");
                    }
                    b"itemref" => {
                        doc.spine.itemrefs.push(ItemRef {
                            idref: attr_value(e, b"idref").unwrap_or_default(),
                            linear: attr_value(e, b"linear").as_deref() != Some("no"),
                            properties: attr_value(e, b"properties")
                                .map(|p| split_tokens(&p))
                                .unwrap_or_default(),
                        });
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = reader.decoder().decode(e).unwrap_or_default();
                if current_dc.is_some() {
                    dc_text.push_str(text.as_ref());
                } else if let Some(meta) = current_meta.as_mut() {
                    meta.value.push_str(text.as_ref());
                }
            }
            Event::End(ref e) => match e.name().local_name().as_ref() {
                b"identifier" | b"title" | b"language" | b"creator" | b"contributor" => {
                    if let Some((kind, id)) = current_dc.take() {
                        let value = core::mem::take(&mut dc_text);
                        let entry = DcEntry { value, id };
                        match kind {
                            DcKind::Identifier => doc.metadata.identifiers.push(entry),
                            DcKind::Title => doc.metadata.titles.push(entry),
                            DcKind::Language => doc.metadata.languages.push(entry.value),
                            DcKind::Creator => doc.metadata.creators.push(entry),
                            DcKind::Contributor => doc.metadata.contributors.push(entry),
                        }
                    }
                }
                b"meta" => {
                    if let Some(meta) = current_meta.take() {
                        doc.metadata.metas.push(meta);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_package {
        return Err(EpubError::Xml(
            "document contains no package element".to_string(),
        ));
    }

    // dcterms:modified is a property meta; derive the dedicated field once.
    doc.metadata.modified = doc
        .metadata
        .meta_value("dcterms:modified")
        .map(str::to_string);

    Ok(doc)
}
