//! In-memory EPUB fixtures with injectable container and package problems.
//!
//! The ZIP writer here is deliberately independent of the crate's own
//! archive writer: tests need to produce archives the library would refuse
//! to write (mimetype out of order, compressed, carrying an extra field).

use std::path::{Path, PathBuf};

/// One raw ZIP entry, written exactly as specified.
pub struct RawEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub deflate: bool,
    /// Extra-field bytes for the local header.
    pub extra: Vec<u8>,
}

impl RawEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            deflate: false,
            extra: Vec::new(),
        }
    }
}

/// Serialize entries to ZIP bytes in the given order, no reordering, no
/// invariants enforced.
pub fn raw_zip(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let crc = crc32fast::hash(&entry.data);
        let (method, payload): (u16, Vec<u8>) = if entry.deflate {
            (8, miniz_oxide::deflate::compress_to_vec(&entry.data, 6))
        } else {
            (0, entry.data.clone())
        };
        let name = entry.name.as_bytes();
        let local_offset = out.len() as u32;

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&0x0021u16.to_le_bytes()); // date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entry.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&entry.extra);
        out.extend_from_slice(&payload);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0x0021u16.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let central_offset = out.len() as u32;
    let central_size = central.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&central_size.to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Knobs for building a small EPUB 3 with specific problems injected.
/// Defaults produce a package that validates clean.
pub struct EpubOpts {
    pub mimetype_content: &'static str,
    pub mimetype_deflated: bool,
    pub mimetype_first: bool,
    pub mimetype_extra_field: bool,
    pub version: &'static str,
    pub include_modified: bool,
    pub xhtml_doctype: bool,
    pub include_script: bool,
    /// Declared media type for an injected JPEG cover image.
    pub cover_media_type: Option<&'static str>,
    /// Extra raw entries appended after the standard set.
    pub extra_entries: Vec<RawEntry>,
    /// Replace the generated OPF wholesale.
    pub opf_override: Option<String>,
    /// Replace the generated chapter body wholesale.
    pub chapter_override: Option<String>,
    /// Replace the chapter with raw bytes (wins over `chapter_override`;
    /// allows invalid UTF-8).
    pub chapter_raw_override: Option<Vec<u8>>,
}

impl Default for EpubOpts {
    fn default() -> Self {
        Self {
            mimetype_content: "application/epub+zip",
            mimetype_deflated: false,
            mimetype_first: true,
            mimetype_extra_field: false,
            version: "3.0",
            include_modified: true,
            xhtml_doctype: false,
            include_script: false,
            cover_media_type: None,
            extra_entries: Vec::new(),
            opf_override: None,
            chapter_override: None,
            chapter_raw_override: None,
        }
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

const NAV_XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Navigation</title></head>
<body>
<nav epub:type="toc"><ol><li><a href="chapter1.xhtml">Chapter 1</a></li></ol></nav>
</body>
</html>"#;

/// Minimal JPEG: correct magic plus a few JFIF header bytes.
pub const JPEG_BYTES: &[u8] = &[
    0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0x4a, 0x46, 0x49, 0x46, 0x00,
];

fn opf_for(opts: &EpubOpts) -> String {
    if let Some(opf) = &opts.opf_override {
        return opf.clone();
    }
    let modified = if opts.include_modified {
        "    <meta property=\"dcterms:modified\">2024-01-01T00:00:00Z</meta>\n"
    } else {
        ""
    };
    let cover_item = match opts.cover_media_type {
        Some(mt) => format!("    <item id=\"cover\" href=\"cover.jpg\" media-type=\"{mt}\"/>\n"),
        None => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{version}" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:12345678-1234-1234-1234-123456789012</dc:identifier>
    <dc:title>Test Book</dc:title>
    <dc:language>en</dc:language>
{modified}  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
{cover_item}  </manifest>
  <spine>
    <itemref idref="ch1"/>
  </spine>
</package>"#,
        version = opts.version,
    )
}

fn chapter_for(opts: &EpubOpts) -> String {
    if let Some(chapter) = &opts.chapter_override {
        return chapter.clone();
    }
    let doctype = if opts.xhtml_doctype {
        r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
    } else {
        "<!DOCTYPE html>"
    };
    let script = if opts.include_script {
        "<script>var x = 1;</script>\n"
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
{doctype}
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Chapter 1</title></head>
<body>
{script}<p id="p1">Hello world</p>
</body>
</html>"#
    )
}

/// Build EPUB bytes from the option set.
pub fn build_epub(opts: EpubOpts) -> Vec<u8> {
    let mimetype = RawEntry {
        name: "mimetype".to_string(),
        data: opts.mimetype_content.as_bytes().to_vec(),
        deflate: opts.mimetype_deflated,
        extra: if opts.mimetype_extra_field {
            // A plausible unix-timestamp extra field.
            vec![0x55, 0x54, 0x05, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00]
        } else {
            Vec::new()
        },
    };
    let container = RawEntry::stored("META-INF/container.xml", CONTAINER_XML.as_bytes());

    let mut entries = if opts.mimetype_first {
        vec![mimetype, container]
    } else {
        vec![container, mimetype]
    };
    entries.push(RawEntry::stored("OEBPS/content.opf", opf_for(&opts).as_bytes()));
    entries.push(RawEntry::stored("OEBPS/nav.xhtml", NAV_XHTML.as_bytes()));
    let chapter_bytes = match &opts.chapter_raw_override {
        Some(raw) => raw.clone(),
        None => chapter_for(&opts).into_bytes(),
    };
    entries.push(RawEntry::stored("OEBPS/chapter1.xhtml", &chapter_bytes));
    if opts.cover_media_type.is_some() {
        entries.push(RawEntry::stored("OEBPS/cover.jpg", JPEG_BYTES));
    }
    entries.extend(opts.extra_entries);
    raw_zip(&entries)
}

/// Write EPUB bytes to `<dir>/<name>` and return the path.
pub fn write_epub(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// A small EPUB 2 package with a three-level NCX. `declared_depth` goes
/// into `dtb:depth` unchanged; the real tree nests three deep.
pub fn build_epub2(declared_depth: u32, ncx_target_missing: bool) -> Vec<u8> {
    let target = if ncx_target_missing { "missing.xhtml" } else { "chapter1.xhtml" };
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:depth" content="{declared_depth}"/>
  </head>
  <navMap>
    <navPoint id="n1">
      <navLabel><text>Part I</text></navLabel>
      <content src="chapter1.xhtml"/>
      <navPoint id="n2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="{target}"/>
        <navPoint id="n3">
          <navLabel><text>Section 1.1</text></navLabel>
          <content src="chapter1.xhtml#p1"/>
        </navPoint>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#
    );
    let opf = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:00000000-0000-0000-0000-000000000002</dc:identifier>
    <dc:title>Legacy Book</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
  </spine>
</package>"#;
    let chapter = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Chapter 1</title></head>
<body><p id="p1">Hello world</p></body>
</html>"#;

    raw_zip(&[
        RawEntry::stored("mimetype", b"application/epub+zip"),
        RawEntry::stored("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        RawEntry::stored("OEBPS/content.opf", opf.as_bytes()),
        RawEntry::stored("OEBPS/toc.ncx", ncx.as_bytes()),
        RawEntry::stored("OEBPS/chapter1.xhtml", chapter.as_bytes()),
    ])
}
