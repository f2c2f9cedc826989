//! Media-type lookup tables.
//!
//! Kept as explicit tables rather than scattered conditionals: an
//! extension-to-type map, legacy alias equivalence sets, and image magic
//! prefixes. Both the media-check phase and the media-type fixer consult
//! this module so the two can never disagree.

/// Canonical mimetype file content for an EPUB container.
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

/// XHTML content-document media type.
pub const XHTML: &str = "application/xhtml+xml";

/// EPUB 2 NCX media type.
pub const NCX: &str = "application/x-dtbncx+xml";

/// Map a lowercase file extension (without the dot) to its expected media
/// type. Returns `None` for extensions the catalog does not cover.
pub fn from_extension(ext: &str) -> Option<&'static str> {
    let ty = match ext {
        "xhtml" | "html" | "htm" => XHTML,
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ncx" => NCX,
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "smil" => "application/smil+xml",
        "opf" => "application/oebps-package+xml",
        _ => return None,
    };
    Some(ty)
}

/// Extract the lowercase extension of an href (fragment/query already
/// stripped by the caller).
pub fn extension_of(href: &str) -> Option<String> {
    let name = href.rsplit('/').next().unwrap_or(href);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Legacy alias sets. Types within one set are treated as equivalent before
/// any mismatch is flagged; older packaging tools used the pre-RFC-8081
/// font types and the pre-HTML5 script/video spellings.
const ALIAS_SETS: &[&[&str]] = &[
    &["font/ttf", "application/x-font-ttf", "application/font-sfnt", "application/vnd.ms-opentype"],
    &["font/otf", "application/x-font-otf", "application/font-otf"],
    &["font/woff", "application/font-woff", "application/x-font-woff"],
    &["application/javascript", "text/javascript", "application/ecmascript"],
    &["video/mp4", "video/x-m4v"],
    &["audio/mpeg", "audio/mp3"],
];

/// Whether two media types are equal or members of the same alias set.
pub fn equivalent(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    ALIAS_SETS.iter().any(|set| {
        set.iter().any(|t| t.eq_ignore_ascii_case(a)) && set.iter().any(|t| t.eq_ignore_ascii_case(b))
    })
}

/// Image formats identified by fixed magic-byte prefixes. Declared
/// extensions are untrustworthy; the repair engine prefers these.
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];
const GIF_MAGIC: &[u8] = b"GIF8";

/// Sniff a raster-image media type from leading bytes. SVG is text and is
/// deliberately not sniffed here.
pub fn sniff_image(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else if data.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else if data.starts_with(GIF_MAGIC) {
        Some("image/gif")
    } else {
        None
    }
}

/// Whether a declared type names a raster image (sniffable by magic).
pub fn is_raster_image(media_type: &str) -> bool {
    media_type.starts_with("image/") && media_type != "image/svg+xml"
}
