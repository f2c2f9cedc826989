//! Navigation model parsing (EPUB 3 nav document, EPUB 2 NCX).
//!
//! Supports both the EPUB 3.x XHTML navigation document (`epub:type="toc"`,
//! `page-list`, `landmarks`) and the EPUB 2.0 NCX fallback. NCX navigation
//! points are genuinely nested, so depth is carried by the tree the parser
//! builds with an explicit stack; a flat scan over document order would
//! misclassify depth and is never used.

use smallvec::SmallVec;

use crate::error::EpubError;

// Bound on nesting for adversarial input; real books stay in single digits.
const MAX_DEPTH: usize = 64;

/// A single navigation point (table-of-contents entry).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NavPoint {
    /// Display label.
    pub label: String,
    /// Content href (relative path, possibly with fragment).
    pub href: String,
    /// Child points (hierarchical TOC).
    pub children: Vec<NavPoint>,
}

/// Parsed EPUB 3 navigation document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Navigation {
    /// Table-of-contents entries.
    pub toc: Vec<NavPoint>,
    /// Page-list entries.
    pub page_list: Vec<NavPoint>,
    /// Landmark entries.
    pub landmarks: Vec<NavPoint>,
    /// Whether a `<nav epub:type="toc">` section was present at all
    /// (distinct from present-but-empty).
    pub saw_toc_nav: bool,
}

/// Parsed EPUB 2 NCX document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ncx {
    /// Nested navMap tree.
    pub toc: Vec<NavPoint>,
    /// `dtb:depth` head meta, when declared and numeric.
    pub declared_depth: Option<usize>,
}

/// Flatten a nav tree into `(depth, point)` pairs, depth starting at 1.
pub fn flatten(points: &[NavPoint]) -> Vec<(usize, &NavPoint)> {
    let mut out = Vec::with_capacity(8);
    // Explicit work stack, pushed in reverse so output keeps document order.
    let mut stack: SmallVec<[(usize, &NavPoint); 16]> =
        points.iter().rev().map(|p| (1, p)).collect();
    while let Some((depth, point)) = stack.pop() {
        out.push((depth, point));
        for child in point.children.iter().rev() {
            stack.push((depth + 1, child));
        }
    }
    out
}

/// Maximum nesting depth of a nav tree (0 for an empty tree).
pub fn max_depth(points: &[NavPoint]) -> usize {
    flatten(points).iter().map(|(d, _)| *d).max().unwrap_or(0)
}

/// Which nav section an `epub:type` token selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NavType {
    Toc,
    PageList,
    Landmarks,
}

impl NavType {
    fn from_tokens(value: &str) -> Option<Self> {
        for token in value.split_whitespace() {
            match token {
                "toc" => return Some(NavType::Toc),
                "page-list" => return Some(NavType::PageList),
                "landmarks" => return Some(NavType::Landmarks),
                _ => {}
            }
        }
        None
    }
}

/// Partial nav point being built during parsing.
struct PartialNavPoint {
    href: Option<String>,
    label: Option<String>,
    children: Vec<NavPoint>,
}

impl PartialNavPoint {
    fn new() -> Self {
        Self {
            href: None,
            label: None,
            children: Vec::with_capacity(4),
        }
    }

    fn finish(self) -> Option<NavPoint> {
        // Anchor-less list items carry no target; drop them. Empty labels
        // are kept so the label check can flag them.
        let href = self.href?;
        Some(NavPoint {
            label: self.label.unwrap_or_default(),
            href,
            children: self.children,
        })
    }
}

/// Parse an EPUB 3.x XHTML navigation document.
pub fn parse_nav_xhtml(content: &[u8]) -> Result<Navigation, EpubError> {
    let mut reader = quick_xml::reader::Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut nav = Navigation::default();
    let mut buf = Vec::with_capacity(64);

    // Which nav section we are inside (None = outside any nav).
    let mut current: Option<NavType> = None;
    // One stack slot per open <li>.
    let mut item_stack: SmallVec<[PartialNavPoint; 8]> = SmallVec::new();
    // Completed top-level points for the current section.
    let mut results: Vec<NavPoint> = Vec::with_capacity(8);
    let mut in_anchor = false;

    use quick_xml::events::Event;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().local_name().as_ref() {
                b"nav" => {
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        if key == b"epub:type" || key.ends_with(b":type") {
                            let value = reader
                                .decoder()
                                .decode(attr.value.as_ref())
                                .unwrap_or_default();
                            current = NavType::from_tokens(value.as_ref());
                            if current == Some(NavType::Toc) {
                                nav.saw_toc_nav = true;
                            }
                            results.clear();
                        }
                    }
                }
                b"li" if current.is_some() => {
                    if item_stack.len() >= MAX_DEPTH {
                        return Err(EpubError::Navigation(format!(
                            "nav nesting exceeds {MAX_DEPTH} levels"
                        )));
                    }
                    item_stack.push(PartialNavPoint::new());
                }
                b"a" if current.is_some() => {
                    in_anchor = true;
                    if let Some(href) = anchor_href(&reader, &e) {
                        if let Some(item) = item_stack.last_mut() {
                            item.href = Some(href);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                // Self-closing <a href="..."/> (rare but valid).
                if e.name().local_name().as_ref() == b"a" && current.is_some() {
                    if let Some(href) = anchor_href(&reader, &e) {
                        if let Some(item) = item_stack.last_mut() {
                            item.href = Some(href);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_anchor && current.is_some() {
                    let text = reader.decoder().decode(&e).unwrap_or_default();
                    if let Some(item) = item_stack.last_mut() {
                        append_label(&mut item.label, text.as_ref());
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().local_name().as_ref() {
                b"a" => in_anchor = false,
                b"li" if current.is_some() => {
                    if let Some(point) = item_stack.pop().and_then(PartialNavPoint::finish) {
                        match item_stack.last_mut() {
                            Some(parent) => parent.children.push(point),
                            None => results.push(point),
                        }
                    }
                }
                b"nav" => {
                    let completed = core::mem::take(&mut results);
                    match current.take() {
                        Some(NavType::Toc) => nav.toc = completed,
                        Some(NavType::PageList) => nav.page_list = completed,
                        Some(NavType::Landmarks) => nav.landmarks = completed,
                        None => {}
                    }
                    item_stack.clear();
                    in_anchor = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::Navigation(format!("nav XML parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(nav)
}

fn anchor_href(
    reader: &quick_xml::reader::Reader<&[u8]>,
    e: &quick_xml::events::BytesStart<'_>,
) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"href" {
            let href = reader.decoder().decode(attr.value.as_ref()).ok()?;
            return Some(href.into_owned());
        }
    }
    None
}

fn append_label(label: &mut Option<String>, text: &str) {
    match label {
        Some(existing) => {
            // Space separator when concatenating text segments from
            // formatted anchors (e.g. "Part <em>One</em>").
            if !existing.is_empty() && !existing.ends_with(' ') && !text.starts_with(' ') {
                existing.push(' ');
            }
            existing.push_str(text);
        }
        None => *label = Some(text.to_string()),
    }
}

/// Parse an EPUB 2.0 NCX navigation document.
///
/// Builds the nested `navPoint` tree and reads the declared `dtb:depth`
/// head meta so the legacy-navigation phase can compare declared against
/// real depth.
pub fn parse_ncx(content: &[u8]) -> Result<Ncx, EpubError> {
    let mut reader = quick_xml::reader::Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut ncx = Ncx::default();
    let mut buf = Vec::with_capacity(64);

    let mut in_nav_map = false;
    // One stack slot per open <navPoint>; nesting is real in NCX.
    let mut point_stack: SmallVec<[NavPoint; 8]> = SmallVec::new();
    let mut in_text = false;

    use quick_xml::events::Event;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(ref event @ Event::Start(ref e)) | Ok(ref event @ Event::Empty(ref e)) => {
                let is_start = matches!(event, Event::Start(_));
                match e.name().local_name().as_ref() {
                    b"navMap" => in_nav_map = true,
                    // A self-closing navPoint has no End event; never push it.
                    b"navPoint" if in_nav_map && is_start => {
                        if point_stack.len() >= MAX_DEPTH {
                            return Err(EpubError::Navigation(format!(
                                "navPoint nesting exceeds {MAX_DEPTH} levels"
                            )));
                        }
                        point_stack.push(NavPoint::default());
                    }
                    b"text" => in_text = true,
                    b"content" if in_nav_map => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"src" {
                                let src = reader
                                    .decoder()
                                    .decode(attr.value.as_ref())
                                    .unwrap_or_default();
                                if let Some(point) = point_stack.last_mut() {
                                    point.href = src.into_owned();
                                }
                            }
                        }
                    }
                    b"meta" => {
                        let mut name = None;
                        let mut value = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.local_name().as_ref() {
                                b"name" => {
                                    name =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned());
                                }
                                b"content" => {
                                    value =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned());
                                }
                                _ => {}
                            }
                        }
                        if name.as_deref() == Some("dtb:depth") {
                            ncx.declared_depth =
                                value.and_then(|v| v.trim().parse::<usize>().ok());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    let text = reader.decoder().decode(&e).unwrap_or_default();
                    if let Some(point) = point_stack.last_mut() {
                        if point.label.is_empty() {
                            point.label = text.into_owned();
                        } else {
                            point.label.push_str(text.as_ref());
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().local_name().as_ref() {
                b"text" => in_text = false,
                b"navMap" => in_nav_map = false,
                b"navPoint" => {
                    if let Some(point) = point_stack.pop() {
                        match point_stack.last_mut() {
                            Some(parent) => parent.children.push(point),
                            None => ncx.toc.push(point),
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::Navigation(format!("NCX parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(ncx)
}
