use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::document::ChapterDocument;
use crate::epub::EpubPackage;
use crate::progress::ConsoleProgress;
use crate::textutil;

#[derive(Debug)]
struct ManifestItem {
    href: String,
    media_type: String,
    properties: String,
}

#[derive(Debug, Default)]
struct PackageDoc {
    items: BTreeMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_id: Option<String>,
}

/// Reads an EPUB and returns its spine chapters in reading order.
///
/// Image-only pages and navigation stubs yield no text and are omitted, as
/// are spine documents the archive cannot actually produce (those only get a
/// warning so one bad chapter does not sink the whole book).
pub fn extract_epub(
    path: &Path,
    progress: &ConsoleProgress,
) -> anyhow::Result<Vec<ChapterDocument>> {
    let pkg = EpubPackage::read(path)?;
    let opf_path = rootfile_path(&pkg)?;
    let opf_dir = parent_dir(&opf_path);
    let opf_xml = pkg
        .text(&opf_path)
        .with_context(|| format!("read package document {opf_path}"))?;
    let opf = parse_opf(&opf_xml).with_context(|| format!("parse package document {opf_path}"))?;

    let titles = match find_ncx(&pkg, &opf, opf_dir) {
        Some((ncx_path, ncx_xml)) => match parse_ncx_titles(&ncx_xml, parent_dir(&ncx_path)) {
            Ok(titles) => titles,
            Err(err) => {
                progress.warn(format!("unreadable toc {ncx_path}: {err:#}"));
                HashMap::new()
            }
        },
        None => HashMap::new(),
    };

    let mut chapters: Vec<ChapterDocument> = Vec::new();
    let mut skipped_empty = 0usize;
    for idref in &opf.spine {
        let item = match opf.items.get(idref) {
            Some(item) => item,
            None => {
                progress.warn(format!("spine item {idref} is not in the manifest"));
                continue;
            }
        };
        if !is_document_type(&item.media_type) || has_property(&item.properties, "nav") {
            continue;
        }
        let doc_path = resolve_href(opf_dir, &item.href);
        let bytes = match pkg.bytes(&doc_path) {
            Some(bytes) => bytes,
            None => {
                progress.warn(format!("spine document {doc_path} is missing from the archive"));
                continue;
            }
        };
        let lines = match chapter_lines(bytes) {
            Ok(lines) => lines,
            Err(err) => {
                progress.warn(format!("unreadable chapter {doc_path}: {err:#}"));
                continue;
            }
        };
        if lines.is_empty() {
            skipped_empty += 1;
            continue;
        }
        let stem = file_stem(&doc_path);
        let title = titles
            .get(&doc_path)
            .cloned()
            .unwrap_or_else(|| stem.clone());
        chapters.push(ChapterDocument {
            chapter_id: stem,
            title,
            lines,
        });
    }

    progress.info(format!(
        "{}: {} text chapters ({skipped_empty} empty spine documents skipped)",
        path.display(),
        chapters.len(),
    ));
    Ok(chapters)
}

/// Drops the shortest chapters (front matter, colophons, ads) for as long as
/// the shed text stays within `threshold` of the book's total characters.
/// Chapters of at least `min_keep_len` characters are never dropped. The
/// survivors keep their reading order.
pub fn filter_chapters(
    chapters: Vec<ChapterDocument>,
    threshold: f64,
    min_keep_len: usize,
) -> Vec<ChapterDocument> {
    let total: usize = chapters.iter().map(|c| c.total_chars()).sum();
    let budget = (total as f64 * threshold) as usize;

    let mut order: Vec<usize> = (0..chapters.len()).collect();
    order.sort_by_key(|&i| chapters[i].total_chars());

    let mut dropped = vec![false; chapters.len()];
    let mut spent = 0usize;
    for &i in &order {
        let chars = chapters[i].total_chars();
        if chars >= min_keep_len || spent + chars > budget {
            break;
        }
        spent += chars;
        dropped[i] = true;
    }

    chapters
        .into_iter()
        .zip(dropped)
        .filter(|(_, dropped)| !*dropped)
        .map(|(chapter, _)| chapter)
        .collect()
}

/// Writes one numbered `.stage1` file per chapter. The number is the position
/// after filtering, which is what lets two editions of the same book pair up
/// file-by-file later.
pub fn write_stage_files(
    chapters: &[ChapterDocument],
    out_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;
    let mut written = Vec::with_capacity(chapters.len());
    for (index, chapter) in chapters.iter().enumerate() {
        let path = out_dir.join(chapter.stage_file_name(index));
        let mut content = chapter.lines.join("\n");
        content.push('\n');
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn rootfile_path(pkg: &EpubPackage) -> anyhow::Result<String> {
    let xml = pkg
        .text("META-INF/container.xml")
        .context("not an epub container")?;
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read container event")? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(path) = attr_local(&e, b"full-path")? {
                        return Ok(path);
                    }
                }
            }
            _ => {}
        }
    }
    anyhow::bail!("container.xml does not name a rootfile")
}

fn parse_opf(xml: &str) -> anyhow::Result<PackageDoc> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut doc = PackageDoc::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read package event")? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    let id = attr_local(&e, b"id")?;
                    let href = attr_local(&e, b"href")?;
                    if let (Some(id), Some(href)) = (id, href) {
                        doc.items.insert(
                            id,
                            ManifestItem {
                                href,
                                media_type: attr_local(&e, b"media-type")?.unwrap_or_default(),
                                properties: attr_local(&e, b"properties")?.unwrap_or_default(),
                            },
                        );
                    }
                }
                b"spine" => {
                    doc.toc_id = attr_local(&e, b"toc")?;
                }
                b"itemref" => {
                    if let Some(idref) = attr_local(&e, b"idref")? {
                        doc.spine.push(idref);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    if doc.spine.is_empty() {
        anyhow::bail!("package document has no spine");
    }
    Ok(doc)
}

fn find_ncx(pkg: &EpubPackage, opf: &PackageDoc, opf_dir: &str) -> Option<(String, String)> {
    let by_id = opf.toc_id.as_ref().and_then(|id| opf.items.get(id));
    let item = by_id.or_else(|| {
        opf.items
            .values()
            .find(|item| item.media_type == "application/x-dtbncx+xml")
    })?;
    let path = resolve_href(opf_dir, &item.href);
    let xml = pkg.text(&path).ok()?;
    Some((path, xml))
}

/// Chapter titles from the NCX navMap, keyed by the resolved document path.
/// The first navPoint naming a document wins; later ones point at sections
/// inside it.
fn parse_ncx_titles(xml: &str, ncx_dir: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut titles: HashMap<String, String> = HashMap::new();
    let mut in_nav_map = false;
    let mut in_text = false;
    let mut label = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read toc event")? {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"navMap" => in_nav_map = true,
                b"navLabel" => label.clear(),
                b"text" => in_text = true,
                b"content" if in_nav_map => record_title(&e, ncx_dir, &label, &mut titles)?,
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"content" && in_nav_map {
                    record_title(&e, ncx_dir, &label, &mut titles)?;
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"navMap" => in_nav_map = false,
                b"text" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t.unescape_with(entity).context("toc label")?;
                label.push_str(&text);
            }
            _ => {}
        }
    }
    Ok(titles)
}

fn record_title(
    e: &BytesStart<'_>,
    ncx_dir: &str,
    label: &str,
    titles: &mut HashMap<String, String>,
) -> anyhow::Result<()> {
    if let Some(src) = attr_local(e, b"src")? {
        let title = textutil::clean_line(label);
        if !title.is_empty() {
            titles.entry(resolve_href(ncx_dir, &src)).or_insert(title);
        }
    }
    Ok(())
}

fn chapter_lines(bytes: &[u8]) -> anyhow::Result<Vec<String>> {
    let xml = textutil::decode_bytes(bytes)?;
    xhtml_lines(&xml)
}

/// Flattens one XHTML document into cleaned text lines. Block elements end a
/// line; head, script, and style subtrees contribute nothing.
fn xhtml_lines(xml: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut skip = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read xhtml event")? {
            Event::Eof => break,
            Event::Start(e) => {
                if is_skipped(e.local_name().as_ref()) {
                    skip += 1;
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if is_skipped(name.as_ref()) {
                    skip = skip.saturating_sub(1);
                } else if skip == 0 && is_block(name.as_ref()) {
                    out.push('\n');
                }
            }
            Event::Empty(e) => {
                if skip == 0 && e.local_name().as_ref() == b"br" {
                    out.push('\n');
                }
            }
            Event::Text(t) if skip == 0 => {
                let text = t.unescape_with(entity).context("unescape xhtml text")?;
                out.push_str(&text);
            }
            Event::CData(t) if skip == 0 => {
                out.push_str(&String::from_utf8_lossy(&t));
            }
            _ => {}
        }
    }
    Ok(textutil::normalize_block(&out))
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"li"
            | b"blockquote"
            | b"tr"
            | b"table"
            | b"section"
    )
}

fn is_skipped(name: &[u8]) -> bool {
    matches!(name, b"head" | b"script" | b"style")
}

fn is_document_type(media_type: &str) -> bool {
    media_type == "application/xhtml+xml" || media_type == "text/html"
}

fn has_property(properties: &str, wanted: &str) -> bool {
    properties.split_whitespace().any(|p| p == wanted)
}

/// XHTML carries HTML entities a strict XML parser does not know. The five
/// predefined ones must be listed here too: a custom resolver replaces the
/// built-in table instead of extending it.
fn entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        "nbsp" | "ensp" | "emsp" | "thinsp" => Some(" "),
        "shy" | "zwnj" | "zwj" => Some(""),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201C}"),
        "rdquo" => Some("\u{201D}"),
        "hellip" => Some("\u{2026}"),
        "middot" => Some("\u{B7}"),
        "copy" => Some("\u{A9}"),
        _ => None,
    }
}

fn attr_local(e: &BytesStart<'_>, name: &[u8]) -> anyhow::Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.context("attribute")?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().context("attribute value")?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

fn file_stem(path: &str) -> String {
    let name = match path.rsplit_once('/') {
        Some((_, name)) => name,
        None => path,
    };
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Resolves a (possibly percent-encoded) href against the directory of the
/// document that mentions it, yielding a zip entry path.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let raw = match href.split_once('#') {
        Some((path, _fragment)) => path,
        None => href,
    };
    let decoded = percent_decode(raw);

    let mut parts: Vec<&str> = Vec::new();
    if !decoded.starts_with('/') {
        for seg in base_dir.split('/') {
            if !seg.is_empty() {
                parts.push(seg);
            }
        }
    }
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            seg => parts.push(seg),
        }
    }
    parts.join("/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata/>
  <manifest>
    <item id="toc" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="text/cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="text/ch%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine toc="toc">
    <itemref idref="cover"/>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    const NCX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>Some Book</text></docTitle>
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>First Chapter</text></navLabel>
      <content src="text/ch%201.xhtml"/>
    </navPoint>
    <navPoint id="n2" playOrder="2">
      <navLabel><text>Second Chapter</text></navLabel>
      <content src="text/ch2.xhtml#start"/>
    </navPoint>
  </navMap>
</ncx>"#;

    const COVER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Cover</title></head>
<body><div><img src="../cover.jpg" alt=""/></div></body>
</html>"#;

    const CH1: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>junk</title><style>p { margin: 0 }</style></head>
<body>
  <h1>First Chapter</h1>
  <p>It was a quiet morning in the harbor town.</p>
  <p>He said <i>no</i>, twice&nbsp;over&hellip;</p>
</body>
</html>"#;

    const CH2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>junk</title></head>
<body>
  <p>Second chapter text.</p>
  <div>Another line<br/>after a break</div>
</body>
</html>"#;

    fn write_epub(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file(*name, opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn chapter(id: &str, line_len: usize) -> ChapterDocument {
        ChapterDocument {
            chapter_id: id.to_string(),
            title: id.to_string(),
            lines: vec!["x".repeat(line_len)],
        }
    }

    #[test]
    fn extracts_spine_chapters_in_reading_order() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("book.epub");
        write_epub(
            &book,
            &[
                ("mimetype", "application/epub+zip"),
                ("META-INF/container.xml", CONTAINER),
                ("OEBPS/content.opf", OPF),
                ("OEBPS/toc.ncx", NCX),
                ("OEBPS/text/cover.xhtml", COVER),
                ("OEBPS/text/ch 1.xhtml", CH1),
                ("OEBPS/text/ch2.xhtml", CH2),
                ("OEBPS/style.css", "p { margin: 0 }"),
            ],
        );

        let chapters = extract_epub(&book, &ConsoleProgress::new(false)).unwrap();
        assert_eq!(chapters.len(), 2, "cover page has no text and is dropped");

        assert_eq!(chapters[0].chapter_id, "ch 1");
        assert_eq!(chapters[0].title, "First Chapter");
        assert_eq!(
            chapters[0].lines,
            vec![
                "First Chapter".to_string(),
                "It was a quiet morning in the harbor town.".to_string(),
                "He said no, twice over\u{2026}".to_string(),
            ]
        );

        assert_eq!(chapters[1].chapter_id, "ch2");
        assert_eq!(chapters[1].title, "Second Chapter");
        assert_eq!(
            chapters[1].lines,
            vec![
                "Second chapter text.".to_string(),
                "Another line".to_string(),
                "after a break".to_string(),
            ]
        );
    }

    #[test]
    fn archives_without_a_container_are_rejected() {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("not-a-book.epub");
        write_epub(&book, &[("readme.txt", "hello")]);

        let err = extract_epub(&book, &ConsoleProgress::new(false)).unwrap_err();
        assert!(format!("{err:#}").contains("container"));
    }

    #[test]
    fn short_chapters_are_dropped_within_the_budget() {
        let chapters = vec![
            chapter("big1", 1500),
            chapter("tiny", 10),
            chapter("big2", 1200),
            chapter("small", 200),
        ];
        let kept = filter_chapters(chapters, 0.2, 1000);
        let ids: Vec<&str> = kept.iter().map(|c| c.chapter_id.as_str()).collect();
        assert_eq!(ids, vec!["big1", "big2"]);
    }

    #[test]
    fn min_keep_len_overrides_the_budget() {
        let chapters = vec![chapter("a", 100), chapter("b", 5000)];
        let kept = filter_chapters(chapters, 0.5, 50);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn stage_files_are_numbered_and_sanitized() {
        let dir = TempDir::new().unwrap();
        let chapters = vec![ChapterDocument {
            chapter_id: "ch 1".to_string(),
            title: "First: Chapter?".to_string(),
            lines: vec!["Line one.".to_string(), "Line two.".to_string()],
        }];

        let written = write_stage_files(&chapters, dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].file_name().and_then(|n| n.to_str()),
            Some("00__ch_1__First_Chapter.stage1")
        );
        let content = fs::read_to_string(&written[0]).unwrap();
        assert_eq!(content, "Line one.\nLine two.\n");
    }

    #[test]
    fn hrefs_resolve_against_their_document() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../images/a.png"), "OEBPS/images/a.png");
        assert_eq!(resolve_href("", "ch1.xhtml#frag"), "ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "/abs.xhtml"), "abs.xhtml");
        assert_eq!(resolve_href("OEBPS", "ch%201.xhtml"), "OEBPS/ch 1.xhtml");
        assert_eq!(resolve_href("OEBPS", "./ch1.xhtml"), "OEBPS/ch1.xhtml");
    }

    #[test]
    fn scripts_and_styles_never_leak_into_lines() {
        let xml = r#"<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>t</title></head>
<body>
  <script>var x = "hidden";</script>
  <p>Visible text.</p>
  <style>.c { color: red }</style>
</body>
</html>"#;
        assert_eq!(xhtml_lines(xml).unwrap(), vec!["Visible text.".to_string()]);
    }
}
