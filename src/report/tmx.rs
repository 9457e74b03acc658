use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::align::AlignmentGroup;

/// Writes one TMX 1.4b translation memory for an aligned chapter.
///
/// Groups with an empty side are deletions, not translation pairs, so they
/// are left out of the memory.
pub fn write_tmx(
    groups: &[AlignmentGroup],
    src_lang: &str,
    tgt_lang: &str,
    out: &Path,
) -> anyhow::Result<()> {
    let xml = render(groups, src_lang, tgt_lang)?;
    fs::write(out, xml).with_context(|| format!("write {}", out.display()))
}

fn render(groups: &[AlignmentGroup], src_lang: &str, tgt_lang: &str) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .context("write decl")?;

    let mut tmx = BytesStart::new("tmx");
    tmx.push_attribute(("version", "1.4"));
    writer.write_event(Event::Start(tmx)).context("write tmx")?;

    let mut header = BytesStart::new("header");
    header.push_attribute(("creationtool", "bitext-loom"));
    header.push_attribute(("creationtoolversion", env!("CARGO_PKG_VERSION")));
    header.push_attribute(("segtype", "block"));
    header.push_attribute(("o-tmf", "plaintext"));
    header.push_attribute(("adminlang", "en"));
    header.push_attribute(("srclang", src_lang));
    header.push_attribute(("datatype", "plaintext"));
    writer
        .write_event(Event::Empty(header))
        .context("write header")?;

    writer.write_event(Event::Start(BytesStart::new("body")))?;
    for group in groups {
        if group.src_texts.is_empty() || group.tgt_texts.is_empty() {
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new("tu")))?;
        write_tuv(&mut writer, src_lang, &group.src_texts)?;
        write_tuv(&mut writer, tgt_lang, &group.tgt_texts)?;
        writer.write_event(Event::End(BytesEnd::new("tu")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("body")))?;
    writer.write_event(Event::End(BytesEnd::new("tmx")))?;

    let mut xml = writer.into_inner();
    xml.push(b'\n');
    Ok(xml)
}

fn write_tuv<W: Write>(writer: &mut Writer<W>, lang: &str, texts: &[String]) -> anyhow::Result<()> {
    let mut tuv = BytesStart::new("tuv");
    tuv.push_attribute(("xml:lang", lang));
    writer.write_event(Event::Start(tuv))?;
    writer.write_event(Event::Start(BytesStart::new("seg")))?;
    writer.write_event(Event::Text(BytesText::new(&texts.join(" "))))?;
    writer.write_event(Event::End(BytesEnd::new("seg")))?;
    writer.write_event(Event::End(BytesEnd::new("tuv")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(src: &[&str], tgt: &[&str]) -> AlignmentGroup {
        AlignmentGroup {
            src_numbers: (0..src.len()).collect(),
            tgt_numbers: (0..tgt.len()).collect(),
            src_texts: src.iter().map(|s| s.to_string()).collect(),
            tgt_texts: tgt.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn render_str(groups: &[AlignmentGroup]) -> String {
        String::from_utf8(render(groups, "ja", "zh").unwrap()).unwrap()
    }

    #[test]
    fn header_names_tool_and_source_language() {
        let xml = render_str(&[group(&["a"], &["b"])]);
        assert!(xml.contains("<tmx version=\"1.4\">"));
        assert!(xml.contains("creationtool=\"bitext-loom\""));
        assert!(xml.contains("srclang=\"ja\""));
    }

    #[test]
    fn segments_join_group_texts_with_spaces() {
        let xml = render_str(&[group(&["First part.", "Second part."], &["Together."])]);
        assert!(xml.contains("<seg>First part. Second part.</seg>"));
        assert!(xml.contains("<seg>Together.</seg>"));
        assert!(xml.contains("xml:lang=\"zh\""));
    }

    #[test]
    fn one_sided_groups_are_left_out() {
        let xml = render_str(&[
            group(&["kept"], &["behalten"]),
            group(&["dropped"], &[]),
            group(&[], &["fallengelassen"]),
        ]);
        assert_eq!(xml.matches("<tu>").count(), 1);
        assert!(!xml.contains("dropped"));
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let xml = render_str(&[group(&["a < b & c"], &["d > e"])]);
        assert!(xml.contains("a &lt; b &amp; c"));
    }
}
