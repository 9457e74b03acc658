use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::align::AlignmentGroup;

const STYLE: &str = "<style>\n\
body { font-family: system-ui, sans-serif; margin: 1.5rem; line-height: 1.5em; }\n\
header { margin-bottom: 1rem; }\n\
header h1 { margin: 0 0 0.25rem; font-size: 1.3rem; }\n\
header p { margin: 0 0 0.5rem; color: #666; }\n\
input { width: 24rem; max-width: 100%; padding: 0.25rem 0.5rem; }\n\
.group { display: flex; border-color: #ddd; border-style: solid; border-width: 0 0 1px; padding: 0.25rem 0; }\n\
.side { flex: 1 0 0; }\n\
.gap { flex: 0 0 8px; border-color: #ddd; border-style: solid; border-width: 0 1px 0 0; margin-right: 8px; }\n\
.row { display: flex; }\n\
.num { flex: 0 0 5ch; color: #999; }\n\
</style>\n";

const FILTER_SCRIPT: &str = "<script>\n\
const q = document.getElementById('q');\n\
q.addEventListener('input', () => {\n\
  const needle = q.value.toLowerCase();\n\
  for (const row of document.querySelectorAll('.group')) {\n\
    row.hidden = needle !== '' && !row.textContent.toLowerCase().includes(needle);\n\
  }\n\
});\n\
</script>\n";

/// Renders a side-by-side review page for one aligned chapter.
///
/// Everything is inlined so the page keeps working from a file:// URL with
/// no network access.
pub fn write_html_report(
    groups: &[AlignmentGroup],
    title: &str,
    src_lang: &str,
    tgt_lang: &str,
    out: &Path,
) -> anyhow::Result<()> {
    let html = render(groups, title, src_lang, tgt_lang);
    fs::write(out, html).with_context(|| format!("write {}", out.display()))
}

fn render(groups: &[AlignmentGroup], title: &str, src_lang: &str, tgt_lang: &str) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"/>");
    html.push_str(&format!("<title>{}</title>\n", escape(title)));
    html.push_str(STYLE);
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!(
        "<header><h1>{}</h1><p>{} groups</p>\
         <input id=\"q\" type=\"search\" placeholder=\"filter text\"/></header>\n",
        escape(title),
        groups.len(),
    ));
    html.push_str("<main>\n");
    for group in groups {
        html.push_str("<div class=\"group\">");
        push_side(&mut html, src_lang, &group.src_numbers, &group.src_texts);
        html.push_str("<div class=\"gap\"></div>");
        push_side(&mut html, tgt_lang, &group.tgt_numbers, &group.tgt_texts);
        html.push_str("</div>\n");
    }
    html.push_str("</main>\n");
    html.push_str(FILTER_SCRIPT);
    html.push_str("</body>\n</html>\n");
    html
}

fn push_side(html: &mut String, lang: &str, numbers: &[usize], texts: &[String]) {
    html.push_str(&format!("<div class=\"side\" lang=\"{}\">", escape(lang)));
    for (number, text) in numbers.iter().zip(texts) {
        html.push_str(&format!(
            "<div class=\"row\"><span class=\"num\">{number}</span><span>{}</span></div>",
            escape(text),
        ));
    }
    html.push_str("</div>");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
