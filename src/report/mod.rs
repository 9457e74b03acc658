//! Renderers for aligned chapter JSON: an HTML review page for human
//! spot-checking and TMX export for CAT tools.

mod html;
mod tmx;

use std::path::Path;

use anyhow::Context;

use crate::align::AlignmentGroup;
use crate::textutil;

pub use html::write_html_report;
pub use tmx::write_tmx;

/// Loads the alignment groups an aligned JSON file holds.
pub fn load_groups(path: &Path) -> anyhow::Result<Vec<AlignmentGroup>> {
    let text = textutil::read_text_auto(path)?;
    serde_json::from_str(&text)
        .with_context(|| format!("parse alignment file {}", path.display()))
}

/// Language codes for both sides, honoring configured overrides and falling
/// back to script detection on the group texts.
pub fn resolve_langs(
    groups: &[AlignmentGroup],
    src_override: &str,
    tgt_override: &str,
) -> (String, String) {
    let src = if src_override.is_empty() {
        detect_side(groups, |g| &g.src_texts)
    } else {
        src_override.to_string()
    };
    let tgt = if tgt_override.is_empty() {
        detect_side(groups, |g| &g.tgt_texts)
    } else {
        tgt_override.to_string()
    };
    (src, tgt)
}

fn detect_side<F>(groups: &[AlignmentGroup], side: F) -> String
where
    F: Fn(&AlignmentGroup) -> &Vec<String>,
{
    // A few kilobytes of text is plenty for script detection.
    let mut sample = String::new();
    'outer: for group in groups {
        for text in side(group) {
            sample.push_str(text);
            sample.push('\n');
            if sample.len() > 8192 {
                break 'outer;
            }
        }
    }
    textutil::detect_language(&sample).code().to_string()
}
