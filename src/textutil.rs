use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

static SPACE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t 　]+").expect("space run"));
static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[一-鿿]").expect("cjk"));
static KANA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[぀-ヿ]").expect("kana"));
static LATIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").expect("latin"));
static UNSAFE_FILE_CHAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.-]+").expect("file char"));

/// Collapses space runs (including ideographic spaces) and trims.
pub fn clean_line(line: &str) -> String {
    SPACE_RUN_RE.replace_all(line, " ").trim().to_string()
}

/// Chapter text to clean lines: carriage returns dropped, each line
/// space-collapsed, empty lines removed.
pub fn normalize_block(text: &str) -> Vec<String> {
    text.replace('\r', "")
        .split('\n')
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Replaces filesystem-hostile characters so a chapter title can be used
/// in a file name.
pub fn sanitize_file_stem(title: &str) -> String {
    let cleaned = UNSAFE_FILE_CHAR_RE.replace_all(title.trim(), "_");
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Ja,
    Zh,
}

impl Lang {
    pub fn code(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ja => "ja",
            Lang::Zh => "zh",
        }
    }
}

/// Coarse script-based guess, good enough to label report columns when no
/// language is configured. Kana means Japanese; otherwise a Han-heavy
/// sample is Chinese; everything else falls back to English.
pub fn detect_language(sample: &str) -> Lang {
    let kana = KANA_RE.find_iter(sample).count();
    let han = CJK_RE.find_iter(sample).count();
    let latin = LATIN_RE.find_iter(sample).count();
    if kana >= 4 || (kana >= 1 && kana * 10 >= han) {
        Lang::Ja
    } else if han >= latin.saturating_mul(2).max(12) {
        Lang::Zh
    } else {
        Lang::En
    }
}

/// Decodes raw text bytes, honoring a UTF-8/UTF-16 BOM when present.
pub fn decode_bytes(bytes: &[u8]) -> anyhow::Result<String> {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(&bytes[bom_len..]);
        return Ok(text.into_owned());
    }
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        anyhow::bail!("content is not valid UTF-8");
    }
    Ok(text.into_owned())
}

/// Reads a text file, honoring a UTF-8/UTF-16 BOM when present.
pub fn read_text_auto(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read text file {}", path.display()))?;
    decode_bytes(&bytes).with_context(|| format!("decode {}", path.display()))
}

/// Non-empty sentence lines of a file, one per line.
pub fn read_sentence_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = read_text_auto(path)?;
    Ok(normalize_block(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_line_collapses_mixed_whitespace() {
        assert_eq!(clean_line("  a\t b\u{3000}c  "), "a b c");
    }

    #[test]
    fn normalize_block_drops_blank_lines_and_crs() {
        let lines = normalize_block("one\r\n\r\n  two  \n\n\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn sanitize_keeps_word_chars_only() {
        assert_eq!(sanitize_file_stem("第1章: はじまり?"), "第1章_はじまり");
        assert_eq!(sanitize_file_stem("  /:*?  "), "untitled");
    }

    #[test]
    fn detects_scripts() {
        assert_eq!(detect_language("The quick brown fox."), Lang::En);
        assert_eq!(detect_language("それは夏の終わりのことだった。"), Lang::Ja);
        assert_eq!(
            detect_language("这是一个很长的中文句子，没有任何假名。"),
            Lang::Zh
        );
    }

    #[test]
    fn reads_utf8_and_utf16_files() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.txt");
        std::fs::write(&plain, "héllo\n").unwrap();
        assert_eq!(read_text_auto(&plain).unwrap(), "héllo\n");

        let bom = dir.path().join("bom.txt");
        let mut bytes = vec![0xff, 0xfe];
        for unit in "héllo\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        std::fs::write(&bom, bytes).unwrap();
        assert_eq!(read_text_auto(&bom).unwrap(), "héllo\n");
    }
}
