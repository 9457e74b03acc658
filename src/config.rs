use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::align::{AlignConfig, Strategy};

pub const CONFIG_FILE_NAME: &str = "bitext-loom.toml";

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub align: AlignSection,
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub batch: BatchSection,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignSection {
    /// "global", "windowed", or "auto".
    pub strategy: String,
    pub max_align_size: usize,
    pub deletion_penalty: f64,
    pub length_weight: f64,
    pub overlap_width: usize,
    pub top_k: usize,
    pub window: usize,
    pub auto_window_threshold: usize,
    /// Per-pair wall clock limit in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for AlignSection {
    fn default() -> Self {
        let defaults = AlignConfig::default();
        Self {
            strategy: Strategy::Auto.to_string(),
            max_align_size: defaults.max_align_size,
            deletion_penalty: defaults.deletion_penalty,
            length_weight: defaults.length_weight,
            overlap_width: defaults.overlap_width,
            top_k: defaults.top_k,
            window: defaults.window,
            auto_window_threshold: defaults.auto_window_threshold,
            timeout_secs: 0,
        }
    }
}

impl AlignSection {
    pub fn strategy(&self) -> anyhow::Result<Strategy> {
        self.strategy.parse().map_err(anyhow::Error::msg)
    }

    pub fn align_config(&self) -> AlignConfig {
        AlignConfig {
            max_align_size: self.max_align_size,
            deletion_penalty: self.deletion_penalty,
            length_weight: self.length_weight,
            overlap_width: self.overlap_width,
            top_k: self.top_k,
            window: self.window,
            auto_window_threshold: self.auto_window_threshold,
            allow_empty: false,
            timeout: match self.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractSection {
    /// Fraction of a book's characters that may be shed as short chapters.
    pub threshold: f64,
    /// Chapters at least this many characters long are always kept.
    pub min_keep_len: usize,
}

impl Default for ExtractSection {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            min_keep_len: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportSection {
    pub src_lang: String,
    /// Empty string means detect from the text.
    pub tgt_lang: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            src_lang: "en".to_string(),
            tgt_lang: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct BatchSection {
    /// Worker threads for chapter pairs; 0 uses all cores.
    pub threads: usize,
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// The explicit path if given, otherwise the nearest `bitext-loom.toml`
/// above the working directory or the executable. No file at all means
/// built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((load_config(path)?, Some(path.to_path_buf())));
    }
    if let Some(path) = find_default_config() {
        let cfg = load_config(&path)?;
        return Ok((cfg, Some(path)));
    }
    Ok((AppConfig::default(), None))
}

pub fn find_default_config() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILE_NAME, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILE_NAME, 8) {
                return Some(p);
            }
        }
    }
    None
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub const DEFAULT_CONFIG_TOML: &str = r#"# bitext-loom configuration.
# Values shown are the defaults; delete anything you do not override.

[align]
# global | windowed | auto (auto switches to windowed above auto_window_threshold sentences)
strategy = "auto"
# Largest sentence group on either side of one alignment.
max_align_size = 8
# Cost of leaving one sentence unmatched.
deletion_penalty = 0.6
# Weight of the length-mismatch penalty on match costs.
length_weight = 0.2
# Coarse pass: unit width and nearest neighbors per unit.
overlap_width = 4
top_k = 5
# Half-width of the fine search band around the anchor curve.
window = 10
auto_window_threshold = 300
# Per-pair wall clock limit in seconds; 0 disables it.
timeout_secs = 0

[extract]
# Fraction of a book's characters that may be shed as short chapters.
threshold = 0.05
# Chapters at least this many characters long are always kept.
min_keep_len = 1000

[report]
src_lang = "en"
# Empty string means detect from the text.
tgt_lang = ""

[batch]
# Worker threads for chapter pairs; 0 uses all cores.
threads = 0
"#;

/// Writes a commented default config next to the user, refusing to clobber
/// an existing one.
pub fn init_default_config(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
