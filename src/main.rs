use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use bitext_loom::config;
use bitext_loom::embed::{DiskCachedProvider, EmbeddingProvider, HashedEmbedder};
use bitext_loom::epub::{extract_epub, filter_chapters, write_stage_files};
use bitext_loom::pipeline::{align_batch, pair_files};
use bitext_loom::progress::ConsoleProgress;
use bitext_loom::report::{load_groups, resolve_langs, write_html_report, write_tmx};

#[derive(Parser, Debug)]
#[command(name = "bitext-loom")]
#[command(about = "EPUB chapter extraction and bilingual sentence alignment", long_about = None)]
#[command(version)]
struct Args {
    /// Config file path (default: search for bitext-loom.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress progress output on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Write a commented default config, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory for --init-config (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract chapter text from EPUB books into staged line files
    Extract {
        /// Input .epub files
        #[arg(short, long, value_name = "EPUB", required = true)]
        input: Vec<PathBuf>,

        /// Output directory (one subdirectory per book)
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Fraction of a book's characters that may be shed as short chapters
        #[arg(long)]
        threshold: Option<f64>,

        /// Chapters at least this many characters long are always kept
        #[arg(long)]
        min_keep_len: Option<usize>,
    },

    /// Align staged chapter files sentence-by-sentence
    Align {
        /// Source-language chapter files, paired with targets by sorted order
        #[arg(short = 's', long, value_name = "FILE", required = true)]
        source: Vec<PathBuf>,

        /// Target-language chapter files
        #[arg(short = 't', long, value_name = "FILE", required = true)]
        target: Vec<PathBuf>,

        /// Output directory for aligned JSON
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// global | windowed | auto
        #[arg(long)]
        strategy: Option<String>,

        /// Largest sentence group on either side of one alignment
        #[arg(short = 'm', long)]
        max_align_size: Option<usize>,

        /// Half-width of the fine search band (windowed)
        #[arg(short = 'w', long)]
        window: Option<usize>,

        /// Nearest coarse neighbors per unit (windowed)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Cost of leaving one sentence unmatched
        #[arg(long)]
        deletion_penalty: Option<f64>,

        /// Per-pair time limit in seconds (0 = none)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Worker threads for the pair batch (0 = all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// GGUF embedding model (requires a build with the native feature)
        #[arg(long, value_name = "GGUF")]
        model: Option<PathBuf>,

        /// Cache sentence embeddings in this JSON file between runs
        #[arg(long, value_name = "JSON")]
        embed_cache: Option<PathBuf>,
    },

    /// Render aligned JSON into review HTML and TMX memories
    Report {
        /// Aligned .json files
        #[arg(short, long, value_name = "JSON", required = true)]
        input: Vec<PathBuf>,

        /// Output directory (default: next to each input)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// html | tmx | both
        #[arg(long, default_value = "html")]
        format: String,

        /// Source language code (default: config, else detected)
        #[arg(long)]
        src_lang: Option<String>,

        /// Target language code (default: config, else detected)
        #[arg(long)]
        tgt_lang: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = config::init_default_config(&dir).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let command = match args.command {
        Some(command) => command,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nTIPS:\n  - extract two editions of the same book, then align the staged chapters:\n      bitext-loom extract -i original.epub -o staged/\n      bitext-loom align -s 'staged/original/*.stage1' -t 'staged/translation/*.stage1' -o aligned/\n  - config search: bitext-loom.toml (upwards); --init-config writes a template.\n"
            );
            return Ok(());
        }
    };

    let (cfg, cfg_path) = config::load_or_default(args.config.as_deref())?;
    if let Some(path) = &cfg_path {
        progress.info(format!("config: {}", path.display()));
    }

    match command {
        Command::Extract {
            input,
            output,
            threshold,
            min_keep_len,
        } => {
            let mut section = cfg.extract.clone();
            if let Some(v) = threshold {
                section.threshold = v;
            }
            if let Some(v) = min_keep_len {
                section.min_keep_len = v;
            }
            run_extract(&input, &output, section.threshold, section.min_keep_len, &progress)
        }
        Command::Align {
            source,
            target,
            output,
            strategy,
            max_align_size,
            window,
            top_k,
            deletion_penalty,
            timeout_secs,
            threads,
            model,
            embed_cache,
        } => {
            let mut section = cfg.align.clone();
            if let Some(v) = strategy {
                section.strategy = v;
            }
            if let Some(v) = max_align_size {
                section.max_align_size = v;
            }
            if let Some(v) = window {
                section.window = v;
            }
            if let Some(v) = top_k {
                section.top_k = v;
            }
            if let Some(v) = deletion_penalty {
                section.deletion_penalty = v;
            }
            if let Some(v) = timeout_secs {
                section.timeout_secs = v;
            }
            let threads = threads.unwrap_or(cfg.batch.threads);
            run_align(
                &source,
                &target,
                &output,
                &section,
                threads,
                model.as_deref(),
                embed_cache.as_deref(),
                &progress,
            )
        }
        Command::Report {
            input,
            output,
            format,
            src_lang,
            tgt_lang,
        } => {
            let mut section = cfg.report.clone();
            if let Some(v) = src_lang {
                section.src_lang = v;
            }
            if let Some(v) = tgt_lang {
                section.tgt_lang = v;
            }
            run_report(&input, output.as_deref(), &format, &section, &progress)
        }
    }
}

fn run_extract(
    inputs: &[PathBuf],
    out_dir: &Path,
    threshold: f64,
    min_keep_len: usize,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    for book in inputs {
        let chapters = extract_epub(book, progress)?;
        let total = chapters.len();
        let kept = filter_chapters(chapters, threshold, min_keep_len);
        let stem = book
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("book");
        let dir = out_dir.join(stem);
        let written = write_stage_files(&kept, &dir)?;
        progress.info(format!(
            "{}: staged {} of {} chapters in {}",
            book.display(),
            written.len(),
            total,
            dir.display()
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_align(
    source: &[PathBuf],
    target: &[PathBuf],
    out_dir: &Path,
    section: &config::AlignSection,
    threads: usize,
    model: Option<&Path>,
    embed_cache: Option<&Path>,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let strategy = section.strategy()?;
    let align_config = section.align_config();
    align_config.validate()?;

    let provider = build_provider(model, embed_cache)?;
    progress.info(format!(
        "embeddings: {} ({} dims)",
        provider.as_dyn().signature(),
        provider.as_dyn().dimension()
    ));

    let pairs = pair_files(source, target, progress);
    if pairs.is_empty() {
        anyhow::bail!("no chapter pairs to align");
    }

    let summary = align_batch(
        &pairs,
        out_dir,
        strategy,
        &align_config,
        provider.as_dyn(),
        threads,
        progress,
    )?;
    provider.save()?;
    progress.info(format!(
        "aligned {} pairs ({} failed) into {}",
        summary.aligned,
        summary.failed,
        out_dir.display()
    ));
    Ok(())
}

fn run_report(
    inputs: &[PathBuf],
    out_dir: Option<&Path>,
    format: &str,
    section: &config::ReportSection,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let (want_html, want_tmx) = match format {
        "html" => (true, false),
        "tmx" => (false, true),
        "both" => (true, true),
        other => anyhow::bail!("unknown report format {other:?}, expected html, tmx or both"),
    };
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
    }

    for input in inputs {
        let groups = load_groups(input)?;
        let (src_lang, tgt_lang) = resolve_langs(&groups, &section.src_lang, &section.tgt_lang);
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("alignment");
        let base = match out_dir {
            Some(dir) => dir.join(stem),
            None => input.with_extension(""),
        };
        if want_html {
            let out = base.with_extension("html");
            write_html_report(&groups, stem, &src_lang, &tgt_lang, &out)?;
            progress.info(format!("wrote {}", out.display()));
        }
        if want_tmx {
            let out = base.with_extension("tmx");
            write_tmx(&groups, &src_lang, &tgt_lang, &out)?;
            progress.info(format!("wrote {}", out.display()));
        }
    }
    Ok(())
}

/// The embedding stack for one align run: a base provider, optionally
/// wrapped in the on-disk cache.
enum Provider {
    Plain(Box<dyn EmbeddingProvider>),
    Cached(DiskCachedProvider),
}

impl Provider {
    fn as_dyn(&self) -> &dyn EmbeddingProvider {
        match self {
            Provider::Plain(p) => p.as_ref(),
            Provider::Cached(c) => c,
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        match self {
            Provider::Plain(_) => Ok(()),
            Provider::Cached(c) => c.save(),
        }
    }
}

fn build_provider(model: Option<&Path>, cache: Option<&Path>) -> anyhow::Result<Provider> {
    let base: Box<dyn EmbeddingProvider> = match model {
        Some(path) => native_provider(path)?,
        None => Box::new(HashedEmbedder::default()),
    };
    Ok(match cache {
        Some(path) => Provider::Cached(DiskCachedProvider::open(base, path)?),
        None => Provider::Plain(base),
    })
}

#[cfg(feature = "native")]
fn native_provider(path: &Path) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(bitext_loom::embed::NativeEmbedder::load(path)?))
}

#[cfg(not(feature = "native"))]
fn native_provider(_path: &Path) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    anyhow::bail!("--model requires a build with the `native` feature")
}
