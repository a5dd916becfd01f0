//! diffcore - print a parsed, aligned diff for one file.

use std::io::{self, BufWriter, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use diffcore::core::{
    align_blocks, align_unified, AlignedRow, CacheConfig, DiffEngine, DiffHunk, DiffLine,
    DiffLineKind, DiffOptions, DiffRequest, FeatureToggle, GitSource, HunkCache, JsonPreferences,
    LineKinds, MemorySource, PreferenceStore, Preferences, RepoWatcher, Search, SearchOptions, Side,
    TextSource,
};

/// Print a unified diff as structured split or unified rows.
#[derive(Parser, Debug)]
#[command(name = "diffcore", version, about)]
struct Cli {
    /// Repository-relative file path
    #[arg(value_name = "PATH")]
    path: String,

    /// Diff staged changes instead of the worktree
    #[arg(long)]
    staged: bool,

    /// Lines of context
    #[arg(short = 'U', long = "context", default_value_t = 3)]
    context: u32,

    /// Large-file mode: auto, on, off
    #[arg(long, default_value_t = FeatureToggle::Auto)]
    lfm: FeatureToggle,

    /// Side-by-side layout: auto, on, off
    #[arg(long = "side-by-side", default_value_t = FeatureToggle::Auto)]
    side_by_side: FeatureToggle,

    /// Force a layout instead of following the render plan
    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// Disable rename detection
    #[arg(long)]
    no_renames: bool,

    /// Read the diff from a file ("-" for stdin) instead of running git
    #[arg(long, value_name = "FILE")]
    patch: Option<String>,

    /// Materialize collapsed hunks before printing
    #[arg(long)]
    expand: bool,

    /// Search term; prints matches instead of rows
    #[arg(long, value_name = "TERM")]
    search: Option<String>,

    /// Case-insensitive search
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Whole-word search
    #[arg(short = 'w', long)]
    whole_word: bool,

    /// Treat the search term as a regex
    #[arg(short = 'r', long)]
    regex: bool,

    /// Print preflight and cache statistics
    #[arg(long)]
    stats: bool,

    /// Re-print whenever the file changes on disk
    #[arg(long, conflicts_with = "patch")]
    watch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layout {
    Split,
    Unified,
}

fn main() -> ExitCode {
    env_logger::init();
    diffcore::metrics::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let source = build_source(&cli)?;
    let (prefs, cache_config) = load_prefs();
    let cache = Arc::new(HunkCache::new(cache_config));
    let engine = DiffEngine::new(source, prefs, cache);

    let options = DiffOptions {
        context_lines: cli.context,
        large_file_mode: cli.lfm,
        side_by_side: cli.side_by_side,
        no_renames: cli.no_renames,
        ..DiffOptions::default()
    };
    let request = DiffRequest::new(cli.path.clone(), cli.staged).with_options(options);

    render(&cli, &engine, &request)?;
    if !cli.watch {
        return Ok(());
    }

    let root = std::env::current_dir().context("reading current directory")?;
    let watcher = RepoWatcher::new(&root).context("starting file watcher")?;
    loop {
        thread::sleep(Duration::from_millis(250));
        let changed = watcher.poll();
        if !changed.iter().any(|p| *p == cli.path) {
            continue;
        }
        engine.invalidate_file(&cli.path);
        println!();
        render(&cli, &engine, &request)?;
    }
}

fn render(cli: &Cli, engine: &DiffEngine, request: &DiffRequest) -> Result<()> {
    let mut outcome = engine
        .request(request)
        .with_context(|| format!("loading diff for {}", cli.path))?;

    if cli.expand {
        for (index, hunk) in outcome.hunks.iter_mut().enumerate() {
            if !hunk.is_materialized() {
                if let Some(expanded) = engine.expand_hunk(&cli.path, cli.staged, index) {
                    *hunk = expanded;
                }
            }
        }
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if cli.stats {
        writeln!(out, "{:#?}", outcome.stats)?;
        writeln!(out, "{:#?}", outcome.plan)?;
    }

    if outcome.is_binary() {
        writeln!(out, "Binary file {} differs", cli.path)?;
        out.flush()?;
        return Ok(());
    }

    if let Some(term) = &cli.search {
        let options = SearchOptions {
            case_sensitive: !cli.ignore_case,
            whole_word: cli.whole_word,
            regex: cli.regex,
            kinds: LineKinds::default(),
        };
        print_search(&mut out, &outcome.hunks, term, options)?;
    } else {
        let layout = cli.layout.unwrap_or(if outcome.plan.side_by_side {
            Layout::Split
        } else {
            Layout::Unified
        });
        match layout {
            Layout::Split => print_split(&mut out, &outcome.hunks)?,
            Layout::Unified => print_unified(&mut out, &outcome.hunks)?,
        }
    }

    if cli.stats {
        writeln!(out, "{:#?}", engine.cache().stats())?;
    }
    out.flush()?;
    Ok(())
}

fn build_source(cli: &Cli) -> Result<Arc<dyn TextSource>> {
    let Some(patch_path) = &cli.patch else {
        let cwd = std::env::current_dir().context("reading current directory")?;
        return Ok(Arc::new(GitSource::new(cwd)));
    };
    let mut text = String::new();
    if patch_path == "-" {
        io::stdin()
            .read_to_string(&mut text)
            .context("reading patch from stdin")?;
    } else {
        text = std::fs::read_to_string(patch_path)
            .with_context(|| format!("reading patch {}", patch_path))?;
    }
    let source = MemorySource::new();
    source.insert_patch(cli.path.clone(), cli.staged, text);
    Ok(Arc::new(source))
}

fn load_prefs() -> (Arc<dyn PreferenceStore>, CacheConfig) {
    match JsonPreferences::load_default() {
        Ok(prefs) => {
            let cache = prefs.snapshot().cache;
            (Arc::new(prefs), cache)
        }
        Err(e) => {
            log::warn!("using default preferences: {}", e);
            (Arc::new(Preferences::default()), CacheConfig::default())
        }
    }
}

fn line_no(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_default()
}

fn cell(line: Option<&DiffLine>) -> (String, &str) {
    match line {
        Some(l) => (line_no(l.old_line_number.or(l.new_line_number)), l.text.as_str()),
        None => (String::new(), ""),
    }
}

fn print_split(out: &mut impl Write, hunks: &[DiffHunk]) -> io::Result<()> {
    const WIDTH: usize = 60;
    for row in align_blocks(hunks) {
        match row {
            AlignedRow::Header { text, .. } => writeln!(out, "{}", text)?,
            AlignedRow::Content { left, right, .. } => {
                let (ln, lt) = cell(left.as_ref());
                let rn = line_no(right.as_ref().and_then(|l| l.new_line_number));
                let rt = right.as_ref().map_or("", |l| l.text.as_str());
                let lt: String = lt.chars().take(WIDTH).collect();
                writeln!(out, "{:>5} {:<WIDTH$} | {:>5} {}", ln, lt, rn, rt)?;
            }
        }
    }
    Ok(())
}

fn print_unified(out: &mut impl Write, hunks: &[DiffHunk]) -> io::Result<()> {
    for line in align_unified(hunks) {
        let marker = match line.side {
            Side::A => '-',
            Side::B => '+',
            Side::Both => ' ',
        };
        if line.kind == DiffLineKind::HunkHeader {
            writeln!(out, "{}", line.text)?;
        } else {
            writeln!(
                out,
                "{:>5} {:>5} {}{}",
                line_no(line.old_line_number),
                line_no(line.new_line_number),
                marker,
                line.text
            )?;
        }
    }
    Ok(())
}

fn print_search(
    out: &mut impl Write,
    hunks: &[DiffHunk],
    term: &str,
    options: SearchOptions,
) -> Result<()> {
    let mut search = Search::new(hunks, term, options)?;
    for m in search.by_ref() {
        writeln!(
            out,
            "hunk {} line {}: {} ({} matches)",
            m.hunk_index,
            m.line_index,
            m.line_snapshot,
            m.match_ranges.len()
        )?;
    }
    let summary = search.summary();
    writeln!(
        out,
        "{} matches on {} lines ({} collapsed hunks not searched)",
        summary.total_matches, summary.matched_lines, summary.skipped_deferred
    )?;
    Ok(())
}
