//! frag: content-defined fragment splitting and dedup statistics
//!
//! Commands:
//!   points <file>               - print the raw boundary stream
//!   hash <file>+                - write `<sha512-hex> <length>` fragment records
//!   count [<records>]           - count records (stdin when none) and summarize
//!   scan <file>+                - split, hash, and count in one pass
//!   split <dstdir> <file>       - store each fragment as <dstdir>/<start:016x>
//!   cat <fragdir>               - reassemble a fragment directory to stdout
//!   strip-newlines              - join FASTA sequence lines (stdin → stdout)
//!   mount <backing> <mnt>       - read-only FUSE view of fragment dirs (feature: fuse)

mod fasta;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

use frag_chunks::{split, DirectoryWriter, PointWriter, ProgressFn, RecordWriter, SplitParams};
use frag_core::{FragConfig, Ring};
use frag_fuse::FragmentedFile;
use frag_index::{read_records, scan_source, FragmentIndex, Summary};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "frag",
    version,
    about = "Content-defined fragment splitting and dedup statistics",
    long_about = "frag: split files at content-defined boundaries, hash the fragments, \
                  and measure how much of a corpus is duplicated"
)]
struct Cli {
    /// Path to a frag.toml configuration file
    #[arg(long, short = 'c', env = "FRAG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Checksum window in bytes
    #[arg(long, global = true)]
    window: Option<usize>,

    /// Split threshold (decimal or 0x-prefixed hex)
    #[arg(long, global = true, value_parser = parse_threshold)]
    threshold: Option<u32>,

    /// Bytes claimed per worker turn
    #[arg(long, global = true)]
    block_size: Option<usize>,

    /// Worker ring size (0 = 4 × CPUs)
    #[arg(long, short = 'j', global = true)]
    workers: Option<usize>,

    /// log2 of the index shard count
    #[arg(long, global = true)]
    shard_bits: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FRAG_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "FRAG_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print split points: one line per batch, `prev s1 .. -- last`
    Points {
        file: PathBuf,
    },

    /// Hash every fragment and write `<hex> <length>` records to stdout
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Count fragment records and print corpus totals
    Count {
        /// Record files (default: stdin)
        files: Vec<PathBuf>,
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Split, hash, and count files in one pass
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Store each fragment of <file> as <dstdir>/<start offset in hex>
    Split {
        dstdir: PathBuf,
        file: PathBuf,
    },

    /// Reassemble a fragment directory to stdout
    Cat {
        fragdir: PathBuf,
    },

    /// Join FASTA sequence lines (stdin → stdout)
    #[command(name = "strip-newlines")]
    StripNewlines,

    /// Mount a directory read-only, showing fragment dirs as files (requires FUSE)
    #[cfg(feature = "fuse")]
    Mount {
        backing: PathBuf,
        mountpoint: PathBuf,
        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ReportArgs {
    /// Emit the summary as JSON
    #[arg(long)]
    json: bool,

    /// Also list the N most duplicated fragments
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

fn parse_threshold(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid threshold {s:?}: {e}"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("frag: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if let Some(path) = cli.config.as_deref().filter(|p| !p.exists()) {
        warn!("config file not found: {}  (using defaults)", path.display());
    }

    let ring = Ring::from_config(&config.runtime);
    let params = SplitParams::from_config(&config.chunker);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = ring.workers(),
        "frag starting"
    );

    match cli.command {
        Commands::Points { file } => cmd_points(&file, &params, &ring),
        Commands::Hash { files } => cmd_hash(&files, &params, &ring),
        Commands::Count { files, report } => cmd_count(&config, &files, &ring, &report),
        Commands::Scan { files, report } => cmd_scan(&config, &files, &params, &ring, &report),
        Commands::Split { dstdir, file } => cmd_split(&dstdir, &file, &params, &ring),
        Commands::Cat { fragdir } => cmd_cat(&fragdir),
        Commands::StripNewlines => {
            let stdin = io::stdin().lock();
            let mut out = BufWriter::new(io::stdout().lock());
            fasta::strip_newlines(stdin, &mut out)?;
            out.flush()?;
            Ok(())
        }
        #[cfg(feature = "fuse")]
        Commands::Mount {
            backing,
            mountpoint,
            allow_other,
        } => cmd_mount(backing, mountpoint, allow_other),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries records and reports; logs go to stderr.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// File settings (or defaults), then command-line overrides.
fn load_config(cli: &Cli) -> Result<FragConfig> {
    let mut config = match &cli.config {
        Some(path) => FragConfig::load(path)
            .with_context(|| format!("loading config: {}", path.display()))?,
        None => FragConfig::default(),
    };

    if let Some(window) = cli.window {
        config.chunker.window = window;
    }
    if let Some(threshold) = cli.threshold {
        config.chunker.threshold = threshold;
    }
    if let Some(block_size) = cli.block_size {
        config.chunker.block_size = block_size;
    }
    if let Some(workers) = cli.workers {
        config.runtime.workers = workers;
    }
    if let Some(shard_bits) = cli.shard_bits {
        config.index.shard_bits = shard_bits;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("opening {}", path.display()))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `frag points` ─────────────────────────────────────────────────────────────

fn cmd_points(file: &Path, params: &SplitParams, ring: &Ring) -> Result<()> {
    let input = open_input(file)?;
    let sink = PointWriter::new(BufWriter::new(io::stdout()));
    split(&input, params, ring, &sink).with_context(|| format!("splitting {}", file.display()))?;
    sink.into_inner().flush()?;
    Ok(())
}

// ── `frag hash` ───────────────────────────────────────────────────────────────

fn cmd_hash(files: &[PathBuf], params: &SplitParams, ring: &Ring) -> Result<()> {
    let sink = RecordWriter::new(BufWriter::new(io::stdout()));
    for file in files {
        let input = open_input(file)?;
        split(&input, params, ring, &sink).with_context(|| format!("hashing {}", file.display()))?;
    }
    sink.flush()?;
    Ok(())
}

// ── `frag count` / `frag scan` ────────────────────────────────────────────────

fn cmd_count(config: &FragConfig, files: &[PathBuf], ring: &Ring, report: &ReportArgs) -> Result<()> {
    let index = FragmentIndex::from_config(&config.index)?;
    if files.is_empty() {
        read_records(io::stdin(), &index, ring).context("reading records from stdin")?;
    } else {
        for file in files {
            let input = BufReader::new(open_input(file)?);
            read_records(input, &index, ring)
                .with_context(|| format!("reading records from {}", file.display()))?;
        }
    }
    print_report(&index, ring, config.index.page_size, report)
}

fn cmd_scan(
    config: &FragConfig,
    files: &[PathBuf],
    params: &SplitParams,
    ring: &Ring,
    report: &ReportArgs,
) -> Result<()> {
    let index = FragmentIndex::from_config(&config.index)?;
    for file in files {
        let input = open_input(file)?;
        scan_source(&input, params, ring, &index)
            .with_context(|| format!("scanning {}", file.display()))?;
    }
    print_report(&index, ring, config.index.page_size, report)
}

fn print_report(index: &FragmentIndex, ring: &Ring, page_size: u64, args: &ReportArgs) -> Result<()> {
    let summary: Summary = index.summarize(ring, page_size)?;
    let top = args.top.map(|n| index.most_duplicated(n)).unwrap_or_default();
    let mut out = io::stdout().lock();

    if args.json {
        let top: Vec<_> = top
            .iter()
            .map(|r| {
                serde_json::json!({
                    "hash": r.hash.to_hex(),
                    "length": r.length,
                    "count": r.count,
                })
            })
            .collect();
        let doc = serde_json::json!({
            "summary": summary,
            "dedup_ratio": summary.dedup_ratio(),
            "top": top,
        });
        serde_json::to_writer_pretty(&mut out, &doc)?;
        writeln!(out)?;
    } else {
        write!(out, "{summary}")?;
        if !top.is_empty() {
            writeln!(out)?;
            writeln!(out, "{:>10}\t{:>12}\thash", "count", "length")?;
            for r in &top {
                writeln!(out, "{:>10}\t{:>12}\t{}", r.count, r.length, r.hash)?;
            }
        }
    }
    Ok(())
}

// ── `frag split` ──────────────────────────────────────────────────────────────

fn cmd_split(dstdir: &Path, file: &Path, params: &SplitParams, ring: &Ring) -> Result<()> {
    let input = open_input(file)?;
    let total = input.metadata()?.len();
    fs::create_dir_all(dstdir).with_context(|| format!("creating {}", dstdir.display()))?;

    let pb = make_progress_bar(total, "split");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let sink = DirectoryWriter::new(dstdir, total).with_progress(progress);
    let report = split(&input, params, ring, &sink)
        .with_context(|| format!("splitting {} into {}", file.display(), dstdir.display()))?;

    pb.finish_with_message(format!("{} fragments", report.fragments));
    Ok(())
}

// ── `frag cat` ────────────────────────────────────────────────────────────────

fn cmd_cat(fragdir: &Path) -> Result<()> {
    let file = FragmentedFile::open(fragdir)
        .with_context(|| format!("opening fragment directory {}", fragdir.display()))?;
    let mut out = BufWriter::new(io::stdout().lock());
    file.copy_to(&mut out)
        .with_context(|| format!("reassembling {}", fragdir.display()))?;
    out.flush()?;
    Ok(())
}

// ── `frag mount` ──────────────────────────────────────────────────────────────

#[cfg(feature = "fuse")]
fn cmd_mount(backing: PathBuf, mountpoint: PathBuf, allow_other: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime
        .block_on(frag_fuse::mount(frag_fuse::MountConfig {
            backing,
            mountpoint: mountpoint.clone(),
            allow_other,
        }))
        .with_context(|| format!("mounting {}", mountpoint.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_accepts_decimal_and_hex() {
        assert_eq!(parse_threshold("4096"), Ok(4096));
        assert_eq!(parse_threshold("0x1000"), Ok(0x1000));
        assert_eq!(parse_threshold("0XfFfF"), Ok(0xffff));
        assert!(parse_threshold("0x").is_err());
        assert!(parse_threshold("-1").is_err());
        assert!(parse_threshold("0x100000000").is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("frag.toml");
        fs::write(&path, "[chunker]\nwindow = 32\nthreshold = 100\n\n[index]\nshard_bits = 8\n").unwrap();

        let cli = Cli::parse_from([
            "frag",
            "-c",
            path.to_str().unwrap(),
            "--threshold",
            "0x2000",
            "count",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.chunker.window, 32);
        assert_eq!(config.chunker.threshold, 0x2000);
        assert_eq!(config.index.shard_bits, 8);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::parse_from(["frag", "--shard-bits", "30", "count"]);
        assert!(load_config(&cli).is_err());
        let cli = Cli::parse_from(["frag", "--window", "0", "scan", "x"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
