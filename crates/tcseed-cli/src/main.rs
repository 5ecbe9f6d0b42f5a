//! tcseed: rebuild files from local seeds
//!
//! Commands:
//!   probe <seed> <destination>           - can blocks be cloned between the two?
//!   match <seed> <target> [--json]       - how much of target the seed can supply
//!   assemble <target> <output> --seed S  - rebuild target into output using S
//!   config show                          - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use tcseed_chunks::{hash_file_streaming, hash_to_hex, index_file, ChunkIndex, ChunkSizes};
use tcseed_core::config::{LogFormat, TcseedConfig};
use tcseed_engine::{assemble, can_clone, plan, AssembleOptions, FileSource, SeedIndex, Step};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tcseed",
    version,
    about = "Reuse local seed files when reconstructing content-addressed files",
    long_about = "tcseed: match chunk runs between a seed and a target, then clone or copy them"
)]
struct Cli {
    /// Path to tcseed.toml configuration file
    #[arg(long, short = 'c', env = "TCSEED_CONFIG", default_value = "/etc/tcseed/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether the filesystem can share blocks from seed into destination
    Probe {
        /// Seed file
        seed: PathBuf,
        /// Destination file (need not exist)
        destination: PathBuf,
    },

    /// Show how much of a target file a seed can supply
    Match {
        /// Seed file
        seed: PathBuf,
        /// Target file
        target: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild a target file, taking matching runs from a seed
    ///
    /// Chunks not found in the seed are read from the target itself.
    Assemble {
        /// File whose content should be reproduced
        target: PathBuf,
        /// Where to write the reconstruction
        output: PathBuf,
        /// Seed file to take matching runs from
        #[arg(long, short = 's')]
        seed: PathBuf,
        /// Never clone blocks, even if the filesystem supports it
        #[arg(long)]
        no_reflink: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = tcseed_core::config::load_config(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    init_tracing(&config.log.level, config.log.log_format());
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Probe { seed, destination } => cmd_probe(&seed, &destination),
        Commands::Match { seed, target, json } => cmd_match(&config, &seed, &target, json),
        Commands::Assemble { target, output, seed, no_reflink } => {
            cmd_assemble(&config, &target, &output, &seed, no_reflink)
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn chunk_sizes(config: &TcseedConfig) -> ChunkSizes {
    ChunkSizes::from(&config.chunking)
}

// ── `tcseed probe` ────────────────────────────────────────────────────────────

fn cmd_probe(seed: &Path, destination: &Path) -> Result<()> {
    let supported = can_clone(destination, seed);
    debug!(seed = %seed.display(), destination = %destination.display(), supported, "probed reflink");
    println!("{}", reflink_line(seed, destination, supported));
    Ok(())
}

fn reflink_line(seed: &Path, destination: &Path, supported: bool) -> String {
    format!(
        "reflink {} -> {}: {}",
        seed.display(),
        destination.display(),
        if supported { "supported" } else { "not supported" }
    )
}

// ── `tcseed match` ────────────────────────────────────────────────────────────

/// Reuse summary for one seed/target pair
#[derive(Debug, Serialize)]
struct MatchSummary {
    seed: PathBuf,
    target: PathBuf,
    target_bytes: u64,
    target_chunks: usize,
    seed_segments: usize,
    reused_bytes: u64,
    reused_chunks: usize,
    missing_chunks: usize,
    missing_bytes: u64,
}

impl MatchSummary {
    fn build(seed: &SeedIndex, target_path: &Path, target: &ChunkIndex) -> Self {
        let mut summary = MatchSummary {
            seed: seed.source_path().to_path_buf(),
            target: target_path.to_path_buf(),
            target_bytes: target.total_size(),
            target_chunks: target.len(),
            seed_segments: 0,
            reused_bytes: 0,
            reused_chunks: 0,
            missing_chunks: 0,
            missing_bytes: 0,
        };
        for step in plan(target, seed) {
            match step {
                Step::Seed { target: chunks, .. } => {
                    summary.seed_segments += 1;
                    summary.reused_chunks += chunks.len();
                    summary.reused_bytes += step.length();
                }
                Step::Fetch { .. } => {
                    summary.missing_chunks += 1;
                    summary.missing_bytes += step.length();
                }
            }
        }
        summary
    }

    fn reused_percent(&self) -> f64 {
        if self.target_bytes == 0 {
            return 0.0;
        }
        self.reused_bytes as f64 * 100.0 / self.target_bytes as f64
    }
}

fn cmd_match(config: &TcseedConfig, seed: &Path, target: &Path, json: bool) -> Result<()> {
    let sizes = chunk_sizes(config);
    let seed_index =
        index_file(seed, sizes).with_context(|| format!("indexing seed: {}", seed.display()))?;
    let target_index = index_file(target, sizes)
        .with_context(|| format!("indexing target: {}", target.display()))?;

    let seed = SeedIndex::with_reflink(seed, seed_index, false);
    let summary = MatchSummary::build(&seed, target, &target_index);
    info!(
        seed = %summary.seed.display(),
        target = %summary.target.display(),
        reused = summary.reused_bytes,
        missing = summary.missing_bytes,
        "match computed"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Seed:     {}", summary.seed.display());
        println!(
            "Target:   {} ({} bytes, {} chunks)",
            summary.target.display(),
            summary.target_bytes,
            summary.target_chunks
        );
        println!(
            "Reused:   {} bytes in {} chunks / {} segments ({:.1}%)",
            summary.reused_bytes,
            summary.reused_chunks,
            summary.seed_segments,
            summary.reused_percent()
        );
        println!(
            "Missing:  {} bytes in {} chunks",
            summary.missing_bytes, summary.missing_chunks
        );
    }
    Ok(())
}

// ── `tcseed assemble` ─────────────────────────────────────────────────────────

fn cmd_assemble(
    config: &TcseedConfig,
    target: &Path,
    output: &Path,
    seed_path: &Path,
    no_reflink: bool,
) -> Result<()> {
    if same_file(target, output) || same_file(seed_path, output) {
        anyhow::bail!("output {} would overwrite an input", output.display());
    }

    let sizes = chunk_sizes(config);
    let seed_index = index_file(seed_path, sizes)
        .with_context(|| format!("indexing seed: {}", seed_path.display()))?;
    let target_index = index_file(target, sizes)
        .with_context(|| format!("indexing target: {}", target.display()))?;

    let seed = if config.seed.reflink && !no_reflink {
        SeedIndex::new(output, seed_path, seed_index)
            .with_context(|| format!("opening seed: {}", seed_path.display()))?
    } else {
        SeedIndex::with_reflink(seed_path, seed_index, false)
    };
    let source = FileSource::open(target)?;
    let opts = AssembleOptions::from(config);

    println!(
        "Assembling {} -> {} (seed: {}, reflink: {})",
        target.display(),
        output.display(),
        seed_path.display(),
        seed.can_reflink()
    );

    let stats = assemble(output, &target_index, &seed, &source, &opts)?;
    info!(
        output = %output.display(),
        segments = stats.seed_segments,
        fetched = stats.fetched_chunks,
        "assemble finished, verifying output"
    );

    let expected = hash_file_streaming(target)?;
    let actual = hash_file_streaming(output)?;
    if expected != actual {
        anyhow::bail!(
            "assembled file hash {} does not match target {}",
            hash_to_hex(&actual),
            hash_to_hex(&expected)
        );
    }

    println!("  cloned:    {} bytes", stats.bytes_cloned);
    println!("  copied:    {} bytes ({} segments)", stats.bytes_copied, stats.seed_segments);
    println!("  fetched:   {} bytes ({} chunks)", stats.bytes_fetched, stats.fetched_chunks);
    if stats.fallbacks > 0 {
        println!("  fallbacks: {}", stats.fallbacks);
    }
    println!("  blake3:    {}", hash_to_hex(&actual));
    Ok(())
}

/// Both paths exist and name the same file
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ── `tcseed config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &TcseedConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tcseed_chunks::index_bytes;

    #[test]
    fn parses_assemble_flags() {
        let cli = Cli::try_parse_from([
            "tcseed", "-c", "/tmp/x.toml", "assemble", "new.img", "out.img", "--seed", "old.img",
            "--no-reflink",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/tmp/x.toml"));
        match cli.command {
            Commands::Assemble { target, output, seed, no_reflink } => {
                assert_eq!(target, PathBuf::from("new.img"));
                assert_eq!(output, PathBuf::from("out.img"));
                assert_eq!(seed, PathBuf::from("old.img"));
                assert!(no_reflink);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn assemble_requires_seed() {
        assert!(Cli::try_parse_from(["tcseed", "assemble", "a", "b"]).is_err());
    }

    #[test]
    fn summary_accounts_for_every_byte() {
        let data: Vec<u8> = (0u32..100_000).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let index = index_bytes(&data, ChunkSizes::SMALL).unwrap();
        let seed = SeedIndex::with_reflink("/seed", index.clone(), false);

        let summary = MatchSummary::build(&seed, Path::new("/target"), &index);
        assert_eq!(summary.reused_bytes, data.len() as u64);
        assert_eq!(summary.missing_chunks, 0);
        assert_eq!(summary.seed_segments, 1);
        assert!((summary.reused_percent() - 100.0).abs() < f64::EPSILON);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["target_chunks"], index.len());
    }

    #[test]
    fn reflink_line_is_plain_ascii() {
        let line = reflink_line(Path::new("old.img"), Path::new("new.img"), false);
        assert_eq!(line, "reflink old.img -> new.img: not supported");
        assert!(line.is_ascii());
    }

    /// Shared buffer the test subscriber writes formatted events into
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reflink_check_logs_its_verdict() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let tmp = tempfile::TempDir::new().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            cmd_probe(&tmp.path().join("missing-seed"), &tmp.path().join("dst")).unwrap();
        });

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("probed reflink"), "logs: {logs}");
        assert!(logs.contains("supported=false"), "logs: {logs}");
    }

    #[test]
    fn same_file_detects_aliases() {
        let tmp = std::env::temp_dir();
        assert!(same_file(&tmp, &tmp.join(".")));
        assert!(!same_file(&tmp, &tmp.join("definitely-not-here")));
    }
}
