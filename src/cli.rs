use crate::constants::CLI_HEADINGS;
use crate::error::{AssemblyError, Result};
use crate::types::{Datatype, SampleInput, StageParams};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "clustacross",
    about = "clustacross - cluster consensus loci across samples and build the cross-sample locus store",
    version,
    author
)]
pub struct Cli {
    /// Sample manifest: one `name<TAB>consens.fa<TAB>catg.bin` line per sample
    #[arg(value_name = "MANIFEST", required_unless_present = "markdown_help")]
    pub manifest: Option<PathBuf>,

    /// Assembly name, used as the prefix of every output file
    #[arg(short, long, default_value = "clustacross")]
    pub name: String,

    /// Output directory for the store and scratch files (created if it does not exist)
    #[arg(short, long, default_value = "clustacross-out")]
    pub output_dir: PathBuf,

    /// Library type of the reads the consensus sequences came from
    #[arg(short, long, value_enum, default_value = "rad")]
    pub datatype: Datatype,

    /// Number of threads for alignment and per-sample ordering
    #[arg(short, long, default_value = "4")]
    pub threads: usize,

    /// Maximum fragment length; doubled for paired and GBS data
    #[arg(long, default_value_t = 150, help_heading = CLI_HEADINGS[0])]
    pub max_fragment_length: usize,

    /// Sequence identity threshold for clustering across samples
    #[arg(short, long, default_value_t = 0.85, help_heading = CLI_HEADINGS[0])]
    pub clust_threshold: f64,

    /// Seed for the clustering input shuffle and allele sampling (random if unset)
    #[arg(short, long, help_heading = CLI_HEADINGS[0])]
    pub seed: Option<u64>,

    /// Only match on the forward strand, even for GBS data
    #[arg(long, help_heading = CLI_HEADINGS[0])]
    pub no_reverse: bool,

    /// Path to the vsearch binary
    #[arg(long, default_value = "vsearch", help_heading = CLI_HEADINGS[0])]
    pub vsearch: PathBuf,

    /// Loci per alignment batch (default: 100, or a tenth of all loci above 2000)
    #[arg(long, help_heading = CLI_HEADINGS[1])]
    pub batch_size: Option<usize>,

    /// Path to the muscle binary
    #[arg(long, default_value = "muscle", help_heading = CLI_HEADINGS[1])]
    pub muscle: PathBuf,

    /// Truncate rows longer than the maximum length instead of failing
    #[arg(long, help_heading = CLI_HEADINGS[1])]
    pub allow_truncation: bool,

    /// Logging verbosity level
    #[arg(short, long, value_enum, default_value = "debug", help_heading = CLI_HEADINGS[2])]
    pub log_level: LogLevel,

    /// Print help in markdown format
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Debug
    }
}

impl Cli {
    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.log_level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    pub fn stage_params(&self) -> Result<StageParams> {
        if self.threads == 0 {
            return Err(AssemblyError::config("--threads must be at least 1"));
        }
        if self.max_fragment_length == 0 {
            return Err(AssemblyError::config("--max-fragment-length must be positive"));
        }
        if !(0.0..=1.0).contains(&self.clust_threshold) {
            return Err(AssemblyError::config(format!(
                "--clust-threshold {} is not within 0 and 1",
                self.clust_threshold
            )));
        }
        let mut params = StageParams::new(&self.name, &self.output_dir, self.datatype);
        params.max_fragment_length = self.max_fragment_length;
        params.clust_threshold = self.clust_threshold;
        params.random_seed = self.seed;
        params.threads = self.threads;
        params.allow_truncation = self.allow_truncation;
        params.no_reverse = self.no_reverse;
        params.batch_size = self.batch_size;
        Ok(params)
    }
}

/// Reads a tab separated sample manifest. Relative paths are resolved
/// against the manifest's directory; blank lines and `#` comments are skipped.
pub fn read_manifest(path: &Path) -> Result<Vec<SampleInput>> {
    if !path.exists() {
        return Err(AssemblyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut samples = vec![];
    for (line_num, line) in BufReader::new(File::open(path)?).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            return Err(AssemblyError::config(format!(
                "manifest line {} has {} fields, expected name, consensus file and count file",
                line_num + 1,
                fields.len()
            )));
        }
        samples.push(SampleInput {
            name: fields[0].to_string(),
            consens: base.join(fields[1]),
            catg: base.join(fields[2]),
        });
    }
    Ok(samples)
}
