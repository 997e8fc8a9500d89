use crate::constants::*;
use crate::error::{AssemblyError, Result};
use crate::seq_parse::read_fastx_records;
use crate::types::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// One row of the clustering engine's hit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitRow {
    pub query: String,
    pub seed: String,
    pub strand: Strand,
}

/// Files written by a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    pub hits: PathBuf,
    pub unmatched: PathBuf,
    pub log: Option<PathBuf>,
}

/// Pairwise clustering engine boundary.
pub trait ClusterEngine {
    fn cluster(&self, cathaps: &Path, params: &StageParams) -> Result<ClusterOutput>;
}

pub struct VsearchEngine {
    pub binary: PathBuf,
}

impl VsearchEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Strand and query coverage vary by datatype; low coverage on single
    /// end data yields many poor alignments.
    fn strand_and_cov(params: &StageParams) -> (&'static str, &'static str) {
        let (strand, cov) = match params.datatype {
            Datatype::Gbs => ("both", "0.60"),
            Datatype::Pairgbs => ("both", "0.90"),
            _ => ("plus", "0.90"),
        };
        if params.no_reverse {
            ("plus", cov)
        } else {
            (strand, cov)
        }
    }

    pub fn arguments(&self, cathaps: &Path, params: &StageParams) -> Vec<String> {
        let (strand, cov) = Self::strand_and_cov(params);
        let hits = params.scratch_path(HITS_SUFFIX);
        let unmatched = params.scratch_path(UNMATCHED_SUFFIX);
        let log = params.consens_dir.join(CLUSTER_LOG_NAME);
        vec![
            "-cluster_smallmem".to_string(),
            cathaps.display().to_string(),
            "-strand".to_string(),
            strand.to_string(),
            "-query_cov".to_string(),
            cov.to_string(),
            "-id".to_string(),
            params.clust_threshold.to_string(),
            "-userout".to_string(),
            hits.display().to_string(),
            "-notmatched".to_string(),
            unmatched.display().to_string(),
            "-userfields".to_string(),
            "query+target+qstrand".to_string(),
            "-maxaccepts".to_string(),
            "1".to_string(),
            "-maxrejects".to_string(),
            "0".to_string(),
            "-minsl".to_string(),
            "0.5".to_string(),
            "-fasta_width".to_string(),
            "0".to_string(),
            "-threads".to_string(),
            "0".to_string(),
            "-fulldp".to_string(),
            "-usersort".to_string(),
            "-log".to_string(),
            log.display().to_string(),
        ]
    }
}

impl ClusterEngine for VsearchEngine {
    fn cluster(&self, cathaps: &Path, params: &StageParams) -> Result<ClusterOutput> {
        let args = self.arguments(cathaps, params);
        log::info!("Clustering across samples: {} {}", self.binary.display(), args.join(" "));
        let start = Instant::now();
        let output = Command::new(&self.binary).args(&args).output().map_err(|e| {
            AssemblyError::config(format!(
                "failed to execute {}: {}. Is vsearch installed?",
                self.binary.display(),
                e
            ))
        })?;
        if !output.status.success() {
            return Err(AssemblyError::Engine {
                program: self.binary.display().to_string(),
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        log::info!("Clustering finished in {:?}", start.elapsed());
        let hits = params.scratch_path(HITS_SUFFIX);
        // vsearch writes no userout file when nothing matched
        if !hits.exists() {
            File::create(&hits)?;
        }
        Ok(ClusterOutput {
            hits,
            unmatched: params.scratch_path(UNMATCHED_SUFFIX),
            log: Some(params.consens_dir.join(CLUSTER_LOG_NAME)),
        })
    }
}

/// Reads `query<TAB>seed<TAB>strand` rows.
pub fn parse_hit_table<R: BufRead>(reader: R) -> Result<Vec<HitRow>> {
    let mut rows = vec![];
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(AssemblyError::format(format!(
                "hit table line {} has {} fields, expected 3",
                line_num + 1,
                fields.len()
            )));
        }
        let strand = Strand::parse(fields[2].trim()).ok_or_else(|| {
            AssemblyError::format(format!(
                "hit table line {} has strand {:?}",
                line_num + 1,
                fields[2]
            ))
        })?;
        rows.push(HitRow {
            query: fields[0].trim().to_string(),
            seed: fields[1].trim().to_string(),
            strand,
        });
    }
    Ok(rows)
}

pub fn read_hit_table(path: &Path) -> Result<Vec<HitRow>> {
    if !path.exists() {
        return Err(AssemblyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    parse_hit_table(BufReader::new(File::open(path)?))
}

/// Ids of every sequence that became a seed.
pub fn read_unmatched_ids(path: &Path) -> Result<Vec<String>> {
    Ok(read_fastx_records(path)?
        .into_iter()
        .map(|record| record.id)
        .collect())
}
