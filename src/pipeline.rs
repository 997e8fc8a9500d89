use crate::align_driver::{concat_aligned, AlignDriver};
use crate::cluster_reconstruct::{batch_size, build_reads_file, group_by_seed, load_consens_map};
use crate::clustering::{read_hit_table, read_unmatched_ids, ClusterEngine};
use crate::constants::*;
use crate::database::ClustDatabase;
use crate::error::{AssemblyError, Result};
use crate::input_assembler::build_input_file;
use crate::msa::MsaEngine;
use crate::projector::{seq_lengths_by_sample, Projector};
use crate::types::*;
use crate::utils::log_memory_usage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Summary of a finished stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub nloci: usize,
    pub nsamples: usize,
    pub n_duplicates: usize,
    pub indel_columns: usize,
    pub database_path: PathBuf,
    pub cluster_log: Option<PathBuf>,
}

/// Scratch files and directories removed when the run ends, whatever the outcome.
#[derive(Default)]
struct ScratchDir {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ScratchDir {
    fn file(&mut self, path: &Path) {
        self.files.push(path.to_path_buf());
    }

    fn dir(&mut self, path: &Path) {
        self.dirs.push(path.to_path_buf());
    }

    /// Stops tracking `path`; it outlives the run.
    fn keep(&mut self, path: &Path) {
        self.files.retain(|x| x != path);
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        for file in self.files.iter() {
            if file.exists() {
                if let Err(e) = std::fs::remove_file(file) {
                    log::warn!("Could not remove {}: {}", file.display(), e);
                }
            }
        }
        for dir in self.dirs.iter() {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    log::warn!("Could not remove {}: {}", dir.display(), e);
                }
            }
        }
        log::debug!("Removed scratch files");
    }
}

fn check_cancel(cancel: &AtomicBool, stage: &str) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        log::warn!("Interrupted {}; cleaning up", stage);
        return Err(AssemblyError::Cancelled);
    }
    Ok(())
}

fn check_inputs(samples: &[SampleInput]) -> Result<()> {
    if samples.is_empty() {
        return Err(AssemblyError::input("no samples given"));
    }
    for sample in samples {
        for path in [&sample.consens, &sample.catg] {
            if !path.exists() {
                return Err(AssemblyError::FileNotFound { path: path.clone() });
            }
        }
    }
    Ok(())
}

/// Clusters consensus sequences across samples, aligns every locus and
/// writes the cross-sample store to `<name>.clust.bin`, with its count and
/// sequence arrays in `<name>.clust.catg` and `<name>.clust.seqs`.
///
/// `cancel` is checked between stages and between merged samples. Once it
/// is set the run stops, removes every file it created and returns
/// `Cancelled`.
///
/// Alignment and projection run in parallel; everything that writes into
/// the store runs on the calling thread in sample order.
pub fn run<C: ClusterEngine, M: MsaEngine>(
    params: &StageParams,
    inputs: &[SampleInput],
    clusterer: &C,
    aligner: &M,
    cancel: Arc<AtomicBool>,
) -> Result<StageResult> {
    let total_start = Instant::now();
    check_inputs(inputs)?;
    let mut inputs = inputs.to_vec();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    let samples = SampleIndex::new(inputs.iter().map(|x| x.name.clone()))?;
    let width = params.max_len();
    log::info!(
        "Clustering {} samples across loci of at most {} positions",
        samples.len(),
        width
    );

    std::fs::create_dir_all(&params.consens_dir)?;
    let database_path = params.database_path();
    let (counts_path, seqs_path) = ClustDatabase::array_paths(params);
    for path in [&database_path, &counts_path, &seqs_path] {
        if path.exists() {
            log::info!("Removing existing store file {}", path.display());
            std::fs::remove_file(path)?;
        }
    }

    let tmpdir = params.scratch_path(TMPALIGN_SUFFIX);
    let mut scratch = ScratchDir::default();
    scratch.file(&params.scratch_path(CATCONS_SUFFIX));
    scratch.file(&params.scratch_path(CATHAPS_SUFFIX));
    scratch.file(&params.scratch_path(HITS_SUFFIX));
    scratch.file(&params.scratch_path(UNMATCHED_SUFFIX));
    scratch.file(&params.scratch_path(CATCLUST_SUFFIX));
    scratch.dir(&tmpdir);
    // store files count as scratch until the store is complete
    scratch.file(&database_path);
    scratch.file(&counts_path);
    scratch.file(&seqs_path);

    // Input assembly and clustering
    let summary = build_input_file(params, &inputs)?;
    check_cancel(&cancel, "before clustering")?;
    let clustered = clusterer.cluster(&summary.cathaps, params)?;
    log_memory_usage(true, "STAGE 1: Clustered consensus sequences across samples");
    check_cancel(&cancel, "after clustering")?;

    // Locus reconstruction
    let start = Instant::now();
    let rows = read_hit_table(&clustered.hits)?;
    let unmatched = read_unmatched_ids(&clustered.unmatched)?;
    let groups = group_by_seed(&rows, &unmatched);
    let consens = load_consens_map(&summary.catcons)?;
    let layout = build_reads_file(
        &groups,
        &consens,
        &samples,
        &tmpdir,
        batch_size(groups.len(), params.batch_size),
    )?;
    log::info!("Built {} loci in {:?}", layout.nloci(), start.elapsed());
    check_cancel(&cancel, "before alignment")?;

    // Alignment
    let driver = AlignDriver::new(aligner, &samples, width, params.threads).with_cancel(cancel.clone());
    let report = driver.run(&layout)?;
    log_memory_usage(true, "STAGE 2: Aligned loci");
    if report.cancelled || cancel.load(Ordering::SeqCst) {
        log::warn!(
            "Interrupted after aligning {}/{} batches; cleaning up",
            report.completed.len(),
            layout.batches.len()
        );
        return Err(AssemblyError::Cancelled);
    }
    if let Some((batch, err)) = report.failed.into_iter().next() {
        log::error!(
            "Alignment failed for loci {}..{}",
            batch.start,
            batch.start + batch.nloci
        );
        return Err(err);
    }
    let catclust = params.scratch_path(CATCLUST_SUFFIX);
    concat_aligned(&report.completed, &catclust)?;

    // Projection
    check_cancel(&cancel, "before ordering clusters")?;
    let seq_lens = seq_lengths_by_sample(&consens, &samples);
    drop(consens);
    let projector = Projector {
        loci: &layout.loci,
        indels: &report.indels,
        width,
        allow_truncation: params.allow_truncation,
    };
    let projected = projector.project_all(&samples, &inputs, &seq_lens, &tmpdir, params.threads)?;
    let mut paths = Vec::with_capacity(projected.len());
    let mut first_err = None;
    for (sidx, outcome) in projected {
        match outcome {
            Ok(path) => paths.push(path),
            Err(e) => {
                log::error!("Could not order clusters for {}: {}", samples.name(sidx), e);
                first_err.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    log_memory_usage(true, "STAGE 3: Ordered clusters per sample");
    check_cancel(&cancel, "before merging samples")?;

    // Sequential merge
    let start = Instant::now();
    let mut db = ClustDatabase::create(params, &samples, layout.nloci())?;
    for path in paths.iter() {
        check_cancel(&cancel, "while merging samples")?;
        db.insert_and_cleanup(path)?;
    }
    log::info!("Merged {} samples in {:?}", samples.len(), start.elapsed());
    db.fill_superseqs(&catclust)?;
    db.save(&database_path)?;
    for path in [&database_path, &counts_path, &seqs_path] {
        scratch.keep(path);
    }
    log_memory_usage(true, "STAGE 4: Wrote cross-sample store");

    let result = StageResult {
        nloci: db.meta.nloci,
        nsamples: db.nsamples(),
        n_duplicates: db.n_duplicates(),
        indel_columns: report.indels.total(),
        database_path,
        cluster_log: clustered.log,
    };
    log::info!(
        "Finished {} loci ({} duplicate) across {} samples in {:?}",
        result.nloci,
        result.n_duplicates,
        result.nsamples,
        total_start.elapsed()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.tmp");
        let sub = dir.path().join("aligns");
        std::fs::write(&file, "x").unwrap();
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("tmp_0"), "x").unwrap();
        {
            let mut scratch = ScratchDir::default();
            scratch.file(&file);
            scratch.dir(&sub);
            scratch.file(&dir.path().join("never-written"));
        }
        assert!(!file.exists());
        assert!(!sub.exists());
    }

    #[test]
    fn test_kept_file_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("x.clust.bin");
        std::fs::write(&store, "x").unwrap();
        {
            let mut scratch = ScratchDir::default();
            scratch.file(&store);
            scratch.keep(&store);
        }
        assert!(store.exists());
    }

    #[test]
    fn test_check_cancel() {
        let cancel = AtomicBool::new(false);
        assert!(check_cancel(&cancel, "here").is_ok());
        cancel.store(true, Ordering::SeqCst);
        assert!(matches!(check_cancel(&cancel, "here"), Err(AssemblyError::Cancelled)));
    }

    #[test]
    fn test_missing_inputs_rejected_first() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![SampleInput {
            name: "a".to_string(),
            consens: dir.path().join("a.consens.fa"),
            catg: dir.path().join("a.catg.bin"),
        }];
        assert!(matches!(
            check_inputs(&inputs),
            Err(AssemblyError::FileNotFound { .. })
        ));
        assert!(matches!(check_inputs(&[]), Err(AssemblyError::Input { .. })));
    }
}
