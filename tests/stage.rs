use clustacross::clustering::{ClusterEngine, ClusterOutput};
use clustacross::constants::*;
use clustacross::database::ClustDatabase;
use clustacross::error::{AssemblyError, Result};
use clustacross::msa::MsaEngine;
use clustacross::pipeline;
use clustacross::types::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CATG_WIDTH: usize = 40;

/// Replays a fixed hit table and seed list instead of running vsearch.
struct CannedClusterer {
    rows: Vec<(&'static str, &'static str, &'static str)>,
    seeds: Vec<&'static str>,
    called: AtomicBool,
    /// Set while clustering runs, as an interrupt arriving mid-stage would.
    interrupt: Option<Arc<AtomicBool>>,
}

impl CannedClusterer {
    fn new(rows: Vec<(&'static str, &'static str, &'static str)>, seeds: Vec<&'static str>) -> Self {
        Self {
            rows,
            seeds,
            called: AtomicBool::new(false),
            interrupt: None,
        }
    }
}

impl ClusterEngine for CannedClusterer {
    fn cluster(&self, cathaps: &Path, params: &StageParams) -> Result<ClusterOutput> {
        self.called.store(true, Ordering::SeqCst);
        if let Some(flag) = &self.interrupt {
            flag.store(true, Ordering::SeqCst);
        }
        assert!(cathaps.exists());
        let hits = params.scratch_path(HITS_SUFFIX);
        let unmatched = params.scratch_path(UNMATCHED_SUFFIX);
        let table: String = self
            .rows
            .iter()
            .map(|(query, seed, strand)| format!("{}\t{}\t{}\n", query, seed, strand))
            .collect();
        std::fs::write(&hits, table)?;
        let seeds: String = self.seeds.iter().map(|id| format!(">{}\nACGT\n", id)).collect();
        std::fs::write(&unmatched, seeds)?;
        Ok(ClusterOutput {
            hits,
            unmatched,
            log: None,
        })
    }
}

/// Pads every record on the right with gaps to the longest record.
struct PadEngine;

impl MsaEngine for PadEngine {
    fn align(&self, records: &[SeqRecord]) -> Result<Vec<SeqRecord>> {
        let len = records.iter().map(|r| r.seq.len()).max().unwrap_or(0);
        Ok(records
            .iter()
            .map(|r| {
                let mut seq = r.seq.clone();
                seq.resize(len, GAP_CHAR);
                SeqRecord::new(r.id.clone(), seq)
            })
            .collect())
    }
}

struct BrokenEngine;

impl MsaEngine for BrokenEngine {
    fn align(&self, _records: &[SeqRecord]) -> Result<Vec<SeqRecord>> {
        Err(AssemblyError::Engine {
            program: "muscle".to_string(),
            status: "exit status: 2".to_string(),
            stdout: String::new(),
            stderr: "bad input".to_string(),
        })
    }
}

/// Writes a consensus file and a count array whose position p holds p + 1
/// in the first channel.
fn write_sample(dir: &Path, name: &str, seqs: &[&str]) -> SampleInput {
    let consens = dir.join(format!("{}.consens.fa", name));
    let text: String = seqs
        .iter()
        .enumerate()
        .map(|(i, seq)| format!(">{}_{}\n{}\n", name, i, seq))
        .collect();
    std::fs::write(&consens, text).unwrap();

    let mut counts = CountArray::zeros(seqs.len(), CATG_WIDTH);
    for (i, seq) in seqs.iter().enumerate() {
        for pos in 0..seq.len() {
            counts.row_mut(i)[pos] = [pos as u32 + 1, 0, 0, 2];
        }
    }
    let catg = dir.join(format!("{}.catg.bin", name));
    counts.save(&catg).unwrap();
    SampleInput {
        name: name.to_string(),
        consens,
        catg,
    }
}

fn params(dir: &Path, datatype: Datatype) -> StageParams {
    let mut params = StageParams::new("test", dir, datatype);
    params.max_fragment_length = 20;
    params.random_seed = Some(42);
    params.threads = 2;
    params.batch_size = Some(2);
    params
}

fn run(params: &StageParams, inputs: &[SampleInput], clusterer: &CannedClusterer) -> Result<ClustDatabase> {
    let cancel = Arc::new(AtomicBool::new(false));
    let result = pipeline::run(params, inputs, clusterer, &PadEngine, cancel)?;
    ClustDatabase::load(&result.database_path)
}

fn nonzero(row: &[BaseCounts]) -> bool {
    row.iter().any(|c| c.iter().any(|x| *x > 0))
}

fn duplicate_clusterer() -> CannedClusterer {
    CannedClusterer::new(
        vec![
            ("B_0", "A_0", "+"),
            ("C_0", "A_0", "+"),
            ("B_1", "A_1", "+"),
            ("B_2", "A_1", "+"),
        ],
        vec!["A_0", "A_1"],
    )
}

fn duplicate_inputs(dir: &Path) -> Vec<SampleInput> {
    vec![
        write_sample(dir, "A", &["ACGTAC", "GGGCCC"]),
        write_sample(dir, "B", &["ACGTAC", "GGGCCC", "GGGCCA"]),
        write_sample(dir, "C", &["ACGTAC"]),
    ]
}

#[test]
fn test_duplicate_locus_flagged_and_zeroed() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let db = run(&params(dir.path(), Datatype::Rad), &inputs, &duplicate_clusterer()).unwrap();

    assert_eq!(db.meta.nloci, 2);
    assert_eq!(db.meta.samples, vec!["A", "B", "C"]);
    assert_eq!(db.meta.duplicates, vec![false, true]);
    for sidx in 0..3 {
        assert!(nonzero(&db.counts(0, sidx)));
    }
    assert!(nonzero(&db.counts(1, 0)));
    assert!(!nonzero(&db.counts(1, 1)));
    assert!(!nonzero(&db.counts(1, 2)));
    assert_eq!(db.counts(0, 2)[5], [6, 0, 0, 2]);
    assert_eq!(db.meta.alleles, vec![0, 0]);
}

#[test]
fn test_single_gap_column() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_sample(dir.path(), "A", &["ACGTA"]),
        write_sample(dir.path(), "B", &["ACGTAC"]),
        write_sample(dir.path(), "C", &["ACGTAC"]),
    ];
    let clusterer = CannedClusterer::new(vec![("A_0", "B_0", "+"), ("C_0", "B_0", "+")], vec!["B_0"]);
    let db = run(&params(dir.path(), Datatype::Rad), &inputs, &clusterer).unwrap();

    assert_eq!(db.meta.indels, vec![1]);
    let row = db.counts(0, 0);
    assert_eq!(row[4], [5, 0, 0, 2]);
    assert_eq!(row[5], [0, 0, 0, 0]);
    assert_eq!(&db.seq(0, 0)[..6], b"ACGTA-");

    // every present sample spans the aligned length
    for sidx in 0..3 {
        let filled = db.seq(0, sidx).iter().filter(|&&b| b != MISSING_BASE).count();
        assert_eq!(filled, 6);
        assert!(db.seq(0, sidx).len() <= db.meta.maxlen);
    }
}

#[test]
fn test_paired_split_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_sample(
            dir.path(),
            "A",
            &["ACGTnnnnGGA", "ACGnnnnGGAT", "AAAAnnnnCC", "TTTTnnnnGG", "CCCCCCCC"],
        ),
        write_sample(
            dir.path(),
            "B",
            &["ACGTnnnnGGA", "ACGnnnnGGA", "AAAAnnnnCC", "TTTnnnnGG", "CCCCCCCC"],
        ),
    ];
    let clusterer = CannedClusterer::new(
        vec![
            ("B_0", "A_0", "+"),
            ("B_1", "A_1", "+"),
            ("B_2", "A_2", "+"),
            ("B_3", "A_3", "+"),
            ("B_4", "A_4", "+"),
        ],
        vec!["A_0", "A_1", "A_2", "A_3", "A_4"],
    );
    let db = run(&params(dir.path(), Datatype::Pairddrad), &inputs, &clusterer).unwrap();

    assert_eq!(db.meta.maxlen, 40);
    assert_eq!(db.meta.splits.len(), 5);
    assert_eq!(db.meta.splits.iter().filter(|x| **x > 0).count(), 4);
    assert_eq!(db.meta.splits[0], 4);
    assert_eq!(db.meta.splits[4], 0);
    assert_eq!(&db.seq(3, 1)[..10], b"TTT-nnnnGG");
}

#[test]
fn test_sample_order_does_not_change_store() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let inputs_a = duplicate_inputs(dir_a.path());
    let mut inputs_b = duplicate_inputs(dir_b.path());
    inputs_b.reverse();

    let db_a = run(&params(dir_a.path(), Datatype::Rad), &inputs_a, &duplicate_clusterer()).unwrap();
    let db_b = run(&params(dir_b.path(), Datatype::Rad), &inputs_b, &duplicate_clusterer()).unwrap();
    assert_eq!(db_a, db_b);
}

#[test]
fn test_scratch_removed_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let params = params(dir.path(), Datatype::Rad);
    run(&params, &inputs, &duplicate_clusterer()).unwrap();

    for suffix in [CATCONS_SUFFIX, CATHAPS_SUFFIX, HITS_SUFFIX, UNMATCHED_SUFFIX, CATCLUST_SUFFIX] {
        assert!(!params.scratch_path(suffix).exists(), "{} left behind", suffix);
    }
    assert!(!params.scratch_path(TMPALIGN_SUFFIX).exists());
    assert!(params.database_path().exists());
}

#[test]
fn test_retried_merge_detected() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let mut db = run(&params(dir.path(), Datatype::Rad), &inputs, &duplicate_clusterer()).unwrap();
    let again = clustacross::projector::SampleProjection::new("A", db.meta.nloci, db.meta.maxlen);
    assert!(matches!(db.insert_sample(&again), Err(AssemblyError::Merge { .. })));
}

#[test]
fn test_empty_input_fails_before_clustering() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![write_sample(dir.path(), "A", &[]), write_sample(dir.path(), "B", &[])];
    let clusterer = CannedClusterer::new(vec![], vec![]);
    let cancel = Arc::new(AtomicBool::new(false));
    let err = pipeline::run(&params(dir.path(), Datatype::Rad), &inputs, &clusterer, &PadEngine, cancel)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Input { .. }));
    assert!(!clusterer.called.load(Ordering::SeqCst));
}

#[test]
fn test_engine_failure_surfaces_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let params = params(dir.path(), Datatype::Rad);
    let cancel = Arc::new(AtomicBool::new(false));
    let err = pipeline::run(&params, &inputs, &duplicate_clusterer(), &BrokenEngine, cancel).unwrap_err();
    match err {
        AssemblyError::Engine { stderr, .. } => assert_eq!(stderr, "bad input"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!params.database_path().exists());
    assert!(!params.scratch_path(TMPALIGN_SUFFIX).exists());
}

#[test]
fn test_interrupted_run_writes_no_store() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let params = params(dir.path(), Datatype::Rad);
    let cancel = Arc::new(AtomicBool::new(true));
    let err = pipeline::run(&params, &inputs, &duplicate_clusterer(), &PadEngine, cancel).unwrap_err();
    assert!(matches!(err, AssemblyError::Cancelled));
    assert!(!params.database_path().exists());
    assert!(!params.scratch_path(CATCONS_SUFFIX).exists());
}

#[test]
fn test_interrupt_during_clustering_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let params = params(dir.path(), Datatype::Rad);
    let cancel = Arc::new(AtomicBool::new(false));
    let mut clusterer = duplicate_clusterer();
    clusterer.interrupt = Some(cancel.clone());

    let err = pipeline::run(&params, &inputs, &clusterer, &PadEngine, cancel).unwrap_err();
    assert!(matches!(err, AssemblyError::Cancelled));
    assert!(clusterer.called.load(Ordering::SeqCst));
    for suffix in [
        DATABASE_SUFFIX,
        STORE_COUNTS_SUFFIX,
        STORE_SEQS_SUFFIX,
        HITS_SUFFIX,
        UNMATCHED_SUFFIX,
        CATCLUST_SUFFIX,
        TMPALIGN_SUFFIX,
    ] {
        assert!(!params.scratch_path(suffix).exists(), "{} left behind", suffix);
    }
}

#[test]
fn test_reverse_hit_counts_follow_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_sample(dir.path(), "A", &["AACG"]),
        write_sample(dir.path(), "B", &["CGTT"]),
    ];
    let clusterer = CannedClusterer::new(vec![("B_0", "A_0", "-")], vec!["A_0"]);
    let db = run(&params(dir.path(), Datatype::Rad), &inputs, &clusterer).unwrap();

    assert_eq!(db.meta.nloci, 1);
    assert_eq!(&db.seq(0, 0)[..4], b"AACG");
    assert_eq!(&db.seq(0, 1)[..4], b"AACG");

    // position i of the hit comes from position 3 - i, channels complemented
    let seed = db.counts(0, 0);
    let hit = db.counts(0, 1);
    for i in 0..4 {
        assert_eq!(seed[i], [i as u32 + 1, 0, 0, 2]);
        assert_eq!(hit[i], [2, 0, 0, 4 - i as u32]);
    }
    assert!(!nonzero(&hit[4..]));
    assert_eq!(db.meta.duplicates, vec![false]);
}

#[test]
fn test_store_arrays_kept_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = duplicate_inputs(dir.path());
    let params = params(dir.path(), Datatype::Rad);
    let db = run(&params, &inputs, &duplicate_clusterer()).unwrap();
    let cells = db.meta.nloci * db.meta.samples.len() * db.meta.maxlen;
    let counts = std::fs::metadata(params.scratch_path(STORE_COUNTS_SUFFIX)).unwrap();
    let seqs = std::fs::metadata(params.scratch_path(STORE_SEQS_SUFFIX)).unwrap();
    assert_eq!(counts.len(), (cells * NUM_CHANNELS * 4) as u64);
    assert_eq!(seqs.len(), cells as u64);
}
