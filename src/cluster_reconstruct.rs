use crate::clustering::HitRow;
use crate::constants::*;
use crate::error::{AssemblyError, Result};
use crate::seq_parse::{read_fastx_records, write_locus_block};
use crate::types::*;
use crate::utils::{reverse_complement, split_record_id};
use fxhash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hit-table rows collected under their seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedGroup {
    pub seed: String,
    pub hits: Vec<(String, Strand)>,
}

/// A batch file of consecutive locus blocks, starting at global locus `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBatch {
    pub start: usize,
    pub nloci: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ClusterLayout {
    pub loci: Vec<LocusGroup>,
    pub batches: Vec<ClusterBatch>,
}

impl ClusterLayout {
    pub fn nloci(&self) -> usize {
        self.loci.len()
    }
}

/// Groups hit rows by seed in the order seeds first appear, then appends
/// every unmatched seed that never collected a hit as its own group.
/// The position of a group in the returned vector is its locus index.
pub fn group_by_seed(rows: &[HitRow], unmatched: &[String]) -> Vec<SeedGroup> {
    let mut groups: Vec<SeedGroup> = vec![];
    let mut seed_to_group: FxHashMap<&str, usize> = FxHashMap::default();
    let mut queries: FxHashSet<&str> = FxHashSet::default();

    for row in rows {
        let group_idx = *seed_to_group.entry(row.seed.as_str()).or_insert_with(|| {
            groups.push(SeedGroup {
                seed: row.seed.clone(),
                hits: vec![],
            });
            groups.len() - 1
        });
        groups[group_idx].hits.push((row.query.clone(), row.strand));
        queries.insert(row.query.as_str());
    }

    let nhit_groups = groups.len();
    for id in unmatched {
        if seed_to_group.contains_key(id.as_str()) || queries.contains(id.as_str()) {
            continue;
        }
        seed_to_group.insert(id.as_str(), groups.len());
        groups.push(SeedGroup {
            seed: id.clone(),
            hits: vec![],
        });
    }
    log::debug!(
        "{} seeds with hits and {} singleton seeds",
        nhit_groups,
        groups.len() - nhit_groups
    );
    groups
}

/// Loci per batch file: fixed for small runs, a tenth of all groups for large ones.
pub fn batch_size(ngroups: usize, requested: Option<usize>) -> usize {
    if let Some(size) = requested {
        return size.max(1);
    }
    if ngroups > BATCH_ADAPTIVE_THRESHOLD {
        ngroups / BATCH_ADAPTIVE_DIVISOR
    } else {
        BATCH_SIZE_DEFAULT
    }
}

pub fn resolve_record(id: &str, samples: &SampleIndex, strand: Strand) -> Result<HitRecord> {
    let (name, local) = split_record_id(id)
        .ok_or_else(|| AssemblyError::format(format!("record id {} is not <sample>_<index>", id)))?;
    let sample = samples
        .index_of(name)
        .ok_or_else(|| AssemblyError::format(format!("record {} names unknown sample {}", id, name)))?;
    Ok(HitRecord {
        sample,
        local,
        strand,
    })
}

pub fn load_consens_map(path: &Path) -> Result<FxHashMap<String, Vec<u8>>> {
    Ok(read_fastx_records(path)?
        .into_iter()
        .map(|record| (record.id, record.seq))
        .collect())
}

fn lookup<'a>(consens: &'a FxHashMap<String, Vec<u8>>, id: &str) -> Result<&'a Vec<u8>> {
    consens.get(id).ok_or_else(|| {
        AssemblyError::format(format!(
            "clustering output references {} which is not a consensus record",
            id
        ))
    })
}

fn write_batch(tmpdir: &Path, start: usize, blocks: &[Vec<SeqRecord>]) -> Result<ClusterBatch> {
    let path = tmpdir.join(format!("tmp_{}", start));
    let mut writer = BufWriter::new(File::create(&path)?);
    for block in blocks {
        write_locus_block(&mut writer, block)?;
    }
    writer.flush()?;
    Ok(ClusterBatch {
        start,
        nloci: blocks.len(),
        path,
    })
}

/// Rebuilds each locus from its seed and hits, reverse complementing
/// minus-strand hits, and writes the loci to batch files in `tmpdir`.
pub fn build_reads_file(
    groups: &[SeedGroup],
    consens: &FxHashMap<String, Vec<u8>>,
    samples: &SampleIndex,
    tmpdir: &Path,
    batch_size: usize,
) -> Result<ClusterLayout> {
    std::fs::create_dir_all(tmpdir)?;

    let mut loci = Vec::with_capacity(groups.len());
    let mut batches = vec![];
    let mut pending: Vec<Vec<SeqRecord>> = Vec::with_capacity(batch_size);

    for group in groups {
        let seed = resolve_record(&group.seed, samples, Strand::Forward)?;
        let mut records = vec![SeqRecord::new(group.seed.clone(), lookup(consens, &group.seed)?.clone())];
        let mut hits = Vec::with_capacity(group.hits.len());
        for (query, strand) in group.hits.iter() {
            hits.push(resolve_record(query, samples, *strand)?);
            let seq = lookup(consens, query)?;
            let seq = match strand {
                Strand::Forward => seq.clone(),
                Strand::Reverse => reverse_complement(seq),
            };
            records.push(SeqRecord::new(query.clone(), seq));
        }
        loci.push(LocusGroup { seed, hits });
        pending.push(records);

        if pending.len() == batch_size {
            let start = loci.len() - pending.len();
            batches.push(write_batch(tmpdir, start, &pending)?);
            pending.clear();
        }
    }
    if !pending.is_empty() {
        let start = loci.len() - pending.len();
        batches.push(write_batch(tmpdir, start, &pending)?);
    }

    log::info!(
        "Rebuilt {} loci into {} batches of up to {} loci",
        loci.len(),
        batches.len(),
        batch_size
    );
    Ok(ClusterLayout { loci, batches })
}
