use crate::cluster_reconstruct::{ClusterBatch, ClusterLayout};
use crate::constants::*;
use crate::error::{AssemblyError, Result};
use crate::msa::{tag_names, untag_name, MsaEngine};
use crate::seq_parse::{parse_locus_blocks, write_locus_block};
use crate::types::*;
use crate::utils::split_record_id;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of the alignment phase. Completed batches are merged even when
/// siblings failed or the run was interrupted.
#[derive(Debug)]
pub struct AlignmentReport {
    pub indels: IndelArray,
    pub completed: Vec<ClusterBatch>,
    pub failed: Vec<(ClusterBatch, AssemblyError)>,
    pub cancelled: bool,
}

fn split_pair(seq: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = seq
        .windows(PAIR_SEPARATOR.len())
        .position(|w| w == PAIR_SEPARATOR)?;
    Some((&seq[..pos], &seq[pos + PAIR_SEPARATOR.len()..]))
}

/// Aligns tagged records and returns them indexed by their tag.
fn align_tagged<E: MsaEngine>(engine: &E, tagged: &[SeqRecord]) -> Result<Vec<Option<Vec<u8>>>> {
    let mut by_tag = vec![None; tagged.len()];
    for record in engine.align(tagged)? {
        let (_, tag) = untag_name(&record.id)?;
        match by_tag.get_mut(tag) {
            Some(slot) => *slot = Some(record.seq),
            None => {
                return Err(AssemblyError::format(format!(
                    "aligned record {} has an unknown tag",
                    record.id
                )))
            }
        }
    }
    Ok(by_tag)
}

/// Aligns one locus. Singletons pass through. When every record carries the
/// pair separator, each half is aligned on its own and the halves are joined
/// with the separator.
pub fn align_locus<E: MsaEngine>(engine: &E, records: &[SeqRecord]) -> Result<Vec<SeqRecord>> {
    if records.len() <= 1 {
        return Ok(records.to_vec());
    }

    let halves: Option<Vec<(&[u8], &[u8])>> = records.iter().map(|r| split_pair(&r.seq)).collect();
    let aligned: Vec<Option<Vec<u8>>> = match halves {
        Some(halves) => {
            let first: Vec<SeqRecord> = records
                .iter()
                .zip(halves.iter())
                .map(|(r, h)| SeqRecord::new(r.id.clone(), h.0.to_vec()))
                .collect();
            let second: Vec<SeqRecord> = records
                .iter()
                .zip(halves.iter())
                .map(|(r, h)| SeqRecord::new(r.id.clone(), h.1.to_vec()))
                .collect();
            let first = align_tagged(engine, &tag_names(&first))?;
            let second = align_tagged(engine, &tag_names(&second))?;
            first
                .into_iter()
                .zip(second)
                .map(|(a, b)| match (a, b) {
                    (Some(mut a), Some(b)) => {
                        a.extend_from_slice(PAIR_SEPARATOR);
                        a.extend(b);
                        Some(a)
                    }
                    _ => None,
                })
                .collect()
        }
        None => align_tagged(engine, &tag_names(records))?,
    };

    let mut out = Vec::with_capacity(records.len());
    for (record, seq) in records.iter().zip(aligned) {
        let seq = seq.ok_or_else(|| {
            AssemblyError::format(format!("aligner dropped record {}", record.id))
        })?;
        out.push(SeqRecord::new(record.id.clone(), seq));
    }
    let len = out[0].seq.len();
    if out.iter().any(|r| r.seq.len() != len) {
        return Err(AssemblyError::format(format!(
            "aligned locus with seed {} has records of unequal length",
            records[0].id
        )));
    }
    Ok(out)
}

/// Aligns every locus of a batch in place and returns the batch's indel block,
/// sized (samples, loci in batch, width).
pub fn align_batch<E: MsaEngine>(
    engine: &E,
    batch: &ClusterBatch,
    samples: &SampleIndex,
    width: usize,
) -> Result<IndelArray> {
    let text = std::fs::read_to_string(&batch.path)?;
    let blocks = parse_locus_blocks(&text)?;
    if blocks.len() != batch.nloci {
        return Err(AssemblyError::format(format!(
            "batch {} holds {} loci, expected {}",
            batch.path.display(),
            blocks.len(),
            batch.nloci
        )));
    }

    let mut indels = IndelArray::new(samples.len(), blocks.len(), width);
    let mut aligned_blocks = Vec::with_capacity(blocks.len());
    for (loc, block) in blocks.iter().enumerate() {
        let aligned = align_locus(engine, block)?;
        if aligned.len() > 1 {
            for record in aligned.iter() {
                let sidx = split_record_id(&record.id)
                    .and_then(|(name, _)| samples.index_of(name))
                    .ok_or_else(|| {
                        AssemblyError::format(format!("aligned record {} names no sample", record.id))
                    })?;
                if record.seq.len() > width {
                    log::warn!(
                        "Aligned locus {} is {} columns wide, longer than {}; extra columns are ignored",
                        batch.start + loc,
                        record.seq.len(),
                        width
                    );
                }
                let gaps: Vec<bool> = record.seq.iter().map(|&b| b == GAP_CHAR).collect();
                indels.set_row(sidx, loc, &gaps);
            }
        }
        aligned_blocks.push(aligned);
    }

    let mut writer = BufWriter::new(File::create(&batch.path)?);
    for block in aligned_blocks.iter() {
        write_locus_block(&mut writer, block)?;
    }
    writer.flush()?;
    Ok(indels)
}

pub struct AlignDriver<'a, E: MsaEngine> {
    pub engine: &'a E,
    pub samples: &'a SampleIndex,
    pub width: usize,
    pub threads: usize,
    pub cancel: Arc<AtomicBool>,
}

impl<'a, E: MsaEngine> AlignDriver<'a, E> {
    pub fn new(engine: &'a E, samples: &'a SampleIndex, width: usize, threads: usize) -> Self {
        Self {
            engine,
            samples,
            width,
            threads,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Aligns all batches on a bounded pool. Workers share nothing mutable;
    /// their indel blocks are merged afterwards in batch start order.
    pub fn run(&self, layout: &ClusterLayout) -> Result<AlignmentReport> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("align-worker-{}", i))
            .build()
            .map_err(|e| AssemblyError::config(format!("failed to create thread pool: {}", e)))?;

        let finished = AtomicUsize::new(0);
        let total = layout.batches.len();
        let outcomes: Vec<(ClusterBatch, Result<IndelArray>)> = pool.install(|| {
            layout
                .batches
                .par_iter()
                .map(|batch| {
                    if self.cancel.load(Ordering::Relaxed) {
                        return (batch.clone(), Err(AssemblyError::Cancelled));
                    }
                    let result = align_batch(self.engine, batch, self.samples, self.width);
                    let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!(
                        "Aligned batch {}/{} (loci {}..{})",
                        done,
                        total,
                        batch.start,
                        batch.start + batch.nloci
                    );
                    (batch.clone(), result)
                })
                .collect()
        });

        let mut report = AlignmentReport {
            indels: IndelArray::new(self.samples.len(), layout.nloci(), self.width),
            completed: vec![],
            failed: vec![],
            cancelled: false,
        };
        let mut blocks = vec![];
        for (batch, outcome) in outcomes {
            match outcome {
                Ok(block) => blocks.push((batch, block)),
                Err(AssemblyError::Cancelled) => {
                    report.cancelled = true;
                    log::warn!("Batch starting at locus {} was not aligned before interruption", batch.start);
                }
                Err(e) => {
                    log::error!("Batch starting at locus {} did not finish: {}", batch.start, e);
                    report.failed.push((batch, e));
                }
            }
        }

        blocks.sort_by_key(|(batch, _)| batch.start);
        for (batch, block) in blocks {
            report.indels.merge_block(batch.start, &block)?;
            report.completed.push(batch);
        }

        log::info!(
            "Aligned {}/{} batches in {:?}; {} indel columns recorded",
            report.completed.len(),
            total,
            start.elapsed(),
            report.indels.total()
        );
        Ok(report)
    }
}

/// Concatenates batch files, in locus order, into one gzipped cluster file.
pub fn concat_aligned(batches: &[ClusterBatch], out: &Path) -> Result<()> {
    let mut ordered: Vec<&ClusterBatch> = batches.iter().collect();
    ordered.sort_by_key(|b| b.start);
    let mut writer = GzEncoder::new(BufWriter::new(File::create(out)?), Compression::default());
    for batch in ordered {
        let text = std::fs::read(&batch.path)?;
        writer.write_all(&text)?;
    }
    writer.finish()?.flush()?;
    Ok(())
}
