use crate::constants::*;
use crate::error::{AssemblyError, Result};
use crate::gap_rows::insert_gap_rows;
use crate::projector::SampleProjection;
use crate::seq_parse::LocusBlockReader;
use crate::types::*;
use crate::utils::split_record_id;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Bytes per position of the count array: four little-endian u32 channels.
pub const COUNT_BYTES: usize = NUM_CHANNELS * 4;

/// Loci handled per chunk when streaming over the store.
pub fn chunk_size(nloci: usize) -> usize {
    if nloci > DB_CHUNK_THRESHOLD {
        DB_CHUNK_LARGE
    } else {
        DB_CHUNK_SMALL
    }
}

/// A byte array living in a file, mapped writable.
#[derive(Debug)]
struct MappedArray {
    path: PathBuf,
    map: Option<MmapMut>,
}

impl MappedArray {
    fn open_file(path: &Path, truncate: bool) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(truncate)
            .truncate(truncate)
            .open(path)?)
    }

    fn map(file: &File, len: usize) -> Result<Option<MmapMut>> {
        if len == 0 {
            return Ok(None);
        }
        // the file is owned by this store and not resized while mapped
        Ok(Some(unsafe { MmapMut::map_mut(file)? }))
    }

    /// Creates a file of `len` bytes set to `fill`, written `chunk_bytes` at a time.
    fn create(path: &Path, len: usize, fill: u8, chunk_bytes: usize) -> Result<Self> {
        let file = Self::open_file(path, true)?;
        file.set_len(len as u64)?;
        let mut map = Self::map(&file, len)?;
        if let Some(map) = map.as_mut() {
            if fill != 0 {
                for chunk in map.chunks_mut(chunk_bytes.max(1)) {
                    chunk.fill(fill);
                }
                map.flush()?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    fn open(path: &Path, len: usize) -> Result<Self> {
        if !path.exists() {
            return Err(AssemblyError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = Self::open_file(path, false)?;
        let actual = file.metadata()?.len();
        if actual != len as u64 {
            return Err(AssemblyError::format(format!(
                "store array {} has {} bytes, expected {}",
                path.display(),
                actual,
                len
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            map: Self::map(&file, len)?,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.map.as_deref_mut().unwrap_or(&mut [])
    }

    fn flush_range(&self, offset: usize, len: usize) -> Result<()> {
        if let Some(map) = &self.map {
            if len > 0 {
                map.flush_async_range(offset, len)?;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }
}

/// Everything about the store except the two large arrays. Saved as
/// gzip(bincode) at the store path; the arrays sit next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub version: u32,
    pub name: String,
    pub datatype: Datatype,
    pub samples: Vec<String>,
    pub nloci: usize,
    pub maxlen: usize,
    pub chunksize: usize,
    pub counts_file: String,
    pub seqs_file: String,
    pub duplicates: Vec<bool>,
    pub indels: Vec<u16>,
    pub splits: Vec<u16>,
    pub alleles: Vec<u16>,
    pub merged: Vec<bool>,
}

impl StoreMeta {
    fn nsamples(&self) -> usize {
        self.samples.len()
    }

    fn cells(&self) -> usize {
        self.nloci * self.nsamples() * self.maxlen
    }
}

/// Cross-sample locus store handed to the filtering stage.
///
/// Counts are laid out on disk as (locus, sample, position, channel) and
/// sequences as (locus, sample, position). Per-locus vectors are indexed by
/// global locus and kept in `meta`.
#[derive(Debug)]
pub struct ClustDatabase {
    pub meta: StoreMeta,
    catgs: MappedArray,
    seqs: MappedArray,
}

impl PartialEq for ClustDatabase {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta
            && self.catgs.bytes() == other.catgs.bytes()
            && self.seqs.bytes() == other.seqs.bytes()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl ClustDatabase {
    /// Array files of a store whose metadata lives at `params.database_path()`.
    pub fn array_paths(params: &StageParams) -> (PathBuf, PathBuf) {
        (
            params.scratch_path(STORE_COUNTS_SUFFIX),
            params.scratch_path(STORE_SEQS_SUFFIX),
        )
    }

    pub fn create(params: &StageParams, samples: &SampleIndex, nloci: usize) -> Result<Self> {
        let (counts_path, seqs_path) = Self::array_paths(params);
        let nsamples = samples.len();
        let chunksize = chunk_size(nloci);
        let meta = StoreMeta {
            version: DB_FORMAT_VERSION,
            name: params.name.clone(),
            datatype: params.datatype,
            samples: samples.names().to_vec(),
            nloci,
            maxlen: params.max_len(),
            chunksize,
            counts_file: file_name(&counts_path),
            seqs_file: file_name(&seqs_path),
            duplicates: vec![false; nloci],
            indels: vec![0; nloci],
            splits: vec![0; nloci],
            alleles: vec![0; nloci],
            merged: vec![false; nsamples],
        };
        let chunk_cells = chunksize * nsamples * meta.maxlen;
        let catgs = MappedArray::create(
            &counts_path,
            meta.cells() * COUNT_BYTES,
            0,
            chunk_cells * COUNT_BYTES,
        )?;
        let seqs = MappedArray::create(&seqs_path, meta.cells(), MISSING_BASE, chunk_cells)?;
        log::debug!(
            "Created store arrays for {} loci x {} samples x {} positions (chunk size {}) at {} and {}",
            nloci,
            nsamples,
            meta.maxlen,
            chunksize,
            counts_path.display(),
            seqs_path.display()
        );
        Ok(Self { meta, catgs, seqs })
    }

    pub fn nsamples(&self) -> usize {
        self.meta.nsamples()
    }

    #[inline]
    fn offset(&self, locus: usize, sidx: usize) -> usize {
        (locus * self.nsamples() + sidx) * self.meta.maxlen
    }

    pub fn counts(&self, locus: usize, sidx: usize) -> Vec<BaseCounts> {
        let start = self.offset(locus, sidx) * COUNT_BYTES;
        self.catgs.bytes()[start..start + self.meta.maxlen * COUNT_BYTES]
            .chunks_exact(COUNT_BYTES)
            .map(|cell| {
                let mut counts = [0; NUM_CHANNELS];
                for (value, bytes) in counts.iter_mut().zip(cell.chunks_exact(4)) {
                    *value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
                counts
            })
            .collect()
    }

    pub fn seq(&self, locus: usize, sidx: usize) -> &[u8] {
        let start = self.offset(locus, sidx);
        &self.seqs.bytes()[start..start + self.meta.maxlen]
    }

    pub fn is_merged(&self, sidx: usize) -> bool {
        self.meta.merged.get(sidx).copied().unwrap_or(false)
    }

    pub fn n_duplicates(&self) -> usize {
        self.meta.duplicates.iter().filter(|x| **x).count()
    }

    /// Adds one sample's projected rows into its slice of the count array,
    /// one chunk of loci at a time, and folds its filters into the global
    /// ones. Duplicates are OR'ed and indel loads take the element-wise maximum.
    pub fn insert_sample(&mut self, projection: &SampleProjection) -> Result<()> {
        let sidx = self
            .meta
            .samples
            .binary_search(&projection.sample)
            .map_err(|_| AssemblyError::merge(format!("sample {} is not in the store", projection.sample)))?;
        if self.meta.merged[sidx] {
            return Err(AssemblyError::merge(format!(
                "sample {} was already merged",
                projection.sample
            )));
        }
        if projection.nloci != self.meta.nloci {
            return Err(AssemblyError::merge(format!(
                "sample {} has {} loci but the store has {}",
                projection.sample, projection.nloci, self.meta.nloci
            )));
        }
        if projection.width != self.meta.maxlen {
            return Err(AssemblyError::merge(format!(
                "sample {} has rows of width {} but the store has {}",
                projection.sample, projection.width, self.meta.maxlen
            )));
        }

        let row_bytes = self.meta.maxlen * COUNT_BYTES;
        for chunk_start in (0..self.meta.nloci).step_by(self.meta.chunksize.max(1)) {
            let chunk_end = (chunk_start + self.meta.chunksize).min(self.meta.nloci);
            for locus in chunk_start..chunk_end {
                let start = self.offset(locus, sidx) * COUNT_BYTES;
                let dst = &mut self.catgs.bytes_mut()[start..start + row_bytes];
                for (cell, add) in dst.chunks_exact_mut(COUNT_BYTES).zip(projection.row(locus)) {
                    for (bytes, value) in cell.chunks_exact_mut(4).zip(add.iter()) {
                        let current = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        bytes.copy_from_slice(&current.saturating_add(*value).to_le_bytes());
                    }
                }
                self.meta.duplicates[locus] |= projection.duplicates[locus];
                self.meta.indels[locus] = self.meta.indels[locus].max(projection.indel_load[locus]);
            }
            let first = self.offset(chunk_start, 0) * COUNT_BYTES;
            let last = self.offset(chunk_end, 0) * COUNT_BYTES;
            self.catgs.flush_range(first, last - first)?;
        }
        self.meta.merged[sidx] = true;
        Ok(())
    }

    /// Merges a projection file and deletes it.
    pub fn insert_and_cleanup(&mut self, path: &Path) -> Result<()> {
        let projection = SampleProjection::load(path)?;
        self.insert_sample(&projection)?;
        std::fs::remove_file(path)?;
        log::debug!("Merged {} and removed {}", projection.sample, path.display());
        Ok(())
    }

    /// Streams the concatenated aligned clusters and writes every record's
    /// aligned characters into its sample's row at that locus, then records
    /// the pair split column of each locus.
    pub fn fill_superseqs(&mut self, catclust: &Path) -> Result<()> {
        let start = Instant::now();
        let file = File::open(catclust)?;
        let mut reader = LocusBlockReader::new(BufReader::new(GzDecoder::new(file)));

        let mut locus = 0;
        let mut chunk: Vec<Vec<SeqRecord>> = Vec::with_capacity(self.meta.chunksize);
        while let Some(block) = reader.next_block()? {
            chunk.push(block);
            if chunk.len() == self.meta.chunksize {
                self.fill_chunk(locus, &chunk)?;
                locus += chunk.len();
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.fill_chunk(locus, &chunk)?;
            locus += chunk.len();
        }
        if locus != self.meta.nloci {
            return Err(AssemblyError::merge(format!(
                "aligned clusters hold {} loci but the store has {}",
                locus, self.meta.nloci
            )));
        }
        log::info!("Filled sequences for {} loci in {:?}", locus, start.elapsed());
        Ok(())
    }

    fn fill_chunk(&mut self, first: usize, blocks: &[Vec<SeqRecord>]) -> Result<()> {
        if first + blocks.len() > self.meta.nloci {
            return Err(AssemblyError::merge(format!(
                "aligned clusters hold more than {} loci",
                self.meta.nloci
            )));
        }
        for (i, block) in blocks.iter().enumerate() {
            let locus = first + i;
            for record in block {
                let (name, _) = split_record_id(&record.id).ok_or_else(|| {
                    AssemblyError::format(format!("aligned record {} is not <sample>_<index>", record.id))
                })?;
                let sidx = self
                    .meta
                    .samples
                    .binary_search_by(|x| x.as_str().cmp(name))
                    .map_err(|_| {
                        AssemblyError::format(format!("aligned record {} names unknown sample {}", record.id, name))
                    })?;

                // rebuilt from bases and gap columns, the same way count rows are
                let gaps: Vec<bool> = record.seq.iter().map(|&b| b == GAP_CHAR).collect();
                let bases: Vec<u8> = record.seq.iter().copied().filter(|&b| b != GAP_CHAR).collect();
                let fitted = insert_gap_rows(&bases, &gaps, GAP_CHAR, self.meta.maxlen);
                if fitted.overflow > 0 {
                    log::warn!(
                        "Aligned sequence of {} at locus {} is {} long, trimmed to {}",
                        record.id,
                        locus,
                        fitted.logical_len,
                        self.meta.maxlen
                    );
                }
                let keep = fitted.logical_len.min(self.meta.maxlen);
                let start = self.offset(locus, sidx);
                self.seqs.bytes_mut()[start..start + keep].copy_from_slice(&fitted.row[..keep]);
            }
            self.meta.splits[locus] = split_offset(block).min(u16::MAX as usize) as u16;
        }
        let begin = self.offset(first, 0);
        let end = self.offset(first + blocks.len(), 0);
        self.seqs.flush_range(begin, end - begin)
    }

    /// Flushes both arrays and writes the metadata to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let start = Instant::now();
        self.catgs.flush()?;
        self.seqs.flush()?;
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        bincode::serialize_into(&mut encoder, &self.meta)?;
        encoder.finish()?.flush()?;
        log::info!(
            "Wrote {} with arrays {} and {} in {:?}",
            path.display(),
            self.catgs.path.display(),
            self.seqs.path.display(),
            start.elapsed()
        );
        Ok(())
    }

    /// Opens a saved store; the arrays are mapped, not read into memory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AssemblyError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
        let meta: StoreMeta = bincode::deserialize_from(decoder)?;
        if meta.version != DB_FORMAT_VERSION {
            return Err(AssemblyError::format(format!(
                "store {} has format version {}, expected {}",
                path.display(),
                meta.version,
                DB_FORMAT_VERSION
            )));
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let catgs = MappedArray::open(&dir.join(&meta.counts_file), meta.cells() * COUNT_BYTES)?;
        let seqs = MappedArray::open(&dir.join(&meta.seqs_file), meta.cells())?;
        Ok(Self { meta, catgs, seqs })
    }
}

/// First column where every aligned record carries the pair separator base.
pub fn split_offset(block: &[SeqRecord]) -> usize {
    let Some(len) = block.iter().map(|x| x.seq.len()).min() else {
        return 0;
    };
    (0..len)
        .find(|&col| block.iter().all(|x| x.seq[col] == PAIR_SEPARATOR_BASE))
        .unwrap_or(0)
}
