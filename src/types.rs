use crate::constants::*;
use crate::error::{AssemblyError, Result};
use clap::ValueEnum;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Nucleotide counts at one position, in C, A, T, G channel order.
pub type BaseCounts = [u32; NUM_CHANNELS];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Datatype {
    Rad,
    Ddrad,
    Gbs,
    Pairddrad,
    Pairgbs,
}

impl Datatype {
    /// Paired and restriction-based data carry two reads per locus.
    pub fn doubles_length(&self) -> bool {
        matches!(self, Datatype::Gbs | Datatype::Pairddrad | Datatype::Pairgbs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageParams {
    pub name: String,
    pub consens_dir: PathBuf,
    pub datatype: Datatype,
    pub max_fragment_length: usize,
    pub clust_threshold: f64,
    pub random_seed: Option<u64>,
    pub threads: usize,
    pub allow_truncation: bool,
    pub no_reverse: bool,
    pub batch_size: Option<usize>,
}

impl StageParams {
    pub fn new(name: &str, consens_dir: &Path, datatype: Datatype) -> Self {
        Self {
            name: name.to_string(),
            consens_dir: consens_dir.to_path_buf(),
            datatype,
            max_fragment_length: 150,
            clust_threshold: 0.85,
            random_seed: None,
            threads: 1,
            allow_truncation: false,
            no_reverse: false,
            batch_size: None,
        }
    }

    /// Row width of every locus array. Fixed before any array is created.
    pub fn max_len(&self) -> usize {
        if self.datatype.doubles_length() {
            self.max_fragment_length * 2
        } else {
            self.max_fragment_length
        }
    }

    pub fn scratch_path(&self, suffix: &str) -> PathBuf {
        self.consens_dir.join(format!("{}{}", self.name, suffix))
    }

    pub fn database_path(&self) -> PathBuf {
        self.scratch_path(DATABASE_SUFFIX)
    }
}

/// Sample names in lexicographic order. Every array indexed by sample uses this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleIndex {
    names: Vec<String>,
    lookup: FxHashMap<String, usize>,
}

impl SampleIndex {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(|x| x.into()).collect();
        names.sort();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(AssemblyError::input(format!(
                    "sample name {} is listed more than once",
                    pair[0]
                )));
            }
        }
        let lookup = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Ok(Self { names, lookup })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, sidx: usize) -> &str {
        &self.names[sidx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }
}

/// Upstream artifacts of one sample: its consensus sequences and count array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleInput {
    pub name: String,
    pub consens: PathBuf,
    pub catg: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

impl SeqRecord {
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn parse(field: &str) -> Option<Strand> {
        match field {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            _ => None,
        }
    }
}

/// One consensus sequence placed into a locus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    pub sample: usize,
    pub local: usize,
    pub strand: Strand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocusGroup {
    pub seed: HitRecord,
    pub hits: Vec<HitRecord>,
}

impl LocusGroup {
    /// Seed first, then hits in hit-table order.
    pub fn members(&self) -> impl Iterator<Item = &HitRecord> {
        std::iter::once(&self.seed).chain(self.hits.iter())
    }

    pub fn members_of(&self, sidx: usize) -> impl Iterator<Item = &HitRecord> {
        self.members().filter(move |x| x.sample == sidx)
    }
}

/// Upstream per-sample count array, indexed by the sample's own consensus order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountArray {
    pub nrows: usize,
    pub width: usize,
    data: Vec<BaseCounts>,
}

impl CountArray {
    pub fn zeros(nrows: usize, width: usize) -> Self {
        Self {
            nrows,
            width,
            data: vec![[0; NUM_CHANNELS]; nrows * width],
        }
    }

    pub fn row(&self, local: usize) -> &[BaseCounts] {
        &self.data[local * self.width..(local + 1) * self.width]
    }

    pub fn row_mut(&mut self, local: usize) -> &mut [BaseCounts] {
        &mut self.data[local * self.width..(local + 1) * self.width]
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AssemblyError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let array: CountArray = bincode::deserialize_from(BufReader::new(File::open(path)?))?;
        if array.data.len() != array.nrows * array.width {
            return Err(AssemblyError::input(format!(
                "count array {} has {} cells, expected {} x {}",
                path.display(),
                array.data.len(),
                array.nrows,
                array.width
            )));
        }
        Ok(array)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        bincode::serialize_into(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}

/// Gap columns inserted by the aligner, keyed by (sample, locus, column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndelArray {
    pub nsamples: usize,
    pub nloci: usize,
    pub width: usize,
    data: Vec<bool>,
}

impl IndelArray {
    pub fn new(nsamples: usize, nloci: usize, width: usize) -> Self {
        Self {
            nsamples,
            nloci,
            width,
            data: vec![false; nsamples * nloci * width],
        }
    }

    #[inline]
    fn offset(&self, sidx: usize, locus: usize) -> usize {
        (sidx * self.nloci + locus) * self.width
    }

    pub fn row(&self, sidx: usize, locus: usize) -> &[bool] {
        let start = self.offset(sidx, locus);
        &self.data[start..start + self.width]
    }

    /// Overwrites the row with `gaps`, clipped to the array width.
    pub fn set_row(&mut self, sidx: usize, locus: usize, gaps: &[bool]) {
        let start = self.offset(sidx, locus);
        let n = gaps.len().min(self.width);
        self.data[start..start + n].copy_from_slice(&gaps[..n]);
    }

    pub fn count(&self, sidx: usize, locus: usize) -> usize {
        self.row(sidx, locus).iter().filter(|x| **x).count()
    }

    /// Adds a batch-local block whose first locus is global locus `start`.
    pub fn merge_block(&mut self, start: usize, block: &IndelArray) -> Result<()> {
        if block.nsamples != self.nsamples
            || block.width != self.width
            || start + block.nloci > self.nloci
        {
            return Err(AssemblyError::merge(format!(
                "indel block at {} with {} loci does not fit array of {} loci",
                start, block.nloci, self.nloci
            )));
        }
        for sidx in 0..self.nsamples {
            for loc in 0..block.nloci {
                let dst = self.offset(sidx, start + loc);
                for (col, &gap) in block.row(sidx, loc).iter().enumerate() {
                    self.data[dst + col] |= gap;
                }
            }
        }
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.data.iter().filter(|x| **x).count()
    }
}
