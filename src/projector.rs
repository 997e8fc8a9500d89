use crate::constants::*;
use crate::error::{AssemblyError, Result};
use crate::gap_rows::insert_gap_rows;
use crate::types::*;
use crate::utils::split_record_id;
use fxhash::FxHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// One sample's count data reordered into global locus order, with the
/// sample's duplicate and indel-load filter candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleProjection {
    pub sample: String,
    pub nloci: usize,
    pub width: usize,
    counts: Vec<BaseCounts>,
    pub duplicates: Vec<bool>,
    pub indel_load: Vec<u16>,
}

impl SampleProjection {
    pub fn new(sample: &str, nloci: usize, width: usize) -> Self {
        Self {
            sample: sample.to_string(),
            nloci,
            width,
            counts: vec![[0; NUM_CHANNELS]; nloci * width],
            duplicates: vec![false; nloci],
            indel_load: vec![0; nloci],
        }
    }

    pub fn row(&self, locus: usize) -> &[BaseCounts] {
        &self.counts[locus * self.width..(locus + 1) * self.width]
    }

    pub fn row_mut(&mut self, locus: usize) -> &mut [BaseCounts] {
        &mut self.counts[locus * self.width..(locus + 1) * self.width]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let projection: SampleProjection = bincode::deserialize_from(BufReader::new(File::open(path)?))?;
        if projection.counts.len() != projection.nloci * projection.width
            || projection.duplicates.len() != projection.nloci
            || projection.indel_load.len() != projection.nloci
        {
            return Err(AssemblyError::merge(format!(
                "projection {} is inconsistent with its {} loci",
                path.display(),
                projection.nloci
            )));
        }
        Ok(projection)
    }
}

/// Complement of one position in C, A, T, G order is the reversed channel order.
#[inline]
fn complement_counts(counts: BaseCounts) -> BaseCounts {
    [counts[3], counts[2], counts[1], counts[0]]
}

/// Consensus lengths per sample, indexed by local consensus index.
pub fn seq_lengths_by_sample(
    consens: &FxHashMap<String, Vec<u8>>,
    samples: &SampleIndex,
) -> Vec<Vec<usize>> {
    let mut lengths = vec![vec![]; samples.len()];
    for (id, seq) in consens.iter() {
        if let Some((name, local)) = split_record_id(id) {
            if let Some(sidx) = samples.index_of(name) {
                let lens: &mut Vec<usize> = &mut lengths[sidx];
                if lens.len() <= local {
                    lens.resize(local + 1, 0);
                }
                lens[local] = seq.len();
            }
        }
    }
    lengths
}

pub struct Projector<'a> {
    pub loci: &'a [LocusGroup],
    pub indels: &'a IndelArray,
    pub width: usize,
    pub allow_truncation: bool,
}

impl<'a> Projector<'a> {
    /// Builds `sample`'s rows in global locus order. A locus where the sample
    /// occurs once gets its oriented count rows with gap rows inserted at
    /// the sample's indel columns; a locus where it occurs more than once is
    /// flagged duplicate and left zeroed.
    pub fn project(
        &self,
        sidx: usize,
        sample: &str,
        local: &CountArray,
        seq_lens: &[usize],
    ) -> Result<SampleProjection> {
        let mut projection = SampleProjection::new(sample, self.loci.len(), self.width);

        for (iloc, locus) in self.loci.iter().enumerate() {
            let gaps = self.indels.row(sidx, iloc);
            let ngaps = gaps.iter().filter(|x| **x).count();
            projection.indel_load[iloc] = ngaps.min(u16::MAX as usize) as u16;

            let mut members = locus.members_of(sidx);
            let hit = match (members.next(), members.next()) {
                (None, _) => continue,
                (Some(hit), None) => hit,
                (Some(_), Some(_)) => {
                    projection.duplicates[iloc] = true;
                    continue;
                }
            };

            if hit.local >= local.nrows {
                return Err(AssemblyError::projection(
                    sample,
                    format!(
                        "locus {} references consensus {} but the count array has {} rows",
                        iloc, hit.local, local.nrows
                    ),
                ));
            }
            let len = seq_lens
                .get(hit.local)
                .copied()
                .unwrap_or(local.width)
                .min(local.width);
            let data = &local.row(hit.local)[..len];
            let oriented: Vec<BaseCounts> = match hit.strand {
                Strand::Forward => data.to_vec(),
                Strand::Reverse => data.iter().rev().map(|c| complement_counts(*c)).collect(),
            };

            let fitted = insert_gap_rows(&oriented, gaps, [0; NUM_CHANNELS], self.width);
            if fitted.overflow > 0 {
                if !self.allow_truncation {
                    return Err(AssemblyError::projection(
                        sample,
                        format!(
                            "locus {} needs {} rows after indel insertion, more than the maximum {}",
                            iloc, fitted.logical_len, self.width
                        ),
                    ));
                }
                log::warn!(
                    "Truncating {} rows of sample {} at locus {} ({} rows after indel insertion, maximum {})",
                    fitted.overflow,
                    sample,
                    iloc,
                    fitted.logical_len,
                    self.width
                );
            }
            projection.row_mut(iloc).copy_from_slice(&fitted.row);
        }

        log::trace!(
            "Projected {}: {} duplicate loci",
            sample,
            projection.duplicates.iter().filter(|x| **x).count()
        );
        Ok(projection)
    }

    /// Projects every sample on a bounded pool and writes each result to its
    /// own intermediate file in `tmpdir`. Results come back in sample order.
    pub fn project_all(
        &self,
        samples: &SampleIndex,
        inputs: &[SampleInput],
        seq_lens: &[Vec<usize>],
        tmpdir: &Path,
        threads: usize,
    ) -> Result<Vec<(usize, Result<PathBuf>)>> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("project-worker-{}", i))
            .build()
            .map_err(|e| AssemblyError::config(format!("failed to create thread pool: {}", e)))?;

        let by_name: FxHashMap<&str, &SampleInput> =
            inputs.iter().map(|x| (x.name.as_str(), x)).collect();
        let finished = AtomicUsize::new(0);

        let outcomes = pool.install(|| {
            (0..samples.len())
                .into_par_iter()
                .map(|sidx| {
                    let name = samples.name(sidx);
                    let result = by_name
                        .get(name)
                        .ok_or_else(|| AssemblyError::input(format!("no input files for sample {}", name)))
                        .and_then(|input| CountArray::load(&input.catg))
                        .and_then(|local| {
                            let lens = seq_lens.get(sidx).map(|x| x.as_slice()).unwrap_or(&[]);
                            self.project(sidx, name, &local, lens)
                        })
                        .and_then(|projection| {
                            let path = tmpdir.join(format!("{}{}", name, SAMPLE_TMP_SUFFIX));
                            projection.save(&path)?;
                            Ok(path)
                        });
                    let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("Ordered clusters for {} ({}/{})", name, done, samples.len());
                    (sidx, result)
                })
                .collect::<Vec<_>>()
        });

        log::info!("Ordered clusters for {} samples in {:?}", samples.len(), start.elapsed());
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(sample: usize, local: usize, strand: Strand) -> HitRecord {
        HitRecord {
            sample,
            local,
            strand,
        }
    }

    fn counts_with_rows(rows: &[&[u32]], width: usize) -> CountArray {
        let mut array = CountArray::zeros(rows.len(), width);
        for (i, values) in rows.iter().enumerate() {
            for (pos, value) in values.iter().enumerate() {
                array.row_mut(i)[pos] = [*value, 0, 0, 1];
            }
        }
        array
    }

    #[test]
    fn test_single_hit_copied_and_duplicate_flagged() {
        // locus 0: sample 1 once; locus 1: sample 1 twice
        let loci = vec![
            LocusGroup {
                seed: hit(0, 0, Strand::Forward),
                hits: vec![hit(1, 0, Strand::Forward)],
            },
            LocusGroup {
                seed: hit(0, 1, Strand::Forward),
                hits: vec![hit(1, 1, Strand::Forward), hit(1, 2, Strand::Forward)],
            },
        ];
        let indels = IndelArray::new(2, 2, 6);
        let projector = Projector {
            loci: &loci,
            indels: &indels,
            width: 6,
            allow_truncation: false,
        };
        let local = counts_with_rows(&[&[5, 6, 7], &[1, 1, 1], &[2, 2, 2]], 4);
        let projection = projector.project(1, "b", &local, &[3, 3, 3]).unwrap();
        assert_eq!(projection.duplicates, vec![false, true]);
        assert_eq!(projection.row(0)[0], [5, 0, 0, 1]);
        assert_eq!(projection.row(0)[2], [7, 0, 0, 1]);
        assert_eq!(projection.row(0)[3], [0, 0, 0, 0]);
        assert!(projection.row(1).iter().all(|c| *c == [0, 0, 0, 0]));
    }

    #[test]
    fn test_seed_row_copied() {
        let loci = vec![LocusGroup {
            seed: hit(0, 1, Strand::Forward),
            hits: vec![],
        }];
        let indels = IndelArray::new(1, 1, 4);
        let projector = Projector {
            loci: &loci,
            indels: &indels,
            width: 4,
            allow_truncation: false,
        };
        let local = counts_with_rows(&[&[9], &[3, 4]], 4);
        let projection = projector.project(0, "a", &local, &[1, 2]).unwrap();
        assert_eq!(projection.row(0)[0], [3, 0, 0, 1]);
        assert_eq!(projection.row(0)[1], [4, 0, 0, 1]);
    }

    #[test]
    fn test_seed_and_hit_from_same_sample_is_duplicate() {
        let loci = vec![LocusGroup {
            seed: hit(0, 0, Strand::Forward),
            hits: vec![hit(0, 1, Strand::Forward)],
        }];
        let indels = IndelArray::new(1, 1, 4);
        let projector = Projector {
            loci: &loci,
            indels: &indels,
            width: 4,
            allow_truncation: false,
        };
        let local = counts_with_rows(&[&[1], &[2]], 4);
        let projection = projector.project(0, "a", &local, &[1, 1]).unwrap();
        assert_eq!(projection.duplicates, vec![true]);
    }

    #[test]
    fn test_gap_row_inserted() {
        let loci = vec![LocusGroup {
            seed: hit(0, 0, Strand::Forward),
            hits: vec![],
        }];
        let mut indels = IndelArray::new(1, 1, 6);
        indels.set_row(0, 0, &[false, true, false, false]);
        let projector = Projector {
            loci: &loci,
            indels: &indels,
            width: 6,
            allow_truncation: false,
        };
        let local = counts_with_rows(&[&[1, 2, 3]], 6);
        let projection = projector.project(0, "a", &local, &[3]).unwrap();
        let firsts: Vec<u32> = projection.row(0).iter().map(|c| c[0]).collect();
        assert_eq!(firsts, vec![1, 0, 2, 3, 0, 0]);
        assert_eq!(projection.indel_load, vec![1]);
    }

    #[test]
    fn test_reverse_hit_oriented() {
        let loci = vec![LocusGroup {
            seed: hit(1, 0, Strand::Forward),
            hits: vec![hit(0, 0, Strand::Reverse)],
        }];
        let indels = IndelArray::new(2, 1, 4);
        let projector = Projector {
            loci: &loci,
            indels: &indels,
            width: 4,
            allow_truncation: false,
        };
        let mut local = CountArray::zeros(1, 4);
        local.row_mut(0)[0] = [1, 2, 3, 4];
        local.row_mut(0)[1] = [5, 6, 7, 8];
        let projection = projector.project(0, "a", &local, &[2]).unwrap();
        assert_eq!(projection.row(0)[0], [8, 7, 6, 5]);
        assert_eq!(projection.row(0)[1], [4, 3, 2, 1]);
        assert_eq!(projection.row(0)[2], [0, 0, 0, 0]);
    }

    #[test]
    fn test_overflow_policy() {
        let loci = vec![LocusGroup {
            seed: hit(0, 0, Strand::Forward),
            hits: vec![],
        }];
        let mut indels = IndelArray::new(1, 1, 4);
        indels.set_row(0, 0, &[true, false, false, false]);
        let local = counts_with_rows(&[&[1, 2, 3, 4]], 4);

        let strict = Projector {
            loci: &loci,
            indels: &indels,
            width: 4,
            allow_truncation: false,
        };
        assert!(matches!(
            strict.project(0, "a", &local, &[4]),
            Err(AssemblyError::Projection { .. })
        ));

        let lenient = Projector {
            allow_truncation: true,
            ..strict
        };
        let projection = lenient.project(0, "a", &local, &[4]).unwrap();
        let firsts: Vec<u32> = projection.row(0).iter().map(|c| c[0]).collect();
        assert_eq!(firsts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_projection_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut projection = SampleProjection::new("a", 2, 3);
        projection.duplicates[1] = true;
        projection.indel_load[0] = 4;
        let path = dir.path().join("a.tmp.bin");
        projection.save(&path).unwrap();
        assert_eq!(SampleProjection::load(&path).unwrap(), projection);
    }

    #[test]
    fn test_seq_lengths_by_sample() {
        let samples = SampleIndex::new(vec!["a", "b"]).unwrap();
        let mut consens = FxHashMap::default();
        consens.insert("b_2".to_string(), b"ACG".to_vec());
        consens.insert("a_0".to_string(), b"AC".to_vec());
        let lens = seq_lengths_by_sample(&consens, &samples);
        assert_eq!(lens[0], vec![2]);
        assert_eq!(lens[1], vec![0, 0, 3]);
    }
}
