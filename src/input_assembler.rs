use crate::constants::{CATCONS_SUFFIX, CATHAPS_SUFFIX};
use crate::error::{AssemblyError, Result};
use crate::seq_parse::{read_fastx_records, write_fasta};
use crate::types::*;
use crate::utils::{sample_haplotype, split_record_id};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct InputSummary {
    pub nrecords: usize,
    pub catcons: PathBuf,
    pub cathaps: PathBuf,
}

/// Loads every sample's consensus records in sample-name order.
pub fn load_consens_records(samples: &[SampleInput]) -> Result<Vec<SeqRecord>> {
    let mut ordered: Vec<&SampleInput> = samples.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut records = vec![];
    for sample in ordered {
        let sample_records = read_fastx_records(&sample.consens)?;
        for record in sample_records.iter() {
            match split_record_id(&record.id) {
                Some((name, _)) if name == sample.name => {}
                _ => {
                    return Err(AssemblyError::input(format!(
                        "record {} in {} is not named <{}>_<index>",
                        record.id,
                        sample.consens.display(),
                        sample.name
                    )))
                }
            }
        }
        log::debug!(
            "Loaded {} consensus sequences for {}",
            sample_records.len(),
            sample.name
        );
        records.extend(sample_records);
    }
    Ok(records)
}

/// Groups records into length classes, longest first, and shuffles each class.
/// Ambiguity codes are resolved to one sampled allele in the returned copies.
pub fn shuffle_length_classes(records: &[SeqRecord], seed: Option<u64>) -> Vec<SeqRecord> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut classes: BTreeMap<usize, Vec<&SeqRecord>> = BTreeMap::new();
    for record in records {
        classes.entry(record.seq.len()).or_default().push(record);
    }
    log::debug!("Sorting {} sequences into {} length classes", records.len(), classes.len());

    let mut haplos = Vec::with_capacity(records.len());
    for (_, mut class) in classes.into_iter().rev() {
        class.shuffle(&mut rng);
        for record in class {
            haplos.push(SeqRecord::new(
                record.id.clone(),
                sample_haplotype(&record.seq, &mut rng),
            ));
        }
    }
    haplos
}

/// Writes the concatenated consensus file and the clustering input file.
pub fn build_input_file(params: &StageParams, samples: &[SampleInput]) -> Result<InputSummary> {
    let start = Instant::now();
    let records = load_consens_records(samples)?;
    if records.is_empty() {
        return Err(AssemblyError::input(
            "no consensus sequences found in any sample",
        ));
    }

    let catcons = params.scratch_path(CATCONS_SUFFIX);
    let cathaps = params.scratch_path(CATHAPS_SUFFIX);

    let mut writer = BufWriter::new(File::create(&catcons)?);
    write_fasta(&mut writer, &records)?;
    writer.flush()?;

    let haplos = shuffle_length_classes(&records, params.random_seed);
    let mut writer = BufWriter::new(File::create(&cathaps)?);
    write_fasta(&mut writer, &haplos)?;
    writer.flush()?;

    log::info!(
        "Concatenated and shuffled {} consensus sequences from {} samples in {:?}",
        records.len(),
        samples.len(),
        start.elapsed()
    );

    Ok(InputSummary {
        nrecords: records.len(),
        catcons,
        cathaps,
    })
}
