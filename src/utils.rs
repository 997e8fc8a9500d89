use memory_stats::memory_stats;
use rand::Rng;

pub fn log_memory_usage(info: bool, message: &str) {
    if let Some(usage) = memory_stats() {
        if info {
            log::info!(
                "{} --- Memory usage: {:.2} GB",
                message,
                usage.physical_mem as f64 / 1_000_000_000.
            );
        } else {
            log::debug!(
                "{} --- Memory usage: {:.2} GB",
                message,
                usage.physical_mem as f64 / 1_000_000_000.
            );
        }
    } else {
        log::info!("Memory usage: unknown (WARNING)");
    }
}

pub fn first_word(s: &str) -> String {
    s.split_whitespace().next().unwrap_or(s).to_string()
}

/// Splits `<sample>_<local index>` at the last underscore.
pub fn split_record_id(id: &str) -> Option<(&str, usize)> {
    let (sample, local) = id.rsplit_once('_')?;
    let local = local.parse::<usize>().ok()?;
    Some((sample, local))
}

#[inline]
fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'S' => b'S',
        b'W' => b'W',
        b'n' => b'n',
        b'-' => b'-',
        _ => b'N',
    }
}

/// Reverse complement that keeps ambiguity codes, case and the pair separator.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// The two bases behind an IUPAC two-base ambiguity code.
#[inline]
pub fn ambiguity_alleles(base: u8) -> Option<(u8, u8)> {
    match base {
        b'R' => Some((b'A', b'G')),
        b'Y' => Some((b'C', b'T')),
        b'S' => Some((b'C', b'G')),
        b'W' => Some((b'A', b'T')),
        b'K' => Some((b'G', b'T')),
        b'M' => Some((b'A', b'C')),
        _ => None,
    }
}

/// Resolves every ambiguity code to one of its two alleles, chosen with `rng`.
pub fn sample_haplotype<R: Rng>(seq: &[u8], rng: &mut R) -> Vec<u8> {
    seq.iter()
        .map(|&b| match ambiguity_alleles(b) {
            Some((first, second)) => {
                if rng.gen_bool(0.5) {
                    first
                } else {
                    second
                }
            }
            None => b,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_split_record_id_last_underscore() {
        assert_eq!(split_record_id("pop_1_12"), Some(("pop_1", 12)));
        assert_eq!(split_record_id("a_0"), Some(("a", 0)));
        assert_eq!(split_record_id("nounderscore"), None);
        assert_eq!(split_record_id("a_x"), None);
    }

    #[test]
    fn test_reverse_complement_keeps_separator() {
        assert_eq!(reverse_complement(b"ACGnnnnTTR"), b"YAAnnnnCGT".to_vec());
    }

    #[test]
    fn test_sample_haplotype_resolves_codes() {
        let mut rng = StdRng::seed_from_u64(7);
        let hap = sample_haplotype(b"ARYSWKMC", &mut rng);
        assert_eq!(hap.len(), 8);
        assert_eq!(hap[0], b'A');
        assert!(hap[1] == b'A' || hap[1] == b'G');
        assert!(hap[2] == b'C' || hap[2] == b'T');
        assert_eq!(hap[7], b'C');
        assert!(hap.iter().all(|b| b"ACGT".contains(b)));
    }
}
