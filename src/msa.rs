use crate::constants::ALIGN_TAG;
use crate::error::{AssemblyError, Result};
use crate::seq_parse::{read_fastx_bytes, write_fasta};
use crate::types::SeqRecord;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

/// Multiple sequence alignment engine boundary. Output records may come back
/// in any order but keep their names.
pub trait MsaEngine: Sync {
    fn align(&self, records: &[SeqRecord]) -> Result<Vec<SeqRecord>>;
}

pub struct MuscleEngine {
    pub binary: PathBuf,
}

impl MuscleEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn engine_error(&self, output: &Output) -> AssemblyError {
        AssemblyError::Engine {
            program: self.binary.display().to_string(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

impl MsaEngine for MuscleEngine {
    fn align(&self, records: &[SeqRecord]) -> Result<Vec<SeqRecord>> {
        let mut child = Command::new(&self.binary)
            .arg("-quiet")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AssemblyError::config(format!(
                    "failed to execute {}: {}. Is muscle installed?",
                    self.binary.display(),
                    e
                ))
            })?;

        let mut input = vec![];
        write_fasta(&mut input, records)?;
        // a failed write means the engine exited early; its status and stderr come first
        let write_result = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&input),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(self.engine_error(&output));
        }
        write_result?;
        let aligned = read_fastx_bytes(&output.stdout, &self.binary.display().to_string())?;
        if aligned.len() != records.len() {
            return Err(AssemblyError::format(format!(
                "{} returned {} records for {} inputs",
                self.binary.display(),
                aligned.len(),
                records.len()
            )));
        }
        Ok(aligned)
    }
}

/// Appends a per-record counter so records can be matched after alignment.
pub fn tag_names(records: &[SeqRecord]) -> Vec<SeqRecord> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| SeqRecord::new(format!("{}{}{}", record.id, ALIGN_TAG, i), record.seq.clone()))
        .collect()
}

/// Splits a tagged name into the original name and its counter.
pub fn untag_name(name: &str) -> Result<(&str, usize)> {
    name.rsplit_once(ALIGN_TAG)
        .and_then(|(id, tag)| tag.parse::<usize>().ok().map(|tag| (id, tag)))
        .ok_or_else(|| AssemblyError::format(format!("aligned record {} lost its order tag", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let records = vec![
            SeqRecord::new("a_0", b"AC".to_vec()),
            SeqRecord::new("b_3", b"AG".to_vec()),
        ];
        let tagged = tag_names(&records);
        assert_eq!(tagged[1].id, "b_3;*1");
        assert_eq!(untag_name(&tagged[1].id).unwrap(), ("b_3", 1));
        assert!(untag_name("b_3").is_err());
    }

    #[cfg(unix)]
    fn fake_engine(dir: &std::path::Path, body: &str) -> MuscleEngine {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-muscle");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        MuscleEngine::new(path)
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_output_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "cat");
        let records = tag_names(&[
            SeqRecord::new("a_0", b"ACGnnnnTT".to_vec()),
            SeqRecord::new("b_1", b"AC-G".to_vec()),
        ]);
        assert_eq!(engine.align(&records).unwrap(), records);
    }

    #[cfg(unix)]
    #[test]
    fn test_early_exit_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "echo 'cannot read input' >&2\nexit 3");
        // larger than a pipe buffer so the write hits a closed pipe
        let records: Vec<SeqRecord> = (0..2000)
            .map(|i| SeqRecord::new(format!("a_{}", i), vec![b'A'; 100]))
            .collect();
        match engine.align(&records) {
            Err(AssemblyError::Engine { status, stderr, .. }) => {
                assert!(status.contains('3'));
                assert!(stderr.contains("cannot read input"));
            }
            other => panic!("unexpected result {:?}", other.map(|x| x.len())),
        }
    }
}
