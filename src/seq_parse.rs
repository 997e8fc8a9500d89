use crate::constants::LOCUS_TERMINATOR;
use crate::error::{AssemblyError, Result};
use crate::types::SeqRecord;
use crate::utils::first_word;
use std::io::{BufRead, Cursor, Write};
use std::path::Path;

fn drain_fastx(mut reader: Box<dyn needletail::FastxReader>, source: &str) -> Result<Vec<SeqRecord>> {
    let mut records = vec![];
    while let Some(record) = reader.next() {
        let rec = record.map_err(|e| AssemblyError::format(format!("{}: {}", source, e)))?;
        let id = first_word(&String::from_utf8_lossy(rec.id()));
        records.push(SeqRecord::new(id, rec.seq().to_vec()));
    }
    Ok(records)
}

/// Reads every record of a FASTA/FASTQ file (.gz supported).
pub fn read_fastx_records(path: &Path) -> Result<Vec<SeqRecord>> {
    if !path.exists() {
        return Err(AssemblyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if std::fs::metadata(path)?.len() == 0 {
        return Ok(vec![]);
    }
    let source = path.display().to_string();
    let reader = needletail::parse_fastx_file(path)
        .map_err(|e| AssemblyError::format(format!("{}: {}", source, e)))?;
    drain_fastx(reader, &source)
}

/// Reads FASTA/FASTQ records held in memory, such as an engine's stdout.
pub fn read_fastx_bytes(bytes: &[u8], source: &str) -> Result<Vec<SeqRecord>> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(vec![]);
    }
    let reader = needletail::parse_fastx_reader(Cursor::new(bytes.to_vec()))
        .map_err(|e| AssemblyError::format(format!("{}: {}", source, e)))?;
    drain_fastx(reader, source)
}

/// Parses FASTA text of a locus block. Sequence lines following a header are concatenated.
pub fn parse_fasta(text: &str) -> Result<Vec<SeqRecord>> {
    let mut records: Vec<SeqRecord> = vec![];
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            records.push(SeqRecord::new(first_word(header), Vec::new()));
        } else {
            match records.last_mut() {
                Some(record) => record.seq.extend_from_slice(line.as_bytes()),
                None => {
                    return Err(AssemblyError::format(format!(
                        "sequence line before any header: {}",
                        line
                    )))
                }
            }
        }
    }
    Ok(records)
}

pub fn write_fasta<W: Write>(writer: &mut W, records: &[SeqRecord]) -> Result<()> {
    for record in records {
        writer.write_all(b">")?;
        writer.write_all(record.id.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(&record.seq)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Writes one locus block: its records followed by the locus terminator.
pub fn write_locus_block<W: Write>(writer: &mut W, records: &[SeqRecord]) -> Result<()> {
    write_fasta(writer, records)?;
    writer.write_all(LOCUS_TERMINATOR.as_bytes())?;
    Ok(())
}

/// Splits batch text into locus blocks.
pub fn parse_locus_blocks(text: &str) -> Result<Vec<Vec<SeqRecord>>> {
    text.split(LOCUS_TERMINATOR)
        .filter(|block| !block.trim().is_empty())
        .map(parse_fasta)
        .collect()
}

/// Streams locus blocks from a reader, one block at a time.
pub struct LocusBlockReader<R: BufRead> {
    reader: R,
    line: String,
}

impl<R: BufRead> LocusBlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }

    pub fn next_block(&mut self) -> Result<Option<Vec<SeqRecord>>> {
        let mut text = String::new();
        let mut separators = 0;
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                return Err(AssemblyError::format("unterminated locus block at end of file"));
            }
            if self.line.trim_end() == "//" {
                separators += 1;
                if separators == 2 {
                    return parse_fasta(&text).map(Some);
                }
                continue;
            }
            separators = 0;
            text.push_str(&self.line);
        }
    }
}
