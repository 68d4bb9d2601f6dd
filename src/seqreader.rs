/*
 * Copyright 2013-2023, Derrick Wood <dwood@cs.jhu.edu>
 *
 * This file is part of the Kraken 2 taxonomic sequence classification system.
 */

use std::fs::File;
use std::io::{self, BufRead, BufReader};

use flate2::read::MultiGzDecoder;

use crate::errors::{ClassifyError, ClassifyResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(PartialEq, Eq, PartialOrd, Copy, Clone, Debug)]
pub enum SequenceFormat {
    AutoDetect,
    Fasta,
    Fastq,
}

impl Default for SequenceFormat {
    fn default() -> Self {
        SequenceFormat::AutoDetect
    }
}

/// One parsed read. `header` is the full header line including the leading
/// `>`/`@`; `id` is the first whitespace-delimited word after the marker.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct Sequence {
    pub format: SequenceFormat,
    pub header: String,
    pub id: String,
    pub seq: String,
    pub quals: String,
}

impl Sequence {
    /// Append this record, re-serialized, to an output buffer.
    pub fn append_to(&self, out: &mut String) {
        out.push_str(&self.header);
        out.push('\n');
        out.push_str(&self.seq);
        out.push('\n');
        if self.format == SequenceFormat::Fastq {
            out.push_str("+\n");
            out.push_str(&self.quals);
            out.push('\n');
        }
    }
}

/// Streams raw batches of records off one input. The reader performs only
/// I/O and record-boundary detection; callers parse the returned text with
/// `SequenceParser` outside the reader lock.
pub struct BatchSequenceReader {
    source: Box<dyn BufRead + Send>,
    format: SequenceFormat,
}

impl BatchSequenceReader {
    /// Open a file (or stdin when `path` is `None`) with transparent gzip
    /// decompression.
    pub fn from_path(path: Option<&str>) -> ClassifyResult<Self> {
        let raw: Box<dyn BufRead + Send> = match path {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    ClassifyError::Os(format!("unable to open {}: {}", path, e))
                })?;
                Box::new(BufReader::new(file))
            }
            None => Box::new(BufReader::new(io::stdin())),
        };
        Self::from_reader(raw)
    }

    pub fn from_reader(mut raw: Box<dyn BufRead + Send>) -> ClassifyResult<Self> {
        let magic = raw.fill_buf()?;
        let source: Box<dyn BufRead + Send> = if magic.starts_with(&GZIP_MAGIC) {
            Box::new(BufReader::new(MultiGzDecoder::new(raw)))
        } else {
            raw
        };
        Ok(BatchSequenceReader {
            source,
            format: SequenceFormat::AutoDetect,
        })
    }

    pub fn file_format(&self) -> SequenceFormat {
        self.format
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let buf = self.source.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn detect_format(&mut self) -> ClassifyResult<bool> {
        if self.format != SequenceFormat::AutoDetect {
            return Ok(true);
        }
        match self.peek_byte()? {
            None => Ok(false),
            Some(b'@') => {
                self.format = SequenceFormat::Fastq;
                Ok(true)
            }
            Some(b'>') => {
                self.format = SequenceFormat::Fasta;
                Ok(true)
            }
            Some(ch) => Err(ClassifyError::Data(format!(
                "sequence reader - unrecognized file format (first byte {:#04x})",
                ch
            ))),
        }
    }

    /// Pull roughly `block_size` bytes, extended to the next record
    /// boundary. Returns false at end of input.
    pub fn load_block(&mut self, out: &mut String, block_size: usize) -> ClassifyResult<bool> {
        out.clear();
        if !self.detect_format()? {
            return Ok(false);
        }
        let mut line_count = 0usize;
        loop {
            let at_boundary = match self.format {
                SequenceFormat::Fastq => line_count % 4 == 0,
                _ => matches!(self.peek_byte()?, Some(b'>') | None),
            };
            if at_boundary && out.len() >= block_size {
                break;
            }
            let before = out.len();
            if self.source.read_line(out)? == 0 {
                break;
            }
            debug_assert!(out.len() > before);
            line_count += 1;
        }
        Ok(!out.is_empty())
    }

    /// Pull `record_count` whole records. Returns false at end of input.
    pub fn load_batch(&mut self, out: &mut String, record_count: usize) -> ClassifyResult<bool> {
        out.clear();
        if !self.detect_format()? {
            return Ok(false);
        }
        match self.format {
            SequenceFormat::Fastq => {
                for _ in 0..record_count * 4 {
                    if self.source.read_line(out)? == 0 {
                        break;
                    }
                }
            }
            _ => {
                let mut records = 0usize;
                loop {
                    match self.peek_byte()? {
                        None => break,
                        Some(b'>') => {
                            if records == record_count {
                                break;
                            }
                            records += 1;
                        }
                        Some(_) => {}
                    }
                    if self.source.read_line(out)? == 0 {
                        break;
                    }
                }
            }
        }
        Ok(!out.is_empty())
    }
}

/// Parses the text of one batch into `Sequence` records. Owned by a single
/// worker; no locking.
pub struct SequenceParser<'a> {
    text: &'a str,
    format: SequenceFormat,
}

impl<'a> SequenceParser<'a> {
    pub fn new(text: &'a str, format: SequenceFormat) -> Self {
        SequenceParser { text, format }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        if self.text.is_empty() {
            return None;
        }
        let (line, rest) = match self.text.find('\n') {
            Some(pos) => (&self.text[..pos], &self.text[pos + 1..]),
            None => (self.text, ""),
        };
        self.text = rest;
        Some(line.trim_end())
    }

    /// Parse the next record into `seq`, reusing its buffers. Returns false
    /// when the batch is exhausted.
    pub fn next_sequence(&mut self, seq: &mut Sequence) -> ClassifyResult<bool> {
        let header = loop {
            match self.next_line() {
                None => return Ok(false),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };

        let format = match self.format {
            SequenceFormat::AutoDetect => match header.as_bytes().first() {
                Some(b'@') => SequenceFormat::Fastq,
                Some(b'>') => SequenceFormat::Fasta,
                _ => {
                    return Err(ClassifyError::Data(
                        "sequence reader - unrecognized file format".to_string(),
                    ))
                }
            },
            f => f,
        };
        let expected_marker = if format == SequenceFormat::Fastq {
            b'@'
        } else {
            b'>'
        };
        if header.as_bytes().first() != Some(&expected_marker) {
            return Err(ClassifyError::Data(format!(
                "malformed {} record (saw {:?}), aborting",
                if format == SequenceFormat::Fastq {
                    "FASTQ"
                } else {
                    "FASTA"
                },
                header
            )));
        }

        seq.format = format;
        seq.header.clear();
        seq.header.push_str(header);
        seq.id.clear();
        let body = &header[1..];
        let id_end = body
            .find(|c: char| c.is_whitespace())
            .unwrap_or(body.len());
        seq.id.push_str(&body[..id_end]);

        seq.seq.clear();
        seq.quals.clear();
        match format {
            SequenceFormat::Fastq => {
                let bases = self.next_line().ok_or_else(|| {
                    ClassifyError::Data(format!("truncated FASTQ record: {}", header))
                })?;
                seq.seq.push_str(bases);
                let plus = self.next_line().ok_or_else(|| {
                    ClassifyError::Data(format!("truncated FASTQ record: {}", header))
                })?;
                if !plus.starts_with('+') {
                    return Err(ClassifyError::Data(format!(
                        "malformed FASTQ record (expected '+', saw {:?})",
                        plus
                    )));
                }
                let quals = self.next_line().ok_or_else(|| {
                    ClassifyError::Data(format!("truncated FASTQ record: {}", header))
                })?;
                seq.quals.push_str(quals);
            }
            _ => {
                while !self.text.is_empty() && !self.text.starts_with('>') {
                    match self.next_line() {
                        Some(line) => seq.seq.push_str(line),
                        None => break,
                    }
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_for(data: &'static [u8]) -> BatchSequenceReader {
        BatchSequenceReader::from_reader(Box::new(Cursor::new(data))).unwrap()
    }

    fn parse_all(text: &str, format: SequenceFormat) -> Vec<Sequence> {
        let mut parser = SequenceParser::new(text, format);
        let mut out = Vec::new();
        let mut seq = Sequence::default();
        while parser.next_sequence(&mut seq).unwrap() {
            out.push(seq.clone());
        }
        out
    }

    #[test]
    fn parses_multiline_fasta() {
        let text = ">seq1 sample text\nACGT\nACGT\n>seq2\nTGCA\n";
        let seqs = parse_all(text, SequenceFormat::Fasta);
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].id, "seq1");
        assert_eq!(seqs[0].header, ">seq1 sample text");
        assert_eq!(seqs[0].seq, "ACGTACGT");
        assert_eq!(seqs[1].seq, "TGCA");
        assert!(seqs[1].quals.is_empty());
    }

    #[test]
    fn parses_fastq() {
        let text = "@r1\nACGT\n+\nIIII\n@r2\nTGCA\n+\n!!!!\n";
        let seqs = parse_all(text, SequenceFormat::Fastq);
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].id, "r1");
        assert_eq!(seqs[0].quals, "IIII");
        assert_eq!(seqs[1].seq, "TGCA");
    }

    #[test]
    fn roundtrips_through_append_to() {
        let text = "@r1 desc\nACGT\n+\nIIII\n";
        let seqs = parse_all(text, SequenceFormat::Fastq);
        let mut out = String::new();
        seqs[0].append_to(&mut out);
        assert_eq!(out, "@r1 desc\nACGT\n+\nIIII\n");
    }

    #[test]
    fn load_block_stops_at_record_boundary() {
        let mut reader = reader_for(b">a\nACGT\n>b\nTGCA\n>c\nGGGG\n");
        let mut batch = String::new();
        assert!(reader.load_block(&mut batch, 1).unwrap());
        // Tiny block size still returns a whole record.
        assert_eq!(batch, ">a\nACGT\n");
        assert!(reader.load_block(&mut batch, 1 << 20).unwrap());
        assert_eq!(batch, ">b\nTGCA\n>c\nGGGG\n");
        assert!(!reader.load_block(&mut batch, 1).unwrap());
    }

    #[test]
    fn load_batch_counts_records() {
        let mut reader = reader_for(b"@a\nAC\n+\nII\n@b\nGT\n+\nII\n@c\nCA\n+\nII\n");
        let mut batch = String::new();
        assert!(reader.load_batch(&mut batch, 2).unwrap());
        assert_eq!(batch.lines().count(), 8);
        assert!(reader.load_batch(&mut batch, 2).unwrap());
        assert_eq!(batch.lines().count(), 4);
        assert!(!reader.load_batch(&mut batch, 2).unwrap());
        assert_eq!(reader.file_format(), SequenceFormat::Fastq);
    }

    #[test]
    fn load_batch_counts_fasta_records() {
        let mut reader = reader_for(b">a\nACGT\nACGT\n>b\nTG\n>c\nCA\n");
        let mut batch = String::new();
        assert!(reader.load_batch(&mut batch, 2).unwrap());
        assert_eq!(batch, ">a\nACGT\nACGT\n>b\nTG\n");
        assert!(reader.load_batch(&mut batch, 2).unwrap());
        assert_eq!(batch, ">c\nCA\n");
    }

    #[test]
    fn gzip_input_is_transparent() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b">a\nACGT\n").unwrap();
        let gz = encoder.finish().unwrap();
        let mut reader =
            BatchSequenceReader::from_reader(Box::new(Cursor::new(gz))).unwrap();
        let mut batch = String::new();
        assert!(reader.load_block(&mut batch, 1 << 20).unwrap());
        assert_eq!(batch, ">a\nACGT\n");
        assert_eq!(reader.file_format(), SequenceFormat::Fasta);
    }

    #[test]
    fn unrecognized_format_is_data_error() {
        let mut reader = reader_for(b"garbage\n");
        let mut batch = String::new();
        let err = reader.load_block(&mut batch, 16).unwrap_err();
        assert_eq!(err.exit_code(), crate::errors::EX_DATAERR);
    }
}
