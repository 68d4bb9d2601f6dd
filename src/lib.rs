//! Parallel taxonomic sequence classification engine.
//!
//! Reads stream in batches from FASTA/FASTQ inputs, workers classify them
//! against a minimizer-to-taxon index under a confidence threshold, and
//! output leaves the process in input order: per-read Kraken lines,
//! classified/unclassified read copies, and optional rollup reports.

pub mod aa_translate;
pub mod classify;
pub mod compact_hash;
pub mod daemon;
pub mod errors;
pub mod hyperloglogplus;
pub mod index;
pub mod kv_store;
pub mod mmap_file;
pub mod mmscanner;
pub mod readcounts;
pub mod reports;
pub mod seqreader;
pub mod taxonomy;
