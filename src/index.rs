/*
 * Copyright 2013-2023, Derrick Wood <dwood@cs.jhu.edu>
 *
 * This file is part of the Kraken 2 taxonomic sequence classification system.
 */

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compact_hash::CompactHashTable;
use crate::errors::{ClassifyError, ClassifyResult};
use crate::taxonomy::Taxonomy;

/// Fixed metadata record written next to an index, describing how its
/// minimizers were produced.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub k: usize,
    pub l: usize,
    pub spaced_seed_mask: u64,
    pub toggle_mask: u64,
    pub dna_db: bool,
    /// 0 disables the hash-based minimizer downsampling filter.
    pub minimum_acceptable_hash_value: u64,
    pub revcom_version: u32,
    pub db_version: u32,
    pub db_type: u32,
}

impl IndexMeta {
    pub fn load<P: AsRef<Path>>(path: P) -> ClassifyResult<Self> {
        let path = path.as_ref();
        fs::metadata(path).map_err(|e| {
            ClassifyError::Os(format!("unable to stat {}: {}", path.display(), e))
        })?;
        let buffer = fs::read(path).map_err(|e| {
            ClassifyError::Os(format!("unable to read {}: {}", path.display(), e))
        })?;
        bincode::deserialize(&buffer).map_err(|e| {
            ClassifyError::Data(format!("malformed index metadata {}: {}", path.display(), e))
        })
    }
}

/// Read-only container for everything a worker needs to classify: index
/// metadata, the taxonomy tree, and the minimizer hash. Loaded once,
/// shared by reference, never mutated.
pub struct IndexBundle {
    pub meta: IndexMeta,
    pub taxonomy: Taxonomy,
    pub hash: CompactHashTable,
}

impl IndexBundle {
    pub fn load(
        index_filename: &str,
        taxonomy_filename: &str,
        options_filename: &str,
        memory_map: bool,
    ) -> ClassifyResult<Self> {
        eprint!("Loading database information...");
        let meta = IndexMeta::load(options_filename)?;
        let taxonomy = Taxonomy::load(taxonomy_filename, memory_map)?;
        let hash = CompactHashTable::load(index_filename, memory_map)?;
        eprintln!(" done.");
        Ok(IndexBundle {
            meta,
            taxonomy,
            hash,
        })
    }
}
