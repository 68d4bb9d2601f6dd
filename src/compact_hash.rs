/*
 * Copyright 2013-2023, Derrick Wood <dwood@cs.jhu.edu>
 *
 * This file is part of the Kraken 2 taxonomic sequence classification system.
 */

use std::path::Path;

use crate::errors::{ClassifyError, ClassifyResult};
use crate::kv_store::{murmur_hash3, HKey, MinimizerLookup};
use crate::mmap_file::FileBytes;
use crate::taxonomy::TaxonId;

const HEADER_LEN: usize = 32;
const CELL_LEN: usize = 4;

/// Read-only compact hash table mapping minimizers to taxon ids.
///
/// Each 32-bit cell packs `(compacted_key << value_bits) | value`, where the
/// compacted key is the top `key_bits` bits of the murmur-hashed key and a
/// value of 0 marks an empty cell. Collisions are resolved by linear
/// probing. The cell region is consumed in place from the loaded (or
/// memory-mapped) file bytes.
pub struct CompactHashTable {
    capacity: usize,
    size: usize,
    key_bits: u32,
    value_bits: u32,
    data: FileBytes,
}

impl CompactHashTable {
    pub fn load<P: AsRef<Path>>(path: P, memory_map: bool) -> ClassifyResult<Self> {
        let data = FileBytes::load(path, memory_map)?;
        Self::from_file_bytes(data)
    }

    fn from_file_bytes(data: FileBytes) -> ClassifyResult<Self> {
        let bytes = data.bytes();
        if bytes.len() < HEADER_LEN {
            return Err(ClassifyError::Data("truncated hash table file".to_string()));
        }
        let read_u64 =
            |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        let capacity = read_u64(0) as usize;
        let size = read_u64(8) as usize;
        let key_bits = read_u64(16) as u32;
        let value_bits = read_u64(24) as u32;

        if key_bits == 0 || value_bits == 0 || key_bits + value_bits != 32 {
            return Err(ClassifyError::Data(format!(
                "invalid hash table geometry: {} key bits, {} value bits",
                key_bits, value_bits
            )));
        }
        if bytes.len() - HEADER_LEN != capacity * CELL_LEN {
            return Err(ClassifyError::Data(
                "hash table capacity does not match file size".to_string(),
            ));
        }
        Ok(CompactHashTable {
            capacity,
            size,
            key_bits,
            value_bits,
            data,
        })
    }

    #[inline]
    fn cell(&self, idx: usize) -> u32 {
        let off = HEADER_LEN + idx * CELL_LEN;
        u32::from_le_bytes(self.data.bytes()[off..off + CELL_LEN].try_into().unwrap())
    }

    #[inline]
    fn cell_value(&self, cell: u32) -> u32 {
        cell & ((1u32 << self.value_bits) - 1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    pub fn value_bits(&self) -> u32 {
        self.value_bits
    }

    pub fn occupancy(&self) -> f64 {
        self.size as f64 / self.capacity as f64
    }
}

impl MinimizerLookup for CompactHashTable {
    fn get(&self, key: HKey) -> TaxonId {
        if self.capacity == 0 {
            return 0;
        }
        let hc = murmur_hash3(key);
        let compacted_key = (hc >> (32 + self.value_bits)) as u32;
        let first_idx = (hc % self.capacity as u64) as usize;
        let mut idx = first_idx;
        loop {
            let cell = self.cell(idx);
            let value = self.cell_value(cell);
            if value == 0 {
                return 0;
            }
            if cell >> self.value_bits == compacted_key {
                return value;
            }
            idx = (idx + 1) % self.capacity;
            if idx == first_idx {
                return 0;
            }
        }
    }
}
