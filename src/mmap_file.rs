use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;

use crate::errors::{ClassifyError, ClassifyResult};

/// Read-only bytes of an index or taxonomy file, either owned in memory or
/// memory-mapped. Callers parse the bytes in place; nothing is mutated
/// after load.
pub enum FileBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl FileBytes {
    pub fn load<P: AsRef<Path>>(path: P, memory_map: bool) -> ClassifyResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| ClassifyError::Os(format!("unable to open {}: {}", path.display(), e)))?;
        if memory_map {
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                ClassifyError::Os(format!("unable to map {}: {}", path.display(), e))
            })?;
            Ok(FileBytes::Mapped(mmap))
        } else {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(|e| {
                ClassifyError::Os(format!("unable to read {}: {}", path.display(), e))
            })?;
            Ok(FileBytes::Owned(buf))
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            FileBytes::Owned(v) => v,
            FileBytes::Mapped(m) => m,
        }
    }
}
