use std::collections::HashMap;
use std::path::Path;

use crate::errors::{ClassifyError, ClassifyResult};
use crate::mmap_file::FileBytes;

/// Internal taxonomy node id. Id 0 is "no taxon" / the root's parent;
/// internal ids are assigned so that a node's parent always has a smaller
/// id than the node itself.
pub type TaxonId = u32;

pub const TAXONOMY_MAGIC: &[u8; 8] = b"TAXORTAX";

#[derive(Debug, Default, Clone)]
pub struct TaxonomyNode {
    pub parent_id: TaxonId,
    pub first_child: TaxonId,
    pub child_count: u32,
    pub name_offset: usize,
    pub rank_offset: usize,
    pub external_id: u64,
}

/// Immutable taxonomy tree. Node 0 is a zero-filled sentinel row so that
/// internal ids can be used directly as indexes.
#[derive(Debug)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    name_data: Vec<u8>,
    rank_data: Vec<u8>,
    external_to_internal: HashMap<u64, TaxonId>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ClassifyResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(ClassifyError::Data("truncated taxonomy file".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u64(&mut self) -> ClassifyResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }
}

impl Taxonomy {
    pub fn load<P: AsRef<Path>>(path: P, memory_map: bool) -> ClassifyResult<Self> {
        let file = FileBytes::load(path, memory_map)?;
        Self::from_bytes(file.bytes())
    }

    fn from_bytes(bytes: &[u8]) -> ClassifyResult<Self> {
        let mut cur = Cursor::new(bytes);
        if cur.take(8)? != TAXONOMY_MAGIC {
            return Err(ClassifyError::Data(
                "malformed taxonomy file (bad magic)".to_string(),
            ));
        }
        let node_count = cur.read_u64()? as usize;
        let name_data_len = cur.read_u64()? as usize;
        let rank_data_len = cur.read_u64()? as usize;

        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(TaxonomyNode {
                parent_id: cur.read_u64()? as TaxonId,
                first_child: cur.read_u64()? as TaxonId,
                child_count: cur.read_u64()? as u32,
                name_offset: cur.read_u64()? as usize,
                rank_offset: cur.read_u64()? as usize,
                external_id: cur.read_u64()?,
            });
        }
        let name_data = cur.take(name_data_len)?.to_vec();
        let rank_data = cur.take(rank_data_len)?.to_vec();
        Ok(Self::from_parts(nodes, name_data, rank_data))
    }

    /// Assemble a taxonomy from already-parsed tables. The node at index 0
    /// must be the sentinel row and parents must precede children.
    pub fn from_parts(nodes: Vec<TaxonomyNode>, name_data: Vec<u8>, rank_data: Vec<u8>) -> Self {
        let mut external_to_internal = HashMap::with_capacity(nodes.len());
        for (internal, node) in nodes.iter().enumerate().skip(1) {
            debug_assert!((node.parent_id as usize) < internal);
            external_to_internal.insert(node.external_id, internal as TaxonId);
        }
        Taxonomy {
            nodes,
            name_data,
            rank_data,
            external_to_internal,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, taxon: TaxonId) -> &TaxonomyNode {
        &self.nodes[taxon as usize]
    }

    pub fn parent(&self, taxon: TaxonId) -> TaxonId {
        self.nodes[taxon as usize].parent_id
    }

    pub fn external_id(&self, taxon: TaxonId) -> u64 {
        self.nodes[taxon as usize].external_id
    }

    pub fn get_internal_id(&self, external_id: u64) -> TaxonId {
        self.external_to_internal
            .get(&external_id)
            .copied()
            .unwrap_or(0)
    }

    /// True when `a` is `b` or lies on the path from `b` to the root.
    /// Relies on parents having smaller internal ids than their children.
    pub fn is_a_ancestor_of_b(&self, a: TaxonId, b: TaxonId) -> bool {
        if a == 0 || b == 0 {
            return false;
        }
        let mut b = b;
        while b > a {
            b = self.nodes[b as usize].parent_id;
        }
        b == a
    }

    pub fn lowest_common_ancestor(&self, a: TaxonId, b: TaxonId) -> TaxonId {
        if a == 0 || b == 0 {
            return if a == 0 { b } else { a };
        }
        let (mut a, mut b) = (a, b);
        while a != b {
            if a > b {
                a = self.nodes[a as usize].parent_id;
            } else {
                b = self.nodes[b as usize].parent_id;
            }
        }
        a
    }

    fn blob_str(blob: &[u8], offset: usize) -> &str {
        let tail = &blob[offset..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).unwrap_or("")
    }

    pub fn name(&self, taxon: TaxonId) -> &str {
        Self::blob_str(&self.name_data, self.nodes[taxon as usize].name_offset)
    }

    pub fn rank(&self, taxon: TaxonId) -> &str {
        Self::blob_str(&self.rank_data, self.nodes[taxon as usize].rank_offset)
    }

    pub fn children(&self, taxon: TaxonId) -> impl Iterator<Item = TaxonId> + '_ {
        let node = &self.nodes[taxon as usize];
        node.first_child..node.first_child + node.child_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1 root / 2 bacteria / 3,4 siblings under 2 / 5 child of 3
    fn sample() -> Taxonomy {
        let mut name_data = Vec::new();
        let mut rank_data = Vec::new();
        let mut names = |s: &str| {
            let off = name_data.len();
            name_data.extend_from_slice(s.as_bytes());
            name_data.push(0);
            off
        };
        let mut ranks_off = |s: &str, data: &mut Vec<u8>| {
            let off = data.len();
            data.extend_from_slice(s.as_bytes());
            data.push(0);
            off
        };
        let root_rank = ranks_off("no rank", &mut rank_data);
        let genus_rank = ranks_off("genus", &mut rank_data);
        let species_rank = ranks_off("species", &mut rank_data);
        let nodes = vec![
            TaxonomyNode::default(),
            TaxonomyNode {
                parent_id: 0,
                first_child: 2,
                child_count: 1,
                name_offset: names("root"),
                rank_offset: root_rank,
                external_id: 1,
            },
            TaxonomyNode {
                parent_id: 1,
                first_child: 3,
                child_count: 2,
                name_offset: names("Escherichia"),
                rank_offset: genus_rank,
                external_id: 561,
            },
            TaxonomyNode {
                parent_id: 2,
                first_child: 5,
                child_count: 1,
                name_offset: names("Escherichia coli"),
                rank_offset: species_rank,
                external_id: 562,
            },
            TaxonomyNode {
                parent_id: 2,
                first_child: 0,
                child_count: 0,
                name_offset: names("Escherichia fergusonii"),
                rank_offset: species_rank,
                external_id: 564,
            },
            TaxonomyNode {
                parent_id: 3,
                first_child: 0,
                child_count: 0,
                name_offset: names("Escherichia coli K-12"),
                rank_offset: species_rank,
                external_id: 83333,
            },
        ];
        Taxonomy::from_parts(nodes, name_data, rank_data)
    }

    #[test]
    fn ancestry() {
        let tax = sample();
        assert!(tax.is_a_ancestor_of_b(1, 5));
        assert!(tax.is_a_ancestor_of_b(2, 3));
        assert!(tax.is_a_ancestor_of_b(3, 3));
        assert!(!tax.is_a_ancestor_of_b(3, 4));
        assert!(!tax.is_a_ancestor_of_b(0, 3));
        assert!(!tax.is_a_ancestor_of_b(3, 0));
    }

    #[test]
    fn lca() {
        let tax = sample();
        assert_eq!(tax.lowest_common_ancestor(3, 4), 2);
        assert_eq!(tax.lowest_common_ancestor(5, 4), 2);
        assert_eq!(tax.lowest_common_ancestor(5, 3), 3);
        assert_eq!(tax.lowest_common_ancestor(0, 4), 4);
        assert_eq!(tax.lowest_common_ancestor(4, 0), 4);
    }

    #[test]
    fn external_mapping_and_names() {
        let tax = sample();
        assert_eq!(tax.get_internal_id(562), 3);
        assert_eq!(tax.get_internal_id(999_999), 0);
        assert_eq!(tax.external_id(3), 562);
        assert_eq!(tax.name(3), "Escherichia coli");
        assert_eq!(tax.rank(2), "genus");
        assert_eq!(tax.children(2).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn roundtrip_from_bytes() {
        let tax = sample();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(TAXONOMY_MAGIC);
        bytes.extend_from_slice(&(tax.node_count() as u64).to_le_bytes());
        bytes.extend_from_slice(&(tax.name_data.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(tax.rank_data.len() as u64).to_le_bytes());
        for node in &tax.nodes {
            for v in [
                node.parent_id as u64,
                node.first_child as u64,
                node.child_count as u64,
                node.name_offset as u64,
                node.rank_offset as u64,
                node.external_id,
            ] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&tax.name_data);
        bytes.extend_from_slice(&tax.rank_data);

        let reloaded = Taxonomy::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.node_count(), tax.node_count());
        assert_eq!(reloaded.name(3), "Escherichia coli");
        assert_eq!(reloaded.lowest_common_ancestor(3, 4), 2);
    }

    #[test]
    fn bad_magic_is_data_error() {
        let err = Taxonomy::from_bytes(b"NOTRIGHT").unwrap_err();
        assert_eq!(err.exit_code(), crate::errors::EX_DATAERR);
    }
}
