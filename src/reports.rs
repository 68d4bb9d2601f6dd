/*
 * Copyright 2013-2023, Derrick Wood <dwood@cs.jhu.edu>
 *
 * This file is part of the Kraken 2 taxonomic sequence classification system.
 */

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::errors::{ClassifyError, ClassifyResult};
use crate::readcounts::{TaxonCounter, TaxonCounters};
use crate::taxonomy::{TaxonId, Taxonomy};

/// Roll per-taxon read counts up into clade totals by walking each taxon's
/// ancestor chain.
pub fn get_clade_counts(
    taxonomy: &Taxonomy,
    call_counts: &HashMap<TaxonId, u64>,
) -> HashMap<TaxonId, u64> {
    let mut clade_counts = HashMap::new();
    for (&taxid, &count) in call_counts {
        let mut current = taxid;
        while current != 0 {
            *clade_counts.entry(current).or_insert(0) += count;
            current = taxonomy.parent(current);
        }
    }
    clade_counts
}

/// Clade rollup of the full counters, merging read counts and the
/// distinct-minimizer sketches up the tree.
pub fn get_clade_counters(taxonomy: &Taxonomy, call_counters: &TaxonCounters) -> TaxonCounters {
    let mut clade_counters = TaxonCounters::new();
    for (&taxid, counter) in call_counters {
        let mut current = taxid;
        while current != 0 {
            clade_counters.entry(current).or_default().merge(counter);
            current = taxonomy.parent(current);
        }
    }
    clade_counters
}

fn get_rank_code(rank: &str) -> Option<char> {
    match rank {
        "superkingdom" | "domain" => Some('d'),
        "kingdom" => Some('k'),
        "phylum" => Some('p'),
        "class" => Some('c'),
        "order" => Some('o'),
        "family" => Some('f'),
        "genus" => Some('g'),
        "species" => Some('s'),
        _ => None,
    }
}

/// Sort child taxa by descending clade read count; ties keep tree order so
/// output is stable.
fn sorted_children<F: Fn(TaxonId) -> u64>(
    taxonomy: &Taxonomy,
    taxon: TaxonId,
    clade_reads: F,
) -> Vec<TaxonId> {
    let mut children: Vec<TaxonId> = taxonomy.children(taxon).collect();
    children.sort_by(|&a, &b| clade_reads(b).cmp(&clade_reads(a)));
    children
}

#[allow(clippy::too_many_arguments)]
fn write_kraken_report_line<W: Write>(
    out: &mut W,
    report_kmer_data: bool,
    total_seqs: u64,
    clade_counter: &TaxonCounter,
    taxon_counter: &TaxonCounter,
    rank_str: &str,
    external_id: u64,
    sci_name: &str,
    depth: usize,
) -> io::Result<()> {
    let pct = 100.0 * clade_counter.read_count() as f64 / total_seqs as f64;
    write!(
        out,
        "{:6.2}\t{}\t{}\t",
        pct,
        clade_counter.read_count(),
        taxon_counter.read_count()
    )?;
    if report_kmer_data {
        write!(
            out,
            "{}\t{}\t",
            clade_counter.distinct_kmer_count(),
            clade_counter.kmer_count()
        )?;
    }
    write!(out, "{}\t{}\t", rank_str, external_id)?;
    for _ in 0..depth {
        write!(out, "  ")?;
    }
    writeln!(out, "{}", sci_name)
}

#[allow(clippy::too_many_arguments)]
fn kraken_report_dfs<W: Write>(
    taxon: TaxonId,
    out: &mut W,
    report_zeros: bool,
    report_kmer_data: bool,
    taxonomy: &Taxonomy,
    clade_counters: &TaxonCounters,
    call_counters: &TaxonCounters,
    total_seqs: u64,
    rank_code: char,
    rank_depth: i32,
    depth: usize,
) -> io::Result<()> {
    let clade_counter = clade_counters.get(&taxon);
    if !report_zeros && clade_counter.map_or(true, |c| c.read_count() == 0) {
        return Ok(());
    }

    let rank = taxonomy.rank(taxon);
    let (rank_code, rank_depth) = match get_rank_code(rank) {
        Some(code) => (code.to_ascii_uppercase(), 0),
        None => (rank_code, rank_depth + 1),
    };
    let rank_str = if rank_depth != 0 {
        format!("{}{}", rank_code, rank_depth)
    } else {
        rank_code.to_string()
    };

    let default_counter = TaxonCounter::default();
    write_kraken_report_line(
        out,
        report_kmer_data,
        total_seqs,
        clade_counter.unwrap_or(&default_counter),
        call_counters.get(&taxon).unwrap_or(&default_counter),
        &rank_str,
        taxonomy.external_id(taxon),
        taxonomy.name(taxon),
        depth,
    )?;

    let children = sorted_children(taxonomy, taxon, |t| {
        clade_counters.get(&t).map_or(0, |c| c.read_count())
    });
    for child in children {
        kraken_report_dfs(
            child,
            out,
            report_zeros,
            report_kmer_data,
            taxonomy,
            clade_counters,
            call_counters,
            total_seqs,
            rank_code,
            rank_depth,
            depth + 1,
        )?;
    }
    Ok(())
}

/// Write a Kraken-style report: one line per taxon in depth-first tree
/// order, unclassified reads first.
#[allow(clippy::too_many_arguments)]
pub fn write_kraken_style_report<W: Write>(
    out: &mut W,
    report_zeros: bool,
    report_kmer_data: bool,
    taxonomy: &Taxonomy,
    call_counters: &TaxonCounters,
    total_seqs: u64,
    total_unclassified: u64,
) -> io::Result<()> {
    let clade_counters = get_clade_counters(taxonomy, call_counters);
    if total_unclassified != 0 || report_zeros {
        let rc = TaxonCounter::with_counts(total_unclassified, 0);
        write_kraken_report_line(
            out,
            report_kmer_data,
            total_seqs,
            &rc,
            &rc,
            "U",
            0,
            "unclassified",
            0,
        )?;
    }
    if taxonomy.node_count() > 1 {
        kraken_report_dfs(
            1,
            out,
            report_zeros,
            report_kmer_data,
            taxonomy,
            &clade_counters,
            call_counters,
            total_seqs,
            'R',
            -1,
            0,
        )?;
    }
    Ok(())
}

pub fn report_kraken_style<P: AsRef<Path>>(
    filename: P,
    report_zeros: bool,
    report_kmer_data: bool,
    taxonomy: &Taxonomy,
    call_counters: &TaxonCounters,
    total_seqs: u64,
    total_unclassified: u64,
) -> ClassifyResult<()> {
    let filename = filename.as_ref();
    let file = File::create(filename).map_err(|e| {
        ClassifyError::Os(format!("unable to open file {}: {}", filename.display(), e))
    })?;
    let mut out = BufWriter::new(file);
    write_kraken_style_report(
        &mut out,
        report_zeros,
        report_kmer_data,
        taxonomy,
        call_counters,
        total_seqs,
        total_unclassified,
    )?;
    out.flush()?;
    Ok(())
}

fn mpa_report_dfs<W: Write>(
    taxon: TaxonId,
    out: &mut W,
    report_zeros: bool,
    taxonomy: &Taxonomy,
    clade_counts: &HashMap<TaxonId, u64>,
    lineage: &mut Vec<String>,
) -> io::Result<()> {
    let clade_count = clade_counts.get(&taxon).copied().unwrap_or(0);
    if !report_zeros && clade_count == 0 {
        return Ok(());
    }

    let rank_code = get_rank_code(taxonomy.rank(taxon));
    if let Some(code) = rank_code {
        lineage.push(format!("{}__{}", code, taxonomy.name(taxon)));
        writeln!(out, "{}\t{}", lineage.join("|"), clade_count)?;
    }

    let children = sorted_children(taxonomy, taxon, |t| {
        clade_counts.get(&t).copied().unwrap_or(0)
    });
    for child in children {
        mpa_report_dfs(child, out, report_zeros, taxonomy, clade_counts, lineage)?;
    }

    if rank_code.is_some() {
        lineage.pop();
    }
    Ok(())
}

/// Write an MPA-style report: `rank__Name|...` lineages of every ranked
/// taxon with classified reads in its clade.
pub fn write_mpa_style_report<W: Write>(
    out: &mut W,
    report_zeros: bool,
    taxonomy: &Taxonomy,
    call_counters: &TaxonCounters,
) -> io::Result<()> {
    let call_counts: HashMap<TaxonId, u64> = call_counters
        .iter()
        .map(|(&taxid, counter)| (taxid, counter.read_count()))
        .collect();
    let clade_counts = get_clade_counts(taxonomy, &call_counts);
    if taxonomy.node_count() > 1 {
        let mut lineage = Vec::new();
        mpa_report_dfs(
            1,
            out,
            report_zeros,
            taxonomy,
            &clade_counts,
            &mut lineage,
        )?;
    }
    Ok(())
}

pub fn report_mpa_style<P: AsRef<Path>>(
    filename: P,
    report_zeros: bool,
    taxonomy: &Taxonomy,
    call_counters: &TaxonCounters,
) -> ClassifyResult<()> {
    let filename = filename.as_ref();
    let file = File::create(filename).map_err(|e| {
        ClassifyError::Os(format!("unable to open file {}: {}", filename.display(), e))
    })?;
    let mut out = BufWriter::new(file);
    write_mpa_style_report(&mut out, report_zeros, taxonomy, call_counters)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TaxonomyNode;

    // (parent internal id, external id, rank, name); index 0 sentinel added
    // automatically, nodes listed so siblings are contiguous.
    fn build_taxonomy(entries: &[(u32, u64, &str, &str)]) -> Taxonomy {
        let mut name_data = Vec::new();
        let mut rank_data = Vec::new();
        let mut nodes = vec![TaxonomyNode::default()];
        for &(parent_id, external_id, rank, name) in entries {
            let name_offset = name_data.len();
            name_data.extend_from_slice(name.as_bytes());
            name_data.push(0);
            let rank_offset = rank_data.len();
            rank_data.extend_from_slice(rank.as_bytes());
            rank_data.push(0);
            nodes.push(TaxonomyNode {
                parent_id,
                first_child: 0,
                child_count: 0,
                name_offset,
                rank_offset,
                external_id,
            });
        }
        for i in 1..nodes.len() {
            let children: Vec<usize> = (1..nodes.len())
                .filter(|&c| nodes[c].parent_id as usize == i)
                .collect();
            if let Some(&first) = children.first() {
                nodes[i].first_child = first as u32;
                nodes[i].child_count = children.len() as u32;
            }
        }
        Taxonomy::from_parts(nodes, name_data, rank_data)
    }

    fn sample_taxonomy() -> Taxonomy {
        build_taxonomy(&[
            (0, 1, "no rank", "root"),
            (1, 2, "superkingdom", "Bacteria"),
            (2, 561, "genus", "Escherichia"),
            (3, 562, "species", "Escherichia coli"),
        ])
    }

    fn sample_counters() -> TaxonCounters {
        let mut counters = TaxonCounters::new();
        let coli = counters.entry(4).or_default();
        for _ in 0..3 {
            coli.increment_read_count();
        }
        coli.add_kmer(1000);
        coli.add_kmer(1001);
        counters.entry(3).or_default().increment_read_count();
        counters
    }

    #[test]
    fn clade_counts_roll_up_to_root() {
        let tax = sample_taxonomy();
        let call_counts: HashMap<TaxonId, u64> = [(4, 3), (3, 1)].into_iter().collect();
        let clade_counts = get_clade_counts(&tax, &call_counts);
        assert_eq!(clade_counts.get(&4), Some(&3));
        assert_eq!(clade_counts.get(&3), Some(&4));
        assert_eq!(clade_counts.get(&2), Some(&4));
        assert_eq!(clade_counts.get(&1), Some(&4));
    }

    #[test]
    fn clade_counters_merge_reads_and_kmers() {
        let tax = sample_taxonomy();
        let clade = get_clade_counters(&tax, &sample_counters());
        assert_eq!(clade.get(&1).unwrap().read_count(), 4);
        assert_eq!(clade.get(&3).unwrap().read_count(), 4);
        assert_eq!(clade.get(&3).unwrap().kmer_count(), 2);
        assert_eq!(clade.get(&4).unwrap().read_count(), 3);
    }

    #[test]
    fn kraken_style_report_layout() {
        let tax = sample_taxonomy();
        let mut out = Vec::new();
        write_kraken_style_report(&mut out, false, false, &tax, &sample_counters(), 5, 1)
            .unwrap();
        let report = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], " 20.00\t1\t1\tU\t0\tunclassified");
        assert_eq!(lines[1], " 80.00\t4\t0\tR\t1\troot");
        assert_eq!(lines[2], " 80.00\t4\t0\tD\t2\t  Bacteria");
        assert_eq!(lines[3], " 80.00\t4\t1\tG\t561\t    Escherichia");
        assert_eq!(lines[4], " 60.00\t3\t3\tS\t562\t      Escherichia coli");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn kraken_style_report_kmer_columns() {
        let tax = sample_taxonomy();
        let mut out = Vec::new();
        write_kraken_style_report(&mut out, false, true, &tax, &sample_counters(), 5, 1)
            .unwrap();
        let report = String::from_utf8(out).unwrap();
        let species_line = report
            .lines()
            .find(|l| l.ends_with("Escherichia coli"))
            .unwrap();
        let fields: Vec<&str> = species_line.split('\t').collect();
        // pct, clade reads, self reads, distinct minimizers, total minimizers
        assert_eq!(fields[1], "3");
        assert_eq!(fields[3], "2");
        assert_eq!(fields[4], "2");
    }

    #[test]
    fn zero_clades_are_suppressed_unless_requested() {
        let tax = build_taxonomy(&[
            (0, 1, "no rank", "root"),
            (1, 2, "superkingdom", "Bacteria"),
            (1, 3, "superkingdom", "Archaea"),
        ]);
        let mut counters = TaxonCounters::new();
        counters.entry(2).or_default().increment_read_count();

        let mut out = Vec::new();
        write_kraken_style_report(&mut out, false, false, &tax, &counters, 1, 0).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(!report.contains("Archaea"));

        let mut out = Vec::new();
        write_kraken_style_report(&mut out, true, false, &tax, &counters, 1, 0).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("Archaea"));
        assert!(report.contains("unclassified"));
    }

    #[test]
    fn mpa_style_report_lineages() {
        let tax = sample_taxonomy();
        let mut out = Vec::new();
        write_mpa_style_report(&mut out, false, &tax, &sample_counters()).unwrap();
        let report = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "d__Bacteria\t4");
        assert_eq!(lines[1], "d__Bacteria|g__Escherichia\t4");
        assert_eq!(
            lines[2],
            "d__Bacteria|g__Escherichia|s__Escherichia coli\t3"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn children_sorted_by_clade_count() {
        let tax = build_taxonomy(&[
            (0, 1, "no rank", "root"),
            (1, 10, "genus", "Minor"),
            (1, 20, "genus", "Major"),
        ]);
        let mut counters = TaxonCounters::new();
        counters.entry(2).or_default().increment_read_count();
        let major = counters.entry(3).or_default();
        for _ in 0..5 {
            major.increment_read_count();
        }
        let mut out = Vec::new();
        write_kraken_style_report(&mut out, false, false, &tax, &counters, 6, 0).unwrap();
        let report = String::from_utf8(out).unwrap();
        let major_pos = report.find("Major").unwrap();
        let minor_pos = report.find("Minor").unwrap();
        assert!(major_pos < minor_pos);
    }
}
