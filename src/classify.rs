use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::sync::Mutex;
use std::time::Instant;

use clap::{Arg, ArgAction, Command};

use crate::aa_translate::translate_to_all_frames;
use crate::errors::{fatal, ClassifyError, ClassifyResult};
use crate::index::{IndexBundle, IndexMeta};
use crate::kv_store::{murmur_hash3, MinimizerLookup};
use crate::mmscanner::MinimizerScanner;
use crate::readcounts::{TaxonCounters, TaxonCounts};
use crate::reports;
use crate::seqreader::{BatchSequenceReader, Sequence, SequenceFormat, SequenceParser};
use crate::taxonomy::{TaxonId, Taxonomy};

pub const NUM_FRAGMENTS_PER_THREAD: usize = 10_000;
const BLOCK_SIZE: usize = 3 * 1024 * 1024;

/// Outcome of one scanner window. The serialized hitlist encodes these as
/// `{ext_id}:n`, `A:n`, `|:|` and `-:-`; no reserved taxid ever leaves this
/// module.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HitToken {
    Taxon(TaxonId),
    Ambiguous,
    MateBorder,
    FrameBorder,
}

impl HitToken {
    fn is_border(self) -> bool {
        matches!(self, HitToken::MateBorder | HitToken::FrameBorder)
    }
}

#[derive(Default, Clone)]
pub struct ClassifyOptions {
    pub index_filename: String,
    pub taxonomy_filename: String,
    pub options_filename: String,
    pub report_filename: Option<String>,
    pub classified_output_filename: Option<String>,
    pub unclassified_output_filename: Option<String>,
    pub kraken_output_filename: Option<String>,
    pub mpa_style_report: bool,
    pub report_kmer_data: bool,
    pub quick_mode: bool,
    pub report_zero_counts: bool,
    pub use_translated_search: bool,
    pub print_scientific_name: bool,
    pub confidence_threshold: f64,
    pub num_threads: usize,
    pub paired_end_processing: bool,
    pub single_file_pairs: bool,
    pub minimum_quality_score: u8,
    pub minimum_hit_groups: usize,
    pub use_memory_mapping: bool,
    pub daemon_mode: bool,
    pub input_files: Vec<String>,
}

#[derive(Default, Clone)]
pub struct ClassificationStats {
    pub total_sequences: u64,
    pub total_bases: u64,
    pub total_classified: u64,
}

/// The five output sinks. Kraken text goes to stdout unless redirected or
/// silenced with `-`. File sinks open lazily on the first written bundle so
/// an empty input leaves no stray files.
pub struct OutputStreamData {
    initialized: bool,
    kraken_output: Option<BufWriter<Box<dyn Write + Send>>>,
    classified_output1: Option<BufWriter<Box<dyn Write + Send>>>,
    classified_output2: Option<BufWriter<Box<dyn Write + Send>>>,
    unclassified_output1: Option<BufWriter<Box<dyn Write + Send>>>,
    unclassified_output2: Option<BufWriter<Box<dyn Write + Send>>>,
}

impl Default for OutputStreamData {
    fn default() -> Self {
        Self::new()
    }
}

fn open_output(filename: &str) -> ClassifyResult<BufWriter<Box<dyn Write + Send>>> {
    let file = File::create(filename)
        .map_err(|e| ClassifyError::Os(format!("unable to open file {}: {}", filename, e)))?;
    Ok(BufWriter::new(Box::new(file)))
}

/// Split a `path#suffix` template into its `_1`/`_2` variants. The template
/// must contain exactly one `#`.
fn paired_filenames(template: &str) -> ClassifyResult<(String, String)> {
    let fields: Vec<&str> = template.split('#').collect();
    match fields.len() {
        0 | 1 => Err(ClassifyError::Data(format!(
            "paired filename format missing # character: {}",
            template
        ))),
        2 => Ok((
            format!("{}_1{}", fields[0], fields[1]),
            format!("{}_2{}", fields[0], fields[1]),
        )),
        _ => Err(ClassifyError::Data(format!(
            "paired filename format has >1 # character: {}",
            template
        ))),
    }
}

impl OutputStreamData {
    pub fn new() -> Self {
        OutputStreamData {
            initialized: false,
            kraken_output: Some(BufWriter::new(Box::new(io::stdout()))),
            classified_output1: None,
            classified_output2: None,
            unclassified_output1: None,
            unclassified_output2: None,
        }
    }

    fn initialize(&mut self, opts: &ClassifyOptions) -> ClassifyResult<()> {
        if self.initialized {
            return Ok(());
        }
        if let Some(ref filename) = opts.classified_output_filename {
            if opts.paired_end_processing {
                let (name1, name2) = paired_filenames(filename)?;
                self.classified_output1 = Some(open_output(&name1)?);
                self.classified_output2 = Some(open_output(&name2)?);
            } else {
                self.classified_output1 = Some(open_output(filename)?);
            }
        }
        if let Some(ref filename) = opts.unclassified_output_filename {
            if opts.paired_end_processing {
                let (name1, name2) = paired_filenames(filename)?;
                self.unclassified_output1 = Some(open_output(&name1)?);
                self.unclassified_output2 = Some(open_output(&name2)?);
            } else {
                self.unclassified_output1 = Some(open_output(filename)?);
            }
        }
        if let Some(ref filename) = opts.kraken_output_filename {
            if filename == "-" {
                self.kraken_output = None;
            } else {
                self.kraken_output = Some(open_output(filename)?);
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn write_bundle(&mut self, bundle: &OutputBundle) -> io::Result<()> {
        if let Some(ref mut out) = self.kraken_output {
            out.write_all(bundle.kraken_text.as_bytes())?;
        }
        if let Some(ref mut out) = self.classified_output1 {
            out.write_all(bundle.classified_primary.as_bytes())?;
        }
        if let Some(ref mut out) = self.classified_output2 {
            out.write_all(bundle.classified_mate.as_bytes())?;
        }
        if let Some(ref mut out) = self.unclassified_output1 {
            out.write_all(bundle.unclassified_primary.as_bytes())?;
        }
        if let Some(ref mut out) = self.unclassified_output2 {
            out.write_all(bundle.unclassified_mate.as_bytes())?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> io::Result<()> {
        for out in [
            &mut self.kraken_output,
            &mut self.classified_output1,
            &mut self.classified_output2,
            &mut self.unclassified_output1,
            &mut self.unclassified_output2,
        ]
        .into_iter()
        .flatten()
        {
            out.flush()?;
        }
        Ok(())
    }
}

/// One batch worth of output text for all five sinks. Ordered by batch id
/// so a min-heap hands bundles out in input order.
#[derive(Default, Clone)]
pub struct OutputBundle {
    pub batch_id: u64,
    pub kraken_text: String,
    pub classified_primary: String,
    pub classified_mate: String,
    pub unclassified_primary: String,
    pub unclassified_mate: String,
}

impl PartialEq for OutputBundle {
    fn eq(&self, other: &Self) -> bool {
        self.batch_id == other.batch_id
    }
}

impl Eq for OutputBundle {}

impl PartialOrd for OutputBundle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OutputBundle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.batch_id.cmp(&other.batch_id)
    }
}

struct OutputQueue {
    heap: BinaryHeap<Reverse<OutputBundle>>,
    next_batch_id: u64,
}

struct ReaderState {
    reader1: BatchSequenceReader,
    reader2: Option<BatchSequenceReader>,
    next_batch_id: u64,
}

/// Classify all reads of one input (or input pair), emitting output in
/// batch order across `opts.num_threads` workers.
pub fn process_files(
    filename1: Option<&str>,
    filename2: Option<&str>,
    hash: &(dyn MinimizerLookup + Sync),
    taxonomy: &Taxonomy,
    meta: &IndexMeta,
    opts: &ClassifyOptions,
    stats: &mut ClassificationStats,
    outputs: &Mutex<OutputStreamData>,
    total_taxon_counters: &mut TaxonCounters,
) -> ClassifyResult<()> {
    let reader1 = BatchSequenceReader::from_path(filename1)?;
    let reader2 = if opts.paired_end_processing && !opts.single_file_pairs {
        match filename2 {
            Some(filename) => Some(BatchSequenceReader::from_path(Some(filename))?),
            None => {
                return Err(ClassifyError::Usage(
                    "paired end processing requires two input files".to_string(),
                ))
            }
        }
    } else {
        None
    };

    let reader_state = Mutex::new(ReaderState {
        reader1,
        reader2,
        next_batch_id: 0,
    });
    let output_queue = Mutex::new(OutputQueue {
        heap: BinaryHeap::new(),
        next_batch_id: 0,
    });
    let stats_lock = Mutex::new(std::mem::take(stats));
    let counters_lock = Mutex::new(std::mem::take(total_taxon_counters));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.num_threads.max(1))
        .build()
        .map_err(|e| ClassifyError::Os(format!("unable to start worker pool: {}", e)))?;

    let results = pool.broadcast(|_| {
        worker_loop(
            &reader_state,
            &output_queue,
            &stats_lock,
            &counters_lock,
            hash,
            taxonomy,
            meta,
            opts,
            outputs,
        )
    });

    *stats = stats_lock.into_inner().unwrap();
    *total_taxon_counters = counters_lock.into_inner().unwrap();
    for result in results {
        result?;
    }

    outputs.lock().unwrap().flush_all()?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    reader_state: &Mutex<ReaderState>,
    output_queue: &Mutex<OutputQueue>,
    stats_lock: &Mutex<ClassificationStats>,
    counters_lock: &Mutex<TaxonCounters>,
    hash: &(dyn MinimizerLookup + Sync),
    taxonomy: &Taxonomy,
    meta: &IndexMeta,
    opts: &ClassifyOptions,
    outputs: &Mutex<OutputStreamData>,
) -> ClassifyResult<()> {
    let mut scanner = MinimizerScanner::new(
        meta.k,
        meta.l,
        meta.spaced_seed_mask,
        meta.dna_db,
        meta.toggle_mask,
        meta.revcom_version,
    );
    let mut taxa: Vec<HitToken> = Vec::new();
    let mut hit_counts = TaxonCounts::new();
    let mut tx_frames: [String; 6] = Default::default();
    let mut batch1 = String::new();
    let mut batch2 = String::new();
    let mut seq1 = Sequence::default();
    let mut seq2 = Sequence::default();
    let paired = opts.paired_end_processing;

    loop {
        let mut thread_stats = ClassificationStats::default();

        let (ok_read, batch_id, format1, format2) = {
            let mut reader = reader_state.lock().unwrap();
            let ok_read = if !paired {
                reader.reader1.load_block(&mut batch1, BLOCK_SIZE)?
            } else if !opts.single_file_pairs {
                let ok = reader
                    .reader1
                    .load_batch(&mut batch1, NUM_FRAGMENTS_PER_THREAD)?;
                if ok {
                    reader
                        .reader2
                        .as_mut()
                        .expect("two-file pairing has a second reader")
                        .load_batch(&mut batch2, NUM_FRAGMENTS_PER_THREAD)?
                } else {
                    false
                }
            } else {
                let mut frags = NUM_FRAGMENTS_PER_THREAD * 2;
                if frags % 2 == 1 {
                    frags += 1;
                }
                reader.reader1.load_batch(&mut batch1, frags)?
            };
            let batch_id = reader.next_batch_id;
            if ok_read {
                reader.next_batch_id += 1;
            }
            let format2 = reader
                .reader2
                .as_ref()
                .map(|r| r.file_format())
                .unwrap_or(SequenceFormat::AutoDetect);
            (ok_read, batch_id, reader.reader1.file_format(), format2)
        };
        if !ok_read {
            break;
        }

        let mut bundle = OutputBundle {
            batch_id,
            ..Default::default()
        };
        let mut curr_taxon_counts = TaxonCounters::new();

        let mut parser1 = SequenceParser::new(&batch1, format1);
        let mut parser2 = SequenceParser::new(
            &batch2,
            if opts.single_file_pairs {
                format1
            } else {
                format2
            },
        );
        while parser1.next_sequence(&mut seq1)? {
            if paired {
                let got_mate = if opts.single_file_pairs {
                    parser1.next_sequence(&mut seq2)?
                } else {
                    parser2.next_sequence(&mut seq2)?
                };
                if !got_mate {
                    break;
                }
            }
            thread_stats.total_sequences += 1;
            if opts.minimum_quality_score > 0 {
                mask_low_quality_bases(&mut seq1, opts.minimum_quality_score)?;
                if paired {
                    mask_low_quality_bases(&mut seq2, opts.minimum_quality_score)?;
                }
            }
            let mate = if paired { Some(&seq2) } else { None };
            let call = classify_sequence(
                &seq1,
                mate,
                &mut bundle.kraken_text,
                hash,
                taxonomy,
                meta,
                opts,
                &mut thread_stats,
                &mut scanner,
                &mut taxa,
                &mut hit_counts,
                &mut tx_frames,
                &mut curr_taxon_counts,
            );
            if call != 0 {
                let tag = format!(" kraken:taxid|{}", taxonomy.external_id(call));
                seq1.header.push_str(&tag);
                seq1.append_to(&mut bundle.classified_primary);
                if paired {
                    seq2.header.push_str(&tag);
                    seq2.append_to(&mut bundle.classified_mate);
                }
            } else {
                seq1.append_to(&mut bundle.unclassified_primary);
                if paired {
                    seq2.append_to(&mut bundle.unclassified_mate);
                }
            }
            thread_stats.total_bases += seq1.seq.len() as u64;
            if paired {
                thread_stats.total_bases += seq2.seq.len() as u64;
            }
        }

        {
            let mut stats = stats_lock.lock().unwrap();
            stats.total_sequences += thread_stats.total_sequences;
            stats.total_bases += thread_stats.total_bases;
            stats.total_classified += thread_stats.total_classified;
            if io::stderr().is_terminal() {
                eprint!(
                    "\rProcessed {} sequences ({} bp) ...",
                    stats.total_sequences, stats.total_bases
                );
            }
        }

        if opts.report_filename.is_some() {
            let mut totals = counters_lock.lock().unwrap();
            for (taxon, counter) in curr_taxon_counts {
                totals.entry(taxon).or_default().merge(&counter);
            }
        }

        {
            let mut queue = output_queue.lock().unwrap();
            queue.heap.push(Reverse(bundle));
        }

        // Flush protocol: pop bundles while the heap head is the next batch
        // due. The output lock is taken while still inside the queue
        // critical section, then the queue lock is released for the writes.
        loop {
            let queue = output_queue.lock().unwrap();
            let ready = matches!(
                queue.heap.peek(),
                Some(Reverse(head)) if head.batch_id == queue.next_batch_id
            );
            if !ready {
                break;
            }
            let mut queue = queue;
            let Reverse(due) = queue.heap.pop().unwrap();
            queue.next_batch_id += 1;
            let mut sinks = outputs.lock().unwrap();
            drop(queue);
            if let Err(e) = sinks.initialize(opts) {
                fatal(e);
            }
            if let Err(e) = sinks.write_bundle(&due) {
                fatal(ClassifyError::Os(format!("write failed: {}", e)));
            }
        }
    }
    Ok(())
}

/// Classify one read (or read pair): scan every frame of every mate,
/// accumulate minimizer hits, resolve the call, and append one Kraken line
/// to `koss`. Returns the called taxon, 0 for unclassified.
#[allow(clippy::too_many_arguments)]
pub fn classify_sequence(
    dna: &Sequence,
    dna2: Option<&Sequence>,
    koss: &mut String,
    hash: &dyn MinimizerLookup,
    taxonomy: &Taxonomy,
    meta: &IndexMeta,
    opts: &ClassifyOptions,
    stats: &mut ClassificationStats,
    scanner: &mut MinimizerScanner,
    taxa: &mut Vec<HitToken>,
    hit_counts: &mut TaxonCounts,
    tx_frames: &mut [String; 6],
    curr_taxon_counts: &mut TaxonCounters,
) -> TaxonId {
    taxa.clear();
    hit_counts.clear();
    let frame_ct = if opts.use_translated_search { 6 } else { 1 };
    let mut minimizer_hit_groups = 0usize;
    let mut quick_call: TaxonId = 0;

    'search: for mate_num in 0..2 {
        if mate_num == 1 && !opts.paired_end_processing {
            break;
        }
        let seq = if mate_num == 0 {
            &dna.seq
        } else {
            &dna2.expect("paired classification requires a mate").seq
        };
        if opts.use_translated_search {
            translate_to_all_frames(seq.as_bytes(), tx_frames);
        }
        for frame_idx in 0..frame_ct {
            if opts.use_translated_search {
                scanner.load_sequence(tx_frames[frame_idx].as_bytes());
            } else {
                scanner.load_sequence(seq.as_bytes());
            }
            let mut last_minimizer = u64::MAX;
            let mut last_taxon: TaxonId = 0;
            while let Some(minimizer) = scanner.next_minimizer() {
                let token = if scanner.is_ambiguous() {
                    HitToken::Ambiguous
                } else {
                    let taxon = if minimizer != last_minimizer {
                        let skip_lookup = meta.minimum_acceptable_hash_value > 0
                            && murmur_hash3(minimizer) < meta.minimum_acceptable_hash_value;
                        let taxon = if skip_lookup { 0 } else { hash.get(minimizer) };
                        last_taxon = taxon;
                        last_minimizer = minimizer;
                        // A hit group starts only on a new minimizer value
                        // with a database hit.
                        if taxon != 0 {
                            minimizer_hit_groups += 1;
                            if opts.report_filename.is_some() {
                                curr_taxon_counts
                                    .entry(taxon)
                                    .or_default()
                                    .add_kmer(scanner.last_minimizer());
                            }
                        }
                        taxon
                    } else {
                        last_taxon
                    };
                    if taxon != 0 {
                        if opts.quick_mode && minimizer_hit_groups >= opts.minimum_hit_groups {
                            quick_call = taxon;
                            break 'search;
                        }
                        *hit_counts.entry(taxon).or_insert(0) += 1;
                    }
                    HitToken::Taxon(taxon)
                };
                taxa.push(token);
            }
            if opts.use_translated_search && frame_idx != 5 {
                taxa.push(HitToken::FrameBorder);
            }
        }
        if opts.paired_end_processing && mate_num == 0 {
            taxa.push(HitToken::MateBorder);
        }
    }

    let mut call = if quick_call != 0 {
        quick_call
    } else {
        let total_minimizers = taxa.iter().filter(|t| !t.is_border()).count();
        resolve_tree(
            hit_counts,
            taxonomy,
            total_minimizers,
            opts.confidence_threshold,
        )
    };
    // Void a call made by too few minimizer groups
    if call != 0 && minimizer_hit_groups < opts.minimum_hit_groups {
        call = 0;
    }

    if call != 0 {
        stats.total_classified += 1;
        if opts.report_filename.is_some() {
            curr_taxon_counts
                .entry(call)
                .or_default()
                .increment_read_count();
        }
    }

    koss.push_str(if call != 0 { "C\t" } else { "U\t" });
    if !opts.paired_end_processing {
        koss.push_str(&dna.id);
    } else {
        koss.push_str(trim_pair_info(&dna.id));
    }
    koss.push('\t');

    let ext_call = taxonomy.external_id(call);
    if opts.print_scientific_name {
        let name = if call != 0 {
            taxonomy.name(call)
        } else {
            "unclassified"
        };
        koss.push_str(&format!("{} (taxid {})", name, ext_call));
    } else {
        koss.push_str(&format!("{}", ext_call));
    }
    koss.push('\t');

    if let Some(dna2) = dna2.filter(|_| opts.paired_end_processing) {
        koss.push_str(&format!("{}|{}\t", dna.seq.len(), dna2.seq.len()));
    } else {
        koss.push_str(&format!("{}\t", dna.seq.len()));
    }

    if opts.quick_mode {
        koss.push_str(&format!("{}:Q", ext_call));
    } else if taxa.is_empty() {
        koss.push_str("0:0");
    } else {
        add_hitlist_string(koss, taxa, taxonomy);
    }
    koss.push('\n');

    call
}

/// Confidence-thresholded tree resolution: score every hit taxon by its
/// rooted-path sum, break ties by LCA, then climb toward the root until the
/// called clade covers the required share of minimizers.
pub fn resolve_tree(
    hit_counts: &TaxonCounts,
    taxonomy: &Taxonomy,
    total_minimizers: usize,
    confidence_threshold: f64,
) -> TaxonId {
    let required_score = (confidence_threshold * total_minimizers as f64).ceil() as u32;
    let mut max_taxon: TaxonId = 0;
    let mut max_score: u32 = 0;

    for &taxon in hit_counts.keys() {
        let mut score = 0u32;
        for (&taxon2, &count) in hit_counts.iter() {
            if taxonomy.is_a_ancestor_of_b(taxon2, taxon) {
                score += count;
            }
        }
        if score > max_score {
            max_score = score;
            max_taxon = taxon;
        } else if score == max_score {
            max_taxon = taxonomy.lowest_common_ancestor(max_taxon, taxon);
        }
    }

    // Reset the score to hits at the called taxon alone; the climb re-sums
    // the clade at every step.
    max_score = hit_counts.get(&max_taxon).copied().unwrap_or(0);
    while max_taxon != 0 && max_score < required_score {
        max_score = hit_counts
            .iter()
            .filter(|(&taxon, _)| taxonomy.is_a_ancestor_of_b(max_taxon, taxon))
            .map(|(_, &count)| count)
            .sum();
        if max_score >= required_score {
            return max_taxon;
        }
        max_taxon = taxonomy.parent(max_taxon);
    }

    max_taxon
}

/// Run-length encode the per-window tokens, space separated.
fn add_hitlist_string(koss: &mut String, taxa: &[HitToken], taxonomy: &Taxonomy) {
    let mut last_token = taxa[0];
    let mut count = 1usize;
    for &token in &taxa[1..] {
        if token == last_token {
            count += 1;
        } else {
            append_hitlist_run(koss, last_token, count, taxonomy);
            koss.push(' ');
            count = 1;
            last_token = token;
        }
    }
    append_hitlist_run(koss, last_token, count, taxonomy);
}

fn append_hitlist_run(koss: &mut String, token: HitToken, count: usize, taxonomy: &Taxonomy) {
    match token {
        HitToken::Taxon(taxon) => {
            koss.push_str(&format!("{}:{}", taxonomy.external_id(taxon), count))
        }
        HitToken::Ambiguous => koss.push_str(&format!("A:{}", count)),
        HitToken::MateBorder => koss.push_str("|:|"),
        HitToken::FrameBorder => koss.push_str("-:-"),
    }
}

/// Overwrite bases under the FASTQ quality floor with 'x' so the scanner
/// treats them as ambiguous.
pub fn mask_low_quality_bases(dna: &mut Sequence, minimum_quality_score: u8) -> ClassifyResult<()> {
    if dna.format != SequenceFormat::Fastq {
        return Ok(());
    }
    if dna.seq.len() != dna.quals.len() {
        return Err(ClassifyError::Data(format!(
            "{}: Sequence length ({}) != Quality string length ({})",
            dna.id,
            dna.seq.len(),
            dna.quals.len()
        )));
    }
    let mut bases = std::mem::take(&mut dna.seq).into_bytes();
    for (base, &qual) in bases.iter_mut().zip(dna.quals.as_bytes()) {
        if qual.saturating_sub(b'!') < minimum_quality_score {
            *base = b'x';
        }
    }
    dna.seq = String::from_utf8(bases)
        .map_err(|_| ClassifyError::Data(format!("{}: non-ASCII sequence data", dna.id)))?;
    Ok(())
}

/// Drop a trailing `/1` or `/2` so both mates share one record id.
pub fn trim_pair_info(id: &str) -> &str {
    if id.len() > 2 && (id.ends_with("/1") || id.ends_with("/2")) {
        &id[..id.len() - 2]
    } else {
        id
    }
}

pub fn report_stats(elapsed: std::time::Duration, stats: &ClassificationStats) {
    let seconds = elapsed.as_secs_f64();
    let total_unclassified = stats.total_sequences - stats.total_classified;
    if io::stderr().is_terminal() {
        eprint!("\r");
    }
    eprintln!(
        "{} sequences ({:.2} Mbp) processed in {:.3}s ({:.1} Kseq/m, {:.2} Mbp/m).",
        stats.total_sequences,
        stats.total_bases as f64 / 1e6,
        seconds,
        stats.total_sequences as f64 / 1e3 / (seconds / 60.0),
        stats.total_bases as f64 / 1e6 / (seconds / 60.0)
    );
    eprintln!(
        "  {} sequences classified ({:.2}%)",
        stats.total_classified,
        stats.total_classified as f64 * 100.0 / stats.total_sequences as f64
    );
    eprintln!(
        "  {} sequences unclassified ({:.2}%)",
        total_unclassified,
        total_unclassified as f64 * 100.0 / stats.total_sequences as f64
    );
}

/// Run the whole classification for one option set against a loaded index:
/// every input file (or stdin), the stderr summary, and the rollup report.
pub fn run_classification(opts: &ClassifyOptions, bundle: &IndexBundle) -> ClassifyResult<()> {
    let mut opts = opts.clone();
    opts.use_translated_search = !bundle.meta.dna_db;

    let mut stats = ClassificationStats::default();
    let outputs = Mutex::new(OutputStreamData::new());
    let mut taxon_counters = TaxonCounters::new();
    let start_time = Instant::now();

    if opts.input_files.is_empty() {
        if opts.paired_end_processing && !opts.single_file_pairs {
            return Err(ClassifyError::Usage(
                "paired end processing used with no files specified".to_string(),
            ));
        }
        process_files(
            None,
            None,
            &bundle.hash,
            &bundle.taxonomy,
            &bundle.meta,
            &opts,
            &mut stats,
            &outputs,
            &mut taxon_counters,
        )?;
    } else {
        let mut i = 0;
        while i < opts.input_files.len() {
            if opts.paired_end_processing && !opts.single_file_pairs {
                if i + 1 == opts.input_files.len() {
                    return Err(ClassifyError::Usage(
                        "paired end processing used with unpaired file".to_string(),
                    ));
                }
                process_files(
                    Some(&opts.input_files[i]),
                    Some(&opts.input_files[i + 1]),
                    &bundle.hash,
                    &bundle.taxonomy,
                    &bundle.meta,
                    &opts,
                    &mut stats,
                    &outputs,
                    &mut taxon_counters,
                )?;
                i += 2;
            } else {
                process_files(
                    Some(&opts.input_files[i]),
                    None,
                    &bundle.hash,
                    &bundle.taxonomy,
                    &bundle.meta,
                    &opts,
                    &mut stats,
                    &outputs,
                    &mut taxon_counters,
                )?;
                i += 1;
            }
        }
    }

    report_stats(start_time.elapsed(), &stats);

    if let Some(ref report_filename) = opts.report_filename {
        if opts.mpa_style_report {
            reports::report_mpa_style(
                report_filename,
                opts.report_zero_counts,
                &bundle.taxonomy,
                &taxon_counters,
            )?;
        } else {
            let total_unclassified = stats.total_sequences - stats.total_classified;
            reports::report_kraken_style(
                report_filename,
                opts.report_zero_counts,
                opts.report_kmer_data,
                &bundle.taxonomy,
                &taxon_counters,
                stats.total_sequences,
                total_unclassified,
            )?;
        }
    }
    Ok(())
}

pub fn parse_command_line(args: Vec<String>) -> ClassifyResult<ClassifyOptions> {
    let command = Command::new("classify")
        .about("Parallel taxonomic sequence classification engine")
        .arg(
            Arg::new("index_filename")
                .short('H')
                .long("index")
                .action(ArgAction::Set)
                .required(true)
                .help("Index filename"),
        )
        .arg(
            Arg::new("taxonomy_filename")
                .short('t')
                .long("taxonomy")
                .action(ArgAction::Set)
                .required(true)
                .help("Taxonomy filename"),
        )
        .arg(
            Arg::new("options_filename")
                .short('o')
                .long("options")
                .action(ArgAction::Set)
                .required(true)
                .help("Index metadata filename"),
        )
        .arg(
            Arg::new("quick_mode")
                .short('q')
                .long("quick")
                .action(ArgAction::SetTrue)
                .help("Quick mode"),
        )
        .arg(
            Arg::new("use_memory_mapping")
                .short('M')
                .long("memory-map")
                .action(ArgAction::SetTrue)
                .help("Use memory mapping to access hash & taxonomy"),
        )
        .arg(
            Arg::new("confidence_threshold")
                .short('T')
                .long("confidence")
                .action(ArgAction::Set)
                .help("Confidence score threshold (def. 0)"),
        )
        .arg(
            Arg::new("num_threads")
                .short('p')
                .long("threads")
                .action(ArgAction::Set)
                .help("Number of threads (def. 1)"),
        )
        .arg(
            Arg::new("minimum_quality_score")
                .short('Q')
                .long("min-quality")
                .action(ArgAction::Set)
                .help("Minimum quality score (FASTQ only, def. 0)"),
        )
        .arg(
            Arg::new("paired_end_processing")
                .short('P')
                .long("paired")
                .action(ArgAction::SetTrue)
                .help("Process pairs of reads"),
        )
        .arg(
            Arg::new("single_file_pairs")
                .short('S')
                .long("single-file-pairs")
                .action(ArgAction::SetTrue)
                .help("Process pairs with mates in same file"),
        )
        .arg(
            Arg::new("report_filename")
                .short('R')
                .long("report")
                .action(ArgAction::Set)
                .help("Print report to filename"),
        )
        .arg(
            Arg::new("mpa_style_report")
                .short('m')
                .long("mpa-report")
                .action(ArgAction::SetTrue)
                .help("In comb. w/ -R, use mpa-style report"),
        )
        .arg(
            Arg::new("report_zero_counts")
                .short('z')
                .long("report-zero")
                .action(ArgAction::SetTrue)
                .help("In comb. w/ -R, report taxa w/ 0 count"),
        )
        .arg(
            Arg::new("print_scientific_name")
                .short('n')
                .long("scientific-name")
                .action(ArgAction::SetTrue)
                .help("Print scientific name instead of taxid in Kraken output"),
        )
        .arg(
            Arg::new("minimum_hit_groups")
                .short('g')
                .long("min-hit-groups")
                .action(ArgAction::Set)
                .help("Minimum number of hit groups needed for call"),
        )
        .arg(
            Arg::new("classified_output_filename")
                .short('C')
                .long("classified")
                .action(ArgAction::Set)
                .help("Filename/format to have classified sequences"),
        )
        .arg(
            Arg::new("unclassified_output_filename")
                .short('U')
                .long("unclassified")
                .action(ArgAction::Set)
                .help("Filename/format to have unclassified sequences"),
        )
        .arg(
            Arg::new("kraken_output_filename")
                .short('O')
                .long("kraken-output")
                .action(ArgAction::Set)
                .help("Output file for normal Kraken output (or '-' to silence)"),
        )
        .arg(
            Arg::new("report_kmer_data")
                .short('K')
                .long("report-kmer")
                .action(ArgAction::SetTrue)
                .help("In comb. w/ -R, provide minimizer information in report"),
        )
        .arg(
            Arg::new("daemon_mode")
                .short('D')
                .long("daemon")
                .action(ArgAction::SetTrue)
                .help("Serve classification requests over FIFOs"),
        )
        .arg(
            Arg::new("input_files")
                .action(ArgAction::Append)
                .num_args(0..)
                .help("FASTA/FASTQ input file(s)"),
        );

    let matches = match command.try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => return Err(ClassifyError::Usage(err.to_string())),
    };

    let mut opts = ClassifyOptions {
        num_threads: 1,
        ..Default::default()
    };
    opts.index_filename = matches
        .get_one::<String>("index_filename")
        .unwrap()
        .clone();
    opts.taxonomy_filename = matches
        .get_one::<String>("taxonomy_filename")
        .unwrap()
        .clone();
    opts.options_filename = matches
        .get_one::<String>("options_filename")
        .unwrap()
        .clone();

    opts.quick_mode = matches.get_flag("quick_mode");
    opts.use_memory_mapping = matches.get_flag("use_memory_mapping");
    opts.paired_end_processing =
        matches.get_flag("paired_end_processing") || matches.get_flag("single_file_pairs");
    opts.single_file_pairs = matches.get_flag("single_file_pairs");
    opts.mpa_style_report = matches.get_flag("mpa_style_report");
    opts.report_zero_counts = matches.get_flag("report_zero_counts");
    opts.print_scientific_name = matches.get_flag("print_scientific_name");
    opts.report_kmer_data = matches.get_flag("report_kmer_data");
    opts.daemon_mode = matches.get_flag("daemon_mode");

    if let Some(value) = matches.get_one::<String>("confidence_threshold") {
        opts.confidence_threshold = value
            .parse()
            .map_err(|_| ClassifyError::Usage(format!("invalid confidence threshold: {}", value)))?;
        if !(0.0..=1.0).contains(&opts.confidence_threshold) {
            return Err(ClassifyError::Usage(
                "confidence threshold must be in [0, 1]".to_string(),
            ));
        }
    }
    if let Some(value) = matches.get_one::<String>("num_threads") {
        opts.num_threads = value
            .parse()
            .map_err(|_| ClassifyError::Usage(format!("invalid thread count: {}", value)))?;
        if opts.num_threads < 1 {
            return Err(ClassifyError::Usage(
                "number of threads can't be less than 1".to_string(),
            ));
        }
    }
    if let Some(value) = matches.get_one::<String>("minimum_quality_score") {
        opts.minimum_quality_score = value
            .parse()
            .map_err(|_| ClassifyError::Usage(format!("invalid quality score: {}", value)))?;
    }
    if let Some(value) = matches.get_one::<String>("minimum_hit_groups") {
        opts.minimum_hit_groups = value
            .parse()
            .map_err(|_| ClassifyError::Usage(format!("invalid hit group count: {}", value)))?;
    }

    opts.report_filename = matches.get_one::<String>("report_filename").cloned();
    opts.classified_output_filename = matches
        .get_one::<String>("classified_output_filename")
        .cloned();
    opts.unclassified_output_filename = matches
        .get_one::<String>("unclassified_output_filename")
        .cloned();
    opts.kraken_output_filename = matches
        .get_one::<String>("kraken_output_filename")
        .cloned();
    opts.input_files = matches
        .get_many::<String>("input_files")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    if opts.mpa_style_report && opts.report_filename.is_none() {
        return Err(ClassifyError::Usage("-m requires -R be used".to_string()));
    }

    Ok(opts)
}
