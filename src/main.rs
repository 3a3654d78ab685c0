use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use bio::io::{fasta, fastq};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use umivar::barcode::{SampleBarcode, SampleBarcodes};
use umivar::genomics::{
    IndexingInfo, NucleotideSequence, ReadPayload, ReferenceLibrary, SequenceWithQuality,
};
use umivar::variants::report::write_variants;
use umivar::{CancellationToken, Demultiplexer, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "umivar", about = "UMI-aware consensus assembly and minor variant calling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Group reads by UMI, assemble consensuses, map them and call variants.
    Call {
        /// Targeted references (multi-record FASTA).
        #[arg(long)]
        references: PathBuf,
        /// Reads (FASTQ); headers carry `UMI:<bases>:<quals>` unless `--barcodes` is given.
        #[arg(long)]
        reads: PathBuf,
        /// Second mates (FASTQ), record-for-record with `--reads`.
        #[arg(long)]
        reads2: Option<PathBuf>,
        /// Barcode sheet (`sample<TAB>master[<TAB>slave]`) for adapter-based demultiplexing.
        #[arg(long)]
        barcodes: Option<PathBuf>,
        /// Parameter file (TOML); missing keys take defaults.
        #[arg(long)]
        params: Option<PathBuf>,
        /// Sample name for header-tagged reads.
        #[arg(long, default_value = "sample")]
        sample: String,
        /// Worker threads (default: all cores).
        #[arg(long)]
        threads: Option<usize>,
        /// Output TSV (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the default parameters as TOML.
    Params,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Call {
            references,
            reads,
            reads2,
            barcodes,
            params,
            sample,
            threads,
            output,
        } => {
            if let Some(threads) = threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("failed to configure worker threads")?;
            }
            run_call(CallArgs {
                references,
                reads,
                reads2,
                barcodes,
                params,
                sample,
                output,
            })?
        }
        Commands::Params => {
            let text = PipelineConfig::default()
                .to_toml_string()
                .context("failed to render default parameters")?;
            print!("{text}");
        }
    }

    Ok(())
}

struct CallArgs {
    references: PathBuf,
    reads: PathBuf,
    reads2: Option<PathBuf>,
    barcodes: Option<PathBuf>,
    params: Option<PathBuf>,
    sample: String,
    output: Option<PathBuf>,
}

fn run_call(args: CallArgs) -> Result<()> {
    let config = match &args.params {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read parameters from {}", path.display()))?;
            PipelineConfig::from_toml_str(&text)
                .with_context(|| format!("invalid parameters in {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let library = read_references(&args.references).with_context(|| {
        format!("failed to read references from {}", args.references.display())
    })?;
    let pipeline = Pipeline::new(library, config).context("failed to initialize pipeline")?;

    let first = read_fastq(&args.reads)
        .with_context(|| format!("failed to read {}", args.reads.display()))?;
    let second = match &args.reads2 {
        Some(path) => {
            let mates =
                read_fastq(path).with_context(|| format!("failed to read {}", path.display()))?;
            if mates.len() != first.len() {
                bail!(
                    "mate files disagree: {} records in {}, {} in {}",
                    first.len(),
                    args.reads.display(),
                    mates.len(),
                    path.display()
                );
            }
            Some(mates)
        }
        None => None,
    };

    let payloads: Vec<(String, ReadPayload)> = match second {
        Some(mates) => first
            .into_iter()
            .zip(mates)
            .map(|(r1, r2)| (r1.header, ReadPayload::Paired(r1.read, r2.read)))
            .collect(),
        None => first
            .into_iter()
            .map(|r| (r.header, ReadPayload::Single(r.read)))
            .collect(),
    };
    let total = payloads.len();

    let indexed: Vec<IndexingInfo> = match &args.barcodes {
        Some(path) => {
            let rows = read_barcode_sheet(path)
                .with_context(|| format!("failed to read barcodes from {}", path.display()))?;
            let config = pipeline.config();
            let barcodes = SampleBarcodes::new(rows, &config.barcode)
                .with_context(|| format!("invalid barcode sheet {}", path.display()))?;
            let demultiplexer = Demultiplexer::new(barcodes, config.demultiplex.clone());
            let indexed: Vec<IndexingInfo> = payloads
                .iter()
                .filter_map(|(_, payload)| demultiplexer.extract(payload))
                .collect();
            let stats = demultiplexer.statistics();
            info!(
                total = stats.total(),
                extracted = stats.extracted(),
                no_master = stats.no_master(),
                no_slave = stats.no_slave(),
                "demultiplexing finished"
            );
            indexed
        }
        None => payloads
            .into_iter()
            .filter_map(|(header, payload)| {
                IndexingInfo::from_header(args.sample.as_str(), &header, payload)
            })
            .collect(),
    };
    info!(reads = total, indexed = indexed.len(), "reads indexed");

    let migs = pipeline.group(indexed);
    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    let variants = pipeline.call_variants();

    let assembly = pipeline.assembly_statistics();
    let alignment = pipeline.alignment_statistics();
    info!(
        migs = summary.processed,
        assembled = assembly.migs_assembled(),
        aligned = alignment.aligned(),
        no_kmer_hit = alignment.no_kmer_hit(),
        rejected = alignment.rejected(),
        chimeric = alignment.chimeric(),
        variants = variants.len(),
        "run finished"
    );

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_variants(&mut BufWriter::new(file), &variants)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            write_variants(&mut stdout.lock(), &variants).context("failed to write variants")?;
        }
    }

    Ok(())
}

fn read_references(path: &Path) -> Result<ReferenceLibrary> {
    references_from(fasta::Reader::from_file(path)?)
}

fn references_from<B: BufRead>(reader: fasta::Reader<B>) -> Result<ReferenceLibrary> {
    let mut entries = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed FASTA record {}", index + 1))?;
        let sequence = NucleotideSequence::from_ascii(record.seq())
            .with_context(|| format!("invalid sequence for reference '{}'", record.id()))?;
        entries.push((record.id().to_string(), sequence));
    }
    Ok(ReferenceLibrary::from_sequences(entries)?)
}

struct FastqRecord {
    header: String,
    read: SequenceWithQuality,
}

fn read_fastq(path: &Path) -> Result<Vec<FastqRecord>> {
    fastq_records(fastq::Reader::from_file(path)?)
}

/// The header keeps the description so that `UMI:` tokens after the id are seen.
fn fastq_records<B: BufRead>(reader: fastq::Reader<B>) -> Result<Vec<FastqRecord>> {
    reader
        .records()
        .enumerate()
        .map(|(index, record)| {
            let record = record.with_context(|| format!("malformed FASTQ record {}", index + 1))?;
            let header = match record.desc() {
                Some(desc) => format!("{} {}", record.id(), desc),
                None => record.id().to_string(),
            };
            let read = SequenceWithQuality::from_fastq(record.seq(), record.qual())
                .with_context(|| format!("record {} ('{}') is malformed", index + 1, record.id()))?;
            Ok(FastqRecord { header, read })
        })
        .collect()
}

fn read_barcode_sheet(path: &Path) -> Result<Vec<SampleBarcode>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t').map(str::trim);
        let sample = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing sample name on line {}", line_no + 1))?;
        let master = fields
            .next()
            .ok_or_else(|| anyhow!("missing master signature on line {}", line_no + 1))?;
        let slave = fields.next().filter(|s| !s.is_empty());

        rows.push(SampleBarcode {
            sample: sample.to_string(),
            master: master.to_string(),
            slave: slave.map(str::to_string),
        });
    }

    Ok(rows)
}
