use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::barcode::{
    BarcodeError, BarcodeParameters, BarcodeSearcher, BarcodeSearcherResult, BarcodeSignature,
};
use crate::config::{check_range, ConfigError};
use crate::genomics::{
    IndexingInfo, Mig, NucleotideSequence, QualityProfile, ReadPayload, SequenceWithQuality,
};

/// Header token carrying a pre-extracted UMI: `UMI:<bases>:<phred33 quals>`.
const UMI_HEADER_TAG: &str = "UMI:";

/// One row of a sample barcode sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBarcode {
    /// Sample name.
    pub sample: String,
    /// Signature searched on the first mate.
    pub master: String,
    /// Optional signature searched on the second mate.
    pub slave: Option<String>,
}

/// Options for adapter-based demultiplexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemultiplexParameters {
    /// Also try the master on mate 2 (and the slave on mate 1).
    pub search_both_mates: bool,
    /// Remove the matched adapter span from the read.
    pub trim_adapters: bool,
}

impl Default for DemultiplexParameters {
    fn default() -> Self {
        Self {
            search_both_mates: true,
            trim_adapters: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledSample {
    name: Arc<str>,
    master: BarcodeSearcher,
    slave: Option<BarcodeSearcher>,
}

/// Validated sample sheet with compiled searchers.
#[derive(Debug, Clone)]
pub struct SampleBarcodes {
    samples: Vec<CompiledSample>,
}

impl SampleBarcodes {
    /// Compile a sample sheet; blank or duplicate entries are fatal.
    pub fn new(rows: Vec<SampleBarcode>, params: &BarcodeParameters) -> Result<Self, BarcodeError> {
        let mut names = HashSet::new();
        let mut signatures = HashSet::new();
        let mut samples = Vec::with_capacity(rows.len());

        for (row, entry) in rows.into_iter().enumerate() {
            let name = entry.sample.trim();
            if name.is_empty() {
                return Err(BarcodeError::BlankSample(row));
            }
            if !names.insert(name.to_string()) {
                return Err(BarcodeError::DuplicateSample(name.to_string()));
            }

            let master = BarcodeSignature::parse(&entry.master)?;
            let slave = match entry.slave.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(text) => Some(BarcodeSignature::parse(text)?),
            };
            let key = match &slave {
                Some(slave) => format!("{}/{}", master.text(), slave.text()),
                None => master.text().to_string(),
            };
            if !signatures.insert(key.clone()) {
                return Err(BarcodeError::DuplicateSignature(key));
            }

            samples.push(CompiledSample {
                name: Arc::from(name),
                master: BarcodeSearcher::new(master, params.clone()),
                slave: slave.map(|sig| BarcodeSearcher::new(sig, params.clone())),
            });
        }

        Ok(Self { samples })
    }

    /// Build from parallel column lists; an empty slave string means none.
    pub fn from_lists(
        names: &[&str],
        masters: &[&str],
        slaves: &[&str],
        params: &BarcodeParameters,
    ) -> Result<Self, BarcodeError> {
        if names.len() != masters.len() || names.len() != slaves.len() {
            return Err(BarcodeError::MismatchedLists {
                samples: names.len(),
                masters: masters.len(),
                slaves: slaves.len(),
            });
        }
        let rows = names
            .iter()
            .zip(masters)
            .zip(slaves)
            .map(|((name, master), slave)| SampleBarcode {
                sample: name.to_string(),
                master: master.to_string(),
                slave: Some(slave.to_string()),
            })
            .collect();
        Self::new(rows, params)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` for an empty sheet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample names in sheet order.
    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|sample| sample.name.as_ref())
    }
}

/// Extraction counters, safe to bump from worker threads.
#[derive(Debug, Default)]
pub struct ExtractionStatistics {
    total: AtomicU64,
    extracted: AtomicU64,
    no_master: AtomicU64,
    no_slave: AtomicU64,
    per_sample: Vec<AtomicU64>,
}

impl ExtractionStatistics {
    fn with_samples(samples: usize) -> Self {
        Self {
            per_sample: (0..samples).map(|_| AtomicU64::new(0)).collect(),
            ..Self::default()
        }
    }

    /// Reads seen.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Reads assigned to a sample.
    pub fn extracted(&self) -> u64 {
        self.extracted.load(Ordering::Relaxed)
    }

    /// Reads where no master signature matched.
    pub fn no_master(&self) -> u64 {
        self.no_master.load(Ordering::Relaxed)
    }

    /// Reads where the master matched but the slave did not.
    pub fn no_slave(&self) -> u64 {
        self.no_slave.load(Ordering::Relaxed)
    }

    /// Reads assigned to the sample at `index`.
    pub fn sample_count(&self, index: usize) -> u64 {
        self.per_sample
            .get(index)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Assigns reads to samples and extracts their UMIs by adapter search.
#[derive(Debug)]
pub struct Demultiplexer {
    barcodes: SampleBarcodes,
    params: DemultiplexParameters,
    stats: ExtractionStatistics,
}

struct MateMatch {
    result: BarcodeSearcherResult,
    on_second: bool,
}

impl Demultiplexer {
    /// Create a demultiplexer over a compiled sample sheet.
    pub fn new(barcodes: SampleBarcodes, params: DemultiplexParameters) -> Self {
        let stats = ExtractionStatistics::with_samples(barcodes.len());
        Self {
            barcodes,
            params,
            stats,
        }
    }

    /// Extraction counters.
    pub fn statistics(&self) -> &ExtractionStatistics {
        &self.stats
    }

    /// Assign `payload` to the first sample whose master (and slave) match.
    pub fn extract(&self, payload: &ReadPayload) -> Option<IndexingInfo> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let mut master_seen = false;

        for (index, sample) in self.barcodes.samples.iter().enumerate() {
            let Some(master) = self.search_master(sample, payload) else {
                continue;
            };
            master_seen = true;

            let (master, slave) = match (&sample.slave, payload) {
                (None, _) => (master, None),
                (Some(searcher), ReadPayload::Paired(first, second)) => {
                    let mate = if master.on_second { first } else { second };
                    match searcher.search(mate) {
                        Some(result) => (master, Some(result)),
                        None => match self.search_swapped(sample, searcher, master, second, first) {
                            Some((master, slave)) => (master, Some(slave)),
                            None => continue,
                        },
                    }
                }
                // Slave signatures only apply to paired data.
                (Some(_), ReadPayload::Single(_)) => (master, None),
            };

            self.stats.extracted.fetch_add(1, Ordering::Relaxed);
            self.stats.per_sample[index].fetch_add(1, Ordering::Relaxed);
            return Some(self.build_info(sample, payload, master, slave));
        }

        if master_seen {
            self.stats.no_slave.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.no_master.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn search_master(&self, sample: &CompiledSample, payload: &ReadPayload) -> Option<MateMatch> {
        if let Some(result) = sample.master.search(payload.first()) {
            return Some(MateMatch {
                result,
                on_second: false,
            });
        }
        if !self.params.search_both_mates {
            return None;
        }
        let second = payload.second()?;
        sample.master.search(second).map(|result| MateMatch {
            result,
            on_second: true,
        })
    }

    /// Retry a pair whose slave failed with the master on the second mate and
    /// the slave on the first.
    fn search_swapped(
        &self,
        sample: &CompiledSample,
        slave: &BarcodeSearcher,
        master: MateMatch,
        second: &SequenceWithQuality,
        first: &SequenceWithQuality,
    ) -> Option<(MateMatch, BarcodeSearcherResult)> {
        if master.on_second || !self.params.search_both_mates {
            return None;
        }
        let swapped = sample.master.search(second)?;
        let slave = slave.search(first)?;
        Some((
            MateMatch {
                result: swapped,
                on_second: true,
            },
            slave,
        ))
    }

    fn build_info(
        &self,
        sample: &CompiledSample,
        payload: &ReadPayload,
        master: MateMatch,
        slave: Option<BarcodeSearcherResult>,
    ) -> IndexingInfo {
        let slave = slave.unwrap_or(BarcodeSearcherResult::BLANK);
        let umi = master.result.umi.concat(&slave.umi);
        let umi_quality = master.result.umi_worst_quality.min(slave.umi_worst_quality);

        let trim = |read: &SequenceWithQuality, result: &BarcodeSearcherResult| {
            if self.params.trim_adapters && !result.is_blank() {
                read.range(result.to..read.len())
            } else {
                read.clone()
            }
        };

        let payload = match payload {
            ReadPayload::Single(read) => ReadPayload::Single(trim(read, &master.result)),
            ReadPayload::Paired(first, second) => {
                // Orient so that the master-bearing mate comes first.
                let (master_mate, slave_mate) = if master.on_second {
                    (second, first)
                } else {
                    (first, second)
                };
                ReadPayload::Paired(trim(master_mate, &master.result), trim(slave_mate, &slave))
            }
        };

        IndexingInfo {
            sample: Arc::clone(&sample.name),
            umi,
            umi_quality,
            payload,
        }
    }
}

/// Parse a `UMI:<bases>:<quals>` token out of a read header.
///
/// Returns the UMI and its worst quality. A missing or length-mismatched
/// quality field yields [`IndexingInfo::UNKNOWN_UMI_QUALITY`].
pub fn parse_umi_header(header: &str) -> Option<(NucleotideSequence, u8)> {
    let token = header
        .split_whitespace()
        .find_map(|field| field.strip_prefix(UMI_HEADER_TAG))?;
    let mut parts = token.splitn(2, ':');
    let bases = parts.next()?;
    let umi = NucleotideSequence::from_ascii(bases.as_bytes()).ok()?;
    if umi.is_empty() {
        return None;
    }
    let quality = match parts.next() {
        Some(quals) if quals.len() == umi.len() => QualityProfile::from_phred33(quals.as_bytes())
            .ok()?
            .min_in(0..umi.len())
            .unwrap_or(IndexingInfo::UNKNOWN_UMI_QUALITY),
        _ => IndexingInfo::UNKNOWN_UMI_QUALITY,
    };
    Some((umi, quality))
}

impl IndexingInfo {
    /// Build from a read whose header already carries the UMI.
    pub fn from_header(sample: impl Into<Arc<str>>, header: &str, payload: ReadPayload) -> Option<Self> {
        let (umi, umi_quality) = parse_umi_header(header)?;
        Some(Self {
            sample: sample.into(),
            umi,
            umi_quality,
            payload,
        })
    }
}

/// Grouping thresholds for turning indexed reads into molecular families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingParameters {
    /// UMIs whose worst base quality is below this are discarded.
    pub min_umi_quality: u8,
    /// Families with fewer reads are not emitted.
    pub min_family_size: usize,
}

impl Default for GroupingParameters {
    fn default() -> Self {
        Self {
            min_umi_quality: 15,
            min_family_size: 1,
        }
    }
}

impl GroupingParameters {
    /// Check admissible ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "grouping.min_family_size",
            self.min_family_size,
            1,
            usize::MAX,
            ">= 1",
        )
    }
}

/// Collects indexed reads into [`Mig`]s keyed by `(sample, UMI)`.
#[derive(Debug, Default)]
pub struct MigGrouper {
    params: GroupingParameters,
    groups: HashMap<(Arc<str>, NucleotideSequence), Vec<ReadPayload>>,
    order: Vec<(Arc<str>, NucleotideSequence)>,
    low_quality_umis: u64,
}

impl MigGrouper {
    /// Create an empty grouper.
    pub fn new(params: GroupingParameters) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Add one read; returns `false` if its UMI quality is too low.
    pub fn push(&mut self, info: IndexingInfo) -> bool {
        if info.umi_quality < self.params.min_umi_quality {
            self.low_quality_umis += 1;
            return false;
        }
        let key = (info.sample, info.umi);
        let reads = self.groups.entry(key.clone()).or_insert_with(|| {
            self.order.push(key);
            Vec::new()
        });
        reads.push(info.payload);
        true
    }

    /// Reads rejected for UMI quality.
    pub fn low_quality_umis(&self) -> u64 {
        self.low_quality_umis
    }

    /// Family size → number of families.
    pub fn size_histogram(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        for reads in self.groups.values() {
            *histogram.entry(reads.len()).or_insert(0) += 1;
        }
        histogram
    }

    /// Emit families in first-seen order, dropping those below the size threshold.
    pub fn finish(mut self) -> Vec<Mig> {
        let total = self.order.len();
        let migs: Vec<Mig> = self
            .order
            .into_iter()
            .filter_map(|key| {
                let reads = self.groups.remove(&key)?;
                (reads.len() >= self.params.min_family_size)
                    .then(|| Mig::new(key.0, key.1, reads))
            })
            .collect();
        info!(
            families = total,
            emitted = migs.len(),
            low_quality_umis = self.low_quality_umis,
            "grouped reads into molecular families"
        );
        debug!(min_family_size = self.params.min_family_size, "family size threshold");
        migs
    }
}
