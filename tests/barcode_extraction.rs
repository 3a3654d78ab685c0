mod common;

use std::collections::HashSet;

use common::{library, random_bases, read, rng, BASES};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use umivar::barcode::{
    BarcodeParameters, BarcodeSearcher, BarcodeSignature, DemultiplexParameters, Demultiplexer,
    GroupingParameters, MigGrouper, SampleBarcodes,
};
use umivar::genomics::{ReadPayload, SequenceWithQuality};
use umivar::variants::VariantFilter;
use umivar::{CancellationToken, Pipeline, PipelineConfig};

const SIGNATURE: &str = "NNNNNNNNtgacCAGTTGCAAGGTcgat";
const ADAPTER: &[u8] = b"TGACCAGTTGCAAGGTCGAT";

fn searcher() -> BarcodeSearcher {
    BarcodeSearcher::new(
        BarcodeSignature::parse(SIGNATURE).unwrap(),
        BarcodeParameters::default(),
    )
}

fn tagged_read(umi: &[u8], adapter: &[u8], insert: &[u8]) -> Vec<u8> {
    [umi, adapter, insert].concat()
}

/// Adapter offsets matched fuzzily (the lower-case flanks of the seed).
const FUZZY_OFFSETS: [usize; 8] = [0, 1, 2, 3, 16, 17, 18, 19];

struct OffsetRead {
    read: SequenceWithQuality,
    umi: Vec<u8>,
    offset: usize,
}

/// Random prefix, UMI, adapter with `mismatches` fuzzy substitutions at
/// `mismatch_quality`, then a random insert; every other base is Q30.
fn offset_read(rng: &mut StdRng, mismatches: usize, mismatch_quality: u8) -> OffsetRead {
    let offset = rng.gen_range(0..=30);
    let umi = random_bases(rng, 8);
    let mut adapter = ADAPTER.to_vec();
    let positions: Vec<usize> = FUZZY_OFFSETS
        .choose_multiple(rng, mismatches)
        .copied()
        .collect();
    for &pos in &positions {
        let others: Vec<u8> = BASES.iter().copied().filter(|&b| b != adapter[pos]).collect();
        adapter[pos] = others[rng.gen_range(0..3)];
    }

    let bases = [
        random_bases(rng, offset),
        umi.clone(),
        adapter,
        random_bases(rng, 60),
    ]
    .concat();
    let mut quals = vec![30 + 33; bases.len()];
    for pos in positions {
        quals[offset + 8 + pos] = mismatch_quality + 33;
    }
    OffsetRead {
        read: SequenceWithQuality::from_fastq(&bases, &quals).unwrap(),
        umi,
        offset,
    }
}

#[test]
fn simulated_umis_are_recovered() {
    let mut rng = rng(7);
    let searcher = searcher();
    for _ in 0..50 {
        let umi = random_bases(&mut rng, 8);
        let insert = random_bases(&mut rng, 80);
        let bases = tagged_read(&umi, ADAPTER, &insert);
        let result = searcher
            .search(&read(&bases, 30))
            .expect("tagged read should match");
        assert_eq!(result.umi.to_ascii(), umi);
        assert_eq!((result.from, result.to), (0, 28));
        assert_eq!(result.mismatches(), 0);
    }
}

#[test]
fn single_fuzzy_mismatch_is_tolerated() {
    let mut rng = rng(11);
    let searcher = searcher();
    let umi = random_bases(&mut rng, 8);
    let insert = random_bases(&mut rng, 60);
    let mut adapter = ADAPTER.to_vec();
    adapter[1] = if adapter[1] == b'A' { b'C' } else { b'A' };

    let result = searcher
        .search(&read(&tagged_read(&umi, &adapter, &insert), 30))
        .expect("one high-quality mismatch is within budget");
    assert_eq!(result.good_mms, 1);
    assert_eq!(result.umi.to_ascii(), umi);

    adapter[18] = if adapter[18] == b'A' { b'C' } else { b'A' };
    assert!(searcher
        .search(&read(&tagged_read(&umi, &adapter, &insert), 30))
        .is_none());
}

#[test]
fn untagged_reads_are_not_matched() {
    let mut rng = rng(13);
    let searcher = searcher();
    for _ in 0..50 {
        let bases = random_bases(&mut rng, 100);
        assert!(searcher.search(&read(&bases, 30)).is_none());
    }
}

#[test]
fn demultiplexed_reads_group_into_families() {
    let mut rng = rng(17);
    let barcodes = SampleBarcodes::from_lists(
        &["alpha", "beta"],
        &["NNNNNNNNtgacCAGTTGCAAGGTcgat", "NNNNNNNNggtaTTCCAGGATCCAagct"],
        &["", ""],
        &BarcodeParameters::default(),
    )
    .unwrap();
    let demux = Demultiplexer::new(barcodes, DemultiplexParameters::default());

    let umi_alpha = random_bases(&mut rng, 8);
    let umi_beta = random_bases(&mut rng, 8);
    let insert = random_bases(&mut rng, 50);
    let mut grouper = MigGrouper::new(GroupingParameters::default());
    for i in 0..9 {
        let bases = if i % 3 == 0 {
            tagged_read(&umi_beta, b"GGTATTCCAGGATCCAAGCT", &insert)
        } else {
            tagged_read(&umi_alpha, ADAPTER, &insert)
        };
        let info = demux
            .extract(&ReadPayload::Single(read(&bases, 30)))
            .expect("every read carries an adapter");
        assert_eq!(info.payload.first().sequence().to_ascii(), insert);
        grouper.push(info);
    }
    assert_eq!(demux.statistics().extracted(), 9);
    assert_eq!(demux.statistics().sample_count(0), 6);
    assert_eq!(demux.statistics().sample_count(1), 3);

    let migs = grouper.finish();
    assert_eq!(migs.len(), 2);
    assert_eq!(migs[0].sample.as_ref(), "beta");
    assert_eq!(migs[0].umi.to_ascii(), umi_beta);
    assert_eq!(migs[0].size(), 3);
    assert_eq!(migs[1].sample.as_ref(), "alpha");
    assert_eq!(migs[1].size(), 6);
}

#[test]
fn fuzzy_mismatches_are_tolerated_at_random_offsets() {
    let mut rng = rng(61);
    let searcher = searcher();

    let mut detected = 0;
    for _ in 0..200 {
        let sample = offset_read(&mut rng, 1, 30);
        if let Some(result) = searcher.search(&sample.read) {
            detected += 1;
            assert_eq!(result.umi.to_ascii(), sample.umi);
            assert_eq!(result.from, sample.offset);
            assert_eq!(result.good_mms, 1);
        }
    }
    assert!(detected >= 176, "{detected}/200 single-mismatch adapters found");

    let mut rescued = 0;
    let mut strict = 0;
    for _ in 0..200 {
        if let Some(result) = searcher.search(&offset_read(&mut rng, 2, 10).read) {
            rescued += 1;
            assert_eq!(result.low_quality_mms, 2);
        }
        if searcher.search(&offset_read(&mut rng, 2, 30).read).is_some() {
            strict += 1;
        }
    }
    assert!(rescued >= 190, "{rescued}/200 low-quality double mismatches found");
    assert!(strict <= 10, "{strict}/200 high-quality double mismatches accepted");
}

#[test]
fn bare_seed_in_random_flanks_is_rejected() {
    let mut rng = rng(67);
    let searcher = searcher();
    let mut false_hits = 0;
    for _ in 0..200 {
        let prefix = rng.gen_range(12..=40);
        let suffix = rng.gen_range(20..=60);
        let bases = [
            random_bases(&mut rng, prefix),
            b"CAGTTGCAAGGT".to_vec(),
            random_bases(&mut rng, suffix),
        ]
        .concat();
        if searcher.search(&read(&bases, 30)).is_some() {
            false_hits += 1;
        }
    }
    assert!(false_hits <= 4, "{false_hits}/200 bare seeds accepted");
}

#[test]
fn dominant_substitution_is_called_from_adapter_tagged_reads() {
    let mut rng = rng(71);
    let amplicon = random_bases(&mut rng, 120);
    let alt = if amplicon[60] == b'C' { b'T' } else { b'C' };
    let mut mutant = amplicon.clone();
    mutant[60] = alt;

    let barcodes = SampleBarcodes::from_lists(
        &["alpha"],
        &[SIGNATURE],
        &[""],
        &BarcodeParameters::default(),
    )
    .unwrap();
    let demux = Demultiplexer::new(barcodes, DemultiplexParameters::default());

    let mut umis = HashSet::new();
    let mut indexed = Vec::new();
    for family in 0..40 {
        let umi = loop {
            let umi = random_bases(&mut rng, 8);
            if umis.insert(umi.clone()) {
                break umi;
            }
        };
        // Two of forty families keep the reference base.
        let template = if family % 20 == 0 { &amplicon } else { &mutant };
        for _ in 0..3 {
            let bases = tagged_read(&umi, ADAPTER, template);
            indexed.push(
                demux
                    .extract(&ReadPayload::Single(read(&bases, 30)))
                    .expect("every read carries an adapter"),
            );
        }
    }

    let pipeline = Pipeline::new(library(&[("amp", &amplicon)]), PipelineConfig::default()).unwrap();
    let migs = pipeline.group(indexed);
    assert_eq!(migs.len(), 40);
    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    assert_eq!(summary.aligned, 40);

    let variants = pipeline.call_variants();
    assert_eq!(variants.len(), 1, "unexpected calls: {variants:?}");
    let variant = &variants[0];
    assert_eq!(variant.position, 60);
    assert_eq!(variant.alt_allele, (alt as char).to_string());
    assert_eq!(variant.major_molecules, 38);
    assert_eq!(variant.coverage, 40);
    assert!(variant.allele_frequency >= 0.95);
    assert_eq!(variant.filter, VariantFilter::Pass);
}
