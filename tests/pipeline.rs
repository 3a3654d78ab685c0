mod common;

use common::{assert_snapshot, family, library, random_bases, read, rng, seq};
use umivar::genomics::{IndexingInfo, Mig, Nucleotide, ReadPayload};
use umivar::mapping::ConsensusAlignment;
use umivar::variants::report::render_variants;
use umivar::variants::VariantFilter;
use umivar::{CancellationToken, Pipeline, PipelineConfig};

const AMPLICON: &[u8] = b"ACGTTGCAAGCTTAGCCGATCGGATACCTGAAGTCCATGGTACGCTAGCAATTCGG";

fn umi(index: usize) -> Vec<u8> {
    (0..8).map(|shift| b"ACGT"[(index >> (2 * shift)) & 3]).collect()
}

/// 100 families on `amp1` (five carrying `alt` at position 60) and 40 on `amp2`.
fn simulated_batch(seed: u64) -> (Pipeline, Vec<Mig>, u8) {
    let mut rng = rng(seed);
    let amp1 = random_bases(&mut rng, 120);
    let amp2 = random_bases(&mut rng, 120);
    let alt = if amp1[60] == b'A' { b'G' } else { b'A' };
    let mut mutant = amp1.clone();
    mutant[60] = alt;

    let mut migs = Vec::new();
    for i in 0..100 {
        let template = if i % 20 == 0 { &mutant } else { &amp1 };
        migs.push(family(&mut rng, &umi(i), template, 5, 0.002));
    }
    for i in 100..140 {
        migs.push(family(&mut rng, &umi(i), &amp2, 4, 0.002));
    }

    let library = library(&[("amp1", &amp1), ("amp2", &amp2)]);
    let pipeline = Pipeline::new(library, PipelineConfig::default()).unwrap();
    (pipeline, migs, alt)
}

#[test]
fn error_free_consensus_yields_no_calls() {
    let mut rng = rng(41);
    let amplicon = random_bases(&mut rng, 120);
    let migs: Vec<Mig> = (0..30)
        .map(|i| family(&mut rng, &umi(i), &amplicon, 5, 0.005))
        .collect();
    let pipeline = Pipeline::new(library(&[("amp", &amplicon)]), PipelineConfig::default()).unwrap();

    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    assert_eq!(summary.processed, 30);
    assert_eq!(summary.aligned, 30);

    let table = pipeline.tables().get(0).unwrap();
    assert!((0..amplicon.len()).all(|pos| table.coverage(pos) == 30));
    assert!(pipeline.call_variants().is_empty());
}

#[test]
fn low_frequency_substitution_is_called() {
    let (pipeline, migs, alt) = simulated_batch(43);
    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    assert_eq!(summary.aligned, 140);

    let variants = pipeline.call_variants();
    assert_eq!(variants.len(), 1, "unexpected calls: {variants:?}");
    let variant = &variants[0];
    assert_eq!(variant.reference_name.as_ref(), "amp1");
    assert_eq!(variant.position, 60);
    assert_eq!(variant.alt_allele, (alt as char).to_string());
    assert_eq!(variant.major_molecules, 5);
    assert_eq!(variant.coverage, 100);
    assert!((variant.allele_frequency - 0.05).abs() < 1e-12);
    assert_eq!(variant.filter, VariantFilter::Pass);
}

#[test]
fn reports_are_identical_across_runs_and_thread_counts() {
    let fingerprint = |threads: usize| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        pool.install(|| {
            let (pipeline, migs, _) = simulated_batch(47);
            let mut config = pipeline.config().clone();
            config.caller.report_filtered = true;
            let pipeline = Pipeline::new(pipeline.library().clone(), config).unwrap();
            pipeline.process_migs(migs, &CancellationToken::new());
            let report = render_variants(&pipeline.call_variants()).unwrap();
            blake3::hash(report.as_bytes())
        })
    };

    let single = fingerprint(1);
    assert_eq!(single, fingerprint(4));
    assert_eq!(single, fingerprint(4));
}

#[test]
fn header_tagged_reads_flow_through_grouping() {
    let pipeline = Pipeline::new(library(&[("amp1", AMPLICON)]), PipelineConfig::default()).unwrap();
    let headers = [
        "r1 UMI:ACGTACGT:IIIIIIII",
        "r2 UMI:ACGTACGT:IIIIIIII",
        "r3 UMI:TTGGCCAA:IIIIIIII",
        "r4 UMI:TTGGCCAA:IIII#III",
        "r5 no-umi-here",
    ];
    let indexed: Vec<IndexingInfo> = headers
        .iter()
        .filter_map(|header| {
            IndexingInfo::from_header("sample", header, ReadPayload::Single(read(AMPLICON, 30)))
        })
        .collect();
    assert_eq!(indexed.len(), 4);

    let migs = pipeline.group(indexed);
    assert_eq!(migs.len(), 2);
    assert_eq!(migs[0].size(), 2);
    assert_eq!(migs[1].size(), 1);

    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    assert_eq!(summary.aligned, 2);
    assert_eq!(pipeline.tables().get(0).unwrap().coverage(0), 2);
}

#[test]
fn header_umis_without_qualities_are_grouped() {
    let pipeline = Pipeline::new(library(&[("amp1", AMPLICON)]), PipelineConfig::default()).unwrap();
    let indexed: Vec<IndexingInfo> = (0..5)
        .filter_map(|i| {
            IndexingInfo::from_header(
                "s",
                &format!("r{i} UMI:ACGTACGT"),
                ReadPayload::Single(read(AMPLICON, 30)),
            )
        })
        .collect();
    assert_eq!(indexed.len(), 5);

    let migs = pipeline.group(indexed);
    assert_eq!(migs.len(), 1);
    assert_eq!(migs[0].size(), 5);
    assert_eq!(migs[0].umi.to_ascii(), b"ACGTACGT");

    let summary = pipeline.process_migs(migs, &CancellationToken::new());
    assert_eq!(summary.aligned, 1);
}

#[test]
fn identical_reads_map_full_length_without_minors() {
    let mut rng = rng(53);
    let reference = random_bases(&mut rng, 100);
    let pipeline = Pipeline::new(library(&[("ref", &reference)]), PipelineConfig::default()).unwrap();
    let mig = Mig::new(
        "sample",
        seq(b"ACGTACGT"),
        vec![ReadPayload::Single(read(&reference, 30)); 30],
    );

    let Some(ConsensusAlignment::Single(result)) = pipeline.process_mig(&mig) else {
        panic!("30 identical reads should give one aligned consensus");
    };
    assert_eq!(result.reference, 0);
    assert!(!result.reverse);
    assert_eq!(result.alignment.ref_range, 0..100);
    assert_eq!(result.alignment.query_range, 0..100);
    assert!(result.alignment.mutations.is_empty());

    let table = pipeline.tables().get(0).unwrap();
    for (pos, &base) in reference.iter().enumerate() {
        assert_eq!(table.coverage(pos), 1);
        let major = Nucleotide::from_ascii(base).unwrap();
        for candidate in Nucleotide::ALL {
            let counts = table.counts(pos, candidate);
            assert_eq!(counts.minor_molecules, 0, "minor family at {pos}");
            assert_eq!(counts.minor_reads, 0, "minor reads at {pos}");
            if candidate == major {
                assert_eq!(counts.major_molecules, 1);
                assert_eq!(counts.major_reads, 30);
            } else {
                assert_eq!(counts.major_molecules, 0);
            }
        }
    }
    assert!(pipeline.call_variants().is_empty());
}

#[test]
fn insertion_report_matches_snapshot() {
    let mut inserted = AMPLICON[..28].to_vec();
    inserted.extend_from_slice(b"GGG");
    inserted.extend_from_slice(&AMPLICON[28..]);

    let migs = (0..4)
        .map(|i| {
            let template = if i < 3 { inserted.as_slice() } else { AMPLICON };
            Mig::new(
                "sample",
                seq(&umi(i)),
                vec![ReadPayload::Single(read(template, 30)); 2],
            )
        })
        .collect();

    let mut config = PipelineConfig::default();
    config.caller.report_filtered = true;
    let pipeline = Pipeline::new(library(&[("amp1", AMPLICON)]), config).unwrap();
    pipeline.process_migs(migs, &CancellationToken::new());

    let report = render_variants(&pipeline.call_variants()).unwrap();
    assert_snapshot("insertion_report.tsv", &report);
}
