//! Mapping hot paths: k-mer voting and affine-gap local alignment.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umivar::genomics::{NucleotideSequence, ReferenceLibrary};
use umivar::mapping::{KmerFinder, KmerMap, LocalAligner};

fn random_sequence(rng: &mut StdRng, len: usize) -> NucleotideSequence {
    let bases: Vec<u8> = (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect();
    NucleotideSequence::from_ascii(&bases).expect("generated bases are valid")
}

fn library(rng: &mut StdRng) -> Arc<ReferenceLibrary> {
    let entries: Vec<(String, NucleotideSequence)> = (0..50)
        .map(|i| (format!("amp{i}"), random_sequence(rng, 250)))
        .collect();
    Arc::new(ReferenceLibrary::from_sequences(entries).expect("library builds"))
}

fn benchmark_kmer_lookup(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let library = library(&mut rng);
    let map = Arc::new(KmerMap::build(&library, 11).expect("index builds"));
    let finder = KmerFinder::new(map, Arc::clone(&library));
    let query = library
        .get(17)
        .expect("reference exists")
        .sequence
        .range(40..190);

    c.bench_function("kmer_find_150bp_50_refs", |b| {
        b.iter(|| black_box(finder.find(black_box(&query))));
    });
}

fn benchmark_local_alignment(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let reference = random_sequence(&mut rng, 250);
    let query = reference.range(30..180);
    let aligner = LocalAligner::default();

    c.bench_function("local_align_150bp_on_250bp", |b| {
        b.iter(|| black_box(aligner.align(black_box(&reference), black_box(&query))));
    });
}

criterion_group!(benches, benchmark_kmer_lookup, benchmark_local_alignment);
criterion_main!(benches);
