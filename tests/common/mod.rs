#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umivar::genomics::{Mig, NucleotideSequence, ReadPayload, ReferenceLibrary, SequenceWithQuality};

pub const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_bases(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| BASES[rng.gen_range(0..4)]).collect()
}

pub fn seq(bases: &[u8]) -> NucleotideSequence {
    NucleotideSequence::from_ascii(bases).expect("valid bases")
}

pub fn read(bases: &[u8], quality: u8) -> SequenceWithQuality {
    SequenceWithQuality::with_uniform_quality(seq(bases), quality)
}

/// Replace each base with a different one with probability `rate`.
pub fn add_errors(rng: &mut StdRng, bases: &[u8], rate: f64) -> Vec<u8> {
    bases
        .iter()
        .map(|&base| {
            if rng.gen_bool(rate) {
                let others: Vec<u8> = BASES.iter().copied().filter(|&b| b != base).collect();
                others[rng.gen_range(0..3)]
            } else {
                base
            }
        })
        .collect()
}

pub fn library(amplicons: &[(&str, &[u8])]) -> ReferenceLibrary {
    ReferenceLibrary::from_sequences(amplicons.iter().map(|(name, bases)| (*name, seq(bases))))
        .expect("valid library")
}

/// A family of `size` single-end reads of `template`, each with independent errors.
pub fn family(rng: &mut StdRng, umi: &[u8], template: &[u8], size: usize, error_rate: f64) -> Mig {
    let reads = (0..size)
        .map(|_| ReadPayload::Single(read(&add_errors(rng, template, error_rate), 30)))
        .collect();
    Mig::new("sample", seq(umi), reads)
}

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("UMIVAR_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set UMIVAR_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}
