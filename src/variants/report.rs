use anyhow::{anyhow, Result};
use std::io::Write;

use super::Variant;
use crate::mapping::Mutation;

const HEADER: &str = "#REFERENCE\tPOS\tTYPE\tREF\tALT\tCOVERAGE\tMAJOR_MIGS\tMINOR_MIGS\tMAJOR_READS\tMINOR_READS\tAF\tBG_FREQ\tP_VALUE\tQUAL\tFILTER\n";

/// Write variants as tab-separated text, positions 1-based.
pub fn write_variants<W: Write>(writer: &mut W, variants: &[Variant]) -> Result<()> {
    writer.write_all(HEADER.as_bytes())?;

    for variant in variants {
        let kind = match variant.mutation {
            Mutation::Substitution { .. } => "SNV",
            Mutation::Insertion { .. } => "INS",
            Mutation::Deletion { .. } => "DEL",
        };
        let line = format!(
            "{name}\t{pos}\t{kind}\t{ref_allele}\t{alt_allele}\t{coverage}\t{major}\t{minor}\t{major_reads}\t{minor_reads}\t{af:.4}\t{bg:.3e}\t{p:.3e}\t{qual:.1}\t{filter}\n",
            name = variant.reference_name,
            pos = variant.position + 1,
            ref_allele = or_dash(&variant.ref_allele),
            alt_allele = or_dash(&variant.alt_allele),
            coverage = variant.coverage,
            major = variant.major_molecules,
            minor = variant.minor_molecules,
            major_reads = variant.major_reads,
            minor_reads = variant.minor_reads,
            af = variant.allele_frequency,
            bg = variant.background_frequency,
            p = variant.p_value,
            qual = variant.quality,
            filter = variant.filter.as_str(),
        );
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn or_dash(allele: &str) -> &str {
    if allele.is_empty() {
        "-"
    } else {
        allele
    }
}

/// Render variants into a string (useful for tests and snapshots).
pub fn render_variants(variants: &[Variant]) -> Result<String> {
    let mut buffer = Vec::new();
    write_variants(&mut buffer, variants)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("rendered report is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::NucleotideSequence;
    use crate::variants::VariantFilter;
    use std::sync::Arc;

    #[test]
    fn renders_header_and_rows() {
        let variant = Variant {
            reference: 0,
            reference_name: Arc::from("amp1"),
            position: 9,
            mutation: Mutation::Insertion {
                position: 9,
                bases: NucleotideSequence::from_ascii(b"TT").unwrap(),
            },
            ref_allele: String::new(),
            alt_allele: "TT".into(),
            major_molecules: 3,
            minor_molecules: 0,
            major_reads: 12,
            minor_reads: 0,
            coverage: 10,
            allele_frequency: 0.3,
            background_frequency: 0.1,
            p_value: 0.5,
            quality: 3.0103,
            filter: VariantFilter::LowQuality,
        };
        let text = render_variants(&[variant]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("#REFERENCE\tPOS"));
        assert_eq!(
            lines[1],
            "amp1\t10\tINS\t-\tTT\t10\t3\t0\t12\t0\t0.3000\t1.000e-1\t5.000e-1\t3.0\tLowQual"
        );
    }
}
