//! Nucleotide to protein translation
//!
//! Translates a coding sequence with the bacterial, archaeal and plant plastid
//! code (NCBI translation table 11). Table 11 assigns the same amino acids as
//! the standard code and differs only in its alternative start codons, which
//! do not affect translation of an in-frame sequence.

/// Amino acids indexed by `16 * b1 + 4 * b2 + b3` with `T=0, C=1, A=2, G=3`
const TABLE_11: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

/// Residue emitted for codons containing ambiguous bases
pub const UNKNOWN_RESIDUE: u8 = b'X';

/// Residue emitted for stop codons
pub const STOP_RESIDUE: u8 = b'*';

/// Two-bit code of a nucleotide in `TCAG` order
#[inline]
fn base_index(base: u8) -> Option<usize> {
    match base {
        b'T' | b't' | b'U' | b'u' => Some(0),
        b'C' | b'c' => Some(1),
        b'A' | b'a' => Some(2),
        b'G' | b'g' => Some(3),
        _ => None,
    }
}

/// Translates a single codon
#[must_use]
pub fn translate_codon(codon: [u8; 3]) -> u8 {
    match (
        base_index(codon[0]),
        base_index(codon[1]),
        base_index(codon[2]),
    ) {
        (Some(b1), Some(b2), Some(b3)) => TABLE_11[16 * b1 + 4 * b2 + b3],
        _ => UNKNOWN_RESIDUE,
    }
}

/// Translates a nucleotide sequence into its protein sequence
///
/// Translation starts at the first base and proceeds codon by codon. An
/// incomplete trailing codon is ignored, and a single terminal stop codon is
/// dropped from the output.
///
/// # Example
///
/// ```
/// use seqcat::translate::translate;
///
/// assert_eq!(translate(b"ATGAAATGGTAA"), "MKW");
/// ```
#[must_use]
pub fn translate(nucleotides: &[u8]) -> String {
    let mut protein: Vec<u8> = nucleotides
        .chunks_exact(3)
        .map(|codon| translate_codon([codon[0], codon[1], codon[2]]))
        .collect();
    if protein.last() == Some(&STOP_RESIDUE) {
        protein.pop();
    }
    // Every residue is ASCII
    protein.into_iter().map(char::from).collect()
}
