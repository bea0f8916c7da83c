use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use serde::Serialize;

/// Default substitution budget for barcode correction
pub const DEFAULT_MAX_MISMATCH: usize = 1;

/// The four nucleotides plus the unknown base
pub const DEFAULT_ALPHABET: &[u8] = b"ACGTN";

///////////////////////////////
/// Flat lookup from any sequence within the substitution budget of a
/// canonical barcode to that canonical barcode.
///
/// When two canonical barcodes share a variant, the barcode inserted last
/// wins. The tie-break follows construction order and is kept deliberately;
/// it keeps the index a plain mapping instead of a multi-valued structure
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct MismatchIndex {
    map: BTreeMap<String, String>,
}

impl MismatchIndex {
    ///////////////////////////////
    /// Build the index for an ordered list of canonical barcodes.
    /// Blank and whitespace-only entries are skipped
    pub fn build<'a>(
        barcodes: impl IntoIterator<Item = &'a str>,
        n_mismatch: usize,
        alphabet: &[u8],
    ) -> MismatchIndex {
        let mut map = BTreeMap::new();
        for seq in barcodes {
            let seq = seq.trim();
            if seq.is_empty() {
                continue;
            }
            for variant in variants(seq, n_mismatch, alphabet) {
                map.insert(variant, seq.to_string());
            }
        }
        MismatchIndex { map }
    }

    /// Resolve an observed barcode to its canonical form, if within budget
    pub fn lookup(&self, observed: &str) -> Option<&str> {
        self.map.get(observed).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

///////////////////////////////
/// All sequences reachable from seq by choosing every subset of positions of
/// size exactly min(n_mismatch, len) and substituting every alphabet symbol
/// at the chosen positions. Substituting the original symbol is a no-op, so
/// seq itself is always a member and effective distance is <= n_mismatch.
///
/// Cost is alphabet^n_mismatch * C(len, n_mismatch) per barcode; fine for
/// short barcodes and a budget of 1, the caller must not raise the budget
/// without minding this
pub fn variants(seq: &str, n_mismatch: usize, alphabet: &[u8]) -> HashSet<String> {
    let seq = seq.as_bytes();
    let n_mismatch = n_mismatch.min(seq.len());

    let mut result = HashSet::new();
    for locs in (0..seq.len()).combinations(n_mismatch) {
        let position_choices: Vec<Vec<u8>> = seq
            .iter()
            .enumerate()
            .map(|(i, &base)| {
                if locs.contains(&i) {
                    alphabet.to_vec()
                } else {
                    vec![base]
                }
            })
            .collect();

        for choice in position_choices.into_iter().multi_cartesian_product() {
            result.insert(String::from_utf8(choice).expect("barcode is not valid utf-8"));
        }
    }
    result
}
