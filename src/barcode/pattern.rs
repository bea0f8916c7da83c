use std::collections::HashMap;
use std::ops::Range;

use anyhow::bail;
use regex::Regex;

/// Field kinds accepted by default: Cell barcode, Linker, UMI, skip, polyT
pub const DEFAULT_ALLOWED_KINDS: &str = "CLUNT";

///////////////////////////////
/// Coordinates of each layout field within a read, by field kind.
/// Built once from a layout string such as "C9U12" and immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRanges {
    ranges: HashMap<char, Vec<Range<usize>>>,
    total_len: usize,
}

impl FieldRanges {
    ///////////////////////////////
    /// Ranges for one field kind, in pattern encounter order
    pub fn get(&self, kind: char) -> &[Range<usize>] {
        self.ranges.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Total number of bases consumed by the pattern
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    ///////////////////////////////
    /// The single cell barcode range. The demultiplexer only supports
    /// layouts with exactly one C segment
    pub fn single_barcode_range(&self) -> anyhow::Result<Range<usize>> {
        let c_ranges = self.get('C');
        if c_ranges.len() != 1 {
            bail!(
                "Wrong pattern, only accept one barcode position (got {})",
                c_ranges.len()
            );
        }
        Ok(c_ranges[0].clone())
    }
}

///////////////////////////////
/// Parse a layout string like "C8L16C8L16C8L1U12T18" into field ranges.
/// Tokens are <uppercase letter><length> and must tile the whole string.
/// Offsets accumulate left to right; ranges for a repeated kind are appended
pub fn parse_pattern(pattern: &str, allowed: &str) -> anyhow::Result<FieldRanges> {
    let re = Regex::new(r"([A-Z])(\d+)").expect("pattern token regex");

    let mut ranges: HashMap<char, Vec<Range<usize>>> = HashMap::new();
    let mut start: usize = 0;
    let mut expected_pos = 0;
    let mut n_tokens = 0;

    for cap in re.captures_iter(pattern) {
        let whole = cap.get(0).expect("capture group 0 always present");
        if whole.start() != expected_pos {
            bail!("Invalid pattern: {}", pattern);
        }
        expected_pos = whole.end();

        let kind = cap[1].chars().next().expect("token letter");
        if !allowed.contains(kind) {
            bail!("Invalid pattern: {}", pattern);
        }
        let length: usize = cap[2].parse()?;

        //Accumulated offsets must not wrap
        let Some(end) = start.checked_add(length) else {
            bail!("Invalid pattern: {}", pattern);
        };
        ranges.entry(kind).or_default().push(start..end);
        start = end;
        n_tokens += 1;
    }

    if n_tokens == 0 || expected_pos != pattern.len() {
        bail!("Invalid pattern: {}", pattern);
    }

    Ok(FieldRanges {
        ranges,
        total_len: start,
    })
}
