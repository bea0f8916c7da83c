use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};

/// Required header of the well assignment table
const WELL_TABLE_HEADER: [&str; 3] = ["raw_sample", "well", "sub_sample"];

///////////////////////////////
/// For deserialization: one row in the tab separated well assignment table
#[derive(Debug, serde::Deserialize, Eq, PartialEq)]
struct WellTableRow {
    raw_sample: String,
    well: String,
    sub_sample: String,
}

///////////////////////////////
/// Wells pooled into one named subsample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsampleWells {
    pub name: String,
    pub wells: Vec<u32>,
}

///////////////////////////////
/// Partition of wells into subsamples for one raw sample, in table row order.
/// Wells are disjoint across subsamples; this is verified during construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellAssignment {
    pub subsamples: Vec<SubsampleWells>,
}

impl WellAssignment {
    pub fn from_path(path: &PathBuf, raw_sample: &str) -> anyhow::Result<WellAssignment> {
        let file = File::open(path)
            .with_context(|| format!("Could not open well table {}", path.display()))?;
        WellAssignment::from_reader(file, raw_sample)
            .with_context(|| format!("Failed to parse well table {}", path.display()))
    }

    ///////////////////////////////
    /// Read the assignment table, keeping the rows of one raw sample
    pub fn from_reader(src: impl Read, raw_sample: &str) -> anyhow::Result<WellAssignment> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(src);

        let headers = reader.headers()?.clone();
        if headers.iter().collect::<Vec<_>>() != WELL_TABLE_HEADER {
            bail!("Wrong file, header should be: raw_sample\\twell\\tsub_sample");
        }

        let mut subsamples: Vec<SubsampleWells> = Vec::new();
        for result in reader.deserialize() {
            let row: WellTableRow = result?;
            if row.raw_sample != raw_sample {
                continue;
            }

            if subsamples.iter().any(|s| s.name == row.sub_sample) {
                bail!(
                    "Please merge rows with the same sub_sample: {}",
                    row.sub_sample
                );
            }

            subsamples.push(SubsampleWells {
                name: row.sub_sample,
                wells: expand_well_spec(&row.well)?,
            });
        }

        if subsamples.is_empty() {
            bail!("{} is not in the well table", raw_sample);
        }

        let assignment = WellAssignment { subsamples };
        assignment.check_disjoint()?;
        Ok(assignment)
    }

    ///////////////////////////////
    /// A well may only be assigned to one subsample
    fn check_disjoint(&self) -> anyhow::Result<()> {
        let mut seen: HashMap<u32, &str> = HashMap::new();
        for sub in &self.subsamples {
            for &well in &sub.wells {
                if let Some(other) = seen.insert(well, sub.name.as_str()) {
                    bail!(
                        "Duplicate well {} in subsamples {} and {}",
                        well,
                        other,
                        sub.name
                    );
                }
            }
        }
        Ok(())
    }
}

///////////////////////////////
/// Expand a well column value into well numbers.
/// Comma separated tokens, each a single number or an inclusive a-b range
fn expand_well_spec(spec: &str) -> anyhow::Result<Vec<u32>> {
    let mut wells = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.contains('-') {
            let parts: Vec<&str> = token.split('-').collect();
            if parts.len() > 2 {
                bail!("More than two numbers between '-': {}", token);
            }
            let from: u32 = parts[0]
                .trim()
                .parse()
                .with_context(|| format!("Bad well range: {}", token))?;
            let to: u32 = parts[1]
                .trim()
                .parse()
                .with_context(|| format!("Bad well range: {}", token))?;
            for well in from..=to {
                wells.push(well);
            }
        } else {
            let well = token
                .parse()
                .with_context(|| format!("Bad well number: {}", token))?;
            wells.push(well);
        }
    }
    Ok(wells)
}
