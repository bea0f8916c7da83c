use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::ops::Range;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Args;
use log::info;
use serde::Serialize;

use seq_io::fastq::Record as FastqRecord;

use crate::barcode::mismatch;
use crate::barcode::mismatch::MismatchIndex;
use crate::barcode::pattern;
use crate::fileformat::fastq::{open_fastq, PairedFastqWriter};
use crate::fileformat::well_table::WellAssignment;
use crate::fileformat::whitelist;

pub const DEFAULT_PATTERN: &str = "C9U12";

#[derive(Args)]
pub struct SplitCMD {
    // Name of the raw sample to demultiplex, as listed in the well table
    #[arg(long = "sample", value_parser)]
    pub sample: String,

    // FASTQ files for r1, read as one logical stream in list order
    #[arg(long = "r1", num_args = 1.., required = true, value_delimiter = ',', help = "List of input R1 FASTQ files (comma-separated)")]
    pub path_r1: Vec<PathBuf>,

    // FASTQ files for r2
    #[arg(long = "r2", num_args = 1.., required = true, value_delimiter = ',', help = "List of input R2 FASTQ files (comma-separated)")]
    pub path_r2: Vec<PathBuf>,

    // Well to subsample assignment table
    #[arg(long = "wells", value_parser)]
    pub path_well_table: PathBuf,

    // Barcode whitelist, one barcode per line; line number is the well number
    #[arg(long = "whitelist", value_parser)]
    pub whitelist: String,

    // Read layout of r1, e.g. C9U12
    #[arg(long = "pattern", value_parser, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    // Also split each subsample into per-well files
    #[arg(long = "split-to-well")]
    pub split_to_well: bool,

    // Output directory
    #[arg(short = 'o', long = "out", value_parser, default_value = ".")]
    pub path_out: PathBuf,

    // gzip the output FASTQ files
    #[arg(long = "gzip")]
    pub gzip_output: bool,

    // Barcode substitution tolerance
    #[arg(long = "max-mismatch", value_parser, default_value_t = mismatch::DEFAULT_MAX_MISMATCH)]
    pub max_mismatch: usize,
}

impl SplitCMD {
    ///////////////////////////////
    /// Run the commandline option.
    /// Resolves the configuration, then streams the read pairs once
    pub fn try_execute(&mut self) -> Result<()> {
        if self.whitelist.contains(char::is_whitespace) || self.whitelist.contains(',') {
            bail!("Only accept one whitelist");
        }

        let field_ranges = pattern::parse_pattern(&self.pattern, pattern::DEFAULT_ALLOWED_KINDS)?;
        let barcode_range = field_ranges.single_barcode_range()?;

        let whitelist = whitelist::read_whitelist(&PathBuf::from(&self.whitelist))?;
        let assignment = WellAssignment::from_path(&self.path_well_table, &self.sample)?;

        let params = SplitFastq {
            sample: self.sample.clone(),
            path_r1: self.path_r1.clone(),
            path_r2: self.path_r2.clone(),
            path_out: self.path_out.clone(),
            barcode_range,
            split_to_well: self.split_to_well,
            gzip_output: self.gzip_output,
            max_mismatch: self.max_mismatch,
        };
        SplitFastq::run(&params, &whitelist, &assignment)?;

        info!("Split has finished successfully");
        Ok(())
    }
}

///////////////////////////////
/// Parameters for one demultiplexing run
pub struct SplitFastq {
    pub sample: String,
    pub path_r1: Vec<PathBuf>,
    pub path_r2: Vec<PathBuf>,
    pub path_out: PathBuf,
    pub barcode_range: Range<usize>,
    pub split_to_well: bool,
    pub gzip_output: bool,
    pub max_mismatch: usize,
}

///////////////////////////////
/// Routing state for one subsample: its correction index, its open output
/// pair and, when splitting to wells, one index and output pair per well
struct SubsampleDemux {
    name: String,
    //Canonical barcode to well name, e.g. "well7"
    barcode_to_well: BTreeMap<String, String>,
    //Variant to canonical, union over all wells of this subsample
    index: MismatchIndex,
    //Per-well variant to canonical, only when splitting to wells
    well_index: BTreeMap<String, MismatchIndex>,
    out: PairedFastqWriter,
    well_out: BTreeMap<String, PairedFastqWriter>,
    n_pairs: u64,
}

///////////////////////////////
/// For serialization: output paths of one R1/R2 pair
#[derive(Serialize)]
struct PairPaths {
    #[serde(rename = "out_R1")]
    out_r1: PathBuf,
    #[serde(rename = "out_R2")]
    out_r2: PathBuf,
}

///////////////////////////////
/// For serialization: manifest entry of one subsample
#[derive(Serialize)]
struct SubsampleManifest {
    sample: PairPaths,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    well: BTreeMap<String, PairPaths>,
}

///////////////////////////////
/// For serialization: barcode correction metadata of one subsample
#[derive(Serialize)]
struct SubsampleBarcodeIndex<'a> {
    map: &'a BTreeMap<String, String>,
    sample: &'a MismatchIndex,
    well: &'a BTreeMap<String, MismatchIndex>,
}

impl SplitFastq {
    ///////////////////////////////
    /// Demultiplex the paired input streams into per-subsample (and
    /// optionally per-well) FASTQ pairs, then write the JSON metadata.
    ///
    /// Read pairs are zipped by position; mate names are trusted to
    /// correspond, this is not verified. A pair matching no subsample is
    /// dropped and only counted
    pub fn run(
        params: &SplitFastq,
        whitelist: &[String],
        assignment: &WellAssignment,
    ) -> Result<()> {
        if params.path_r1.len() != params.path_r2.len() {
            bail!(
                "fastq1 and fastq2 do not have the same file number ({} vs {})",
                params.path_r1.len(),
                params.path_r2.len()
            );
        }

        //Every referenced well needs a whitelist entry
        for sub in &assignment.subsamples {
            for &well in &sub.wells {
                if well == 0 || well as usize > whitelist.len() {
                    bail!(
                        "Well {} of subsample {} is outside the whitelist (1..={})",
                        well,
                        sub.name,
                        whitelist.len()
                    );
                }
            }
        }

        //Open all output handles before the first read is processed.
        //This is a bounded set, one pair per subsample plus one per well
        let ext = if params.gzip_output {
            "fastq.gz"
        } else {
            "fastq"
        };
        let mut manifest: BTreeMap<String, SubsampleManifest> = BTreeMap::new();
        let mut demuxes: Vec<SubsampleDemux> = Vec::new();

        for sub in &assignment.subsamples {
            let dir = params.path_out.join(&params.sample).join(&sub.name);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

            let path_sub_r1 = dir.join(format!("{}_R1.{}", sub.name, ext));
            let path_sub_r2 = dir.join(format!("{}_R2.{}", sub.name, ext));
            let out = PairedFastqWriter::create(&path_sub_r1, &path_sub_r2, params.gzip_output)?;

            let mut barcode_to_well = BTreeMap::new();
            let mut well_index = BTreeMap::new();
            let mut well_out = BTreeMap::new();
            let mut well_manifest = BTreeMap::new();

            for &well in &sub.wells {
                let barcode = whitelist[(well - 1) as usize].as_str();
                let well_name = format!("well{}", well);
                barcode_to_well.insert(barcode.to_string(), well_name.clone());

                if params.split_to_well {
                    let well_dir = dir.join("well");
                    fs::create_dir_all(&well_dir).with_context(|| {
                        format!("Failed to create output directory {}", well_dir.display())
                    })?;

                    let path_well_r1 = well_dir.join(format!("{}_R1.{}", well_name, ext));
                    let path_well_r2 = well_dir.join(format!("{}_R2.{}", well_name, ext));
                    well_out.insert(
                        well_name.clone(),
                        PairedFastqWriter::create(
                            &path_well_r1,
                            &path_well_r2,
                            params.gzip_output,
                        )?,
                    );
                    well_index.insert(
                        well_name.clone(),
                        MismatchIndex::build(
                            [barcode],
                            params.max_mismatch,
                            mismatch::DEFAULT_ALPHABET,
                        ),
                    );
                    well_manifest.insert(
                        well_name,
                        PairPaths {
                            out_r1: path_well_r1,
                            out_r2: path_well_r2,
                        },
                    );
                }
            }

            let index = MismatchIndex::build(
                sub.wells
                    .iter()
                    .map(|&w| whitelist[(w - 1) as usize].as_str()),
                params.max_mismatch,
                mismatch::DEFAULT_ALPHABET,
            );
            info!(
                "Subsample {}: {} wells, {} correction index entries",
                sub.name,
                sub.wells.len(),
                index.len()
            );

            manifest.insert(
                sub.name.clone(),
                SubsampleManifest {
                    sample: PairPaths {
                        out_r1: path_sub_r1,
                        out_r2: path_sub_r2,
                    },
                    well: well_manifest,
                },
            );

            demuxes.push(SubsampleDemux {
                name: sub.name.clone(),
                barcode_to_well,
                index,
                well_index,
                out,
                well_out,
                n_pairs: 0,
            });
        }

        //Single pass over the positionally zipped read streams
        let mut n_total: u64 = 0;
        let mut n_matched: u64 = 0;
        for (path_r1, path_r2) in params.path_r1.iter().zip(params.path_r2.iter()) {
            info!("Reading pair {:?} / {:?}", path_r1, path_r2);
            let mut reader_r1 = open_fastq(path_r1)?;
            let mut reader_r2 = open_fastq(path_r2)?;

            while let (Some(r1), Some(r2)) = (reader_r1.next(), reader_r2.next()) {
                let r1 = r1.with_context(|| format!("Error reading record from {:?}", path_r1))?;
                let r2 = r2.with_context(|| format!("Error reading record from {:?}", path_r2))?;
                n_total += 1;

                if n_total % 1_000_000 == 0 {
                    info!("{} read pairs processed, {} matched", n_total, n_matched);
                }

                let seq1 = r1.seq();
                if seq1.len() < params.barcode_range.end {
                    //Too short to carry the barcode field
                    continue;
                }
                let observed = &seq1[params.barcode_range.clone()];
                let observed = std::str::from_utf8(observed)
                    .with_context(|| format!("Non UTF-8 sequence in {:?}", path_r1))?;

                //First matching subsample wins, in table row order
                for demux in demuxes.iter_mut() {
                    let Some(canonical) = demux.index.lookup(observed) else {
                        continue;
                    };

                    demux.out.write_pair(&r1, &r2)?;
                    demux.n_pairs += 1;
                    n_matched += 1;

                    if !demux.well_out.is_empty() {
                        let well_name = demux
                            .barcode_to_well
                            .get(canonical)
                            .expect("corrected barcode has no well");
                        let writer = demux
                            .well_out
                            .get_mut(well_name)
                            .expect("well has no open writer");
                        writer.write_pair(&r1, &r2)?;
                    }
                    break;
                }
            }
        }

        //Flush everything before writing the metadata artifacts
        for demux in demuxes.iter_mut() {
            demux.out.finish()?;
            for writer in demux.well_out.values_mut() {
                writer.finish()?;
            }
        }

        for demux in &demuxes {
            info!("Subsample {}: {} read pairs", demux.name, demux.n_pairs);
        }
        info!(
            "{} of {} read pairs matched a subsample, {} dropped",
            n_matched,
            n_total,
            n_total - n_matched
        );

        //Metadata artifacts: barcode correction index and output manifest
        let index_export: BTreeMap<&str, SubsampleBarcodeIndex> = demuxes
            .iter()
            .map(|d| {
                (
                    d.name.as_str(),
                    SubsampleBarcodeIndex {
                        map: &d.barcode_to_well,
                        sample: &d.index,
                        well: &d.well_index,
                    },
                )
            })
            .collect();

        write_json(
            &params
                .path_out
                .join(format!("{}.well_bc.json", params.sample)),
            &index_export,
        )?;
        write_json(
            &params
                .path_out
                .join(format!("{}.fastq_inf.json", params.sample)),
            &manifest,
        )?;

        Ok(())
    }
}

////////// Write one pretty-printed JSON artifact
fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create json file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use std::path::Path;

    /// Deterministic 8 base barcode for a whitelist line (base 4 encoding)
    fn test_barcode(i: usize) -> String {
        let bases = [b'A', b'C', b'G', b'T'];
        let mut bc = [b'A'; 8];
        let mut v = i;
        for slot in bc.iter_mut().rev() {
            *slot = bases[v % 4];
            v /= 4;
        }
        String::from_utf8(bc.to_vec()).unwrap()
    }

    fn fastq_record(name: &str, seq: &str) -> String {
        format!("@{}\n{}\n+\n{}\n", name, seq, "I".repeat(seq.len()))
    }

    fn fresh_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wellsplit_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_gz(path: &Path, content: &str) {
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    fn read_gz(path: &Path) -> String {
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        decoded
    }

    fn trivial_assignment() -> WellAssignment {
        WellAssignment::from_reader(
            Cursor::new("raw_sample\twell\tsub_sample\nsampleX\t1-2\tsampleA\n"),
            "sampleX",
        )
        .unwrap()
    }

    #[test]
    fn test_unbalanced_inputs_rejected() {
        let dir = fresh_dir("unbalanced");
        let whitelist: Vec<String> = (0..2).map(test_barcode).collect();

        let params = SplitFastq {
            sample: "sampleX".to_string(),
            path_r1: vec![dir.join("a_R1.fastq"), dir.join("b_R1.fastq")],
            path_r2: vec![dir.join("a_R2.fastq")],
            path_out: dir.clone(),
            barcode_range: 0..8,
            split_to_well: false,
            gzip_output: false,
            max_mismatch: 1,
        };
        assert!(SplitFastq::run(&params, &whitelist, &trivial_assignment()).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_well_outside_whitelist_rejected() {
        let dir = fresh_dir("badwell");
        //Assignment references wells 1 and 2 but the whitelist has one line
        let whitelist = vec![test_barcode(0)];

        let params = SplitFastq {
            sample: "sampleX".to_string(),
            path_r1: vec![dir.join("a_R1.fastq")],
            path_r2: vec![dir.join("a_R2.fastq")],
            path_out: dir.clone(),
            barcode_range: 0..8,
            split_to_well: false,
            gzip_output: false,
            max_mismatch: 1,
        };
        assert!(SplitFastq::run(&params, &whitelist, &trivial_assignment()).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_split_end_to_end() {
        let dir = fresh_dir("e2e");

        //384 well whitelist; wells 1 and 2 are pooled into one subsample
        let whitelist: Vec<String> = (0..384).map(test_barcode).collect();
        let assignment = trivial_assignment();

        //Read one carries the exact barcode of well 1
        let bc_exact = whitelist[0].clone();
        //Read two carries the barcode of well 2 with a single substitution
        let mut bc_one_off = whitelist[1].clone().into_bytes();
        bc_one_off[0] = b'C';
        let bc_one_off = String::from_utf8(bc_one_off).unwrap();
        //Read three is at least two substitutions from every whitelist entry
        let bc_none = "NNNNNNNN";

        let umi = "ACGTACGTACGT";
        let rec1_r1 = fastq_record("read1 1:N:0", &format!("{}{}", bc_exact, umi));
        let rec1_r2 = fastq_record("read1 2:N:0", "TTTTGGGGCCCCAAAA");
        let rec2_r1 = fastq_record("read2 1:N:0", &format!("{}{}", bc_one_off, umi));
        let rec2_r2 = fastq_record("read2 2:N:0", "GGGGCCCCAAAATTTT");
        let rec3_r1 = fastq_record("read3 1:N:0", &format!("{}{}", bc_none, umi));
        let rec3_r2 = fastq_record("read3 2:N:0", "CCCCAAAATTTTGGGG");

        //Two file pairs, concatenated as one logical stream in list order
        let path_a_r1 = dir.join("a_R1.fastq");
        let path_a_r2 = dir.join("a_R2.fastq");
        let path_b_r1 = dir.join("b_R1.fastq");
        let path_b_r2 = dir.join("b_R2.fastq");
        fs::write(&path_a_r1, format!("{}{}", rec1_r1, rec3_r1)).unwrap();
        fs::write(&path_a_r2, format!("{}{}", rec1_r2, rec3_r2)).unwrap();
        fs::write(&path_b_r1, &rec2_r1).unwrap();
        fs::write(&path_b_r2, &rec2_r2).unwrap();

        let params = SplitFastq {
            sample: "sampleX".to_string(),
            path_r1: vec![path_a_r1, path_b_r1],
            path_r2: vec![path_a_r2, path_b_r2],
            path_out: dir.clone(),
            barcode_range: 0..8,
            split_to_well: true,
            gzip_output: false,
            max_mismatch: 1,
        };
        SplitFastq::run(&params, &whitelist, &assignment).unwrap();

        //Both matching pairs land in the subsample files, byte-identical,
        //in stream order; the unmatched pair appears nowhere
        let out_r1 = fs::read_to_string(dir.join("sampleX/sampleA/sampleA_R1.fastq")).unwrap();
        let out_r2 = fs::read_to_string(dir.join("sampleX/sampleA/sampleA_R2.fastq")).unwrap();
        assert_eq!(out_r1, format!("{}{}", rec1_r1, rec2_r1));
        assert_eq!(out_r2, format!("{}{}", rec1_r2, rec2_r2));
        assert!(!out_r1.contains("read3"));

        //Well splitting routes each pair by its corrected barcode
        let well1_r1 =
            fs::read_to_string(dir.join("sampleX/sampleA/well/well1_R1.fastq")).unwrap();
        let well2_r1 =
            fs::read_to_string(dir.join("sampleX/sampleA/well/well2_R1.fastq")).unwrap();
        let well2_r2 =
            fs::read_to_string(dir.join("sampleX/sampleA/well/well2_R2.fastq")).unwrap();
        assert_eq!(well1_r1, rec1_r1);
        assert_eq!(well2_r1, rec2_r1);
        assert_eq!(well2_r2, rec2_r2);

        //Metadata artifacts exist and parse
        let manifest: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.join("sampleX.fastq_inf.json")).unwrap(),
        )
        .unwrap();
        let out_r1_path = manifest["sampleA"]["sample"]["out_R1"].as_str().unwrap();
        assert!(out_r1_path.ends_with("sampleA_R1.fastq"));
        assert!(manifest["sampleA"]["well"]["well2"]["out_R2"]
            .as_str()
            .unwrap()
            .ends_with("well2_R2.fastq"));

        let index: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("sampleX.well_bc.json")).unwrap())
                .unwrap();
        assert_eq!(index["sampleA"]["map"][&whitelist[0]], "well1");
        assert_eq!(
            index["sampleA"]["sample"][&bc_one_off],
            serde_json::Value::String(whitelist[1].clone())
        );
        assert_eq!(
            index["sampleA"]["well"]["well2"][&whitelist[1]],
            serde_json::Value::String(whitelist[1].clone())
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_split_gzip_round_trip() {
        let dir = fresh_dir("gz");

        let whitelist: Vec<String> = (0..4).map(test_barcode).collect();
        let assignment = trivial_assignment();

        let umi = "ACGTACGTACGT";
        let rec1_r1 = fastq_record("read1 1:N:0", &format!("{}{}", whitelist[0], umi));
        let rec1_r2 = fastq_record("read1 2:N:0", "TTTTGGGGCCCCAAAA");
        let rec2_r1 = fastq_record("read2 1:N:0", &format!("{}{}", whitelist[1], umi));
        let rec2_r2 = fastq_record("read2 2:N:0", "GGGGCCCCAAAATTTT");

        //Compressed inputs, detected by content
        let path_r1 = dir.join("a_R1.fastq.gz");
        let path_r2 = dir.join("a_R2.fastq.gz");
        write_gz(&path_r1, &format!("{}{}", rec1_r1, rec2_r1));
        write_gz(&path_r2, &format!("{}{}", rec1_r2, rec2_r2));

        let params = SplitFastq {
            sample: "sampleX".to_string(),
            path_r1: vec![path_r1],
            path_r2: vec![path_r2],
            path_out: dir.clone(),
            barcode_range: 0..8,
            split_to_well: true,
            gzip_output: true,
            max_mismatch: 1,
        };
        SplitFastq::run(&params, &whitelist, &assignment).unwrap();

        //Compressed outputs decode to the exact input records
        let out_r1 = read_gz(&dir.join("sampleX/sampleA/sampleA_R1.fastq.gz"));
        let out_r2 = read_gz(&dir.join("sampleX/sampleA/sampleA_R2.fastq.gz"));
        assert_eq!(out_r1, format!("{}{}", rec1_r1, rec2_r1));
        assert_eq!(out_r2, format!("{}{}", rec1_r2, rec2_r2));

        let well1_r1 = read_gz(&dir.join("sampleX/sampleA/well/well1_R1.fastq.gz"));
        let well2_r2 = read_gz(&dir.join("sampleX/sampleA/well/well2_R2.fastq.gz"));
        assert_eq!(well1_r1, rec1_r1);
        assert_eq!(well2_r2, rec2_r2);

        //The manifest names the compressed paths
        let manifest: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.join("sampleX.fastq_inf.json")).unwrap(),
        )
        .unwrap();
        assert!(manifest["sampleA"]["sample"]["out_R1"]
            .as_str()
            .unwrap()
            .ends_with("sampleA_R1.fastq.gz"));

        let _ = fs::remove_dir_all(&dir);
    }
}

