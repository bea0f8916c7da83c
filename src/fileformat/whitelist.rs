use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use anyhow::{bail, Context};
use log::debug;

///////////////////////////////
/// Read a barcode whitelist, one canonical barcode per line.
/// Line 1 is well number 1. Plain text or gzip, detected by content
pub fn read_whitelist(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let opened_handle = File::open(path)
        .with_context(|| format!("Could not open whitelist file {}", path.display()))?;

    let (reader, compression) = niffler::get_reader(Box::new(opened_handle))
        .with_context(|| format!("Could not open whitelist file {}", path.display()))?;

    debug!(
        "Opened whitelist {} with compression {:?}",
        path.display(),
        &compression
    );

    read_whitelist_from(reader)
}

/// See [read_whitelist]
pub fn read_whitelist_from(src: impl Read) -> anyhow::Result<Vec<String>> {
    let mut barcodes = Vec::new();
    for line in BufReader::new(src).lines() {
        let line = line?;
        barcodes.push(line.trim().to_string());
    }
    if barcodes.is_empty() {
        bail!("Whitelist is empty");
    }
    Ok(barcodes)
}
