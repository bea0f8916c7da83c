use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

use seq_io::fastq::Reader as FastqReader;
use seq_io::fastq::Record as FastqRecord;

///////////////////////////////
/// Open a FASTQ file, transparently decompressing gzip input
pub fn open_fastq(path: &PathBuf) -> anyhow::Result<FastqReader<Box<dyn std::io::Read>>> {
    let opened_handle = File::open(path)
        .with_context(|| format!("Could not open fastq file {}", path.display()))?;

    let (reader, compression) = niffler::get_reader(Box::new(opened_handle))
        .with_context(|| format!("Could not open fastq file {}", path.display()))?;

    debug!(
        "Opened file {} with compression {:?}",
        path.display(),
        &compression
    );
    Ok(FastqReader::new(reader))
}

///////////////////////////////
/// One FASTQ output stream, plain or gzip.
/// Kept as an enum so the gzip trailer is written in finish(); leaving it
/// to the encoder's Drop would discard a failed trailer write
enum FastqOutput {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FastqOutput {
    fn create(path: &Path, gzip: bool) -> anyhow::Result<FastqOutput> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create fastq output file {}", path.display()))?;
        let buffered = BufWriter::new(file);
        if gzip {
            Ok(FastqOutput::Gzip(GzEncoder::new(
                buffered,
                Compression::default(),
            )))
        } else {
            Ok(FastqOutput::Plain(buffered))
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        match self {
            FastqOutput::Plain(writer) => writer.flush(),
            FastqOutput::Gzip(writer) => {
                writer.try_finish()?;
                writer.get_mut().flush()
            }
        }
    }
}

impl Write for FastqOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqOutput::Plain(writer) => writer.write(buf),
            FastqOutput::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqOutput::Plain(writer) => writer.flush(),
            FastqOutput::Gzip(writer) => writer.flush(),
        }
    }
}

///////////////////////////////
/// Writer for one R1/R2 FASTQ output pair.
/// Records are copied byte for byte; no trimming, no barcode removal
pub struct PairedFastqWriter {
    writer_r1: FastqOutput,
    writer_r2: FastqOutput,
}

impl PairedFastqWriter {
    pub fn create(path_r1: &Path, path_r2: &Path, gzip: bool) -> anyhow::Result<PairedFastqWriter> {
        Ok(PairedFastqWriter {
            writer_r1: FastqOutput::create(path_r1, gzip)?,
            writer_r2: FastqOutput::create(path_r2, gzip)?,
        })
    }

    /// Append one read pair, unchanged
    pub fn write_pair<R1: FastqRecord, R2: FastqRecord>(
        &mut self,
        r1: &R1,
        r2: &R2,
    ) -> anyhow::Result<()> {
        write_fastq_read(&mut self.writer_r1, r1.head(), r1.seq(), r1.qual())?;
        write_fastq_read(&mut self.writer_r2, r2.head(), r2.seq(), r2.qual())?;
        Ok(())
    }

    //absolutely have to call this before dropping; flushes the buffers
    //and writes the gzip trailer
    pub fn finish(&mut self) -> anyhow::Result<()> {
        self.writer_r1.finish()?;
        self.writer_r2.finish()?;
        Ok(())
    }
}

////////// Write one FASTQ read
fn write_fastq_read<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
    qual: &[u8],
) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(head)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}
