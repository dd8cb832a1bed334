use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::tempdir;

/// Trimmed, non-empty fields of `line` separated by `delim`
pub fn split_fields<'a>(line: &'a str, delim: &str) -> Vec<&'a str> {
    line.split(delim)
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .collect()
}

pub struct ReadLinesOut<T: Send> {
    pub lines: Vec<Vec<T>>,
    pub header: Vec<Box<str>>,
}

fn is_data_line(line: &str) -> bool {
    let line = line.trim();
    !(line.is_empty() || line.starts_with('#') || line.starts_with('%'))
}

/// Parse the data lines of `input_file` (plain or `.gz`) into rows of
/// `T`. Blank lines and lines starting with `#` or `%` are not data.
/// `hdr_line` is the index of the header among the data lines, or a
/// negative number when there is none.
pub fn read_lines_of_types<T>(
    input_file: &str,
    delim: &str,
    hdr_line: i64,
) -> anyhow::Result<ReadLinesOut<T>>
where
    T: Send + std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let buf_reader = open_buf_reader(input_file)?;

    let mut lines_raw = vec![];
    for line in buf_reader.lines() {
        let line = line?;
        if is_data_line(&line) {
            lines_raw.push(line.into_boxed_str());
        }
    }

    let mut header = vec![];
    let n_skip = if hdr_line < 0 {
        0
    } else {
        let n_skip = hdr_line as usize;
        if lines_raw.len() < (n_skip + 1) {
            return Err(anyhow::anyhow!("not enough data in {}", input_file));
        }
        header.extend(
            split_fields(&lines_raw[n_skip], delim)
                .into_iter()
                .map(|x| x.to_owned().into_boxed_str()),
        );
        n_skip + 1
    };

    // parsing keeps the order of lines
    let lines = lines_raw[n_skip..]
        .par_iter()
        .enumerate()
        .map(|(i, s)| -> anyhow::Result<Vec<T>> {
            split_fields(s, delim)
                .into_iter()
                .map(|w| {
                    w.parse::<T>().map_err(|e| {
                        anyhow::anyhow!("{}: line {}: cannot parse `{}`: {}", input_file, i, w, e)
                    })
                })
                .collect()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ReadLinesOut { lines, header })
}

/// Write one line per item to `output_file` (`.gz` compresses,
/// `stdout`/`stderr` stream). A closed pipe ends the write quietly.
pub fn write_lines<T: std::fmt::Display>(lines: &[T], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        match writeln!(buf, "{}", line) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(anyhow::anyhow!("{}: {}", output_file, e)),
        }
    }
    buf.flush()?;
    Ok(())
}

/// Buffered reader, decompressing `.gz`
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match file_ext(input_file).as_deref() {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Buffered writer, compressing `.gz`
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    match output_file.to_ascii_lowercase().as_str() {
        "stdout" => return Ok(Box::new(BufWriter::new(std::io::stdout()))),
        "stderr" => return Ok(Box::new(BufWriter::new(std::io::stderr()))),
        _ => {}
    }

    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;
    match file_ext(output_file).as_deref() {
        Some("gz") => Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        )))),
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

pub fn file_ext(file: &str) -> Option<String> {
    Path::new(file)
        .extension()
        .and_then(|x| x.to_str())
        .map(|x| x.to_string())
}

/// Make sure the directory that will hold `file` (or an output prefix) exists
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    match Path::new(file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(std::fs::create_dir_all(dir)?),
        _ => Ok(()),
    }
}

/// Fresh file name ending in `suffix` inside a new temporary directory;
/// the file itself is not kept
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let dir = tempdir()?.keep();
    let named = tempfile::Builder::new().suffix(suffix).tempfile_in(&dir)?;
    Ok(named.path().to_owned())
}
