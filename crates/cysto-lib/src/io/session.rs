use crate::signal::{Interval, Sample, SampleSeries};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TIME_COLUMN: &str = "Elapsed Time";
pub const SCALE_COLUMN: &str = "Scale";
pub const VOLUME_COLUMN: &str = "Tot Infused Vol";
pub const PRESSURE_COLUMN: &str = "Bladder Pressure";

pub const REQUIRED_COLUMNS: [&str; 4] = [TIME_COLUMN, SCALE_COLUMN, VOLUME_COLUMN, PRESSURE_COLUMN];

/// Header must appear within this many leading lines.
pub const HEADER_SEARCH_LINES: usize = 50;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("input is empty")]
    Empty,

    #[error("could not locate header row with required columns: {}", REQUIRED_COLUMNS.join(", "))]
    MissingHeader,

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed row: {0}")]
    Csv(#[from] csv::Error),
}

/// The three channels of a cystometry recording, each sorted by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub pressure: SampleSeries,
    pub volume: SampleSeries,
    pub scale: SampleSeries,
}

impl Session {
    /// Restrict every channel to `[start, end]`.
    pub fn window(&self, start: f64, end: f64) -> Session {
        Session {
            pressure: self.pressure.window(start, end),
            volume: self.volume.window(start, end),
            scale: self.scale.window(start, end),
        }
    }

    /// Keep only samples inside the given intervals; no intervals keeps all.
    pub fn keep_intervals(&self, intervals: &[Interval]) -> Session {
        Session {
            pressure: self.pressure.keep_intervals(intervals),
            volume: self.volume.keep_intervals(intervals),
            scale: self.scale.keep_intervals(intervals),
        }
    }
}

/// Comma for `.csv` files, tab for everything else.
pub fn delimiter_for(path: &Path) -> u8 {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        b','
    } else {
        b'\t'
    }
}

pub fn read_session(path: &Path) -> Result<Session, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let session = parse_session(&text, delimiter_for(path))?;
    debug!(
        "loaded {}: {} pressure, {} volume, {} scale samples",
        path.display(),
        session.pressure.len(),
        session.volume.len(),
        session.scale.len()
    );
    Ok(session)
}

/// Parse an export that may carry free-form preamble lines above the header.
pub fn parse_session(text: &str, delimiter: u8) -> Result<Session, IngestError> {
    if text.trim().is_empty() {
        return Err(IngestError::Empty);
    }
    let header_line = find_header_line(text, delimiter)
        .ok_or(IngestError::MissingHeader)?;
    let body: String = text
        .lines()
        .skip(header_line)
        .flat_map(|line| [line, "\n"])
        .collect();

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());
    let headers = reader.headers()?.clone();
    let columns = locate_columns(&headers)?;

    let mut rows: Vec<[Option<f64>; 4]> = Vec::new();
    for result in reader.records() {
        let record = result?;
        let cells = columns.map(|idx| record.get(idx).and_then(coerce_number));
        if cells[0].is_some() {
            rows.push(cells);
        }
    }
    let time_of = |row: &[Option<f64>; 4]| row[0].unwrap_or(f64::NAN);
    rows.sort_by(|a, b| time_of(a).total_cmp(&time_of(b)));

    let channel = |col: usize| -> SampleSeries {
        rows.iter()
            .filter_map(|row| Some((row[0]?, row[col]?)))
            .map(|(time, value)| Sample { time, value })
            .collect()
    };
    Ok(Session {
        scale: channel(1),
        volume: channel(2),
        pressure: channel(3),
    })
}

/// Write a session in the export layout [`parse_session`] reads back. Rows
/// follow the union of the channel timestamps; a channel without a sample
/// at a given time leaves its cell empty.
pub fn write_session<W: std::io::Write>(
    writer: W,
    session: &Session,
    delimiter: u8,
) -> Result<(), IngestError> {
    let mut times: Vec<f64> = [&session.pressure, &session.volume, &session.scale]
        .iter()
        .flat_map(|series| series.times.iter().copied())
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup();

    let mut out = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);
    out.write_record(REQUIRED_COLUMNS)?;
    let cell = |series: &SampleSeries, t: f64| {
        series
            .times
            .binary_search_by(|x| x.total_cmp(&t))
            .map(|idx| series.values[idx].to_string())
            .unwrap_or_default()
    };
    for t in times {
        out.write_record([
            t.to_string(),
            cell(&session.scale, t),
            cell(&session.volume, t),
            cell(&session.pressure, t),
        ])?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

fn find_header_line(text: &str, delimiter: u8) -> Option<usize> {
    let delimiter = char::from(delimiter);
    let is_header = |line: &str| {
        let cells: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        REQUIRED_COLUMNS.iter().all(|required| cells.contains(required))
    };
    text.lines().take(HEADER_SEARCH_LINES).position(is_header)
}

/// Column indices in [`REQUIRED_COLUMNS`] order.
fn locate_columns(headers: &StringRecord) -> Result<[usize; 4], IngestError> {
    let mut found = [0usize; 4];
    let mut missing = Vec::new();
    for (slot, name) in found.iter_mut().zip(REQUIRED_COLUMNS) {
        match headers.iter().position(|h| h == name) {
            Some(idx) => *slot = idx,
            None => missing.push(name.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(found)
    } else {
        Err(IngestError::MissingColumns(missing))
    }
}

/// Unparseable or non-finite cells become missing values.
fn coerce_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const EXPORT: &str = "\
Patient: 0042
Protocol: filling cystometry

Elapsed Time,Scale,Tot Infused Vol,Bladder Pressure,Comment
2.0,0.0,0.4,6.5,
0.0,0.0,0.0,5.0,start
1.0,,0.2,5.5,
,0.0,0.3,9.9,no time
3.0,0.1,bad,7.0,
";

    #[test]
    fn skips_preamble_and_sorts_rows() {
        let session = parse_session(EXPORT, b',').unwrap();
        assert_eq!(session.pressure.times, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(session.pressure.values, vec![5.0, 5.5, 6.5, 7.0]);
        // each channel keeps only the rows where it has a value
        assert_eq!(session.scale.times, vec![0.0, 2.0, 3.0]);
        assert_eq!(session.volume.times, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn tab_separated_exports() {
        let text =
            "Elapsed Time\tScale\tTot Infused Vol\tBladder Pressure\n0\t0\t0\t4\n1\t0\t1\t6\n";
        let session = parse_session(text, b'\t').unwrap();
        assert_eq!(session.pressure.values, vec![4.0, 6.0]);
        assert_eq!(delimiter_for(Path::new("run.CSV")), b',');
        assert_eq!(delimiter_for(Path::new("run.txt")), b'\t');
        assert_eq!(delimiter_for(Path::new("run")), b'\t');
    }

    #[test]
    fn reports_missing_header_and_empty_input() {
        let blank = parse_session("  \n", b',');
        assert!(matches!(blank, Err(IngestError::Empty)));
        let partial = "Elapsed Time,Scale,Bladder Pressure\n1,2,3\n";
        let err = parse_session(partial, b',').unwrap_err();
        assert!(matches!(err, IngestError::MissingHeader));
        assert!(err.to_string().contains("Tot Infused Vol"));

        let mut late = "filler\n".repeat(HEADER_SEARCH_LINES);
        late.push_str(&REQUIRED_COLUMNS.join(","));
        late.push_str("\n1,2,3,4\n");
        let buried = parse_session(&late, b',');
        assert!(matches!(buried, Err(IngestError::MissingHeader)));
    }

    #[test]
    fn windows_apply_to_all_channels() {
        let session = parse_session(EXPORT, b',').unwrap();
        let windowed = session.window(1.0, 2.0);
        assert_eq!(windowed.pressure.times, vec![1.0, 2.0]);
        assert_eq!(windowed.scale.times, vec![2.0]);
        let intervals = [Interval::new(2.5, 3.5), Interval::new(0.0, 0.0)];
        let kept = session.keep_intervals(&intervals);
        assert_eq!(kept.pressure.times, vec![0.0, 3.0]);
    }

    #[test]
    fn reads_sample_export() {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let path = manifest_dir
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace")
            .join("test_data/cmg_sample.csv");
        let session = read_session(&path).unwrap();
        assert!(session.pressure.len() > 100);
        assert_eq!(session.pressure.len(), session.volume.len());
        assert!(session.pressure.times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn written_sessions_parse_back() {
        let session = parse_session(EXPORT, b',').unwrap();
        let mut buf = Vec::new();
        write_session(&mut buf, &session, b'\t').unwrap();
        let text = String::from_utf8(buf).unwrap();
        let header = REQUIRED_COLUMNS.join("\t");
        assert!(text.starts_with(&format!("{header}\n")));
        assert!(text.contains("1\t\t0.2\t5.5\n"));
        assert_eq!(parse_session(&text, b'\t').unwrap(), session);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let missing = Path::new("/nonexistent/cmg.csv");
        let err = read_session(missing).unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }
}
