use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read, Write};

use serde::Serialize;

/// Raw markers read as a missing value, on top of blank cells.
const MISSING_MARKERS: &[&str] = &["NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "NaT"];

/// One loaded dataset: a header row plus string cells. Column sets vary per
/// source, so every consumer probes columns before use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Parses UTF-8 CSV with a mandatory header row. Short rows are padded
    /// with missing cells; rows longer than the header are an error.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let width = headers.len();
        let mut rows = Vec::new();
        for (n, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > width {
                return Err(csv::Error::from(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "record {} has {} fields, header has {width}",
                        n + 1,
                        record.len()
                    ),
                )));
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, csv::Error> {
        Self::from_reader(bytes)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Non-missing values of a column, in row order.
    pub fn values<'a>(&'a self, column: &str) -> impl Iterator<Item = &'a str> + 'a {
        let idx = self.column_index(column);
        self.rows
            .iter()
            .filter_map(move |row| idx.and_then(|i| cell(&row[i])))
    }

    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        self.values(column)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn distinct_count(&self, column: &str) -> usize {
        self.values(column).collect::<BTreeSet<_>>().len()
    }

    /// Renames `from` to `to`. Returns false when `from` is absent or `to`
    /// already exists.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if self.has_column(to) {
            return false;
        }
        match self.column_index(from) {
            Some(idx) => {
                self.headers[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Rewrites every non-missing cell of `column`; `f` returning `None` marks
    /// the cell missing. Returns how many cells changed.
    pub fn map_column(&mut self, column: &str, mut f: impl FnMut(&str) -> Option<String>) -> usize {
        let Some(idx) = self.column_index(column) else {
            return 0;
        };
        let mut changed = 0;
        for row in self.rows.iter_mut() {
            let Some(current) = cell(&row[idx]) else {
                continue;
            };
            let next = f(current).unwrap_or_default();
            if next != row[idx] {
                row[idx] = next;
                changed += 1;
            }
        }
        changed
    }

    pub fn filter(&self, mut keep: impl FnMut(&[String]) -> bool) -> Table {
        Table {
            headers: self.headers.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    /// Projection onto the listed columns that exist, in the listed order.
    pub fn select(&self, columns: &[&str]) -> Table {
        let picks: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        Table {
            headers: picks.iter().map(|&i| self.headers[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| picks.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, csv::Error> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(buffer)
    }
}

/// `None` for blank cells and the usual missing-value markers.
pub fn cell(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || MISSING_MARKERS.contains(&trimmed) {
        None
    } else {
        Some(raw)
    }
}

/// Best-effort numeric coercion; anything that is not a finite number is
/// `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A derived figure that is absent when the column backing it was not
/// resolved for the current dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metric<T> {
    Available(T),
    NotAvailable,
}

impl<T> Metric<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Metric::Available(v),
            None => Metric::NotAvailable,
        }
    }

    pub fn available(self) -> Option<T> {
        match self {
            Metric::Available(v) => Some(v),
            Metric::NotAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Available(_))
    }
}

impl<T: fmt::Display> fmt::Display for Metric<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Available(v) => v.fmt(f),
            Metric::NotAvailable => f.write_str("N/D"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_bytes(
            b"id_cliente,product,premium_mxn\nC1,AUTO,100\nC1,VIDA,\nC2,AUTO,nan\n",
        )
        .unwrap()
    }

    #[test]
    fn parses_header_and_rows() {
        let table = sample();
        assert_eq!(table.headers(), &["id_cliente", "product", "premium_mxn"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn overlong_rows_are_rejected() {
        assert!(Table::from_bytes(b"a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn short_rows_are_padded_with_missing_cells() {
        let table =
            Table::from_bytes(b"id_cliente,product,end_date\nC1,GMM,2025-01-01\nC2,VIDA\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], vec!["C2", "VIDA", ""]);
        assert_eq!(table.values("end_date").count(), 1);
    }

    #[test]
    fn missing_markers_are_skipped() {
        let table = sample();
        assert_eq!(table.values("premium_mxn").collect::<Vec<_>>(), vec!["100"]);
        assert_eq!(table.distinct_count("product"), 2);
        assert_eq!(table.distinct_count("absent"), 0);
    }

    #[test]
    fn rename_refuses_to_clobber_existing_column() {
        let mut table = sample();
        assert!(!table.rename_column("producto", "product"));
        assert!(!table.rename_column("product", "id_cliente"));
        assert!(table.rename_column("product", "producto"));
        assert!(table.has_column("producto"));
    }

    #[test]
    fn map_column_counts_changes_and_clears_on_none() {
        let mut table = sample();
        let changed = table.map_column("product", |v| {
            if v == "VIDA" {
                None
            } else {
                Some(v.to_lowercase())
            }
        });
        assert_eq!(changed, 3);
        assert_eq!(table.values("product").collect::<Vec<_>>(), vec!["auto", "auto"]);
    }

    #[test]
    fn select_and_csv_output_keep_requested_order() {
        let table = sample().select(&["product", "missing", "id_cliente"]);
        let text = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();
        assert!(text.starts_with("product,id_cliente\nAUTO,C1\n"));
    }

    #[test]
    fn numbers_must_be_finite() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(round2(10.005_f64 + 0.001), 10.01);
    }

    #[test]
    fn metric_displays_not_available() {
        assert_eq!(Metric::<usize>::NotAvailable.to_string(), "N/D");
        assert_eq!(Metric::Available(3).to_string(), "3");
        assert_eq!(
            serde_json::to_string(&Metric::<usize>::NotAvailable).unwrap(),
            "null"
        );
    }
}
