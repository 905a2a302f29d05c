//! Per-sample ancestry proportions ("Q values").
//!
//! Tables come from two places: the report printed by `structure`
//! ([`AncestryTable::parse`]) and the tab-separated form this crate persists
//! ([`AncestryTable::open`] / [`AncestryTable::write`]).

use std::{
    collections::BTreeSet,
    io::{self, BufRead, Write},
    ops::Range,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line prefix introducing the ancestry section of a `structure` report.
pub const ANCESTRY_SECTION_MARKER: &str = "Inferred ancestry";

#[derive(Debug, Error)]
pub enum QTableError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("row {sample}: expected {expected} ancestry values, found {found}")]
    DimensionMismatch {
        sample: String,
        expected: usize,
        found: usize,
    },
    #[error("no 'Inferred ancestry' section in report")]
    MissingSection,
    #[error("line {line}: missing sample name")]
    MissingName { line: u64 },
    #[error("line {line}: invalid ancestry value '{value}'")]
    InvalidValue { line: u64, value: String },
    #[error("ancestry component {index} out of range ({available} components)")]
    ComponentOutOfRange { index: usize, available: usize },
    #[error("{labels} summary labels but {ranges} ranges")]
    SummaryMismatch { labels: usize, ranges: usize },
    #[error("group {label} covers no rows")]
    EmptyRange { label: String },
}

/// One chart series: a single ancestry component across all samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub x: Vec<String>,
    pub y: Vec<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AncestryTable {
    samples: Vec<String>,
    rows: Vec<Vec<f64>>,
    width: Option<usize>,
}

impl AncestryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row. The first row fixes the number of components.
    pub fn add(&mut self, name: impl Into<String>, ancestry: Vec<f64>) -> Result<(), QTableError> {
        let name = name.into();
        match self.width {
            None => self.width = Some(ancestry.len()),
            Some(expected) if expected != ancestry.len() => {
                return Err(QTableError::DimensionMismatch {
                    sample: name,
                    expected,
                    found: ancestry.len(),
                });
            }
            Some(_) => {}
        }
        self.samples.push(name);
        self.rows.push(ancestry);
        Ok(())
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_ancestries(&self) -> usize {
        self.width.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Values of one ancestry component across all samples.
    pub fn get_ancestry(&self, index: usize) -> Result<Vec<f64>, QTableError> {
        if index >= self.n_ancestries() {
            return Err(QTableError::ComponentOutOfRange {
                index,
                available: self.n_ancestries(),
            });
        }
        Ok(self.rows.iter().map(|row| row[index]).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.samples
            .iter()
            .map(String::as_str)
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Reads the ancestry section of a `structure` report.
    ///
    /// Everything before the section marker is skipped, as is the column
    /// header following it. Each row then carries the sample name as its
    /// second token and the ancestry values from the fifth token on. The
    /// section ends at the first blank line or at end of input.
    pub fn parse<R>(reader: R) -> Result<Self, QTableError>
    where
        R: BufRead,
    {
        let mut table = Self::new();
        let mut lines = reader.lines();
        let mut line_no = 0u64;

        loop {
            let Some(line) = lines.next().transpose()? else {
                return Err(QTableError::MissingSection);
            };
            line_no += 1;
            if line.starts_with(ANCESTRY_SECTION_MARKER) {
                break;
            }
        }

        // column header
        if lines.next().transpose()?.is_none() {
            return Ok(table);
        }
        line_no += 1;

        for line in lines {
            let line = line?;
            line_no += 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                break;
            }
            let name = fields
                .get(1)
                .ok_or(QTableError::MissingName { line: line_no })?;
            let ancestry = fields
                .iter()
                .skip(4)
                .map(|value| parse_value(value, line_no))
                .collect::<Result<Vec<_>, _>>()?;
            table.add(*name, ancestry)?;
        }

        Ok(table)
    }

    /// Reads the persisted `name<TAB>value...` form written by [`write`](Self::write).
    pub fn open<R>(reader: R) -> Result<Self, QTableError>
    where
        R: BufRead,
    {
        let mut table = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index as u64 + 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let name = fields.next().unwrap_or_default();
            let ancestry = fields
                .map(|value| parse_value(value, line_no))
                .collect::<Result<Vec<_>, _>>()?;
            table.add(name, ancestry)?;
        }
        Ok(table)
    }

    /// Writes one `name<TAB>value...` line per sample, values to three decimals.
    pub fn write<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        for (name, ancestry) in self.iter() {
            write!(writer, "{name}")?;
            for value in ancestry {
                write!(writer, "\t{value:.3}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    }

    /// Collapses each labelled range of rows into one mean row.
    pub fn summarise<S>(&mut self, labels: &[S], ranges: &[Range<usize>]) -> Result<(), QTableError>
    where
        S: AsRef<str>,
    {
        self.summarise_with(labels, ranges, mean)
    }

    /// Collapses each labelled range of rows into one synthetic row whose
    /// components are `aggregate`d over the range.
    ///
    /// Ranges index the rows present when the call starts. Synthetic rows are
    /// appended in label order; afterwards every original row inside any
    /// range is removed, so the table ends up as the untouched rows in their
    /// original order followed by the synthetic rows. A row covered by more
    /// than one range is removed once.
    pub fn summarise_with<S, F>(
        &mut self,
        labels: &[S],
        ranges: &[Range<usize>],
        aggregate: F,
    ) -> Result<(), QTableError>
    where
        S: AsRef<str>,
        F: Fn(&[f64]) -> f64,
    {
        if labels.len() != ranges.len() {
            return Err(QTableError::SummaryMismatch {
                labels: labels.len(),
                ranges: ranges.len(),
            });
        }

        let original = self.n_samples();
        let width = self.n_ancestries();
        let mut excluded = BTreeSet::new();
        let mut summaries = Vec::with_capacity(labels.len());

        for (label, range) in labels.iter().zip(ranges) {
            let end = range.end.min(original);
            let start = range.start.min(end);
            if start == end {
                return Err(QTableError::EmptyRange {
                    label: label.as_ref().to_string(),
                });
            }
            excluded.extend(start..end);

            let block = &self.rows[start..end];
            let ancestry = (0..width)
                .map(|component| {
                    let column: Vec<f64> = block.iter().map(|row| row[component]).collect();
                    aggregate(&column)
                })
                .collect();
            summaries.push((label.as_ref().to_string(), ancestry));
        }

        for (label, ancestry) in summaries {
            self.add(label, ancestry)?;
        }

        let mut index = 0;
        self.samples.retain(|_| {
            let keep = !excluded.contains(&index);
            index += 1;
            keep
        });
        let mut index = 0;
        self.rows.retain(|_| {
            let keep = !excluded.contains(&index);
            index += 1;
            keep
        });

        Ok(())
    }

    /// Rows after the first `n`, i.e. the user samples of an unsummarised
    /// table whose leading rows are reference samples.
    pub fn without_reference(&self, n: usize) -> Self {
        let mut table = Self::new();
        table.width = self.width;
        for (name, ancestry) in self.iter().skip(n) {
            table.samples.push(name.to_string());
            table.rows.push(ancestry.to_vec());
        }
        table
    }

    /// One bar series per ancestry component, for charting.
    pub fn to_barplot(&self) -> Vec<BarSeries> {
        (0..self.n_ancestries())
            .map(|component| BarSeries {
                x: self.samples.clone(),
                y: self.rows.iter().map(|row| row[component]).collect(),
                kind: String::from("bar"),
                name: format!("Pop #{component:03}"),
            })
            .collect()
    }
}

fn parse_value(raw: &str, line: u64) -> Result<f64, QTableError> {
    raw.trim().parse::<f64>().map_err(|_| QTableError::InvalidValue {
        line,
        value: raw.to_string(),
    })
}

/// Arithmetic mean; the caller guarantees a non-empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const REPORT: &str = "\
----------------------------------------------------
STRUCTURE by Pritchard, Stephens and Donnelly (2000)
----------------------------------------------------
Run parameters:
   4 individuals

Inferred ancestry of individuals:
        Label (%Miss) :  Inferred clusters
  1        R1    (0)   :  0.900 0.050 0.050
  2        R2    (0)   :  0.850 0.100 0.050
  3         X   (20)   :  0.333 0.333 0.334
  4         Y   (20)   :  0.100 0.200 0.700

Estimated Allele Frequencies in each cluster
";

    fn uniform(names: &[&str]) -> AncestryTable {
        let mut table = AncestryTable::new();
        for name in names {
            table.add(*name, vec![1.0, 1.0, 1.0]).unwrap();
        }
        table
    }

    #[test]
    fn empty_table() {
        let table = AncestryTable::new();
        assert_eq!(table.n_samples(), 0);
        assert_eq!(table.n_ancestries(), 0);
        assert!(table.to_barplot().is_empty());
    }

    #[test]
    fn component_out_of_range_is_an_error() {
        let table = AncestryTable::new();
        assert!(matches!(
            table.get_ancestry(1),
            Err(QTableError::ComponentOutOfRange { index: 1, available: 0 })
        ));
    }

    #[test]
    fn add_fixes_width() {
        let mut table = AncestryTable::new();
        table.add("X", vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(table.n_ancestries(), 3);
        assert_eq!(table.n_samples(), 1);

        let err = table.add("Y", vec![0.5, 0.5]).unwrap_err();
        assert!(matches!(
            err,
            QTableError::DimensionMismatch { expected: 3, found: 2, .. }
        ));
        assert_eq!(table.n_samples(), 1);
    }

    #[test]
    fn iterates_rows() {
        let mut table = AncestryTable::new();
        table.add("X", vec![0.0, 1.0, 2.0]).unwrap();
        let rows: Vec<_> = table.iter().collect();
        assert_eq!(rows, vec![("X", &[0.0, 1.0, 2.0][..])]);
    }

    #[test]
    fn writes_three_decimals() {
        let mut table = uniform(&["A", "B"]);
        table.add("C", vec![0.1234, 0.5, 0.3766]).unwrap();
        let mut out = Vec::new();
        table.write(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "A\t1.000\t1.000\t1.000\nB\t1.000\t1.000\t1.000\nC\t0.123\t0.500\t0.377\n"
        );
    }

    #[test]
    fn open_reads_written_table() {
        let mut table = AncestryTable::new();
        table.add("X", vec![0.1234, 0.8766]).unwrap();
        table.add("Y", vec![0.5, 0.5]).unwrap();
        let mut out = Vec::new();
        table.write(&mut out).unwrap();

        let reopened = AncestryTable::open(Cursor::new(out)).unwrap();
        assert_eq!(reopened.samples(), ["X", "Y"]);
        assert_eq!(reopened.get_ancestry(0).unwrap(), vec![0.123, 0.5]);
        assert_eq!(reopened.get_ancestry(1).unwrap(), vec![0.877, 0.5]);
    }

    #[test]
    fn open_rejects_non_numeric_values() {
        let err = AncestryTable::open(Cursor::new("X\t0.1\tabc\n")).unwrap_err();
        assert!(matches!(err, QTableError::InvalidValue { line: 1, .. }));
    }

    #[test]
    fn parses_structure_report() {
        let table = AncestryTable::parse(Cursor::new(REPORT)).unwrap();
        assert_eq!(table.samples(), ["R1", "R2", "X", "Y"]);
        assert_eq!(table.n_ancestries(), 3);
        assert_eq!(table.get_ancestry(2).unwrap(), vec![0.05, 0.05, 0.334, 0.7]);
    }

    #[test]
    fn report_without_section_is_an_error() {
        let err = AncestryTable::parse(Cursor::new("nothing here\n")).unwrap_err();
        assert!(matches!(err, QTableError::MissingSection));
    }

    #[test]
    fn report_section_may_run_to_end_of_input() {
        let text = "Inferred ancestry of individuals:\nheader\n1 X (0) : 0.5 0.5\n";
        let table = AncestryTable::parse(Cursor::new(text)).unwrap();
        assert_eq!(table.samples(), ["X"]);
    }

    #[test]
    fn summarise_collapses_ranges() {
        let mut table = uniform(&["A", "B", "C", "D", "E", "F"]);
        table.summarise(&["GA", "GB"], &[1..3, 4..6]).unwrap();

        assert_eq!(table.samples(), ["A", "D", "GA", "GB"]);
        for component in 0..3 {
            assert_eq!(table.get_ancestry(component).unwrap(), vec![1.0; 4]);
        }
    }

    #[test]
    fn summarise_takes_group_means() {
        let mut table = AncestryTable::new();
        table.add("R1", vec![0.8, 0.2]).unwrap();
        table.add("R2", vec![0.6, 0.4]).unwrap();
        table.add("R3", vec![0.1, 0.9]).unwrap();
        table.add("X", vec![0.5, 0.5]).unwrap();
        table.summarise(&["North", "South"], &[0..2, 2..3]).unwrap();

        assert_eq!(table.samples(), ["X", "North", "South"]);
        let rows: Vec<_> = table.iter().map(|(_, row)| row.to_vec()).collect();
        assert!((rows[1][0] - 0.7).abs() < 1e-12);
        assert!((rows[1][1] - 0.3).abs() < 1e-12);
        assert_eq!(rows[2], vec![0.1, 0.9]);
    }

    #[test]
    fn overlapping_ranges_remove_rows_once() {
        let mut table = uniform(&["A", "B", "C", "D"]);
        table.summarise(&["G1", "G2"], &[0..2, 1..3]).unwrap();
        assert_eq!(table.samples(), ["D", "G1", "G2"]);
    }

    #[test]
    fn summarise_with_custom_aggregate() {
        let mut table = AncestryTable::new();
        table.add("A", vec![1.0]).unwrap();
        table.add("B", vec![3.0]).unwrap();
        table
            .summarise_with(&["max"], &[0..2], |values| {
                values.iter().copied().fold(f64::MIN, f64::max)
            })
            .unwrap();
        assert_eq!(table.get_ancestry(0).unwrap(), vec![3.0]);
    }

    #[test]
    fn summarise_rejects_empty_ranges() {
        let mut table = uniform(&["A"]);
        let err = table.summarise(&["G"], &[3..5]).unwrap_err();
        assert!(matches!(err, QTableError::EmptyRange { .. }));
        assert_eq!(table.samples(), ["A"]);
    }

    #[test]
    fn summarise_requires_one_range_per_label() {
        let mut table = uniform(&["A", "B"]);
        let err = table.summarise(&["G1", "G2"], &[0..1]).unwrap_err();
        assert!(matches!(err, QTableError::SummaryMismatch { labels: 2, ranges: 1 }));
    }

    #[test]
    fn without_reference_drops_leading_rows() {
        let table = uniform(&["R1", "R2", "X"]).without_reference(2);
        assert_eq!(table.samples(), ["X"]);
        assert_eq!(table.n_ancestries(), 3);
    }

    #[test]
    fn barplot_transposes_components() {
        let mut table = AncestryTable::new();
        table.add("A", vec![1.0, 1.0, 1.0]).unwrap();
        table.add("B", vec![2.0, 2.0, 2.0]).unwrap();
        table.add("C", vec![3.0, 3.0, 3.0]).unwrap();

        let barplot = table.to_barplot();
        assert_eq!(barplot.len(), 3);
        for (i, series) in barplot.iter().enumerate() {
            assert_eq!(series.x, vec!["A", "B", "C"]);
            assert_eq!(series.y, vec![1.0, 2.0, 3.0]);
            assert_eq!(series.kind, "bar");
            assert_eq!(series.name, format!("Pop #{i:03}"));
        }

        let json = serde_json::to_value(&barplot[0]).unwrap();
        assert_eq!(json["type"], "bar");
    }
}
