//! Text codecs for genotype tables.
//!
//! Two grammars are understood:
//!
//! * delimited tables (comma or tab) with a header row of locus names and one
//!   two-character genotype code per cell;
//! * the native two-line layout consumed by `structure`, where every sample
//!   contributes one row per allele.
//!
//! Whatever the source layout, [`write`] always emits the native layout.

use std::{
    fmt,
    io::{self, BufRead, Write},
    path::Path,
    str::FromStr,
};

use thiserror::Error;

use crate::genotype::{AllelePair, GenotypeError, GenotypeModel, MISSING_ALLELE};

/// Locus identifiers known to be mistyped in circulating marker panels.
const LOCUS_CORRECTIONS: &[(&str, &str)] = &[
    ("MID675", "MID675"),
    ("MDI1391", "MID1391"),
    ("MDI1785", "MID1785"),
    ("MID1636", "MID1632"),
];

/// Supported genotype text layouts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum)]
pub enum GenotypeFormat {
    /// Comma-delimited table (`.csv`)
    Comma,
    /// Tab-delimited table (`.tsv`, `.txt`)
    Tab,
    /// Native two-line structure layout (`.str`)
    Native,
}

impl GenotypeFormat {
    /// Format implied by an uploaded file's extension.
    ///
    /// Only `csv` and `str` are recognised; everything else is read as a
    /// tab-delimited table.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Self::Comma,
            Some("str") => Self::Native,
            _ => Self::Tab,
        }
    }

    pub fn delimiter(self) -> Option<char> {
        match self {
            Self::Comma => Some(','),
            Self::Tab => Some('\t'),
            Self::Native => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comma => "csv",
            Self::Tab => "tsv",
            Self::Native => "str",
        }
    }
}

impl fmt::Display for GenotypeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid genotype format '{0}'")]
pub struct InvalidFormat(pub String);

impl FromStr for GenotypeFormat {
    type Err = InvalidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Comma),
            "tsv" | "txt" => Ok(Self::Tab),
            "str" => Ok(Self::Native),
            other => Err(InvalidFormat(other.to_string())),
        }
    }
}

/// Errors raised while reading a genotype table.
#[derive(Debug, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: u64,
    #[source]
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error(transparent)]
    InvalidFormat(#[from] InvalidFormat),
    #[error("missing locus header")]
    MissingHeader,
    #[error("invalid genotype '{0}': expected two allele characters")]
    InvalidGenotype(String),
    #[error("allele rows differ in length ({first} and {second})")]
    UnpairedAlleles { first: usize, second: usize },
    #[error(transparent)]
    Genotype(#[from] GenotypeError),
}

/// Line cursor that remembers where it is for error reporting.
struct Lines<R> {
    inner: R,
    line: u64,
    buf: String,
}

impl<R> Lines<R>
where
    R: BufRead,
{
    fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            buf: String::new(),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, ParseError> {
        self.buf.clear();
        match self.inner.read_line(&mut self.buf) {
            Ok(0) => Ok(None),
            Ok(_) => {
                self.line += 1;
                Ok(Some(
                    self.buf.trim_end_matches(&['\n', '\r'][..]).to_string(),
                ))
            }
            Err(e) => Err(self.error(ParseErrorKind::Io(e))),
        }
    }

    /// Next line holding anything other than whitespace.
    fn next_content_line(&mut self) -> Result<Option<String>, ParseError> {
        while let Some(line) = self.next_line()? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            kind,
        }
    }
}

/// Parses a genotype table in the given layout.
pub fn parse<R>(reader: R, format: GenotypeFormat) -> Result<GenotypeModel, ParseError>
where
    R: BufRead,
{
    let mut model = GenotypeModel::new();
    parse_into(reader, format, &mut model)?;
    Ok(model)
}

/// Parses a genotype table whose layout is given as a format tag
/// (`csv`, `tsv`, `txt`, `str`).
pub fn parse_tagged<R>(reader: R, tag: &str) -> Result<GenotypeModel, ParseError>
where
    R: BufRead,
{
    let format = tag.parse::<GenotypeFormat>().map_err(|e| ParseError {
        line: 0,
        kind: e.into(),
    })?;
    parse(reader, format)
}

/// Parses a genotype table and merges its samples into `model`.
pub fn parse_into<R>(
    reader: R,
    format: GenotypeFormat,
    model: &mut GenotypeModel,
) -> Result<(), ParseError>
where
    R: BufRead,
{
    match format.delimiter() {
        Some(delimiter) => parse_delimited(reader, delimiter, model),
        None => parse_native(reader, model),
    }
}

fn parse_delimited<R>(reader: R, delimiter: char, model: &mut GenotypeModel) -> Result<(), ParseError>
where
    R: BufRead,
{
    let mut lines = Lines::new(reader);
    let header = lines
        .next_line()?
        .ok_or_else(|| lines.error(ParseErrorKind::MissingHeader))?;
    let loci: Vec<String> = header
        .split(delimiter)
        .skip(1)
        .map(|locus| sanitize_locus(locus.trim()))
        .collect();
    model.add_loci(loci.iter().cloned());

    while let Some(line) = lines.next_content_line()? {
        let mut fields = line.split(delimiter);
        let name = sanitize_sample(fields.next().unwrap_or_default());
        let genotypes = fields
            .map(parse_cell)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|kind| lines.error(kind))?;
        model
            .add(&name, &loci, genotypes)
            .map_err(|e| lines.error(e.into()))?;
    }

    Ok(())
}

fn parse_native<R>(reader: R, model: &mut GenotypeModel) -> Result<(), ParseError>
where
    R: BufRead,
{
    let mut lines = Lines::new(reader);
    let header = lines
        .next_line()?
        .ok_or_else(|| lines.error(ParseErrorKind::MissingHeader))?;
    let loci: Vec<String> = header.split_whitespace().map(sanitize_locus).collect();
    model.add_loci(loci.iter().cloned());

    loop {
        let Some(first) = lines.next_content_line()? else {
            break;
        };
        // A trailing row without its partner is dropped.
        let Some(second) = lines.next_content_line()? else {
            tracing::debug!(line = lines.line, "discarding unpaired allele row");
            break;
        };

        let mut first_fields = first.split_whitespace();
        let name = sanitize_sample(first_fields.next().unwrap_or_default());
        let first_alleles: Vec<&str> = first_fields.collect();
        let second_alleles: Vec<&str> = second.split_whitespace().skip(1).collect();
        if first_alleles.len() != second_alleles.len() {
            return Err(lines.error(ParseErrorKind::UnpairedAlleles {
                first: first_alleles.len(),
                second: second_alleles.len(),
            }));
        }

        let genotypes = first_alleles
            .into_iter()
            .zip(second_alleles)
            .map(|(a, b)| AllelePair::new(a, b))
            .collect();
        model
            .add(&name, &loci, genotypes)
            .map_err(|e| lines.error(e.into()))?;
    }

    Ok(())
}

fn parse_cell(raw: &str) -> Result<AllelePair, ParseErrorKind> {
    let cell = raw.trim();
    if cell.is_empty() || cell == MISSING_ALLELE {
        return Ok(AllelePair::missing());
    }

    let mut chars = cell.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(a), Some(b), None) => Ok(AllelePair::new(a.to_string(), b.to_string())),
        _ => Err(ParseErrorKind::InvalidGenotype(cell.to_string())),
    }
}

/// Applies the known-typo table to a locus name.
pub fn sanitize_locus(raw: &str) -> String {
    LOCUS_CORRECTIONS
        .iter()
        .find(|(typo, _)| *typo == raw)
        .map(|(_, fixed)| (*fixed).to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Sample identifiers end up as whitespace-separated tokens downstream.
pub fn sanitize_sample(raw: &str) -> String {
    raw.trim().replace(' ', "_")
}

/// Writes `model` in the native two-line layout.
pub fn write<W>(model: &GenotypeModel, mut writer: W) -> io::Result<()>
where
    W: Write,
{
    let loci: Vec<&str> = model.loci().collect();
    writeln!(writer, " {}", loci.join(" "))?;

    let missing = AllelePair::missing();
    for (sample, genotypes) in model.iter() {
        let mut first = Vec::with_capacity(loci.len() + 1);
        let mut second = Vec::with_capacity(loci.len() + 1);
        first.push(sample);
        second.push(sample);
        for locus in &loci {
            let pair = genotypes.get(*locus).unwrap_or(&missing);
            first.push(pair.first());
            second.push(pair.second());
        }
        writeln!(writer, "{}", first.join(" "))?;
        writeln!(writer, "{}", second.join(" "))?;
    }

    writer.flush()
}
