//! 2D instrument maps as delimited text.
//!
//! ```text
//! # instrument = PL mapper
//! # channel = pl
//! # channel_unit = counts
//! x[um]|y[um],0.0,0.5,1.0
//! 0.0,12,15,11
//! 0.5,13,16,10
//! ```
//!
//! `# key = value` lines become root attributes. The first header cell names
//! the row and column axes; the other header cells are column-axis values.
//! Each body row starts with its row-axis value.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;

use super::FormatAdapter;
use crate::data::container::Container;
use crate::data::model::{AttrValue, Dataset, ProvenanceRecord};

pub struct GridAdapter;

const DEFAULT_CHANNEL: &str = "signal";

impl FormatAdapter for GridAdapter {
    fn name(&self) -> &str {
        "grid"
    }

    fn extensions(&self) -> &[&str] {
        &["csv", "grid"]
    }

    fn parse(&self, path: &Path) -> Result<Container> {
        let text = fs::read_to_string(path).context("reading grid file")?;
        let mut container = parse_grid(&text, &stem(path))?;
        let record = ProvenanceRecord::ingest(self.name(), path, &container);
        container.append_provenance(record);
        Ok(container)
    }
}

pub(crate) fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string())
}

/// `name[unit]` → (`name`, `Some(unit)`).
pub(crate) fn split_label(label: &str) -> (String, Option<String>) {
    let label = label.trim();
    match label.split_once('[') {
        Some((name, rest)) => {
            let unit = rest.trim_end_matches(']').trim();
            let unit = (!unit.is_empty()).then(|| unit.to_string());
            (name.trim().to_string(), unit)
        }
        None => (label.to_string(), None),
    }
}

fn parse_cell(cell: &str, what: &str) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>()
        .with_context(|| format!("{what}: '{cell}' is not a number"))
}

/// Build the (unrecorded) container for one grid file.
pub fn parse_grid(text: &str, name: &str) -> Result<Container> {
    let mut container = Container::new(name);
    for line in text.lines() {
        let Some(meta) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        if let Some((key, value)) = meta.split_once('=') {
            container
                .attrs_mut()
                .insert(key.trim().to_string(), AttrValue::guess(value.trim()));
        }
    }

    let delimiter = match text.lines().find(|l| !l.trim_start().starts_with('#')) {
        Some(header) if header.contains('\t') => b'\t',
        _ => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let header = records.next().context("grid file has no header row")??;
    let corner = header.get(0).unwrap_or("");
    let (row_label, col_label) = corner
        .split_once('|')
        .with_context(|| format!("header cell '{corner}' must read 'row_axis|col_axis'"))?;
    let (row_axis, row_unit) = split_label(row_label);
    let (col_axis, col_unit) = split_label(col_label);
    let columns: Vec<f64> = header
        .iter()
        .skip(1)
        .map(|c| parse_cell(c, "header"))
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    let mut values = Vec::new();
    for (i, record) in records.enumerate() {
        let record = record.with_context(|| format!("grid row {i}"))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != columns.len() + 1 {
            bail!(
                "grid row {i} has {} values, expected {}",
                record.len().saturating_sub(1),
                columns.len()
            );
        }
        rows.push(parse_cell(&record[0], &format!("row {i}"))?);
        for cell in record.iter().skip(1) {
            values.push(parse_cell(cell, &format!("row {i}"))?);
        }
    }

    let channel = match container.attrs().get("channel") {
        Some(v) => v.to_string(),
        None => DEFAULT_CHANNEL.to_string(),
    };
    let channel_unit = container
        .attrs()
        .get("channel_unit")
        .map(|v| v.to_string());

    let signal = Array2::from_shape_vec((rows.len(), columns.len()), values)
        .context("grid body is not rectangular")?;
    container.insert_dataset("", Dataset::axis(&row_axis, rows, row_unit.as_deref()))?;
    container.insert_dataset("", Dataset::axis(&col_axis, columns, col_unit.as_deref()))?;
    container.insert_dataset(
        "",
        Dataset::channel(
            &channel,
            signal.into_dyn(),
            channel_unit.as_deref(),
            &[row_axis.as_str(), col_axis.as_str()],
        ),
    )?;
    Ok(container)
}
