//! Record-oriented spectra: one record per spectrum with `x` and `y` list
//! columns plus scalar metadata.
//!
//! Each record becomes a group `spectrum_NNN` holding axis `x`, channel `y`
//! and the record's metadata as group attributes.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::grid::stem;
use super::FormatAdapter;
use crate::data::container::Container;
use crate::data::model::{AttrValue, Attrs, Dataset, ProvenanceRecord};

pub struct SpectraAdapter;

/// One parsed record before it is placed in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub metadata: Attrs,
}

impl FormatAdapter for SpectraAdapter {
    fn name(&self) -> &str {
        "spectra"
    }

    fn extensions(&self) -> &[&str] {
        &["json", "parquet", "pq"]
    }

    fn parse(&self, path: &Path) -> Result<Container> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let spectra = match ext.as_str() {
            "parquet" | "pq" => read_parquet(path)?,
            _ => read_json(path)?,
        };
        let mut container = build(&stem(path), spectra)?;
        let record = ProvenanceRecord::ingest(self.name(), path, &container);
        container.append_provenance(record);
        Ok(container)
    }
}

/// Place parsed spectra in a fresh container.
pub fn build(name: &str, spectra: Vec<Spectrum>) -> Result<Container> {
    let mut container = Container::new(name);
    container
        .attrs_mut()
        .insert("spectra".into(), AttrValue::Integer(spectra.len() as i64));
    for (i, spectrum) in spectra.into_iter().enumerate() {
        let group = format!("spectrum_{i:03}");
        container.create_group("", &group)?.attrs = spectrum.metadata;
        container.insert_dataset(&group, Dataset::axis("x", spectrum.x, None))?;
        let len = spectrum.y.len();
        container.insert_dataset(
            &group,
            Dataset::channel("y", ndarray::Array1::from(spectrum.y).into_dyn(), None, &["x"]),
        )?;
        debug!("{group}: {len} points");
    }
    Ok(container)
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// `[{ "x": [...], "y": [...], "sample": "A", ... }, ...]`, as written by
/// `df.to_json(orient='records')`.
pub fn read_json(path: &Path) -> Result<Vec<Spectrum>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json(&text)
}

pub fn parse_json(text: &str) -> Result<Vec<Spectrum>> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;
    let records = root.as_array().context("expected a top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("record {i} is not a JSON object"))?;
        let x = json_numbers(obj.get("x"), i, "x")?;
        let y = json_numbers(obj.get("y"), i, "y")?;
        if x.len() != y.len() {
            bail!("record {i}: x has {} values but y has {}", x.len(), y.len());
        }

        let metadata: BTreeMap<_, _> = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .map(|(key, val)| (key.clone(), json_to_attr(val)))
            .collect();
        spectra.push(Spectrum { x, y, metadata });
    }
    Ok(spectra)
}

fn json_numbers(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("record {row}: missing or invalid '{col}' array"))?;
    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            v => v
                .as_f64()
                .with_context(|| format!("record {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_to_attr(val: &JsonValue) -> AttrValue {
    match val {
        JsonValue::String(s) => AttrValue::String(s.clone()),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AttrValue::Integer(i),
            (None, Some(f)) => AttrValue::Float(f),
            _ => AttrValue::String(n.to_string()),
        },
        JsonValue::Bool(b) => AttrValue::Bool(*b),
        JsonValue::Null => AttrValue::Null,
        other => AttrValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// `x` and `y` as List or LargeList of Float64/Float32; every other column is
/// metadata. Files from both pandas and polars read the same way.
pub fn read_parquet(path: &Path) -> Result<Vec<Spectrum>> {
    let file = File::open(path).context("opening parquet file")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut spectra = Vec::new();
    for batch in reader {
        let batch = batch.context("reading parquet record batch")?;
        let schema = batch.schema();
        let x_idx = schema.index_of("x").context("parquet file has no 'x' column")?;
        let y_idx = schema.index_of("y").context("parquet file has no 'y' column")?;
        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let record = spectra.len();
            let x = f64_list(batch.column(x_idx), row)
                .with_context(|| format!("record {record}: reading 'x'"))?;
            let y = f64_list(batch.column(y_idx), row)
                .with_context(|| format!("record {record}: reading 'y'"))?;
            if x.len() != y.len() {
                bail!("record {record}: x has {} values but y has {}", x.len(), y.len());
            }
            let metadata = meta_cols
                .iter()
                .map(|(i, name)| (name.clone(), scalar_attr(batch.column(*i), row)))
                .collect();
            spectra.push(Spectrum { x, y, metadata });
        }
    }
    Ok(spectra)
}

fn f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    let values = match col.data_type() {
        DataType::List(_) => col.as_list::<i32>().value(row),
        DataType::LargeList(_) => col.as_list::<i64>().value(row),
        other => bail!("expected a List or LargeList column, got {other:?}"),
    };
    match values.data_type() {
        DataType::Float64 => Ok(values
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect()),
        DataType::Float32 => Ok(values
            .as_primitive::<Float32Type>()
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect()),
        other => bail!("list values are {other:?}, expected Float64 or Float32"),
    }
}

fn scalar_attr(col: &ArrayRef, row: usize) -> AttrValue {
    if col.is_null(row) {
        return AttrValue::Null;
    }
    match col.data_type() {
        DataType::Utf8 => AttrValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => AttrValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => AttrValue::Integer(col.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => AttrValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => AttrValue::Float(col.as_primitive::<Float32Type>().value(row).into()),
        DataType::Float64 => AttrValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => AttrValue::Bool(col.as_boolean().value(row)),
        other => AttrValue::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Builder, ListBuilder, StringArray};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn json_records_become_groups() {
        let spectra = parse_json(
            r#"[
                {"x": [1.0, 2.0, 3.0], "y": [0.1, 0.2, null], "sample": "A", "conc": 1.5},
                {"x": [1.0, 2.0], "y": [0.3, 0.4], "sample": "B", "conc": 2}
            ]"#,
        )
        .unwrap();
        let c = build("s", spectra).unwrap();
        let first = c.group("spectrum_000").unwrap();
        assert_eq!(first.attrs.get("sample"), Some(&AttrValue::from("A")));
        assert_eq!(first.attrs.get("conc"), Some(&AttrValue::Float(1.5)));
        assert!(c.dataset("spectrum_000/y").unwrap().values()[2].is_nan());
        assert_eq!(c.dataset("spectrum_001/x").unwrap().len(), 2);
        assert_eq!(c.attrs().get("spectra"), Some(&AttrValue::Integer(2)));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn mismatched_lengths_fail() {
        let err = parse_json(r#"[{"x": [1.0, 2.0], "y": [1.0]}]"#).unwrap_err();
        assert!(err.to_string().contains("record 0"));
        assert!(parse_json(r#"{"x": []}"#).is_err());
    }

    #[test]
    fn parquet_lists_and_metadata() {
        let mut xs = ListBuilder::new(Float64Builder::new());
        let mut ys = ListBuilder::new(Float64Builder::new());
        for (x, y) in [([1.0, 2.0], [5.0, 6.0]), ([3.0, 4.0], [7.0, 8.0])] {
            xs.values().append_slice(&x);
            xs.append(true);
            ys.values().append_slice(&y);
            ys.append(true);
        }
        let batch = RecordBatch::try_from_iter([
            ("x", Arc::new(xs.finish()) as ArrayRef),
            ("y", Arc::new(ys.finish()) as ArrayRef),
            ("sample", Arc::new(StringArray::from(vec!["A", "B"])) as ArrayRef),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.parquet");
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let spectra = read_parquet(&path).unwrap();
        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[1].y, vec![7.0, 8.0]);
        assert_eq!(spectra[1].metadata.get("sample"), Some(&AttrValue::from("B")));

        let c = SpectraAdapter.parse(&path).unwrap();
        assert_eq!(c.provenance().len(), 1);
        assert_eq!(c.channels().len(), 2);
    }
}
