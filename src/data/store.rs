use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, ListArray, ListBuilder, StringArray,
    StringBuilder, UInt64Array, UInt64Builder,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use log::{debug, info};
use ndarray::{ArrayD, IxDyn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::container::{join_path, split_path, Container};
use super::group::{Group, Node};
use super::model::{Attrs, Dataset, ProvenanceRecord, Role};
use crate::error::{Result, WrightError};

/// Parquet key-value metadata key holding the container header.
pub const CONTAINER_KEY: &str = "wright.container";
pub const VERSION_KEY: &str = "wright.version";
pub const STORE_VERSION: &str = "1";

/// Everything that is not a tree node: identity, root attributes, history.
#[derive(Serialize, Deserialize)]
struct Header {
    id: Uuid,
    name: String,
    created: DateTime<Utc>,
    attrs: Attrs,
    provenance: Vec<ProvenanceRecord>,
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// Column builders for the one-row-per-node table.
struct NodeColumns {
    path: StringBuilder,
    kind: StringBuilder,
    role: StringBuilder,
    unit: StringBuilder,
    shape: ListBuilder<UInt64Builder>,
    axes: ListBuilder<StringBuilder>,
    values: ListBuilder<Float64Builder>,
    attrs: StringBuilder,
}

impl NodeColumns {
    fn new() -> Self {
        NodeColumns {
            path: StringBuilder::new(),
            kind: StringBuilder::new(),
            role: StringBuilder::new(),
            unit: StringBuilder::new(),
            shape: ListBuilder::new(UInt64Builder::new()),
            axes: ListBuilder::new(StringBuilder::new()),
            values: ListBuilder::new(Float64Builder::new()),
            attrs: StringBuilder::new(),
        }
    }

    fn push_group(&mut self, path: &str, group: &Group) -> Result<()> {
        self.path.append_value(path);
        self.kind.append_value("group");
        self.role.append_null();
        self.unit.append_null();
        self.shape.append(true);
        self.axes.append(true);
        self.values.append(true);
        self.attrs.append_value(serde_json::to_string(&group.attrs)?);
        Ok(())
    }

    fn push_dataset(&mut self, path: &str, dataset: &Dataset) -> Result<()> {
        self.path.append_value(path);
        self.kind.append_value("dataset");
        self.role.append_value(dataset.role.to_string());
        self.unit.append_option(dataset.unit.as_deref());

        for &extent in dataset.shape() {
            self.shape.values().append_value(extent as u64);
        }
        self.shape.append(true);

        for axis in &dataset.axes {
            self.axes.values().append_value(axis);
        }
        self.axes.append(true);

        let values = self.values.values();
        for &v in dataset.data.iter() {
            values.append_value(v);
        }
        self.values.append(true);

        self.attrs.append_value(serde_json::to_string(&dataset.attrs)?);
        Ok(())
    }

    fn walk(&mut self, path: &str, group: &Group) -> Result<()> {
        for child in group.children() {
            let child_path = join_path(path, child.name());
            match child {
                Node::Group(g) => {
                    self.push_group(&child_path, g)?;
                    self.walk(&child_path, g)?;
                }
                Node::Dataset(d) => self.push_dataset(&child_path, d)?,
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<RecordBatch> {
        let columns: Vec<(&str, ArrayRef)> = vec![
            ("path", Arc::new(self.path.finish())),
            ("kind", Arc::new(self.kind.finish())),
            ("role", Arc::new(self.role.finish())),
            ("unit", Arc::new(self.unit.finish())),
            ("shape", Arc::new(self.shape.finish())),
            ("axes", Arc::new(self.axes.finish())),
            ("values", Arc::new(self.values.finish())),
            ("attrs", Arc::new(self.attrs.finish())),
        ];
        Ok(RecordBatch::try_from_iter(columns)?)
    }
}

/// The tree as the one-row-per-node table [`save`] writes.
pub fn node_table(container: &Container) -> Result<RecordBatch> {
    let mut columns = NodeColumns::new();
    columns.walk("", container.root())?;
    columns.finish()
}

/// Write `container` to a single Parquet file.
///
/// Nodes are stored one per row in depth-first insertion order; the header
/// (id, name, timestamps, root attributes, provenance) is JSON in the file's
/// key-value metadata.
pub fn save(container: &Container, path: &Path) -> Result<()> {
    let batch = node_table(container)?;

    let header = Header {
        id: container.id,
        name: container.name().to_string(),
        created: container.created,
        attrs: container.attrs().clone(),
        provenance: container.provenance().to_vec(),
    };
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![
            KeyValue::new(CONTAINER_KEY.to_string(), serde_json::to_string(&header)?),
            KeyValue::new(VERSION_KEY.to_string(), STORE_VERSION.to_string()),
        ]))
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    info!(
        "saved container '{}' ({} nodes, {} provenance records) to {}",
        container.name(),
        batch.num_rows(),
        container.provenance().len(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read a container written by [`save`] and re-check its invariants.
pub fn load(path: &Path) -> Result<Container> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let header_json = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == CONTAINER_KEY))
        .and_then(|kv| kv.value.clone())
        .ok_or_else(|| {
            WrightError::CorruptStore(format!("{} has no '{CONTAINER_KEY}' metadata", path.display()))
        })?;
    let header: Header = serde_json::from_str(&header_json)?;

    let mut root = Group::new(&header.name);
    root.attrs = header.attrs;
    let mut container = Container::from_parts(header.id, header.created, root, header.provenance);

    let reader = builder.build()?;
    for batch_result in reader {
        let batch = batch_result?;
        read_batch(&mut container, &batch)?;
    }

    container.validate()?;
    info!(
        "loaded container '{}' ({} datasets) from {}",
        container.name(),
        container.datasets().len(),
        path.display()
    );
    Ok(container)
}

fn read_batch(container: &mut Container, batch: &RecordBatch) -> Result<()> {
    let paths = string_column(batch, "path")?;
    let kinds = string_column(batch, "kind")?;
    let roles = string_column(batch, "role")?;
    let units = string_column(batch, "unit")?;
    let shapes = list_column(batch, "shape")?;
    let axes = list_column(batch, "axes")?;
    let values = list_column(batch, "values")?;
    let attrs = string_column(batch, "attrs")?;

    for row in 0..batch.num_rows() {
        let path = paths.value(row);
        let segments = split_path(path);
        let Some((name, parents)) = segments.split_last() else {
            return Err(WrightError::CorruptStore(format!("row {row} has an empty path")));
        };
        let node_attrs: Attrs = serde_json::from_str(attrs.value(row))?;

        let node = match kinds.value(row) {
            "group" => {
                let mut group = Group::new(name);
                group.attrs = node_attrs;
                Node::Group(group)
            }
            "dataset" => {
                let role = Role::from_str(roles.value(row)).map_err(|e| {
                    WrightError::CorruptStore(format!("row {row} ({path}): {e}"))
                })?;
                let shape: Vec<usize> = u64_list(shapes, row)?
                    .into_iter()
                    .map(|n| n as usize)
                    .collect();
                let data = ArrayD::from_shape_vec(IxDyn(&shape), f64_list(values, row)?)
                    .map_err(|e| WrightError::CorruptStore(format!("row {row} ({path}): {e}")))?;
                Node::Dataset(Dataset {
                    name: name.to_string(),
                    role,
                    unit: (!units.is_null(row)).then(|| units.value(row).to_string()),
                    data,
                    axes: string_list(axes, row)?,
                    attrs: node_attrs,
                })
            }
            other => {
                return Err(WrightError::CorruptStore(format!(
                    "row {row} ({path}): unknown node kind '{other}'"
                )))
            }
        };
        debug!("read node /{path}");
        // Axis references may point at nodes later in the file, so the
        // invariant is checked once the whole tree is back.
        container.group_mut(&parents.join("/"))?.push(node);
    }
    Ok(())
}

// -- Arrow helpers --

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| WrightError::CorruptStore(format!("missing or mistyped column '{name}'")))
}

fn list_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ListArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<ListArray>())
        .ok_or_else(|| WrightError::CorruptStore(format!("missing or mistyped column '{name}'")))
}

fn f64_list(col: &ListArray, row: usize) -> Result<Vec<f64>> {
    let inner = col.value(row);
    let arr = inner
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| WrightError::CorruptStore("values are not Float64".into()))?;
    Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn u64_list(col: &ListArray, row: usize) -> Result<Vec<u64>> {
    let inner = col.value(row);
    let arr = inner
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| WrightError::CorruptStore("shape is not UInt64".into()))?;
    Ok(arr.iter().flatten().collect())
}

fn string_list(col: &ListArray, row: usize) -> Result<Vec<String>> {
    let inner = col.value(row);
    let arr = inner
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| WrightError::CorruptStore("axes are not Utf8".into()))?;
    Ok(arr.iter().flatten().map(str::to_string).collect())
}
