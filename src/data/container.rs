use chrono::{DateTime, Utc};
use log::debug;
use ndarray::ArrayD;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::group::{Group, Node, NodeRef};
use super::model::{AttrValue, Attrs, Dataset, ProvenanceRecord, Role};
use crate::error::{Result, WrightError};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Non-empty segments of a slash-delimited path.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// `parent/name`, with the root written as "".
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn display_path(path: &str) -> String {
    format!("/{}", split_path(path).join("/"))
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WrightError::InvalidName {
            name: name.to_string(),
            reason: "names must not be empty".into(),
        });
    }
    if name.contains('/') {
        return Err(WrightError::InvalidName {
            name: name.to_string(),
            reason: "names must not contain '/'".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// The unified, HDF5-like data tree produced by an adapter and evolved by
/// processing chains.
///
/// The root group's attributes are the instrument metadata. Provenance is
/// append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    root: Group,
    provenance: Vec<ProvenanceRecord>,
}

impl Container {
    pub fn new(name: &str) -> Self {
        Container {
            id: Uuid::new_v4(),
            created: Utc::now(),
            root: Group::new(name),
            provenance: Vec::new(),
        }
    }

    /// Reassemble a container read back from storage. The caller validates.
    pub(crate) fn from_parts(
        id: Uuid,
        created: DateTime<Utc>,
        root: Group,
        provenance: Vec<ProvenanceRecord>,
    ) -> Self {
        Container {
            id,
            created,
            root,
            provenance,
        }
    }

    pub fn name(&self) -> &str {
        &self.root.name
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn attrs(&self) -> &Attrs {
        &self.root.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        &mut self.root.attrs
    }

    // -- lookup --

    /// Resolve a slash-delimited path. "" and "/" are the root.
    pub fn get(&self, path: &str) -> Result<NodeRef<'_>> {
        let mut current = NodeRef::Group(&self.root);
        for segment in split_path(path) {
            let next = match current {
                NodeRef::Group(g) => g.child(segment),
                NodeRef::Dataset(_) => None,
            };
            current = match next {
                Some(Node::Group(g)) => NodeRef::Group(g),
                Some(Node::Dataset(d)) => NodeRef::Dataset(d),
                None => {
                    return Err(WrightError::PathNotFound {
                        path: display_path(path),
                        segment: segment.to_string(),
                    })
                }
            };
        }
        Ok(current)
    }

    pub fn group(&self, path: &str) -> Result<&Group> {
        self.get(path)?.as_group().ok_or_else(|| not_found(path))
    }

    pub fn dataset(&self, path: &str) -> Result<&Dataset> {
        self.get(path)?.as_dataset().ok_or_else(|| not_found(path))
    }

    /// Mutable group access. Children still go through `create_group` /
    /// `add_dataset`; attribute edits are free.
    pub fn group_mut(&mut self, path: &str) -> Result<&mut Group> {
        let mut current = &mut self.root;
        for segment in split_path(path) {
            current = match current.child_mut(segment) {
                Some(Node::Group(g)) => g,
                _ => {
                    return Err(WrightError::PathNotFound {
                        path: display_path(path),
                        segment: segment.to_string(),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Mutable dataset access. Callers keep the axis invariant;
    /// [`Container::validate`] re-checks it.
    pub fn dataset_mut(&mut self, path: &str) -> Result<&mut Dataset> {
        let segments = split_path(path);
        let Some((name, parents)) = segments.split_last() else {
            return Err(not_found(path));
        };
        let group = self.group_mut(&parents.join("/"))?;
        group.dataset_mut(name).ok_or_else(|| WrightError::PathNotFound {
            path: display_path(path),
            segment: name.to_string(),
        })
    }

    // -- mutation --

    /// Add an empty group `name` under `parent`.
    pub fn create_group(&mut self, parent: &str, name: &str) -> Result<&mut Group> {
        check_name(name)?;
        let group = self.group_mut(parent)?;
        if group.contains(name) {
            return Err(WrightError::NameCollision {
                parent: display_path(parent),
                name: name.to_string(),
            });
        }
        group.push(Node::Group(Group::new(name)));
        debug!("created group {}", display_path(&join_path(parent, name)));
        self.group_mut(&join_path(parent, name))
    }

    /// Add a dataset to `group`, checking the axis invariant first.
    pub fn add_dataset(
        &mut self,
        group: &str,
        name: &str,
        data: ArrayD<f64>,
        role: Role,
        unit: Option<&str>,
        axes: &[&str],
    ) -> Result<&Dataset> {
        let dataset = Dataset {
            name: name.to_string(),
            role,
            unit: unit.map(str::to_string),
            data,
            axes: axes.iter().map(|a| a.to_string()).collect(),
            attrs: Attrs::new(),
        };
        self.insert_dataset(group, dataset)
    }

    /// Like [`Container::add_dataset`] for an already-built dataset.
    pub fn insert_dataset(&mut self, group: &str, dataset: Dataset) -> Result<&Dataset> {
        check_name(&dataset.name)?;
        if self.group(group)?.contains(&dataset.name) {
            return Err(WrightError::NameCollision {
                parent: display_path(group),
                name: dataset.name,
            });
        }
        self.check_dataset(group, &dataset)?;
        let path = join_path(group, &dataset.name);
        debug!(
            "added {} {} with shape {:?}",
            dataset.role,
            display_path(&path),
            dataset.shape()
        );
        self.group_mut(group)?.push(Node::Dataset(dataset));
        self.dataset(&path)
    }

    pub fn set_attr(&mut self, path: &str, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        let is_group = self.get(path)?.as_group().is_some();
        if is_group {
            self.group_mut(path)?.attrs.insert(key.to_string(), value);
        } else {
            self.dataset_mut(path)?.attrs.insert(key.to_string(), value);
        }
        Ok(())
    }

    // -- axis invariant --

    /// The axis dataset `reference` names when used from `group`: a path
    /// from the root if it contains '/', otherwise the nearest same-named
    /// axis in `group` or one of its ancestors.
    pub fn resolve_axis(&self, group: &str, reference: &str) -> Option<&Dataset> {
        self.resolve_axis_path(group, reference)
            .and_then(|path| self.dataset(&path).ok())
    }

    /// Root-relative path of the axis `reference` resolves to from `group`.
    pub fn resolve_axis_path(&self, group: &str, reference: &str) -> Option<String> {
        if reference.contains('/') {
            return self
                .dataset(reference)
                .ok()
                .filter(|d| d.is_axis())
                .map(|_| split_path(reference).join("/"));
        }
        let segments = split_path(group);
        (0..=segments.len()).rev().find_map(|depth| {
            let prefix = segments[..depth].join("/");
            self.group(&prefix)
                .ok()
                .and_then(|g| g.dataset(reference))
                .filter(|d| d.is_axis())
                .map(|_| join_path(&prefix, reference))
        })
    }

    /// The axis a channel in `group` uses for dimension `dim`.
    pub fn axis_for(&self, group: &str, channel: &Dataset, dim: usize) -> Result<&Dataset> {
        let reference = channel.axes.get(dim).ok_or_else(|| WrightError::ShapeMismatch {
            dataset: display_path(&join_path(group, &channel.name)),
            detail: format!("no axis reference for dimension {dim}"),
        })?;
        self.resolve_axis(group, reference)
            .ok_or_else(|| WrightError::DanglingAxisReference {
                dataset: display_path(&join_path(group, &channel.name)),
                axis: reference.clone(),
            })
    }

    fn check_dataset(&self, group: &str, dataset: &Dataset) -> Result<()> {
        let path = display_path(&join_path(group, &dataset.name));
        match dataset.role {
            Role::Axis => {
                if !dataset.axes.is_empty() {
                    return Err(WrightError::ShapeMismatch {
                        dataset: path,
                        detail: "axis datasets take no axis references".into(),
                    });
                }
                if !dataset.is_broadcastable_1d() {
                    return Err(WrightError::ShapeMismatch {
                        dataset: path,
                        detail: format!(
                            "axis must be one-dimensional, got shape {:?}",
                            dataset.shape()
                        ),
                    });
                }
            }
            Role::Channel => {
                if dataset.axes.len() != dataset.ndim() {
                    return Err(WrightError::ShapeMismatch {
                        dataset: path,
                        detail: format!(
                            "{} axis references for {} dimensions",
                            dataset.axes.len(),
                            dataset.ndim()
                        ),
                    });
                }
                for (dim, (reference, &extent)) in
                    dataset.axes.iter().zip(dataset.shape()).enumerate()
                {
                    let axis = self.resolve_axis(group, reference).ok_or_else(|| {
                        WrightError::DanglingAxisReference {
                            dataset: path.clone(),
                            axis: reference.clone(),
                        }
                    })?;
                    if axis.len() != extent {
                        return Err(WrightError::ShapeMismatch {
                            dataset: path,
                            detail: format!(
                                "dimension {dim} has extent {extent} but axis '{reference}' has length {}",
                                axis.len()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-check every invariant across the whole tree.
    pub fn validate(&self) -> Result<()> {
        self.validate_group("", &self.root)
    }

    fn validate_group(&self, path: &str, group: &Group) -> Result<()> {
        let children = group.children();
        for (i, child) in children.iter().enumerate() {
            check_name(child.name())?;
            if children[..i].iter().any(|c| c.name() == child.name()) {
                return Err(WrightError::NameCollision {
                    parent: display_path(path),
                    name: child.name().to_string(),
                });
            }
            match child {
                Node::Dataset(d) => self.check_dataset(path, d)?,
                Node::Group(g) => self.validate_group(&join_path(path, &g.name), g)?,
            }
        }
        Ok(())
    }

    // -- provenance --

    pub fn provenance(&self) -> &[ProvenanceRecord] {
        &self.provenance
    }

    pub fn append_provenance(&mut self, record: ProvenanceRecord) {
        debug!("provenance += {} on {}", record.operation, self.name());
        self.provenance.push(record);
    }

    /// SHA-256 over the tree (names, roles, units, shapes, axis references,
    /// value bits, attributes). Id, timestamps and provenance are excluded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hash_group(&mut hasher, &self.root);
        hex::encode(hasher.finalize())
    }

    // -- read-only views --

    /// Every dataset with its path, depth-first in insertion order.
    pub fn datasets(&self) -> Vec<(String, &Dataset)> {
        let mut out = Vec::new();
        collect_datasets("", &self.root, &mut out);
        out
    }

    pub fn channels(&self) -> Vec<(String, &Dataset)> {
        self.datasets()
            .into_iter()
            .filter(|(_, d)| d.is_channel())
            .collect()
    }

    pub fn axes(&self) -> Vec<(String, &Dataset)> {
        self.datasets()
            .into_iter()
            .filter(|(_, d)| d.is_axis())
            .collect()
    }

    /// One line per dataset, for listings and handoff to renderers.
    pub fn describe(&self) -> Vec<String> {
        self.datasets()
            .into_iter()
            .map(|(path, d)| {
                let mut line = format!("/{path} [{}] shape={:?}", d.role, d.shape());
                if let Some(unit) = &d.unit {
                    line.push_str(&format!(" unit={unit}"));
                }
                if !d.axes.is_empty() {
                    line.push_str(&format!(" axes=({})", d.axes.join(", ")));
                }
                line
            })
            .collect()
    }
}

fn not_found(path: &str) -> WrightError {
    let segment = split_path(path).last().copied().unwrap_or("").to_string();
    WrightError::PathNotFound {
        path: display_path(path),
        segment,
    }
}

fn collect_datasets<'a>(path: &str, group: &'a Group, out: &mut Vec<(String, &'a Dataset)>) {
    for child in group.children() {
        match child {
            Node::Dataset(d) => out.push((join_path(path, &d.name), d)),
            Node::Group(g) => collect_datasets(&join_path(path, &g.name), g, out),
        }
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_attrs(hasher: &mut Sha256, attrs: &Attrs) {
    hasher.update((attrs.len() as u64).to_le_bytes());
    for (key, value) in attrs {
        hash_str(hasher, key);
        hash_str(hasher, &format!("{value:?}"));
    }
}

fn hash_group(hasher: &mut Sha256, group: &Group) {
    hasher.update(b"G");
    hash_str(hasher, &group.name);
    hash_attrs(hasher, &group.attrs);
    hasher.update((group.children().len() as u64).to_le_bytes());
    for child in group.children() {
        match child {
            Node::Group(g) => hash_group(hasher, g),
            Node::Dataset(d) => hash_dataset(hasher, d),
        }
    }
}

fn hash_dataset(hasher: &mut Sha256, dataset: &Dataset) {
    hasher.update(b"D");
    hash_str(hasher, &dataset.name);
    hash_str(hasher, &dataset.role.to_string());
    hash_str(hasher, dataset.unit.as_deref().unwrap_or(""));
    hasher.update([dataset.unit.is_some() as u8]);
    hasher.update((dataset.ndim() as u64).to_le_bytes());
    for &extent in dataset.shape() {
        hasher.update((extent as u64).to_le_bytes());
    }
    hasher.update((dataset.axes.len() as u64).to_le_bytes());
    for axis in &dataset.axes {
        hash_str(hasher, axis);
    }
    for v in dataset.data.iter() {
        hasher.update(v.to_bits().to_le_bytes());
    }
    hash_attrs(hasher, &dataset.attrs);
}
