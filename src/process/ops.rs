//! Built-in operations.
//!
//! Every transformation computes its results before touching the container,
//! so a failing step leaves no side effects behind.

use ndarray::{ArrayD, ArrayViewMut, Axis, Dimension, IxDyn, Slice};

use super::params::{ParamKind, ParamSpec, ParamValue, ParameterSchema};
use super::registry::{Effect, InputContract, Invocation, OperationDescriptor};
use super::units;
use crate::data::container::{join_path, split_path, Container};
use crate::data::model::{AttrValue, Dataset, Direction, Role};
use crate::error::{Result, WrightError};

pub fn builtins() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::new(
            "normalize",
            "min-max scale channels to [min, max]",
            Effect::InPlace,
            normalize,
        )
        .with_contract(InputContract::channels(1).channel_param("channel"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::optional("channel", ParamKind::String),
            ParamSpec::with_default("min", ParamKind::Float, ParamValue::Float(0.0)),
            ParamSpec::with_default("max", ParamKind::Float, ParamValue::Float(1.0)),
        ])),
        OperationDescriptor::new(
            "normalize_by_axis",
            "normalize a channel independently over the sub-arrays spanned by the given axes",
            Effect::DerivesDataset,
            normalize_by_axis,
        )
        .with_contract(InputContract::channels(1).rank(1).channel_param("channel"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::required("channel", ParamKind::String),
            ParamSpec::required("axes", ParamKind::StringList),
            ParamSpec::with_default("min", ParamKind::Float, ParamValue::Float(0.0)),
            ParamSpec::with_default("max", ParamKind::Float, ParamValue::Float(1.0)),
            ParamSpec::optional("output", ParamKind::String),
        ])),
        OperationDescriptor::new(
            "smooth",
            "centered moving average along a monotonic axis",
            Effect::InPlace,
            smooth,
        )
        .with_contract(
            InputContract::channels(1)
                .rank(1)
                .channel_param("channel")
                .axis_param("axis"),
        )
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::optional("channel", ParamKind::String),
            ParamSpec::with_default("window", ParamKind::Int, ParamValue::Int(3)).min(1.0),
            ParamSpec::optional("axis", ParamKind::String),
        ])),
        OperationDescriptor::new("scale", "multiply channels by a factor", Effect::InPlace, scale)
            .with_contract(InputContract::channels(1).channel_param("channel"))
            .with_schema(ParameterSchema::new(vec![
                ParamSpec::optional("channel", ParamKind::String),
                ParamSpec::required("factor", ParamKind::Float),
            ])),
        OperationDescriptor::new(
            "relative",
            "derive <channel>_rel = channel - min(channel)",
            Effect::DerivesDataset,
            relative,
        )
        .with_contract(InputContract::channels(1).channel_param("channel"))
        .with_schema(ParameterSchema::new(vec![ParamSpec::optional(
            "channel",
            ParamKind::String,
        )])),
        OperationDescriptor::new(
            "crop",
            "keep the points of an axis between two values",
            Effect::InPlace,
            crop,
        )
        .with_contract(InputContract::default().axis_param("axis"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::required("axis", ParamKind::String),
            ParamSpec::required("lo", ParamKind::Float),
            ParamSpec::optional("hi", ParamKind::Float),
        ])),
        OperationDescriptor::new(
            "collapse",
            "reduce an axis (sum, average, ...) or take the slice nearest a value",
            Effect::DerivesGroup,
            collapse,
        )
        .with_contract(InputContract::channels(1).rank(1).axis_param("axis"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::required("axis", ParamKind::String),
            ParamSpec::optional("method", ParamKind::String).choices(&REDUCTIONS),
            ParamSpec::optional("at", ParamKind::Float),
            ParamSpec::optional("output", ParamKind::String),
        ])),
        OperationDescriptor::new(
            "set_label",
            "set the display label of a dataset",
            Effect::InPlace,
            set_label,
        )
        .with_contract(InputContract::default().dataset_param("dataset"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::required("dataset", ParamKind::String),
            ParamSpec::required("label", ParamKind::String),
        ])),
        OperationDescriptor::new(
            "convert_units",
            "convert a dataset to another unit",
            Effect::InPlace,
            convert_units,
        )
        .with_contract(InputContract::default().dataset_param("dataset"))
        .with_schema(ParameterSchema::new(vec![
            ParamSpec::required("dataset", ParamKind::String),
            ParamSpec::required("to", ParamKind::String),
        ])),
    ]
}

const REDUCTIONS: [&str; 8] = [
    "sum", "product", "average", "stdev", "var", "median", "min", "max",
];

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn mismatch(inv: &Invocation<'_>, reason: String) -> WrightError {
    WrightError::ContractMismatch {
        operation: inv.operation.to_string(),
        target: format!("/{}", inv.target.trim_matches('/')),
        reason,
    }
}

fn parent_path(path: &str) -> String {
    let segments = split_path(path);
    segments[..segments.len().saturating_sub(1)].join("/")
}

/// `channel` if given, otherwise every channel of the target group.
fn selected_channels(c: &Container, inv: &Invocation<'_>) -> Result<Vec<String>> {
    match inv.params().opt_str("channel") {
        Some(channel) => Ok(vec![channel.to_string()]),
        None => Ok(c.group(inv.target)?.channel_names()),
    }
}

/// Dimension of a target-group channel that runs along `axis`.
fn dim_along(c: &Container, inv: &Invocation<'_>, channel: &Dataset, axis: &str) -> Result<usize> {
    let wanted = c.resolve_axis_path(inv.target, axis);
    channel
        .axes
        .iter()
        .position(|r| {
            r == axis || (wanted.is_some() && c.resolve_axis_path(inv.target, r) == wanted)
        })
        .ok_or_else(|| {
            mismatch(
                inv,
                format!("channel '{}' has no dimension along axis '{axis}'", channel.name),
            )
        })
}

/// The axis `reference` names, which must be strictly monotonic.
fn monotonic_axis<'c>(
    c: &'c Container,
    inv: &Invocation<'_>,
    reference: &str,
) -> Result<(&'c Dataset, Direction)> {
    let axis = c
        .resolve_axis(inv.target, reference)
        .ok_or_else(|| WrightError::DanglingAxisReference {
            dataset: format!("/{}", inv.target.trim_matches('/')),
            axis: reference.to_string(),
        })?;
    let direction = axis.monotonic().ok_or_else(|| WrightError::InvalidAxisOrdering {
        operation: inv.operation.to_string(),
        axis: reference.to_string(),
    })?;
    Ok((axis, direction))
}

/// Index of the value closest to `target`.
fn nearest(values: &[f64], target: f64) -> usize {
    let extreme = |pick: fn(f64, f64) -> bool| {
        values
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, &v)| match best {
                Some((_, b)) if !pick(v, b) => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    if target == f64::NEG_INFINITY {
        return extreme(|v, b| v < b);
    }
    if target == f64::INFINITY {
        return extreme(|v, b| v > b);
    }
    values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn commit(c: &mut Container, updated: Vec<(String, ArrayD<f64>)>) -> Result<()> {
    for (path, data) in updated {
        c.dataset_mut(&path)?.data = data;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Min-max scale the finite values into `[lo, hi]`. NaN becomes 0 and
/// infinities clamp to the bounds; constant input maps to `lo`.
pub fn rescale<D: Dimension>(mut values: ArrayViewMut<'_, f64, D>, lo: f64, hi: f64) {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), &v| {
            (a.min(v), b.max(v))
        });
    let range = max - min;
    values.mapv_inplace(|v| {
        if v.is_nan() {
            0.0
        } else if v == f64::INFINITY {
            hi
        } else if v == f64::NEG_INFINITY {
            lo
        } else if range > 0.0 {
            (v - min) * (hi - lo) / range + lo
        } else {
            lo
        }
    });
}

/// Centered moving average of width `window` along `dim`. Near the edges
/// only the available points are averaged. A non-finite value only reaches
/// the windows that cover it.
pub fn moving_average(data: &ArrayD<f64>, dim: usize, window: usize) -> ArrayD<f64> {
    let before = window.saturating_sub(1) / 2;
    let after = window / 2;
    let mut out = data.clone();
    for (src, mut dst) in data
        .lanes(Axis(dim))
        .into_iter()
        .zip(out.lanes_mut(Axis(dim)))
    {
        let lane: Vec<f64> = src.iter().copied().collect();
        let n = lane.len();
        for (i, slot) in dst.iter_mut().enumerate() {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(n);
            let window = &lane[start..end];
            *slot = window.iter().sum::<f64>() / window.len() as f64;
        }
    }
    out
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Reduce `dim` away with one of [`REDUCTIONS`].
pub fn reduce(data: &ArrayD<f64>, dim: usize, method: &str) -> Option<ArrayD<f64>> {
    let axis = Axis(dim);
    Some(match method {
        "sum" => data.sum_axis(axis),
        "product" => data.map_axis(axis, |lane| lane.product()),
        "average" => data.map_axis(axis, |lane| lane.mean().unwrap_or(f64::NAN)),
        "stdev" => data.std_axis(axis, 0.0),
        "var" => data.var_axis(axis, 0.0),
        "median" => data.map_axis(axis, |lane| median(lane.to_vec())),
        "min" => data.map_axis(axis, |lane| lane.fold(f64::INFINITY, |a, &b| a.min(b))),
        "max" => data.map_axis(axis, |lane| lane.fold(f64::NEG_INFINITY, |a, &b| a.max(b))),
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

fn normalize(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let (lo, hi) = (p.f64("min")?, p.f64("max")?);
    let mut updated = Vec::new();
    for name in selected_channels(c, inv)? {
        let path = join_path(inv.target, &name);
        let mut data = c.dataset(&path)?.data.clone();
        rescale(data.view_mut(), lo, hi);
        updated.push((path, data));
    }
    commit(c, updated)
}

fn normalize_by_axis(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let name = p.str("channel")?;
    let axes = p.strings("axes")?;
    let (lo, hi) = (p.f64("min")?, p.f64("max")?);
    let invalid_axes = |reason: &str| WrightError::InvalidParameter {
        operation: inv.operation.to_string(),
        parameter: "axes".into(),
        reason: reason.to_string(),
    };
    if axes.is_empty() {
        return Err(invalid_axes("name at least one axis"));
    }

    let channel = c.dataset(&join_path(inv.target, name))?;
    let mut dims = Vec::with_capacity(axes.len());
    for axis in &axes {
        let dim = dim_along(c, inv, channel, axis)?;
        if dims.contains(&dim) {
            return Err(invalid_axes("axes repeat a dimension"));
        }
        dims.push(dim);
    }

    // Move the normalized dimensions last, flatten to (outer, inner) rows,
    // rescale each row, then undo the permutation.
    let shape = channel.shape().to_vec();
    let outer: Vec<usize> = (0..shape.len()).filter(|d| !dims.contains(d)).collect();
    let perm: Vec<usize> = outer.iter().chain(dims.iter()).copied().collect();
    let outer_len: usize = outer.iter().map(|&d| shape[d]).product();
    let inner_len: usize = dims.iter().map(|&d| shape[d]).product();

    let permuted = channel.data.clone().permuted_axes(perm.clone());
    let permuted_shape = permuted.shape().to_vec();
    let reshape_err = |e: ndarray::ShapeError| WrightError::ShapeMismatch {
        dataset: name.to_string(),
        detail: e.to_string(),
    };
    let mut table = permuted
        .as_standard_layout()
        .into_owned()
        .into_shape((outer_len, inner_len))
        .map_err(reshape_err)?;
    for row in table.rows_mut() {
        rescale(row, lo, hi);
    }
    let mut inverse = vec![0; perm.len()];
    for (i, &d) in perm.iter().enumerate() {
        inverse[d] = i;
    }
    let result = table
        .into_shape(IxDyn(&permuted_shape))
        .map_err(reshape_err)?
        .permuted_axes(inverse)
        .as_standard_layout()
        .into_owned();

    let output = p
        .opt_str("output")
        .map(str::to_string)
        .unwrap_or_else(|| format!("norm_{}", axes.join("_")));
    let mut derived = Dataset {
        name: output,
        role: Role::Channel,
        unit: None,
        data: result,
        axes: channel.axes.clone(),
        attrs: channel.attrs.clone(),
    };
    derived.attrs.insert("source".into(), AttrValue::from(name));
    c.insert_dataset(inv.target, derived)?;
    Ok(())
}

fn smooth(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let window = p.usize("window")?;
    let mut updated = Vec::new();
    for name in selected_channels(c, inv)? {
        let path = join_path(inv.target, &name);
        let channel = c.dataset(&path)?;
        if channel.ndim() == 0 {
            return Err(mismatch(inv, format!("channel '{name}' is a scalar")));
        }
        let dim = match p.opt_str("axis") {
            Some(axis) => dim_along(c, inv, channel, axis)?,
            None => 0,
        };
        monotonic_axis(c, inv, &channel.axes[dim])?;
        updated.push((path.clone(), moving_average(&channel.data, dim, window)));
    }
    commit(c, updated)
}

fn scale(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let factor = inv.params().f64("factor")?;
    let mut updated = Vec::new();
    for name in selected_channels(c, inv)? {
        let path = join_path(inv.target, &name);
        updated.push((path.clone(), c.dataset(&path)?.data.mapv(|v| v * factor)));
    }
    commit(c, updated)
}

fn relative(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let group = c.group(inv.target)?;
    let mut derived = Vec::new();
    for name in selected_channels(c, inv)? {
        let output = format!("{name}_rel");
        if group.contains(&output) {
            return Err(WrightError::NameCollision {
                parent: format!("/{}", inv.target.trim_matches('/')),
                name: output,
            });
        }
        let channel = c.dataset(&join_path(inv.target, &name))?;
        let min = channel
            .data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::INFINITY, f64::min);
        if !min.is_finite() {
            return Err(mismatch(inv, format!("channel '{name}' has no finite values")));
        }
        let mut d = channel.clone();
        d.name = output;
        d.data = channel.data.mapv(|v| v - min);
        d.attrs.insert("source".into(), AttrValue::from(name.as_str()));
        derived.push(d);
    }
    for d in derived {
        c.insert_dataset(inv.target, d)?;
    }
    Ok(())
}

fn crop(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let axis_name = p.str("axis")?;
    let axis = c
        .group(inv.target)?
        .dataset(axis_name)
        .filter(|d| d.is_axis())
        .ok_or_else(|| mismatch(inv, format!("axis '{axis_name}' must live in the target group")))?;
    monotonic_axis(c, inv, axis_name)?;
    let values = axis.values();
    if values.is_empty() {
        return Err(mismatch(inv, format!("axis '{axis_name}' is empty")));
    }

    let first = nearest(&values, p.f64("lo")?);
    let (start, end) = match p.opt_f64("hi") {
        Some(hi) => {
            let last = nearest(&values, hi);
            (first.min(last), first.max(last) + 1)
        }
        None => (first, values.len()),
    };
    let keep = || Slice::from(start..end);

    let axis_path = join_path(inv.target, axis_name);
    let axis_dim = axis.shape().iter().position(|&n| n > 1).unwrap_or(0);
    let mut updated = vec![(
        axis_path.clone(),
        axis.data.slice_axis(Axis(axis_dim), keep()).to_owned(),
    )];
    for (path, channel) in c.channels() {
        let group = parent_path(&path);
        let mut cropped: Option<ArrayD<f64>> = None;
        for (dim, reference) in channel.axes.iter().enumerate() {
            if c.resolve_axis_path(&group, reference).as_deref() == Some(axis_path.as_str()) {
                let current = cropped.take().unwrap_or_else(|| channel.data.clone());
                cropped = Some(current.slice_axis(Axis(dim), keep()).to_owned());
            }
        }
        if let Some(data) = cropped {
            updated.push((path, data));
        }
    }
    commit(c, updated)
}

enum Collapse<'a> {
    At(usize),
    Reduce(&'a str),
}

fn collapse(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let axis_name = p.str("axis")?;
    let output = p
        .opt_str("output")
        .map(str::to_string)
        .unwrap_or_else(|| format!("collapsed_{axis_name}"));
    if c.group(inv.target)?.contains(&output) {
        return Err(WrightError::NameCollision {
            parent: format!("/{}", inv.target.trim_matches('/')),
            name: output,
        });
    }

    let axis_path = c
        .resolve_axis_path(inv.target, axis_name)
        .ok_or_else(|| mismatch(inv, format!("no axis named '{axis_name}' is visible")))?;
    let axis = c.dataset(&axis_path)?;
    let how = match (p.opt_str("method"), p.opt_f64("at")) {
        (Some(method), None) => Collapse::Reduce(method),
        (None, Some(at)) => {
            if axis.is_empty() {
                return Err(mismatch(inv, format!("axis '{axis_name}' is empty")));
            }
            Collapse::At(nearest(&axis.values(), at))
        }
        _ => {
            return Err(WrightError::InvalidParameter {
                operation: inv.operation.to_string(),
                parameter: "method".into(),
                reason: "give exactly one of 'method' or 'at'".into(),
            })
        }
    };

    let mut reduced = Vec::new();
    for channel in c.group(inv.target)?.channels() {
        let Some(dim) = channel.axes.iter().position(|r| {
            c.resolve_axis_path(inv.target, r).as_deref() == Some(axis_path.as_str())
        }) else {
            continue;
        };
        let data = match how {
            Collapse::At(index) => channel.data.index_axis(Axis(dim), index).to_owned(),
            Collapse::Reduce(method) => reduce(&channel.data, dim, method).ok_or_else(|| {
                WrightError::InvalidParameter {
                    operation: inv.operation.to_string(),
                    parameter: "method".into(),
                    reason: format!("unknown reduction '{method}'"),
                }
            })?,
        };
        let mut d = channel.clone();
        d.data = data;
        d.axes.remove(dim);
        reduced.push(d);
    }
    if reduced.is_empty() {
        return Err(mismatch(
            inv,
            format!("no channel runs along axis '{axis_name}'"),
        ));
    }

    let attrs = {
        let mut attrs = vec![("collapsed_axis", AttrValue::from(axis_name))];
        match how {
            Collapse::At(index) => attrs.push(("at", AttrValue::Float(axis.values()[index]))),
            Collapse::Reduce(method) => attrs.push(("method", AttrValue::from(method))),
        }
        attrs
    };
    let group = c.create_group(inv.target, &output)?;
    for (key, value) in attrs {
        group.attrs.insert(key.to_string(), value);
    }
    let group_path = join_path(inv.target, &output);
    for d in reduced {
        c.insert_dataset(&group_path, d)?;
    }
    Ok(())
}

fn set_label(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let path = join_path(inv.target, p.str("dataset")?);
    let label = p.str("label")?;
    c.dataset_mut(&path)?
        .attrs
        .insert("label".into(), AttrValue::from(label));
    Ok(())
}

fn convert_units(c: &mut Container, inv: &Invocation<'_>) -> Result<()> {
    let p = inv.params();
    let name = p.str("dataset")?;
    let to = p.str("to")?;
    let path = join_path(inv.target, name);
    let dataset = c.dataset(&path)?;
    let from = dataset
        .unit
        .clone()
        .ok_or_else(|| mismatch(inv, format!("dataset '{name}' has no unit")))?;
    if !units::is_valid_conversion(&from, to) {
        return Err(WrightError::InvalidParameter {
            operation: inv.operation.to_string(),
            parameter: "to".into(),
            reason: format!("cannot convert '{name}' from {from} to {to}"),
        });
    }
    let data = dataset
        .data
        .mapv(|v| units::convert(v, &from, to).unwrap_or(f64::NAN));
    let dataset = c.dataset_mut(&path)?;
    dataset.data = data;
    dataset.unit = Some(to.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::chain::{apply_chain, OpStep};
    use crate::process::registry::Registry;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array2};

    /// 3x4 map: rows along `x` (0, 1, 2), columns along `y` (10..40).
    fn map() -> Container {
        let mut c = Container::new("map");
        c.insert_dataset("", Dataset::axis("x", vec![0.0, 1.0, 2.0], Some("mm")))
            .unwrap();
        c.insert_dataset("", Dataset::axis("y", vec![10.0, 20.0, 30.0, 40.0], Some("nm")))
            .unwrap();
        let values = Array2::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as f64);
        c.insert_dataset("", Dataset::channel("pl", values.into_dyn(), Some("counts"), &["x", "y"]))
            .unwrap();
        c
    }

    fn run(c: &mut Container, step: OpStep) -> Result<()> {
        apply_chain(c, &[step], &Registry::with_builtins()).map(|_| ())
    }

    #[test]
    fn normalize_maps_onto_bounds() {
        let mut c = map();
        run(&mut c, OpStep::new("normalize")).unwrap();
        let data = &c.dataset("pl").unwrap().data;
        assert_relative_eq!(data[[0, 0]], 0.0);
        assert_relative_eq!(data[[2, 3]], 1.0);
        assert_relative_eq!(data[[1, 0]], 4.0 / 11.0, epsilon = 1e-12);
    }

    #[test]
    fn rescale_handles_constant_and_nan() {
        let mut flat = arr1(&[2.0, 2.0, f64::NAN]);
        rescale(flat.view_mut(), -1.0, 1.0);
        assert_eq!(flat.to_vec(), vec![-1.0, -1.0, 0.0]);
    }

    #[test]
    fn normalize_by_axis_normalizes_each_row() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("normalize_by_axis")
                .with_param("channel", ParamValue::Text("pl".into()))
                .with_param("axes", ParamValue::List(vec![ParamValue::Text("y".into())])),
        )
        .unwrap();
        let derived = c.dataset("norm_y").unwrap();
        assert_eq!(derived.axes, ["x", "y"]);
        for row in derived.data.outer_iter() {
            let row: Vec<f64> = row.iter().copied().collect();
            assert_relative_eq!(row[0], 0.0);
            assert_relative_eq!(row[1], 1.0 / 3.0, epsilon = 1e-12);
            assert_relative_eq!(row[3], 1.0);
        }
        // the source channel is untouched
        assert_eq!(c.dataset("pl").unwrap().data[[2, 3]], 11.0);
    }

    #[test]
    fn normalize_by_axis_over_columns() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("normalize_by_axis")
                .with_param("channel", ParamValue::Text("pl".into()))
                .with_param("axes", ParamValue::Text("x".into()))
                .with_param("output", ParamValue::Text("cols".into())),
        )
        .unwrap();
        let data = &c.dataset("cols").unwrap().data;
        for j in 0..4 {
            assert_relative_eq!(data[[0, j]], 0.0);
            assert_relative_eq!(data[[1, j]], 0.5, epsilon = 1e-12);
            assert_relative_eq!(data[[2, j]], 1.0);
        }
    }

    #[test]
    fn moving_average_truncates_at_edges() {
        let data = arr1(&[1.0, 2.0, 3.0, 4.0, 5.0]).into_dyn();
        let out = moving_average(&data, 0, 3);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![1.5, 2.0, 3.0, 4.0, 4.5]);
        let same = moving_average(&data, 0, 1);
        assert_eq!(same, data);
    }

    #[test]
    fn moving_average_keeps_nan_local() {
        let data = arr1(&[1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0, 7.0]).into_dyn();
        let out: Vec<f64> = moving_average(&data, 0, 3).iter().copied().collect();
        assert!(out[..3].iter().all(|v| v.is_nan()));
        assert_eq!(&out[3..], &[4.0, 5.0, 6.0, 6.5]);
    }

    #[test]
    fn smooth_leaves_the_rest_of_a_row_with_a_blank_cell() {
        let mut c = map();
        c.dataset_mut("pl").unwrap().data[[1, 0]] = f64::NAN;
        run(
            &mut c,
            OpStep::new("smooth").with_param("axis", ParamValue::Text("y".into())),
        )
        .unwrap();
        let data = &c.dataset("pl").unwrap().data;
        assert!(data[[1, 0]].is_nan() && data[[1, 1]].is_nan());
        assert_relative_eq!(data[[1, 2]], 6.0);
        assert_relative_eq!(data[[1, 3]], 6.5);
    }

    #[test]
    fn smooth_runs_along_the_named_axis() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("smooth").with_param("axis", ParamValue::Text("y".into())),
        )
        .unwrap();
        let data = &c.dataset("pl").unwrap().data;
        assert_eq!(data.shape(), &[3, 4]);
        assert_relative_eq!(data[[0, 0]], 0.5);
        assert_relative_eq!(data[[0, 1]], 1.0);
        assert_relative_eq!(data[[2, 3]], 10.5);
    }

    #[test]
    fn smooth_rejects_unordered_axes() {
        let mut c = Container::new("c");
        c.insert_dataset("", Dataset::axis("t", vec![0.0, 2.0, 1.0], None)).unwrap();
        c.insert_dataset("", Dataset::channel("s", arr1(&[1.0, 2.0, 3.0]).into_dyn(), None, &["t"]))
            .unwrap();
        let before = c.dataset("s").unwrap().clone();
        let err = run(&mut c, OpStep::new("smooth")).unwrap_err();
        assert!(matches!(err, WrightError::InvalidAxisOrdering { ref axis, .. } if axis == "t"));
        assert_eq!(c.dataset("s").unwrap(), &before);
    }

    #[test]
    fn scale_and_relative() {
        let mut c = map();
        run(&mut c, OpStep::new("scale").with_param("factor", ParamValue::Int(2))).unwrap();
        run(&mut c, OpStep::new("relative")).unwrap();
        assert_eq!(c.dataset("pl").unwrap().data[[2, 3]], 22.0);
        let rel = c.dataset("pl_rel").unwrap();
        assert_eq!(rel.data[[0, 0]], 0.0);
        assert_eq!(rel.attrs.get("source"), Some(&AttrValue::from("pl")));
        // a second run would collide
        let err = run(&mut c, OpStep::new("relative").with_param("channel", ParamValue::Text("pl".into())))
            .unwrap_err();
        assert!(matches!(err, WrightError::NameCollision { .. }));
    }

    #[test]
    fn crop_cuts_axis_and_every_dependent_channel() {
        let mut c = map();
        c.create_group("", "sub").unwrap();
        c.insert_dataset("sub", Dataset::channel("line", arr1(&[1.0, 2.0, 3.0, 4.0]).into_dyn(), None, &["y"]))
            .unwrap();
        run(
            &mut c,
            OpStep::new("crop")
                .with_param("axis", ParamValue::Text("y".into()))
                .with_param("lo", ParamValue::Float(31.0))
                .with_param("hi", ParamValue::Float(19.0)),
        )
        .unwrap();
        assert_eq!(c.dataset("y").unwrap().values(), vec![20.0, 30.0]);
        assert_eq!(c.dataset("pl").unwrap().shape(), &[3, 2]);
        assert_eq!(c.dataset("pl").unwrap().data[[0, 0]], 1.0);
        assert_eq!(c.dataset("sub/line").unwrap().values(), vec![2.0, 3.0]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn collapse_reduces_into_a_new_group() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("collapse")
                .with_param("axis", ParamValue::Text("x".into()))
                .with_param("method", ParamValue::Text("sum".into())),
        )
        .unwrap();
        let summed = c.dataset("collapsed_x/pl").unwrap();
        assert_eq!(summed.axes, ["y"]);
        assert_eq!(summed.values(), vec![12.0, 15.0, 18.0, 21.0]);
        assert_eq!(
            c.group("collapsed_x").unwrap().attrs.get("method"),
            Some(&AttrValue::from("sum"))
        );
        assert!(c.validate().is_ok());
    }

    #[test]
    fn collapse_at_takes_the_nearest_slice() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("collapse")
                .with_param("axis", ParamValue::Text("y".into()))
                .with_param("at", ParamValue::Float(24.0))
                .with_param("output", ParamValue::Text("profile".into())),
        )
        .unwrap();
        let profile = c.dataset("profile/pl").unwrap();
        assert_eq!(profile.axes, ["x"]);
        assert_eq!(profile.values(), vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn relative_needs_a_finite_value() {
        let mut c = Container::new("c");
        c.insert_dataset("", Dataset::axis("t", vec![0.0, 1.0], None)).unwrap();
        c.insert_dataset(
            "",
            Dataset::channel("s", arr1(&[f64::NAN, f64::INFINITY]).into_dyn(), None, &["t"]),
        )
        .unwrap();
        let err = run(&mut c, OpStep::new("relative")).unwrap_err();
        assert!(matches!(err, WrightError::ContractMismatch { ref reason, .. } if reason.contains("'s'")));
        assert!(c.get("s_rel").is_err());
    }

    #[test]
    fn crop_accepts_open_bounds() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("crop")
                .with_param("axis", ParamValue::Text("y".into()))
                .with_param("lo", ParamValue::Float(f64::NEG_INFINITY))
                .with_param("hi", ParamValue::Float(20.0)),
        )
        .unwrap();
        assert_eq!(c.dataset("y").unwrap().values(), vec![10.0, 20.0]);

        let mut c = map();
        run(
            &mut c,
            OpStep::new("crop")
                .with_param("axis", ParamValue::Text("y".into()))
                .with_param("lo", ParamValue::Float(30.0))
                .with_param("hi", ParamValue::Float(f64::INFINITY)),
        )
        .unwrap();
        assert_eq!(c.dataset("y").unwrap().values(), vec![30.0, 40.0]);
        assert_eq!(c.dataset("pl").unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn collapse_needs_exactly_one_mode() {
        let mut c = map();
        let err = run(
            &mut c,
            OpStep::new("collapse").with_param("axis", ParamValue::Text("x".into())),
        )
        .unwrap_err();
        assert!(matches!(err, WrightError::InvalidParameter { .. }));
        assert!(c.get("collapsed_x").is_err());
    }

    #[test]
    fn reductions() {
        let data = Array2::from_shape_vec((2, 3), vec![1.0, 5.0, 3.0, 2.0, 2.0, 8.0])
            .unwrap()
            .into_dyn();
        let get = |m| reduce(&data, 1, m).unwrap().iter().copied().collect::<Vec<_>>();
        assert_eq!(get("sum"), vec![9.0, 12.0]);
        assert_eq!(get("median"), vec![3.0, 2.0]);
        assert_eq!(get("min"), vec![1.0, 2.0]);
        assert_eq!(get("max"), vec![5.0, 8.0]);
        assert_eq!(get("product"), vec![15.0, 32.0]);
        assert_eq!(get("average"), vec![3.0, 4.0]);
        assert!(reduce(&data, 1, "mode").is_none());
    }

    #[test]
    fn set_label_and_convert_units() {
        let mut c = map();
        run(
            &mut c,
            OpStep::new("set_label")
                .with_param("dataset", ParamValue::Text("pl".into()))
                .with_param("label", ParamValue::Text("PL (counts)".into())),
        )
        .unwrap();
        assert_eq!(c.dataset("pl").unwrap().label(), Some("PL (counts)"));

        run(
            &mut c,
            OpStep::new("convert_units")
                .with_param("dataset", ParamValue::Text("x".into()))
                .with_param("to", ParamValue::Text("um".into())),
        )
        .unwrap();
        let x = c.dataset("x").unwrap();
        assert_eq!(x.unit.as_deref(), Some("um"));
        assert_relative_eq!(x.values()[2], 2000.0, epsilon = 1e-9);

        let err = run(
            &mut c,
            OpStep::new("convert_units")
                .with_param("dataset", ParamValue::Text("pl".into()))
                .with_param("to", ParamValue::Text("nm".into())),
        )
        .unwrap_err();
        assert!(matches!(err, WrightError::InvalidParameter { ref parameter, .. } if parameter == "to"));
    }
}
