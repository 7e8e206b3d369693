//! Height profiles exported as column pairs (AFM / profilometer workups).
//!
//! ```text
//! x y x y
//! [m] [m] [m] [m]
//! 0.0e0 1.2e-9 0.0e0 3.1e-9
//! 1.0e-7 1.4e-9 1.0e-7 3.3e-9
//! ```
//!
//! Lines without a decimal point are header lines: a line of `[unit]`
//! tokens gives units per column, any other gives dimension names. Each
//! column pair becomes a group `profile{i}` with distances in um and heights
//! in nm.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use ndarray::Array1;

use super::grid::stem;
use super::FormatAdapter;
use crate::data::container::{join_path, Container};
use crate::data::model::{AttrValue, Dataset, ProvenanceRecord};
use crate::process::units;

pub struct TracesAdapter;

const DISTANCE_UNIT: &str = "um";
const HEIGHT_UNIT: &str = "nm";
const ASSUMED_UNIT: &str = "m";

/// One column pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub x_name: String,
    pub y_name: String,
    pub x_unit: String,
    pub y_unit: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl FormatAdapter for TracesAdapter {
    fn name(&self) -> &str {
        "traces"
    }

    fn extensions(&self) -> &[&str] {
        &["txt", "dat"]
    }

    fn parse(&self, path: &Path) -> Result<Container> {
        let text = fs::read_to_string(path).context("reading trace file")?;
        let mut container = build(&stem(path), parse_traces(&text)?)?;
        let record = ProvenanceRecord::ingest(self.name(), path, &container);
        container.append_provenance(record);
        Ok(container)
    }
}

fn is_header(line: &str) -> bool {
    !line.contains('.')
}

fn pairs<T: Clone>(items: Vec<T>) -> Vec<(T, T)> {
    items
        .chunks_exact(2)
        .map(|p| (p[0].clone(), p[1].clone()))
        .collect()
}

fn parse_number(token: &str, line: usize) -> Result<f64> {
    let token = token.trim();
    if token.is_empty() || token == "-" {
        return Ok(f64::NAN);
    }
    token
        .parse::<f64>()
        .with_context(|| format!("line {line}: '{token}' is not a number"))
}

pub fn parse_traces(text: &str) -> Result<Vec<Trace>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();
    let header_len = lines.iter().take_while(|(_, l)| is_header(l)).count();
    let (header, body) = lines.split_at(header_len);

    let mut names = None;
    let mut units = None;
    for (_, line) in header {
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if tokens.iter().all(|t| t.starts_with('[')) {
            let stripped: Vec<String> = tokens
                .iter()
                .map(|t| t.trim_matches(|c| c == '[' || c == ']').to_string())
                .collect();
            units = Some(pairs(stripped));
        } else {
            names = Some(pairs(tokens));
        }
    }

    let comma = body.iter().any(|(_, l)| l.contains(','));
    let mut rows = Vec::with_capacity(body.len());
    for (n, line) in body {
        let row: Vec<f64> = if comma {
            line.split(',').map(|t| parse_number(t, n + 1)).collect::<Result<_>>()?
        } else {
            line.split_whitespace()
                .map(|t| parse_number(t, n + 1))
                .collect::<Result<_>>()?
        };
        rows.push(row);
    }
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width < 2 || width % 2 != 0 {
        bail!("expected an even number of columns (x/y pairs), found {width}");
    }

    let mut traces = Vec::with_capacity(width / 2);
    for i in 0..width / 2 {
        let (x_name, y_name) = names
            .as_ref()
            .and_then(|n: &Vec<(String, String)>| n.get(i).cloned())
            .unwrap_or_else(|| ("x".to_string(), "y".to_string()));
        let (x_unit, y_unit) = units
            .as_ref()
            .and_then(|u: &Vec<(String, String)>| u.get(i).cloned())
            .unwrap_or_else(|| (ASSUMED_UNIT.to_string(), ASSUMED_UNIT.to_string()));

        let (mut x, mut y) = (Vec::new(), Vec::new());
        let mut dropped = 0;
        for row in &rows {
            let get = |c: usize| row.get(c).copied().unwrap_or(f64::NAN);
            let (xv, yv) = (get(2 * i), get(2 * i + 1));
            if xv.is_nan() || yv.is_nan() {
                dropped += 1;
                continue;
            }
            x.push(xv);
            y.push(yv);
        }
        if dropped > 0 {
            warn!("profile {i}: dropped {dropped} row(s) with missing values");
        }
        traces.push(Trace {
            x_name,
            y_name,
            x_unit,
            y_unit,
            x,
            y,
        });
    }
    Ok(traces)
}

fn to_unit(values: Vec<f64>, from: &str, to: &str, what: &str) -> (Vec<f64>, String) {
    if !units::is_valid_conversion(from, to) {
        warn!("unrecognized unit '{from}' for {what}; left unconverted");
        return (values, from.to_string());
    }
    let converted = values
        .into_iter()
        .map(|v| units::convert(v, from, to).unwrap_or(f64::NAN))
        .collect();
    (converted, to.to_string())
}

pub fn build(name: &str, traces: Vec<Trace>) -> Result<Container> {
    let mut container = Container::new(name);
    for (i, trace) in traces.into_iter().enumerate() {
        let group = format!("profile{i}");
        let (x, x_unit) = to_unit(trace.x, &trace.x_unit, DISTANCE_UNIT, &trace.x_name);
        let (y, y_unit) = to_unit(trace.y, &trace.y_unit, HEIGHT_UNIT, &trace.y_name);
        let min = y.iter().copied().fold(f64::INFINITY, f64::min);
        let relative: Vec<f64> = y.iter().map(|v| v - min).collect();
        let rel_name = format!("{}_rel", trace.y_name);
        debug!("{group}: {} points", x.len());

        container.create_group("", &group)?;
        container.insert_dataset(
            &group,
            Dataset::axis(&trace.x_name, x, Some(&x_unit))
                .with_attr("label", format!("distance ({x_unit})")),
        )?;
        container.insert_dataset(
            &group,
            Dataset::channel(&trace.y_name, Array1::from(y).into_dyn(), Some(&y_unit), &[trace.x_name.as_str()])
                .with_attr("label", format!("topography ({y_unit})")),
        )?;
        container.insert_dataset(
            &group,
            Dataset::channel(&rel_name, Array1::from(relative).into_dyn(), Some(&y_unit), &[trace.x_name.as_str()])
                .with_attr("label", format!("relative height ({y_unit})")),
        )?;
        container.set_attr(&join_path(&group, &rel_name), "source", AttrValue::from(trace.y_name.as_str()))?;
    }
    Ok(container)
}
