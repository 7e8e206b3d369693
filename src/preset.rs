//! Presets: named, ordered chains written by users in JSON or YAML.
//!
//! ```yaml
//! name: quicklook
//! steps:
//!   - normalize
//!   - smooth(window=5, axis=x)
//!   - op: collapse
//!     target: scan
//!     params: { axis: y, method: average }
//! ```

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WrightError};
use crate::process::chain::OpStep;
use crate::process::params::{ParamValue, Params};
use crate::process::registry::Registry;

/// A step as written: a compact `"op(k=v, ...)"` string or a full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Compact(String),
    Full(OpStep),
}

impl From<&str> for StepSpec {
    fn from(s: &str) -> Self {
        StepSpec::Compact(s.to_string())
    }
}

impl From<OpStep> for StepSpec {
    fn from(step: OpStep) -> Self {
        StepSpec::Full(step)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub name: String,
    pub steps: Vec<StepSpec>,
}

/// Preset files may also be a bare list of steps.
#[derive(Deserialize)]
#[serde(untagged)]
enum PresetFile {
    Named(Preset),
    Steps(Vec<StepSpec>),
}

impl Preset {
    pub fn new(name: &str, steps: Vec<StepSpec>) -> Self {
        Preset {
            name: name.to_string(),
            steps,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str::<PresetFile>(text)?.into())
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str::<PresetFile>(text)?.into())
    }

    /// Load by extension: `.json`, `.yaml` or `.yml`. A preset without a
    /// name takes the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mut preset = match ext.as_deref() {
            Some("json") => Preset::from_json(&text)?,
            Some("yaml") | Some("yml") => Preset::from_yaml(&text)?,
            _ => {
                return Err(WrightError::UnsupportedFormat {
                    path: path.display().to_string(),
                })
            }
        };
        if preset.name.is_empty() {
            preset.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        info!("loaded preset '{}' ({} steps)", preset.name, preset.steps.len());
        Ok(preset)
    }
}

impl From<PresetFile> for Preset {
    fn from(file: PresetFile) -> Self {
        match file {
            PresetFile::Named(preset) => preset,
            PresetFile::Steps(steps) => Preset {
                name: String::new(),
                steps,
            },
        }
    }
}

/// A preset checked against a registry, with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChain {
    pub name: String,
    pub steps: Vec<OpStep>,
}

/// Check `preset` against `registry` without touching any container.
pub fn resolve(preset: &Preset, registry: &Registry) -> Result<ResolvedChain> {
    let mut steps = Vec::with_capacity(preset.steps.len());
    for (index, spec) in preset.steps.iter().enumerate() {
        let step = match spec {
            StepSpec::Compact(text) => parse_compact(text)?,
            StepSpec::Full(step) => step.clone(),
        };
        let descriptor =
            registry
                .lookup(&step.operation)
                .map_err(|_| WrightError::UnknownOperation {
                    name: step.operation.clone(),
                    step: Some(index),
                })?;
        let params = descriptor.schema.validate(&descriptor.name, &step.params)?;
        steps.push(OpStep { params, ..step });
    }
    Ok(ResolvedChain {
        name: preset.name.clone(),
        steps,
    })
}

// ---------------------------------------------------------------------------
// Compact step syntax
// ---------------------------------------------------------------------------

fn syntax_error(text: &str, reason: &str) -> WrightError {
    WrightError::InvalidParameter {
        operation: text.to_string(),
        parameter: "syntax".into(),
        reason: reason.to_string(),
    }
}

/// Split on commas outside brackets and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_value(raw: &str) -> ParamValue {
    let raw = raw.trim();
    match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(inner) if inner.trim().is_empty() => ParamValue::List(Vec::new()),
        Some(inner) => ParamValue::List(
            split_top_level(inner)
                .into_iter()
                .map(ParamValue::parse_token)
                .collect(),
        ),
        None => ParamValue::parse_token(raw),
    }
}

/// `name` or `name(key=value, ...)`.
pub fn parse_compact(text: &str) -> Result<OpStep> {
    let text = text.trim();
    let Some(open) = text.find('(') else {
        if text.is_empty() || text.contains(')') {
            return Err(syntax_error(text, "expected 'op' or 'op(key=value, ...)'"));
        }
        return Ok(OpStep::new(text));
    };
    let name = text[..open].trim();
    let body = text[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| syntax_error(text, "missing closing ')'"))?;
    if name.is_empty() {
        return Err(syntax_error(text, "missing operation name"));
    }

    let mut params = Params::new();
    if !body.trim().is_empty() {
        for pair in split_top_level(body) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| syntax_error(text, &format!("expected key=value, got '{}'", pair.trim())))?;
            let key = key.trim();
            if key.is_empty() || params.insert(key.to_string(), parse_value(value)).is_some() {
                return Err(syntax_error(text, &format!("bad or repeated key '{key}'")));
            }
        }
    }
    Ok(OpStep {
        operation: name.to_string(),
        target: String::new(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compact_steps_parse() {
        assert_eq!(parse_compact("normalize").unwrap(), OpStep::new("normalize"));
        assert_eq!(
            parse_compact("smooth(window=3, axis=x)").unwrap(),
            OpStep::new("smooth")
                .with_param("window", ParamValue::Int(3))
                .with_param("axis", ParamValue::Text("x".into()))
        );
        assert_eq!(
            parse_compact("normalize_by_axis(channel=pl, axes=[x, y])").unwrap(),
            OpStep::new("normalize_by_axis")
                .with_param("channel", ParamValue::Text("pl".into()))
                .with_param(
                    "axes",
                    ParamValue::List(vec![
                        ParamValue::Text("x".into()),
                        ParamValue::Text("y".into())
                    ])
                )
        );
        assert_eq!(
            parse_compact(r#"set_label(dataset=pl, label="PL, counts")"#).unwrap(),
            OpStep::new("set_label")
                .with_param("dataset", ParamValue::Text("pl".into()))
                .with_param("label", ParamValue::Text("PL, counts".into()))
        );
        assert_eq!(
            parse_compact("normalize_by_axis(axes=['a,b', c])").unwrap(),
            OpStep::new("normalize_by_axis").with_param(
                "axes",
                ParamValue::List(vec![ParamValue::Text("a,b".into()), ParamValue::Text("c".into())])
            )
        );
        for bad in ["smooth(window=3", "smooth(3)", "(window=3)", "", "smooth(a=1, a=2)"] {
            assert!(parse_compact(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn json_and_yaml_presets_agree() {
        let json = Preset::from_json(
            r#"{"name": "p", "steps": ["normalize", {"op": "smooth", "params": {"window": 5}}]}"#,
        )
        .unwrap();
        let yaml = Preset::from_yaml(
            "name: p\nsteps:\n  - normalize\n  - op: smooth\n    params:\n      window: 5\n",
        )
        .unwrap();
        assert_eq!(json, yaml);
        let bare = Preset::from_json(r#"["normalize"]"#).unwrap();
        assert_eq!(bare.steps, vec![StepSpec::from("normalize")]);
    }

    #[test]
    fn resolve_fills_defaults_and_is_pure() {
        let registry = Registry::with_builtins();
        let preset = Preset::new("p", vec!["normalize".into(), "smooth(window=5)".into()]);
        let first = resolve(&preset, &registry).unwrap();
        let second = resolve(&preset, &registry).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.steps[0].params.get("min"), Some(&ParamValue::Float(0.0)));
        assert_eq!(first.steps[1].params.get("window"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn resolve_reports_the_failing_step() {
        let registry = Registry::with_builtins();
        let preset = Preset::new("p", vec!["normalize".into(), "fourier".into()]);
        assert!(matches!(
            resolve(&preset, &registry),
            Err(WrightError::UnknownOperation { step: Some(1), .. })
        ));
        let preset = Preset::new("p", vec!["smooth(window=0)".into()]);
        assert!(matches!(
            resolve(&preset, &registry),
            Err(WrightError::InvalidParameter { ref parameter, .. }) if parameter == "window"
        ));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quicklook.yml");
        fs::write(&path, "- normalize\n- smooth(window=3)\n").unwrap();
        let preset = Preset::load(&path).unwrap();
        assert_eq!(preset.name, "quicklook");
        assert_eq!(preset.steps.len(), 2);

        let other = dir.path().join("p.toml");
        fs::write(&other, "").unwrap();
        assert!(matches!(Preset::load(&other), Err(WrightError::UnsupportedFormat { .. })));
    }
}
