use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::params::{ParamValue, Params};
use super::registry::{Invocation, Registry};
use crate::data::container::{split_path, Container};
use crate::data::model::ProvenanceRecord;
use crate::error::{Result, WrightError};

/// One step of a chain: an operation name, the group it runs against and its
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpStep {
    #[serde(rename = "op", alias = "operation")]
    pub operation: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub params: Params,
}

impl OpStep {
    pub fn new(operation: &str) -> Self {
        OpStep {
            operation: operation.to_string(),
            target: String::new(),
            params: Params::new(),
        }
    }

    pub fn on(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_param(mut self, name: &str, value: ParamValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }
}

impl From<&ProvenanceRecord> for OpStep {
    fn from(record: &ProvenanceRecord) -> Self {
        OpStep {
            operation: record.operation.clone(),
            target: record.target.clone(),
            params: record.params.clone(),
        }
    }
}

/// What a successful chain appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainReport {
    pub records: Vec<ProvenanceRecord>,
    /// Fingerprint of the container after the last step.
    pub fingerprint: String,
}

impl ChainReport {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Apply `steps` in order. Not transactional: steps before a failing one
/// stay applied and recorded; the failing step itself changes nothing.
pub fn apply_chain(
    container: &mut Container,
    steps: &[OpStep],
    registry: &Registry,
) -> Result<ChainReport> {
    let mut report = ChainReport::default();
    for (index, step) in steps.iter().enumerate() {
        report.records.push(apply_step(container, index, step, registry)?);
    }
    report.fingerprint = container.fingerprint();
    info!(
        "applied {} step(s) to '{}' -> {}",
        report.len(),
        container.name(),
        &report.fingerprint[..12]
    );
    Ok(report)
}

/// Like [`apply_chain`], but the container only changes if every step
/// succeeds.
pub fn apply_chain_atomic(
    container: &mut Container,
    steps: &[OpStep],
    registry: &Registry,
) -> Result<ChainReport> {
    let mut staged = container.clone();
    let report = apply_chain(&mut staged, steps, registry)?;
    *container = staged;
    Ok(report)
}

fn apply_step(
    container: &mut Container,
    index: usize,
    step: &OpStep,
    registry: &Registry,
) -> Result<ProvenanceRecord> {
    let descriptor = registry
        .lookup(&step.operation)
        .map_err(|_| WrightError::UnknownOperation {
            name: step.operation.clone(),
            step: Some(index),
        })?;
    let target = split_path(&step.target).join("/");
    let params = descriptor.schema.validate(&descriptor.name, &step.params)?;
    descriptor
        .contract
        .check(&descriptor.name, container, &target, &params)?;

    let input = container.fingerprint();
    debug!(
        "step {index}: {} on /{target} with {:?}",
        descriptor.name, params
    );
    descriptor.run(
        container,
        &Invocation {
            operation: &descriptor.name,
            target: &target,
            params: &params,
        },
    )?;

    let record = ProvenanceRecord::new(&descriptor.name, &target, params, input);
    container.append_provenance(record.clone());
    Ok(record)
}

/// Re-run the non-ingest steps of `records` on a copy of `source`. Each
/// record's input fingerprint must match the replayed state it is applied to.
pub fn replay(
    source: &Container,
    records: &[ProvenanceRecord],
    registry: &Registry,
) -> Result<Container> {
    let mut replayed = source.clone();
    for (index, record) in records.iter().enumerate() {
        if record.is_ingest() {
            continue;
        }
        let divergence = |reason: String| WrightError::ReplayDivergence {
            index,
            operation: record.operation.clone(),
            reason,
        };
        let current = replayed.fingerprint();
        if current != record.input {
            return Err(divergence(format!(
                "recorded input {} but replayed state is {}",
                &record.input[..record.input.len().min(12)],
                &current[..12]
            )));
        }
        apply_step(&mut replayed, index, &OpStep::from(record), registry)
            .map_err(|e| divergence(e.to_string()))?;
    }
    info!(
        "replayed {} record(s) onto '{}'",
        records.iter().filter(|r| !r.is_ingest()).count(),
        source.name()
    );
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Dataset;
    use ndarray::{arr1, Array2};
    use pretty_assertions::assert_eq;

    fn sample() -> Container {
        let mut c = Container::new("sample");
        c.insert_dataset("", Dataset::axis("x", vec![0.0, 1.0, 2.0, 3.0], Some("um")))
            .unwrap();
        c.insert_dataset("", Dataset::axis("t", vec![0.0, 1.0], Some("s"))).unwrap();
        let values = Array2::from_shape_fn((4, 2), |(i, j)| (i * i + j) as f64);
        c.insert_dataset("", Dataset::channel("a", values.into_dyn(), None, &["x", "t"]))
            .unwrap();
        c
    }

    fn chain() -> Vec<OpStep> {
        vec![
            OpStep::new("normalize"),
            OpStep::new("smooth").with_param("window", ParamValue::Int(3)),
            OpStep::new("scale").with_param("factor", ParamValue::Float(10.0)),
        ]
    }

    #[test]
    fn records_carry_resolved_params_and_inputs() {
        let mut c = sample();
        let before = c.fingerprint();
        let report = apply_chain(&mut c, &chain(), &Registry::with_builtins()).unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(c.provenance().len(), 3);
        let first = &c.provenance()[0];
        assert_eq!(first.operation, "normalize");
        assert_eq!(first.input, before);
        assert_eq!(first.params.get("max"), Some(&ParamValue::Float(1.0)));
        assert_eq!(report.fingerprint, c.fingerprint());
    }

    #[test]
    fn unknown_operation_names_the_step() {
        let mut c = sample();
        let steps = vec![OpStep::new("normalize"), OpStep::new("fft")];
        let err = apply_chain(&mut c, &steps, &Registry::with_builtins()).unwrap_err();
        assert!(matches!(err, WrightError::UnknownOperation { ref name, step: Some(1) } if name == "fft"));
        assert_eq!(c.provenance().len(), 1);
    }

    #[test]
    fn failing_step_leaves_earlier_steps_and_no_partial_write() {
        // a second channel along an unordered axis makes smooth fail after
        // it has already computed the first channel
        let mut base = sample();
        base.insert_dataset("", Dataset::axis("w", vec![3.0, 1.0, 2.0], None))
            .unwrap();
        base.insert_dataset("", Dataset::channel("b", arr1(&[1.0, 2.0, 3.0]).into_dyn(), None, &["w"]))
            .unwrap();
        let registry = Registry::with_builtins();

        let mut c = base.clone();
        let err = apply_chain(&mut c, &chain(), &registry).unwrap_err();
        assert!(matches!(err, WrightError::InvalidAxisOrdering { .. }));
        assert_eq!(c.provenance().len(), 1);

        let mut only_first = base.clone();
        apply_chain(&mut only_first, &chain()[..1], &registry).unwrap();
        assert_eq!(c.fingerprint(), only_first.fingerprint());
    }

    #[test]
    fn atomic_chain_keeps_the_original_on_failure() {
        let mut c = sample();
        let original = c.clone();
        let mut steps = chain();
        steps.push(OpStep::new("crop").with_param("axis", ParamValue::Text("nope".into())));
        assert!(apply_chain_atomic(&mut c, &steps, &Registry::with_builtins()).is_err());
        assert_eq!(c, original);

        apply_chain_atomic(&mut c, &chain(), &Registry::with_builtins()).unwrap();
        assert_eq!(c.provenance().len(), 3);
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let registry = Registry::with_builtins();
        let base = sample();
        let mut a = base.clone();
        let mut b = base.clone();
        apply_chain(&mut a, &chain(), &registry).unwrap();
        apply_chain(&mut b, &chain(), &registry).unwrap();
        assert_eq!(a.dataset("a").unwrap().data, b.dataset("a").unwrap().data);
        assert_eq!(a.provenance().len(), b.provenance().len());
        for (x, y) in a.provenance().iter().zip(b.provenance()) {
            assert!(x.same_step(y));
        }
    }

    #[test]
    fn replay_reproduces_and_detects_divergence() {
        let registry = Registry::with_builtins();
        let base = sample();
        let mut processed = base.clone();
        apply_chain(&mut processed, &chain(), &registry).unwrap();

        let replayed = replay(&base, processed.provenance(), &registry).unwrap();
        assert_eq!(replayed.fingerprint(), processed.fingerprint());

        let mut drifted = base.clone();
        drifted.dataset_mut("a").unwrap().data[[0, 0]] = 42.0;
        let err = replay(&drifted, processed.provenance(), &registry).unwrap_err();
        assert!(matches!(err, WrightError::ReplayDivergence { index: 0, .. }));
    }

    #[test]
    fn steps_deserialize_with_op_key() {
        let step: OpStep = serde_json::from_str(r#"{"op": "scale", "params": {"factor": 2}}"#).unwrap();
        assert_eq!(step, OpStep::new("scale").with_param("factor", ParamValue::Int(2)));
    }
}
