use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use ndarray::arr1;
use pretty_assertions::assert_eq;

use wright_core::data::store;
use wright_core::preset::{resolve, Preset};
use wright_core::process::ParamValue;
use wright_core::{
    apply_chain, replay, AdapterRegistry, Container, Dataset, OpStep, Registry, WrightError,
};

/// 10x20 grid with a bright spot, in the grid adapter's text format.
fn write_grid(path: &Path) {
    let mut text = String::from("# instrument = test mapper\n# channel_unit = counts\n");
    let ys: Vec<String> = (0..20).map(|j| format!("{:.1}", j as f64 * 0.5)).collect();
    text.push_str(&format!("x[um]|y[um],{}\n", ys.join(",")));
    for i in 0..10 {
        let row: Vec<String> = (0..20)
            .map(|j| format!("{:.2}", 100.0 + ((i * 7 + j * 3) % 11) as f64))
            .collect();
        text.push_str(&format!("{:.1},{}\n", i as f64 * 0.5, row.join(",")));
    }
    fs::write(path, text).unwrap();
}

fn operations(c: &Container) -> Vec<&str> {
    c.provenance().iter().map(|r| r.operation.as_str()).collect()
}

#[test]
fn grid_file_through_a_preset() {
    let dir = tempfile::tempdir().unwrap();
    let grid = dir.path().join("map.csv");
    write_grid(&grid);
    let preset_path = dir.path().join("quick.json");
    fs::write(&preset_path, r#"["normalize", "smooth(window=3)"]"#).unwrap();

    let registry = Registry::with_builtins();
    let chain = resolve(&Preset::load(&preset_path).unwrap(), &registry).unwrap();
    let mut c = AdapterRegistry::with_builtins().ingest(&grid, None).unwrap();
    apply_chain(&mut c, &chain.steps, &registry).unwrap();

    let signal = c.dataset("signal").unwrap();
    assert_eq!(signal.shape(), &[10, 20]);
    assert_eq!(operations(&c), ["ingest", "normalize", "smooth"]);
    let max = signal.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = signal.data.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(max <= 1.0 && min >= 0.0, "values left [0, 1]: {min}..{max}");

    // persisted and re-opened, the history is intact
    let out = dir.path().join("map.wright.parquet");
    store::save(&c, &out).unwrap();
    let reopened = store::load(&out).unwrap();
    assert_eq!(reopened, c);
    assert_eq!(operations(&reopened), ["ingest", "normalize", "smooth"]);
}

#[test]
fn smooth_without_channels_is_a_contract_mismatch() {
    let mut c = Container::new("axes only");
    c.insert_dataset("", Dataset::axis("x", vec![0.0, 1.0, 2.0], None)).unwrap();
    let err = apply_chain(&mut c, &[OpStep::new("smooth")], &Registry::with_builtins()).unwrap_err();
    assert!(matches!(err, WrightError::ContractMismatch { ref operation, .. } if operation == "smooth"));
    assert!(c.provenance().is_empty());
}

#[test]
fn replaying_a_history_reproduces_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let grid = dir.path().join("map.csv");
    write_grid(&grid);
    let registry = Registry::with_builtins();
    let ingested = AdapterRegistry::with_builtins().ingest(&grid, None).unwrap();

    let steps = vec![
        OpStep::new("crop")
            .with_param("axis", ParamValue::Text("y".into()))
            .with_param("lo", ParamValue::Float(1.0))
            .with_param("hi", ParamValue::Float(6.0)),
        OpStep::new("collapse")
            .with_param("axis", ParamValue::Text("x".into()))
            .with_param("method", ParamValue::Text("average".into())),
        OpStep::new("normalize").on("collapsed_x"),
    ];
    let mut processed = ingested.clone();
    apply_chain(&mut processed, &steps, &registry).unwrap();
    assert_eq!(processed.dataset("y").unwrap().len(), 11);
    assert_eq!(processed.dataset("collapsed_x/signal").unwrap().shape(), &[11]);

    let replayed = replay(&ingested, processed.provenance(), &registry).unwrap();
    assert_eq!(
        replayed.dataset("collapsed_x/signal").unwrap().data,
        processed.dataset("collapsed_x/signal").unwrap().data
    );
    for (a, b) in replayed.provenance().iter().zip(processed.provenance()) {
        assert!(a.same_step(b));
    }
}

#[test]
fn partial_failure_keeps_completed_steps_only() {
    let mut c = Container::new("trace");
    c.insert_dataset("", Dataset::axis("x", vec![0.0, 1.0, 2.0, 3.0], Some("mm")))
        .unwrap();
    c.insert_dataset("", Dataset::channel("h", arr1(&[4.0, 2.0, 6.0, 8.0]).into_dyn(), Some("nm"), &["x"]))
        .unwrap();
    let steps = vec![
        OpStep::new("scale").with_param("factor", ParamValue::Float(0.5)),
        OpStep::new("convert_units")
            .with_param("dataset", ParamValue::Text("x".into()))
            .with_param("to", ParamValue::Text("um".into())),
        OpStep::new("convert_units")
            .with_param("dataset", ParamValue::Text("h".into()))
            .with_param("to", ParamValue::Text("s".into())),
        OpStep::new("relative"),
    ];
    let err = apply_chain(&mut c, &steps, &Registry::with_builtins()).unwrap_err();
    assert!(matches!(err, WrightError::InvalidParameter { .. }));
    assert_eq!(operations(&c), ["scale", "convert_units"]);
    assert_eq!(c.dataset("h").unwrap().unit.as_deref(), Some("nm"));
    assert_relative_eq!(c.dataset("x").unwrap().values()[3], 3000.0, epsilon = 1e-9);
    assert_eq!(c.dataset("h").unwrap().values(), vec![2.0, 1.0, 3.0, 4.0]);
    assert!(c.get("h_rel").is_err());
}

#[test]
fn preset_resolution_does_not_touch_containers() {
    let registry = Registry::with_builtins();
    let preset = Preset::from_yaml(
        "name: profile\nsteps:\n  - op: collapse\n    params: {axis: x, at: 1.0}\n  - scale(factor=2)\n",
    )
    .unwrap();
    let a = resolve(&preset, &registry).unwrap();
    let b = resolve(&preset, &registry).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.steps[1].params.get("factor"), Some(&ParamValue::Float(2.0)));
}

#[test]
fn traces_file_ingests_as_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steps.txt");
    fs::write(
        &path,
        "x z\n[um] [nm]\n0.0 10.5\n0.5 12.5\n1.0 nan\n1.5 11.0\n",
    )
    .unwrap();
    let c = AdapterRegistry::with_builtins().ingest(&path, None).unwrap();
    let z = c.dataset("profile0/z").unwrap();
    assert_eq!(z.len(), 3);
    assert_relative_eq!(c.dataset("profile0/z_rel").unwrap().values()[1], 2.0);
    assert_eq!(c.provenance()[0].operation, "ingest");
}
