/// Format adapters: raw instrument files in, validated containers out.
///
/// ```text
///   path ──► AdapterRegistry::ingest
///              │  explicit name, else extension (case-insensitive)
///              ▼
///   FormatAdapter::parse ──► Container ──► contract check ──► caller
/// ```

pub mod grid;
pub mod spectra;
pub mod traces;

use std::path::Path;

use log::{debug, info};

use crate::data::container::Container;
use crate::error::{Result, WrightError};
use crate::process::params::ParamValue;

/// One raw file format. Implementations build the whole tree and append a
/// single `ingest` provenance record (see `ProvenanceRecord::ingest`).
pub trait FormatAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case extensions, without the dot.
    fn extensions(&self) -> &[&str];

    fn parse(&self, path: &Path) -> anyhow::Result<Container>;
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry::default()
    }

    /// `grid`, `spectra` and `traces`.
    pub fn with_builtins() -> Self {
        AdapterRegistry {
            adapters: vec![
                Box::new(grid::GridAdapter),
                Box::new(spectra::SpectraAdapter),
                Box::new(traces::TracesAdapter),
            ],
        }
    }

    pub fn register(&mut self, adapter: Box<dyn FormatAdapter>) -> Result<()> {
        if self.get(adapter.name()).is_some() {
            return Err(WrightError::DuplicateAdapter {
                name: adapter.name().to_string(),
            });
        }
        debug!("registered adapter '{}'", adapter.name());
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn FormatAdapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    /// First registered adapter claiming the file's extension.
    pub fn for_path(&self, path: &Path) -> Option<&dyn FormatAdapter> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.adapters
            .iter()
            .find(|a| a.extensions().contains(&ext.as_str()))
            .map(|a| a.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Parse `path` with `adapter` (or by extension) and check the result.
    pub fn ingest(&self, path: &Path, adapter: Option<&str>) -> Result<Container> {
        let selected = match adapter {
            Some(name) => self.get(name),
            None => self.for_path(path),
        };
        let Some(selected) = selected else {
            return Err(WrightError::UnsupportedFormat {
                path: path.display().to_string(),
            });
        };

        let container = selected
            .parse(path)
            .map_err(|e| WrightError::AdapterFailed {
                adapter: selected.name().to_string(),
                path: path.display().to_string(),
                reason: format!("{e:#}"),
            })?;
        check_contract(selected.name(), path, &container)?;
        info!(
            "ingested {} via '{}': {} dataset(s)",
            path.display(),
            selected.name(),
            container.datasets().len()
        );
        Ok(container)
    }
}

/// What every adapter output must satisfy.
pub fn check_contract(adapter: &str, path: &Path, container: &Container) -> Result<()> {
    let violation = |reason: String| WrightError::AdapterContractViolation {
        adapter: adapter.to_string(),
        reason,
    };

    container.validate().map_err(|e| violation(e.to_string()))?;
    if container.channels().is_empty() {
        return Err(violation("no channel datasets".into()));
    }

    let [record] = container.provenance() else {
        return Err(violation(format!(
            "expected exactly one provenance record, found {}",
            container.provenance().len()
        )));
    };
    if !record.is_ingest() {
        return Err(violation(format!(
            "first provenance record is '{}', not an ingest record",
            record.operation
        )));
    }
    let text = |key: &str| match record.params.get(key) {
        Some(ParamValue::Text(s)) => Some(s.as_str()),
        _ => None,
    };
    if text("adapter") != Some(adapter) {
        return Err(violation("ingest record does not name this adapter".into()));
    }
    if text("source") != Some(path.display().to_string().as_str()) {
        return Err(violation("ingest record does not name the source file".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Dataset, ProvenanceRecord};
    use ndarray::arr1;
    use std::path::PathBuf;

    /// Builds a fixed container; `well_behaved` controls whether it keeps
    /// the contract.
    struct Fixed {
        name: &'static str,
        well_behaved: bool,
    }

    impl FormatAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn extensions(&self) -> &[&str] {
            &["fix"]
        }

        fn parse(&self, path: &Path) -> anyhow::Result<Container> {
            let mut c = Container::new("fixed");
            c.insert_dataset("", Dataset::axis("x", vec![0.0, 1.0], None))?;
            c.insert_dataset("", Dataset::channel("y", arr1(&[1.0, 2.0]).into_dyn(), None, &["x"]))?;
            if self.well_behaved {
                let record = ProvenanceRecord::ingest(self.name, path, &c);
                c.append_provenance(record);
            }
            Ok(c)
        }
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = AdapterRegistry::with_builtins();
        let err = registry
            .register(Box::new(Fixed { name: "grid", well_behaved: true }))
            .unwrap_err();
        assert!(matches!(err, WrightError::DuplicateAdapter { ref name } if name == "grid"));
    }

    #[test]
    fn dispatch_by_extension_ignores_case() {
        let registry = AdapterRegistry::with_builtins();
        assert_eq!(registry.for_path(Path::new("a/scan.CSV")).map(|a| a.name()), Some("grid"));
        assert_eq!(registry.for_path(Path::new("s.pq")).map(|a| a.name()), Some("spectra"));
        assert!(registry.for_path(Path::new("noext")).is_none());
        let err = registry.ingest(Path::new("file.xyz"), None).unwrap_err();
        assert!(matches!(err, WrightError::UnsupportedFormat { .. }));
    }

    #[test]
    fn ingest_enforces_the_contract() {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(Fixed { name: "good", well_behaved: true })).unwrap();
        registry.register(Box::new(Fixed { name: "bad", well_behaved: false })).unwrap();
        let path = PathBuf::from("data.fix");

        let c = registry.ingest(&path, None).unwrap();
        assert_eq!(c.provenance().len(), 1);

        let err = registry.ingest(&path, Some("bad")).unwrap_err();
        assert!(matches!(err, WrightError::AdapterContractViolation { ref adapter, .. } if adapter == "bad"));
    }

    #[test]
    fn parser_errors_name_adapter_and_path() {
        let registry = AdapterRegistry::with_builtins();
        let err = registry.ingest(Path::new("/no/such/file.csv"), None).unwrap_err();
        match err {
            WrightError::AdapterFailed { adapter, path, .. } => {
                assert_eq!(adapter, "grid");
                assert_eq!(path, "/no/such/file.csv");
            }
            other => panic!("unexpected {other}"),
        }
    }
}
