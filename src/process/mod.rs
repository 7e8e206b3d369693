/// Processing layer: named operations applied to containers as recorded
/// chains.
///
/// ```text
///   OpStep ──► Registry::lookup ──► ParameterSchema::validate
///                                        │
///                                        ▼
///                      InputContract::check(container, target)
///                                        │
///                                        ▼
///                 transform(&mut Container) ──► ProvenanceRecord
/// ```

pub mod chain;
pub mod ops;
pub mod params;
pub mod registry;
pub mod units;

pub use chain::{apply_chain, apply_chain_atomic, replay, ChainReport, OpStep};
pub use params::{ParamKind, ParamSpec, ParamValue, ParameterSchema, Params};
pub use registry::{Effect, InputContract, Invocation, OperationDescriptor, Registry};
