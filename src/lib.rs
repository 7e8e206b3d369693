//! Unified container model and processing chains for scientific instrument
//! data.
//!
//! A raw file goes through a [`adapter::FormatAdapter`] into a
//! [`Container`]; presets resolve against the [`Registry`] into chains that
//! transform the container and record provenance along the way.

pub mod adapter;
pub mod data;
pub mod error;
pub mod preset;
pub mod process;

pub use adapter::{AdapterRegistry, FormatAdapter};
pub use data::container::Container;
pub use data::group::{Group, Node, NodeRef};
pub use data::model::{AttrValue, Attrs, Dataset, Direction, ProvenanceRecord, Role};
pub use error::{Result, WrightError};
pub use preset::{resolve, Preset, ResolvedChain, StepSpec};
pub use process::{apply_chain, apply_chain_atomic, replay, ChainReport, OpStep, Registry};
