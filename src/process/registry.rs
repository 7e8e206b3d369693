use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::ops;
use super::params::{ParamReader, ParameterSchema, Params};
use crate::data::container::{join_path, Container};
use crate::error::{Result, WrightError};

/// How an operation changes the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Rewrites existing datasets or attributes.
    InPlace,
    /// Adds a new dataset next to its input.
    DerivesDataset,
    /// Adds a new sub-group under the target.
    DerivesGroup,
}

/// What the target group must hold before an operation may run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputContract {
    pub min_channels: usize,
    /// At least one candidate channel must have this many dimensions.
    pub min_rank: usize,
    /// Parameters whose value must name a channel in the target group.
    pub channel_params: Vec<String>,
    /// Parameters whose value must name an axis visible from the target.
    pub axis_params: Vec<String>,
    /// Parameters whose value must name a dataset under the target.
    pub dataset_params: Vec<String>,
}

impl InputContract {
    pub fn channels(min: usize) -> Self {
        InputContract {
            min_channels: min,
            ..InputContract::default()
        }
    }

    pub fn rank(mut self, min_rank: usize) -> Self {
        self.min_rank = min_rank;
        self
    }

    pub fn channel_param(mut self, name: &str) -> Self {
        self.channel_params.push(name.to_string());
        self
    }

    pub fn axis_param(mut self, name: &str) -> Self {
        self.axis_params.push(name.to_string());
        self
    }

    pub fn dataset_param(mut self, name: &str) -> Self {
        self.dataset_params.push(name.to_string());
        self
    }

    /// Check the container's current state for `operation` on `target`.
    pub fn check(
        &self,
        operation: &str,
        container: &Container,
        target: &str,
        params: &Params,
    ) -> Result<()> {
        let mismatch = |reason: String| WrightError::ContractMismatch {
            operation: operation.to_string(),
            target: format!("/{}", target.trim_matches('/')),
            reason,
        };
        let group = container.group(target)?;
        let reader = ParamReader::new(operation, params);

        let channel_count = group.channels().count();
        if channel_count < self.min_channels {
            return Err(mismatch(format!(
                "needs at least {} channel dataset(s), found {channel_count}",
                self.min_channels
            )));
        }

        for name in &self.channel_params {
            if let Some(channel) = reader.opt_str(name) {
                match group.dataset(channel) {
                    Some(d) if d.is_channel() => {}
                    Some(_) => return Err(mismatch(format!("'{channel}' is an axis, not a channel"))),
                    None => return Err(mismatch(format!("no channel named '{channel}'"))),
                }
            }
        }

        if self.min_rank > 0 {
            let candidates: Vec<_> = match self
                .channel_params
                .iter()
                .find_map(|name| reader.opt_str(name))
            {
                Some(channel) => group.dataset(channel).into_iter().collect(),
                None => group.channels().collect(),
            };
            if !candidates.iter().any(|d| d.ndim() >= self.min_rank) {
                return Err(mismatch(format!(
                    "needs a channel with at least {} dimension(s)",
                    self.min_rank
                )));
            }
        }

        for name in &self.axis_params {
            if let Some(axis) = reader.opt_str(name) {
                if container.resolve_axis(target, axis).is_none() {
                    return Err(mismatch(format!("no axis named '{axis}' is visible")));
                }
            }
        }

        for name in &self.dataset_params {
            if let Some(dataset) = reader.opt_str(name) {
                if container.dataset(&join_path(target, dataset)).is_err() {
                    return Err(mismatch(format!("no dataset named '{dataset}'")));
                }
            }
        }
        Ok(())
    }
}

/// Everything a transformation gets besides the container.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub operation: &'a str,
    /// Group path the step runs against ("" is the root).
    pub target: &'a str,
    /// Parameters already validated and defaulted.
    pub params: &'a Params,
}

impl<'a> Invocation<'a> {
    pub fn params(&self) -> ParamReader<'a> {
        ParamReader::new(self.operation, self.params)
    }
}

pub type Transform = Arc<dyn Fn(&mut Container, &Invocation<'_>) -> Result<()> + Send + Sync>;

/// A registered, immutable operation.
#[derive(Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub summary: String,
    pub effect: Effect,
    pub contract: InputContract,
    pub schema: ParameterSchema,
    transform: Transform,
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("effect", &self.effect)
            .field("contract", &self.contract)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl OperationDescriptor {
    pub fn new<F>(name: &str, summary: &str, effect: Effect, transform: F) -> Self
    where
        F: Fn(&mut Container, &Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        OperationDescriptor {
            name: name.to_string(),
            summary: summary.to_string(),
            effect,
            contract: InputContract::default(),
            schema: ParameterSchema::default(),
            transform: Arc::new(transform),
        }
    }

    pub fn with_contract(mut self, contract: InputContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn run(&self, container: &mut Container, invocation: &Invocation<'_>) -> Result<()> {
        (self.transform)(container, invocation)
    }
}

/// Name → descriptor catalog. Filled at start-up, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    ops: BTreeMap<String, OperationDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// A registry holding every built-in operation.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        for descriptor in ops::builtins() {
            registry.ops.insert(descriptor.name.clone(), descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: OperationDescriptor) -> Result<()> {
        if self.ops.contains_key(&descriptor.name) {
            return Err(WrightError::DuplicateOperation {
                name: descriptor.name,
            });
        }
        debug!("registered operation '{}'", descriptor.name);
        self.ops.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&OperationDescriptor> {
        self.ops.get(name).ok_or_else(|| WrightError::UnknownOperation {
            name: name.to_string(),
            step: None,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.ops.values()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
