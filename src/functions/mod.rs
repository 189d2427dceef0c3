//! Capability table: the only callables a script can see.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::script::{CallArgs, ErrorKind, Resource, ScriptError, Value};
use crate::simulation::{self, OscillatorConfig, Trajectory};

/// Per-execution bookkeeping handed to every capability call.
#[derive(Debug, Clone)]
pub struct CallContext {
    max_samples_per_call: u64,
    remaining_samples: u64,
}

impl CallContext {
    pub fn new(max_samples_per_call: u64, max_total_samples: u64) -> Self {
        Self { max_samples_per_call, remaining_samples: max_total_samples }
    }

    /// Claim room for `samples` trajectory samples out of the execution's budget.
    pub fn reserve_samples(&mut self, samples: u64) -> Result<(), ScriptError> {
        if samples > self.max_samples_per_call || samples > self.remaining_samples {
            return Err(ScriptError::new(
                ErrorKind::ResourceExceeded(Resource::Memory),
                format!(
                    "trajectory of up to {samples} samples exceeds the sample budget ({} per call, {} remaining)",
                    self.max_samples_per_call, self.remaining_samples
                ),
            ));
        }
        self.remaining_samples -= samples;
        Ok(())
    }

    /// Hand back the part of a reservation a call did not use.
    pub fn release_samples(&mut self, samples: u64) {
        self.remaining_samples = self.remaining_samples.saturating_add(samples);
    }

    pub fn remaining_samples(&self) -> u64 {
        self.remaining_samples
    }
}

/// A host function exposed to scripts by name.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str> {
        None
    }
    /// JSON schema of the keyword arguments.
    fn parameters(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    fn call(&self, args: CallArgs, ctx: &mut CallContext) -> Result<Value, ScriptError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<String, Arc<dyn Capability>>,
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl CapabilityTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard table: `simulate` and nothing else.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.insert(SimulateCapability);
        table
    }

    /// Register a capability under its own name, replacing any previous one.
    pub fn insert<C: Capability + 'static>(&mut self, capability: C) {
        self.entries.insert(capability.name().to_string(), Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn schemas(&self) -> Vec<CapabilitySchema> {
        self.entries
            .values()
            .map(|c| CapabilitySchema {
                name: c.name().to_string(),
                description: c.description().map(str::to_string),
                parameters: c.parameters(),
            })
            .collect()
    }

    pub fn call(&self, name: &str, args: CallArgs, ctx: &mut CallContext) -> Result<Value, ScriptError> {
        let capability = self
            .get(name)
            .ok_or_else(|| ScriptError::name(format!("name '{name}' is not defined")))?;
        debug!(capability = name, "capability call");
        capability.call(args, ctx)
    }
}

/// `simulate(mass, damping, stiffness, x0, v0, t_end, dt)` returning
/// `{"time": [...], "position": [...]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulateCapability;

impl SimulateCapability {
    pub const NAME: &'static str = "simulate";

    /// Bind call arguments onto the defaults, Python style: positionals in
    /// field order, then keywords by name.
    pub fn bind(args: CallArgs) -> Result<OscillatorConfig, ScriptError> {
        let fields = OscillatorConfig::FIELDS;
        if args.positional.len() > fields.len() {
            return Err(ScriptError::type_error(format!(
                "simulate() takes at most {} arguments ({} given)",
                fields.len(),
                args.positional.len()
            )));
        }

        let mut config = OscillatorConfig::default();
        let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
        for (name, value) in fields.iter().copied().zip(&args.positional) {
            config.set_field(name, number(name, value)?);
            seen.push(name);
        }
        for (key, value) in &args.keywords {
            let Some(name) = fields.iter().copied().find(|f| *f == key.as_str()) else {
                return Err(ScriptError::type_error(format!(
                    "simulate() got an unexpected keyword argument '{key}'"
                )));
            };
            if seen.contains(&name) {
                return Err(ScriptError::type_error(format!(
                    "simulate() got multiple values for argument '{name}'"
                )));
            }
            config.set_field(name, number(name, value)?);
            seen.push(name);
        }
        Ok(config)
    }
}

fn number(name: &str, value: &Value) -> Result<f64, ScriptError> {
    value.as_number().ok_or_else(|| {
        ScriptError::type_error(format!(
            "argument '{name}' must be a number, not {}",
            value.type_name()
        ))
    })
}

fn trajectory_value(trajectory: &Trajectory) -> Value {
    Value::dict([
        ("time", Value::from(trajectory.times())),
        ("position", Value::from(trajectory.positions())),
    ])
}

impl Capability for SimulateCapability {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> Option<&str> {
        Some("Integrate a damped spring-mass system and return its time and position series.")
    }

    fn parameters(&self) -> serde_json::Value {
        let defaults = OscillatorConfig::default();
        let properties: serde_json::Map<String, serde_json::Value> = OscillatorConfig::FIELDS
            .iter()
            .map(|name| {
                let default = defaults.field(name).unwrap_or_default();
                (name.to_string(), serde_json::json!({ "type": "number", "default": default }))
            })
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [],
        })
    }

    fn call(&self, args: CallArgs, ctx: &mut CallContext) -> Result<Value, ScriptError> {
        let config = Self::bind(args)?;
        config.validate().map_err(|e| ScriptError::value(e.to_string()))?;
        // `t` accumulates by addition, so the run can emit one sample past the estimate
        let reserved = config.estimated_samples().saturating_add(1);
        ctx.reserve_samples(reserved)?;
        let trajectory = simulation::simulate(&config).map_err(|e| ScriptError::value(e.to_string()))?;
        ctx.release_samples(reserved.saturating_sub(trajectory.len() as u64));
        debug!(samples = trajectory.len(), t_end = config.t_end, dt = config.dt, "simulate finished");
        Ok(trajectory_value(&trajectory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext {
        CallContext::new(1_000_000, 5_000_000)
    }

    fn kwargs(pairs: &[(&str, Value)]) -> CallArgs {
        CallArgs {
            positional: Vec::new(),
            keywords: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn default_table_exposes_only_simulate() {
        let table = CapabilityTable::with_defaults();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["simulate"]);
        let schemas = table.schemas();
        assert_eq!(schemas[0].parameters["properties"]["mass"]["default"], serde_json::json!(1.0));
    }

    #[test]
    fn binds_positional_then_keyword_arguments() {
        let args = CallArgs {
            positional: vec![Value::Float(2.0), Value::Int(0)],
            keywords: vec![("dt".into(), Value::Float(0.5))],
        };
        let config = SimulateCapability::bind(args).unwrap();
        assert_eq!(config.mass, 2.0);
        assert_eq!(config.damping, 0.0);
        assert_eq!(config.dt, 0.5);
        assert_eq!(config.stiffness, OscillatorConfig::default().stiffness);
    }

    #[test]
    fn rejects_unknown_duplicate_and_non_numeric_arguments() {
        let err = SimulateCapability::bind(kwargs(&[("spring", Value::Int(1))])).unwrap_err();
        assert_eq!(err.message, "simulate() got an unexpected keyword argument 'spring'");

        let args = CallArgs { positional: vec![Value::Int(1)], keywords: vec![("mass".into(), Value::Int(2))] };
        let err = SimulateCapability::bind(args).unwrap_err();
        assert!(err.message.contains("multiple values for argument 'mass'"));

        let err = SimulateCapability::bind(kwargs(&[("dt", Value::from("fast"))])).unwrap_err();
        assert_eq!(err.message, "argument 'dt' must be a number, not str");
    }

    #[test]
    fn returns_time_and_position_columns() {
        let value = SimulateCapability
            .call(kwargs(&[("t_end", Value::Float(1.0)), ("dt", Value::Float(0.1))]), &mut ctx())
            .unwrap();
        let json = value.to_json();
        assert_eq!(json["time"].as_array().map(Vec::len), Some(11));
        assert_eq!(json["position"][0], serde_json::json!(1.0));
    }

    #[test]
    fn zero_mass_is_a_value_error() {
        let err = SimulateCapability.call(kwargs(&[("mass", Value::Int(0))]), &mut ctx()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert_eq!(err.message, "mass must be greater than zero, got 0");
    }

    #[test]
    fn sample_budget_is_shared_across_calls() {
        // t_end / dt = 4 exactly: 5 samples, with room for 6 reserved up front
        let mut ctx = CallContext::new(6, 11);
        let args = || kwargs(&[("t_end", Value::Float(0.5)), ("dt", Value::Float(0.125))]);
        SimulateCapability.call(args(), &mut ctx).unwrap();
        assert_eq!(ctx.remaining_samples(), 6);
        SimulateCapability.call(args(), &mut ctx).unwrap();
        assert_eq!(ctx.remaining_samples(), 1);
        let err = SimulateCapability.call(args(), &mut ctx).unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Memory));

        let long = kwargs(&[("t_end", Value::Float(10.0)), ("dt", Value::Float(0.125))]);
        let err = SimulateCapability.call(long, &mut CallContext::new(5, 1_000)).unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Memory));
    }

    #[test]
    fn budget_counts_the_sample_past_the_estimate() {
        // 0.7 / 0.1 rounds down to 6, but accumulated time stays under 0.7 for 8 samples
        let args = || kwargs(&[("t_end", Value::Float(0.7)), ("dt", Value::Float(0.1))]);
        let mut ctx = CallContext::new(8, 10);
        let Value::Dict(result) = SimulateCapability.call(args(), &mut ctx).unwrap() else {
            panic!("expected a dict");
        };
        let Some((_, Value::List(times))) = result.iter().find(|(k, _)| k == "time") else {
            panic!("expected a time column");
        };
        assert_eq!(times.len(), 8);
        assert_eq!(ctx.remaining_samples(), 2);

        let err = SimulateCapability.call(args(), &mut CallContext::new(7, 100)).unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Memory));
    }
}
