//! The [`Host`] a single execution runs against.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::functions::{CallContext, CapabilityTable};
use crate::script::{CallArgs, Host, Resource, ScriptError, Value};

use super::Limits;

/// How often (in steps) the clock and the cancel flag are consulted.
const CHECK_INTERVAL: u64 = 256;

/// Captured `print` output with a byte ceiling.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self { text: String::new(), limit }
    }

    pub fn push(&mut self, text: &str) -> Result<(), ScriptError> {
        if self.text.len().saturating_add(text.len()) > self.limit {
            return Err(ScriptError::resource(Resource::Output));
        }
        self.text.push_str(text);
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

pub(crate) struct Session<'a> {
    capabilities: &'a CapabilityTable,
    calls: CallContext,
    output: OutputBuffer,
    steps: u64,
    max_steps: u64,
    max_collection_len: usize,
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(capabilities: &'a CapabilityTable, limits: &Limits, cancel: Arc<AtomicBool>) -> Self {
        Self {
            capabilities,
            calls: CallContext::new(limits.max_samples_per_call, limits.max_total_samples),
            output: OutputBuffer::new(limits.max_output_bytes),
            steps: 0,
            max_steps: limits.max_steps,
            max_collection_len: limits.max_collection_len,
            deadline: Instant::now().checked_add(limits.timeout),
            cancel,
        }
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn into_output(self) -> String {
        self.output.into_string()
    }

    fn out_of_time(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Host for Session<'_> {
    fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    fn call(&mut self, name: &str, args: CallArgs) -> Result<Value, ScriptError> {
        // Capability work can be long; re-check the clock on the way in and out.
        if self.out_of_time() {
            return Err(ScriptError::resource(Resource::Time));
        }
        let value = self.capabilities.call(name, args, &mut self.calls)?;
        if self.out_of_time() {
            return Err(ScriptError::resource(Resource::Time));
        }
        Ok(value)
    }

    fn write(&mut self, text: &str) -> Result<(), ScriptError> {
        self.output.push(text)
    }

    fn step(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ScriptError::resource(Resource::Steps));
        }
        if self.steps % CHECK_INTERVAL == 0 && self.out_of_time() {
            return Err(ScriptError::resource(Resource::Time));
        }
        Ok(())
    }

    fn max_collection_len(&self) -> usize {
        self.max_collection_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn output_buffer_enforces_its_ceiling() {
        let mut buffer = OutputBuffer::new(8);
        buffer.push("12345").unwrap();
        buffer.push("678").unwrap();
        let err = buffer.push("9").unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Output));
        assert_eq!(buffer.as_str(), "12345678");
    }

    #[test]
    fn cancel_flag_stops_at_the_next_check() {
        let table = CapabilityTable::with_defaults();
        let cancel = Arc::new(AtomicBool::new(false));
        let limits = Limits { timeout: Duration::from_secs(60), ..Limits::default() };
        let mut session = Session::new(&table, &limits, cancel.clone());
        for _ in 0..CHECK_INTERVAL {
            session.step().unwrap();
        }
        cancel.store(true, Ordering::Relaxed);
        let err = (0..CHECK_INTERVAL).find_map(|_| session.step().err()).unwrap();
        assert_eq!(err.resource_kind(), Some(Resource::Time));
    }

    #[test]
    fn step_ceiling_is_exact() {
        let table = CapabilityTable::empty();
        let limits = Limits { max_steps: 3, ..Limits::default() };
        let mut session = Session::new(&table, &limits, Arc::default());
        for _ in 0..3 {
            session.step().unwrap();
        }
        assert_eq!(session.step().unwrap_err().resource_kind(), Some(Resource::Steps));
        assert_eq!(session.steps(), 4);
    }
}
