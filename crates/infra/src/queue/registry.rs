use std::collections::HashMap;

use serde_json::Value as JsonValue;
use thiserror::Error;

use super::task::{DynTask, Task};

/// A task payload could not be encoded or decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("failed to decode '{task_type}' task: {message}")]
    Decode { task_type: String, message: String },

    #[error("failed to encode '{task_type}' task: {message}")]
    Encode { task_type: String, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

type Decoder = fn(JsonValue) -> Result<Box<dyn DynTask>, serde_json::Error>;

fn decode_as<T: Task>(payload: JsonValue) -> Result<Box<dyn DynTask>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<T>(payload)?))
}

/// Maps task type discriminators to decoders.
///
/// Every task type that may be enqueued must be registered before the queue
/// service sees it; registering the same type twice is an error.
#[derive(Default)]
pub struct TaskRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task>(&mut self) -> Result<(), RegistryError> {
        if self.decoders.contains_key(T::TYPE) {
            return Err(RegistryError::AlreadyRegistered(T::TYPE.to_string()));
        }
        self.decoders.insert(T::TYPE, decode_as::<T>);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: Task>(mut self) -> Result<Self, RegistryError> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.decoders.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Rebuild a task from its stored representation.
    pub fn decode(&self, task_type: &str, payload: &JsonValue) -> Result<Box<dyn DynTask>, CodecError> {
        let decoder = self
            .decoders
            .get(task_type)
            .ok_or_else(|| CodecError::UnknownTaskType(task_type.to_string()))?;
        decoder(payload.clone()).map_err(|e| CodecError::Decode {
            task_type: task_type.to_string(),
            message: e.to_string(),
        })
    }

    /// Serialize a task, checking that its type is registered.
    pub fn encode<T: Task>(&self, task: &T) -> Result<JsonValue, CodecError> {
        if !self.contains(T::TYPE) {
            return Err(CodecError::UnknownTaskType(T::TYPE.to_string()));
        }
        DynTask::encode(task)
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
