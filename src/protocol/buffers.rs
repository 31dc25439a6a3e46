//! Per-run tool-call argument buffers.

use std::collections::HashMap;

/// Argument fragments of the tool calls currently streaming, by call id.
///
/// A buffer accepts appends between `open` and `flush`; flushing hands out the
/// final string and closes the buffer, so later fragments for the same id
/// are refused.
#[derive(Debug, Default, Clone)]
pub struct ToolCallBuffers {
    open: HashMap<String, String>,
}

impl ToolCallBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start buffering `id`. Returns false if it is already open.
    pub fn open(&mut self, id: &str) -> bool {
        if self.open.contains_key(id) {
            return false;
        }
        self.open.insert(id.to_string(), String::new());
        true
    }

    /// Returns false for ids that are not open.
    pub fn append(&mut self, id: &str, delta: &str) -> bool {
        match self.open.get_mut(id) {
            Some(buffer) => {
                buffer.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Close `id` and return its complete arguments.
    pub fn flush(&mut self, id: &str) -> Option<String> {
        self.open.remove(id)
    }

    pub fn discard(&mut self, id: &str) -> bool {
        self.open.remove(id).is_some()
    }

    /// Drop every open buffer without finalizing it; returns the dropped ids.
    pub fn discard_all(&mut self) -> Vec<String> {
        self.open.drain().map(|(id, _)| id).collect()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
