//! Framework session collaborator.

use std::collections::HashMap;

use serde_json::Value;

/// Key/value session storage with an anti-forgery token.
pub trait Session: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<&Value>;

    /// Store a value.
    fn insert(&mut self, key: &str, value: Value);

    /// Remove and return a value.
    fn remove(&mut self, key: &str) -> Option<Value>;

    /// Whether a key is present.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop all session data, including the anti-forgery token.
    fn invalidate(&mut self);

    /// Issue a fresh anti-forgery token and return it.
    fn new_csrf_token(&mut self) -> String;

    /// The current anti-forgery token.
    fn csrf_token(&self) -> Option<&str>;
}

/// Process-local session.
#[derive(Debug, Default, Clone)]
pub struct MemorySession {
    data: HashMap<String, Value>,
    csrf_token: Option<String>,
}

impl MemorySession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    fn insert(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    fn invalidate(&mut self) {
        self.data.clear();
        self.csrf_token = None;
    }

    fn new_csrf_token(&mut self) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.csrf_token = Some(token.clone());
        token
    }

    fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }
}
