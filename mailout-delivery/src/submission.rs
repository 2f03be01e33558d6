//! One accepted form POST and the data templates see.

use std::collections::BTreeMap;

use serde::Serialize;

/// Request context exposed to templates as `request`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub remote_addr: String,
    pub user_agent: String,
    pub host: String,
    pub path: String,
}

/// A validated submission waiting in the worker queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    fields: Vec<(String, String)>,
    request: RequestInfo,
}

impl Submission {
    /// Build a submission from decoded form pairs, in the order received.
    #[must_use]
    pub const fn new(fields: Vec<(String, String)>, request: RequestInfo) -> Self {
        Self { fields, request }
    }

    /// First value of `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The submitter's address, trimmed. Empty if absent.
    pub fn email(&self) -> &str {
        self.value("email").map_or("", str::trim)
    }

    /// The submitter's name, trimmed. Empty if absent.
    pub fn name(&self) -> &str {
        self.value("name").map_or("", str::trim)
    }

    pub const fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Template context: every field at the top level with its first value,
    /// plus `form`, `form_all` and `request`.
    pub fn template_context(&self) -> tera::Context {
        let mut form = BTreeMap::<&str, &str>::new();
        let mut form_all = BTreeMap::<&str, Vec<&str>>::new();
        for (key, value) in &self.fields {
            form.entry(key.as_str()).or_insert(value.as_str());
            form_all.entry(key.as_str()).or_default().push(value.as_str());
        }

        let mut context = tera::Context::new();
        for (key, value) in &form {
            context.insert(*key, value);
        }
        context.insert("form", &form);
        context.insert("form_all", &form_all);
        context.insert("request", &self.request);
        context
    }
}
