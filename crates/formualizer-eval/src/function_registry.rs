//! Case-insensitive function registry. Function names are normalized to
//! uppercase and any `_xlfn.` prefix is stripped before lookup, matching
//! how Excel round-trips functions newer than its original function set.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::function::Function;

static REGISTRY: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(DashMap::new);

fn normalize(name: &str) -> String {
    let stripped = name.strip_prefix("_xlfn.").unwrap_or(name);
    stripped.to_ascii_uppercase()
}

pub fn register(f: Arc<dyn Function>) {
    REGISTRY.insert(normalize(f.name()), f);
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    REGISTRY.get(&normalize(name)).map(|v| Arc::clone(v.value()))
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.contains_key(&normalize(name))
}

/// Register the illustrative builtin catalogue. Idempotent — safe to call
/// more than once (e.g. once per `EngineBuilder`).
pub fn register_builtins() {
    crate::builtins::register_all();
}
