//! Global name-keyed backend registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::Backend;

type BackendFactory = Box<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;

struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(|| BackendRegistry {
        factories: RwLock::new(HashMap::new()),
    })
}

/// Registers a backend factory under `name`, replacing any previous entry.
pub fn register_backend(
    name: impl Into<String>,
    factory: impl Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
) {
    global()
        .factories
        .write()
        .expect("backend registry poisoned")
        .insert(name.into(), Box::new(factory));
}

/// Instantiates the backend registered under `name`.
pub fn create_backend(name: &str) -> Option<Arc<dyn Backend>> {
    global()
        .factories
        .read()
        .expect("backend registry poisoned")
        .get(name)
        .map(|factory| factory())
}

pub fn has_backend(name: &str) -> bool {
    global()
        .factories
        .read()
        .expect("backend registry poisoned")
        .contains_key(name)
}

/// Registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    let mut names: Vec<String> = global()
        .factories
        .read()
        .expect("backend registry poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}
