//! Built-in module registry
//!
//! Name → factory maps for filters and controllers compiled into the
//! crate (or registered by embedding code, e.g. tests). The app's
//! loader consults this registry before falling back to dynamic
//! libraries, so `load_filter("count")` works without any file on
//! disk.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::controller::ControllerModule;
use super::filter::FilterModule;

pub type FilterFactory = Arc<dyn Fn() -> Arc<dyn FilterModule> + Send + Sync>;
pub type ControllerFactory = Arc<dyn Fn() -> Arc<dyn ControllerModule> + Send + Sync>;

#[derive(Default)]
struct Registry {
    filters: HashMap<String, FilterFactory>,
    controllers: HashMap<String, ControllerFactory>,
}

static GLOBAL_REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn global() -> &'static Mutex<Registry> {
    GLOBAL_REGISTRY.get_or_init(|| {
        let mut reg = Registry::default();
        crate::filters::register_builtins(&mut |name, factory| {
            reg.filters.insert(name.to_string(), factory);
        });
        crate::controllers::register_builtins(&mut |name, factory| {
            reg.controllers.insert(name.to_string(), factory);
        });
        Mutex::new(reg)
    })
}

/// Register a filter factory under `name`, replacing any previous
/// registration.
pub fn register_filter(name: &str, factory: FilterFactory) {
    global().lock().filters.insert(name.to_string(), factory);
}

/// Register a controller factory under `name`.
pub fn register_controller(name: &str, factory: ControllerFactory) {
    global().lock().controllers.insert(name.to_string(), factory);
}

/// Instantiate a registered filter. Each call returns a fresh instance.
pub fn make_filter(name: &str) -> Option<Arc<dyn FilterModule>> {
    let factory = global().lock().filters.get(name).cloned();
    factory.map(|f| f())
}

/// Instantiate a registered controller.
pub fn make_controller(name: &str) -> Option<Arc<dyn ControllerModule>> {
    let factory = global().lock().controllers.get(name).cloned();
    factory.map(|f| f())
}

/// Names of all registered filters, sorted.
pub fn list_filters() -> Vec<String> {
    let mut names: Vec<String> = global().lock().filters.keys().cloned().collect();
    names.sort();
    names
}

/// Names of all registered controllers, sorted.
pub fn list_controllers() -> Vec<String> {
    let mut names: Vec<String> = global().lock().controllers.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let filters = list_filters();
        for name in ["count", "passthrough", "copy", "sink"] {
            assert!(filters.iter().any(|f| f == name), "missing builtin {name}");
        }
        let controllers = list_controllers();
        for name in ["log", "bytes_rate"] {
            assert!(
                controllers.iter().any(|c| c == name),
                "missing builtin {name}"
            );
        }
    }

    #[test]
    fn test_each_make_is_a_fresh_instance() {
        let a = make_filter("count").unwrap();
        let b = make_filter("count").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
