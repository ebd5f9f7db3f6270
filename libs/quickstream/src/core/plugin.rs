//! Dynamic module loading
//!
//! Given a module spec (a name or a path), find a loadable object and
//! produce a module instance. Resolution order:
//!
//! 1. the built-in [registry](super::registry) under the bare name,
//! 2. the spec as a literal path,
//! 3. each directory in `QS_FILTER_PATH` (or `QS_CONTROLLER_PATH`),
//!    then `QS_MODULE_PATH`, then `QS_RUN_PATH` (colon-separated
//!    lists),
//! 4. a `filters/` (or `controllers/`) directory next to the running
//!    executable, via `/proc/self/exe` on Linux.
//!
//! A dynamic library must export a [`PluginDeclaration`] static named
//! `QUICKSTREAM_PLUGIN`. The declaration's factory is called once per
//! load, so loading the same file twice yields two instances with
//! independent state.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use super::controller::ControllerModule;
use super::error::{Error, Result};
use super::filter::FilterModule;
use super::registry;

/// Bumped whenever the plugin contract changes shape.
pub const QUICKSTREAM_ABI_VERSION: u32 = 1;

/// The static a plugin library exports as `QUICKSTREAM_PLUGIN`.
///
/// ```ignore
/// #[no_mangle]
/// pub static QUICKSTREAM_PLUGIN: PluginDeclaration = PluginDeclaration {
///     abi_version: QUICKSTREAM_ABI_VERSION,
///     create_filter: Some(|| Arc::new(MyFilter::default())),
///     create_controller: None,
/// };
/// ```
pub struct PluginDeclaration {
    pub abi_version: u32,
    pub create_filter: Option<fn() -> Arc<dyn FilterModule>>,
    pub create_controller: Option<fn() -> Arc<dyn ControllerModule>>,
}

const PLUGIN_SYMBOL: &[u8] = b"QUICKSTREAM_PLUGIN\0";

#[derive(Clone, Copy)]
pub(crate) enum ModuleKind {
    Filter,
    Controller,
}

impl ModuleKind {
    fn subdir(self) -> &'static str {
        match self {
            ModuleKind::Filter => "filters",
            ModuleKind::Controller => "controllers",
        }
    }

    fn env_path(self) -> &'static str {
        match self {
            ModuleKind::Filter => "QS_FILTER_PATH",
            ModuleKind::Controller => "QS_CONTROLLER_PATH",
        }
    }
}

/// The name a module gets when the user does not pick one: the file
/// stem of its spec.
pub(crate) fn derive_name(spec: &str) -> String {
    Path::new(spec)
        .file_stem()
        .map_or_else(|| spec.to_string(), |s| s.to_string_lossy().into_owned())
}

fn candidate_paths(spec: &str, kind: ModuleKind) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(spec)];

    let with_ext = if spec.ends_with(".so") {
        None
    } else {
        Some(format!("{spec}.so"))
    };

    for var in [kind.env_path(), "QS_MODULE_PATH", "QS_RUN_PATH"] {
        if let Ok(paths) = env::var(var) {
            for dir in paths.split(':').filter(|d| !d.is_empty()) {
                candidates.push(Path::new(dir).join(spec));
                if let Some(ext) = &with_ext {
                    candidates.push(Path::new(dir).join(ext));
                }
            }
        }
    }

    // Fall back to a directory derived from the running executable.
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sub = dir.join(kind.subdir());
            candidates.push(sub.join(spec));
            if let Some(ext) = &with_ext {
                candidates.push(sub.join(ext));
            }
        }
    }

    candidates
}

fn open_declaration(path: &Path) -> Result<(Arc<Library>, &'static PluginDeclaration)> {
    // SAFETY: loading arbitrary libraries is inherently trusted; the
    // declaration pointer is validated before use and the library is
    // kept alive by the returned Arc for as long as any module from it
    // exists.
    unsafe {
        let lib = Library::new(path)
            .map_err(|e| Error::Load(format!("{}: {e}", path.display())))?;
        let decl = lib
            .get::<*const PluginDeclaration>(PLUGIN_SYMBOL)
            .map_err(|e| {
                Error::Load(format!("{}: no QUICKSTREAM_PLUGIN symbol: {e}", path.display()))
            })?;
        let decl: &'static PluginDeclaration = &**decl;
        if decl.abi_version != QUICKSTREAM_ABI_VERSION {
            return Err(Error::Load(format!(
                "{}: plugin ABI {} does not match runtime ABI {}",
                path.display(),
                decl.abi_version,
                QUICKSTREAM_ABI_VERSION
            )));
        }
        Ok((Arc::new(lib), decl))
    }
}

pub(crate) fn load_filter_module(
    spec: &str,
) -> Result<(Arc<dyn FilterModule>, Option<Arc<Library>>)> {
    if let Some(module) = registry::make_filter(spec) {
        debug!(name = spec, "loaded filter from built-in registry");
        return Ok((module, None));
    }
    for path in candidate_paths(spec, ModuleKind::Filter) {
        if !path.is_file() {
            continue;
        }
        let (lib, decl) = open_declaration(&path)?;
        let create = decl.create_filter.ok_or_else(|| {
            Error::Load(format!("{}: plugin has no filter factory", path.display()))
        })?;
        debug!(path = %path.display(), "loaded filter plugin");
        return Ok((create(), Some(lib)));
    }
    Err(Error::Load(format!("filter module \"{spec}\" not found")).record())
}

pub(crate) fn load_controller_module(
    spec: &str,
) -> Result<(Arc<dyn ControllerModule>, Option<Arc<Library>>)> {
    if let Some(module) = registry::make_controller(spec) {
        debug!(name = spec, "loaded controller from built-in registry");
        return Ok((module, None));
    }
    for path in candidate_paths(spec, ModuleKind::Controller) {
        if !path.is_file() {
            continue;
        }
        let (lib, decl) = open_declaration(&path)?;
        let create = decl.create_controller.ok_or_else(|| {
            Error::Load(format!("{}: plugin has no controller factory", path.display()))
        })?;
        debug!(path = %path.display(), "loaded controller plugin");
        return Ok((create(), Some(lib)));
    }
    Err(Error::Load(format!("controller module \"{spec}\" not found")).record())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name_strips_dir_and_extension() {
        assert_eq!(derive_name("/usr/lib/quickstream/filters/count.so"), "count");
        assert_eq!(derive_name("count"), "count");
        assert_eq!(derive_name("./a/b/tee.so"), "tee");
    }

    #[test]
    fn test_missing_module_is_load_error() {
        let err = load_filter_module("definitely-not-a-module");
        assert!(matches!(err, Err(Error::Load(_))));
    }

    #[test]
    fn test_search_path_finds_file_but_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bogus.so"), b"not an ELF").unwrap();
        std::env::set_var("QS_FILTER_PATH", dir.path());

        // The search resolves the file, and the loader then reports
        // that it is not a loadable library.
        let err = load_filter_module("bogus");
        std::env::remove_var("QS_FILTER_PATH");
        match err {
            Err(Error::Load(msg)) => assert!(msg.contains("bogus.so"), "got: {msg}"),
            Err(e) => panic!("expected Load error, got {e}"),
            Ok(_) => panic!("expected Load error, got a module"),
        }
    }
}
