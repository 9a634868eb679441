//! Loading a precompiled WebAssembly module's native shared object and
//! resolving the fixed entry-point symbols a sandbox calls into.
//!
//! Mirrors the C `struct awsm_abi` handshake: `dlopen` with
//! `RTLD_LAZY | RTLD_DEEPBIND` so the module's libc calls bind to its own
//! bundled symbols rather than the host's, then `dlsym` for five fixed
//! names. `populate_globals` is optional — whether it is present depends on
//! the compiler flags the module was built with, and there's no way for the
//! loader to tell which configuration to expect, so its absence is not an
//! error. The other four are mandatory.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};

use crate::errors::{ModuleError, ModuleResult};

const SYM_INITIALIZE_GLOBALS: &CStr = c"populate_globals";
const SYM_INITIALIZE_MEMORY: &CStr = c"populate_memory";
const SYM_INITIALIZE_TABLE: &CStr = c"populate_table";
const SYM_INITIALIZE_LIBC: &CStr = c"wasmf___init_libc";
const SYM_ENTRYPOINT: &CStr = c"wasmf_main";

type InitGlobalsFn = unsafe extern "C" fn();
type InitMemoryFn = unsafe extern "C" fn();
type InitTableFn = unsafe extern "C" fn();
type InitLibcFn = unsafe extern "C" fn(c_int, c_int);
type EntrypointFn = unsafe extern "C" fn(c_int, c_int) -> c_int;

/// A loaded module's resolved entry points.
///
/// `handle` is `dlclose`d in [`Drop`], mirroring `awsm_abi_deinit`.
pub struct Module {
    handle: *mut c_void,
    path: String,
    initialize_globals: Option<InitGlobalsFn>,
    initialize_memory: InitMemoryFn,
    initialize_tables: InitTableFn,
    initialize_libc: InitLibcFn,
    entrypoint: EntrypointFn,
}

// The handle and resolved function pointers are read-only after load and
// point at process-wide mapped code; sharing them across threads is sound
// as long as the module itself is reentrant, which is the sandbox's
// contract with its caller, not this loader's.
unsafe impl Send for Module {}
unsafe impl Sync for Module {}

impl Module {
    /// Open the shared object at `path` and resolve its entry points.
    pub fn load(path: &str) -> ModuleResult<Module> {
        let c_path = CString::new(path).map_err(|_| ModuleError::Load {
            path: path.to_owned(),
            reason: "path contains an interior NUL byte".to_owned(),
        })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_DEEPBIND) };
        if handle.is_null() {
            return Err(ModuleError::Load {
                path: path.to_owned(),
                reason: dlerror_message(),
            });
        }

        let result = (|| -> ModuleResult<Module> {
            let entrypoint: EntrypointFn = resolve(handle, path, SYM_ENTRYPOINT)?;
            let initialize_memory: InitMemoryFn = resolve(handle, path, SYM_INITIALIZE_MEMORY)?;
            let initialize_tables: InitTableFn = resolve(handle, path, SYM_INITIALIZE_TABLE)?;
            let initialize_libc: InitLibcFn = resolve(handle, path, SYM_INITIALIZE_LIBC)?;
            let initialize_globals: Option<InitGlobalsFn> =
                resolve_optional(handle, SYM_INITIALIZE_GLOBALS);

            Ok(Module {
                handle,
                path: path.to_owned(),
                initialize_globals,
                initialize_memory,
                initialize_tables,
                initialize_libc,
                entrypoint,
            })
        })();

        if result.is_err() {
            unsafe {
                libc::dlclose(handle);
            }
        }
        result
    }

    /// Run the module's module-instantiation sequence: globals (if present),
    /// linear memory, tables, then libc initialization with the given argc
    /// and the address of its argv block.
    pub fn populate(&self, libc_argc: i32, libc_argv: i32) {
        if let Some(init_globals) = self.initialize_globals {
            unsafe { init_globals() };
        }
        unsafe {
            (self.initialize_memory)();
            (self.initialize_tables)();
            (self.initialize_libc)(libc_argc, libc_argv);
        }
    }

    /// Call the module's `main` entry point.
    pub fn call_entrypoint(&self, argc: i32, argv: i32) -> i32 {
        unsafe { (self.entrypoint)(argc, argv) }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
impl Module {
    /// Build a `Module` whose entry points are all harmless no-ops, for
    /// tests that need something for a `Sandbox` to own without a real
    /// `.so` on disk.
    pub(crate) fn new_for_test() -> Module {
        unsafe extern "C" fn noop_globals() {}
        unsafe extern "C" fn noop_memory() {}
        unsafe extern "C" fn noop_table() {}
        unsafe extern "C" fn noop_libc(_argc: c_int, _argv: c_int) {}
        unsafe extern "C" fn noop_entry(_argc: c_int, _argv: c_int) -> c_int {
            0
        }

        Module {
            handle: std::ptr::null_mut(),
            path: "<test-module>".to_owned(),
            initialize_globals: Some(noop_globals),
            initialize_memory: noop_memory,
            initialize_tables: noop_table,
            initialize_libc: noop_libc,
            entrypoint: noop_entry,
        }
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if self.handle.is_null() {
            // Only reachable via `new_for_test`; nothing was ever opened.
            return;
        }
        let rc = unsafe { libc::dlclose(self.handle) };
        if rc != 0 {
            log::warn!(
                "failed to close module {}: {}",
                self.path,
                dlerror_message()
            );
        }
    }
}

fn resolve<F: Copy>(handle: *mut c_void, path: &str, symbol: &'static CStr) -> ModuleResult<F> {
    resolve_optional::<F>(handle, symbol).ok_or_else(|| ModuleError::Resolve {
        path: path.to_owned(),
        symbol: cstr_to_static_str(symbol),
    })
}

fn resolve_optional<F: Copy>(handle: *mut c_void, symbol: &CStr) -> Option<F> {
    let ptr = unsafe { libc::dlsym(handle, symbol.as_ptr() as *const c_char) };
    if ptr.is_null() {
        return None;
    }
    // SAFETY: `F` is always one of this module's `unsafe extern "C" fn`
    // aliases, which (being function pointers) share layout with `*mut
    // c_void`; the caller picks `F` to match the symbol it asked for.
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) })
}

fn dlerror_message() -> String {
    let ptr = unsafe { libc::dlerror() };
    if ptr.is_null() {
        return "unknown dlerror".to_owned();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

// The `symbol` constants above are all `'static`; this just recovers that
// lifetime after round-tripping through `&CStr` for `dlsym`.
fn cstr_to_static_str(s: &'static CStr) -> &'static str {
    s.to_str().expect("ABI symbol names are ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_nonexistent_path() {
        let err = Module::load("/nonexistent/path/to/module.so").unwrap_err();
        match err {
            ModuleError::Load { path, .. } => assert_eq!(path, "/nonexistent/path/to/module.so"),
            other => panic!("expected Load error, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_path_with_interior_nul() {
        let err = Module::load("bad\0path").unwrap_err();
        assert!(matches!(err, ModuleError::Load { .. }));
    }
}
