//! The module registry: source-module path resolution and the native
//! module ABI.
//!
//! Native modules are registered records — a [`ModuleDef`] names the
//! module's fields, functions, and classes, plus optional preloader and
//! unloader callbacks. The registry below is the only seam between module
//! names and registration functions; there is no dynamic library loading
//! in the core.

use std::env;
use std::path::{Path, PathBuf};

use crate::heap::{ClassObj, FunctionKind, ModuleObj, NativeObj, ObjData, Table};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

mod math;
mod os;

/// Callback invoked when a native module loads (preloader) or the VM
/// shuts down (unloader).
pub type ModuleLoader = fn(&mut Vm<'_>);

/// Produces a field's initial value at load time.
pub type FieldValueFn = fn(&mut Vm<'_>) -> Value;

/// A field exported by a native module or native class.
pub struct FieldDef {
    pub name: &'static str,
    pub is_static: bool,
    pub value: FieldValueFn,
}

/// A function exported by a native module or native class.
pub struct FuncDef {
    pub name: &'static str,
    pub is_static: bool,
    pub function: NativeFn,
}

/// A class exported by a native module.
pub struct ClassDef {
    pub name: &'static str,
    pub fields: Vec<FieldDef>,
    pub functions: Vec<FuncDef>,
}

/// A native module registration record.
pub struct ModuleDef {
    pub name: &'static str,
    pub fields: Vec<FieldDef>,
    pub functions: Vec<FuncDef>,
    pub classes: Vec<ClassDef>,
    pub preloader: Option<ModuleLoader>,
    pub unloader: Option<ModuleLoader>,
}

type ModuleInit = fn() -> ModuleDef;

/// Every native module linked into the core.
const NATIVE_MODULES: &[(&str, ModuleInit)] = &[
    ("math", math::module_def),
    ("os", os::module_def),
];

/// Is `name` a registered native module?
#[must_use]
pub fn native_module_exists(name: &str) -> bool {
    NATIVE_MODULES.iter().any(|(n, _)| *n == name)
}

/// The cache key native modules are stored under in the VM module table.
#[must_use]
pub fn native_cache_key(name: &str) -> String {
    format!("<native:{name}>")
}

/// Instantiates a registered native module: builds the module object from
/// its registration record and runs the preloader. Returns `None` for an
/// unknown name.
pub fn load_native_module(vm: &mut Vm<'_>, name: &str) -> Option<crate::heap::HeapId> {
    let init = NATIVE_MODULES.iter().find(|(n, _)| *n == name).map(|(_, init)| *init)?;
    let def = init();

    let file = native_cache_key(name);
    let module = vm.heap.allocate(ObjData::Module(ModuleObj {
        name: def.name.to_string(),
        file,
        values: Table::default(),
        preloader: def.preloader,
        unloader: def.unloader,
    }));
    // the module and its members are unreachable until the caller caches
    // it; keep them alive across any collection a field accessor triggers
    let mark = vm.heap.protection_mark();
    vm.heap.protect(module);

    let mut values = Table::default();
    for field in &def.fields {
        let key = vm.heap.intern(field.name);
        let value = (field.value)(vm);
        values.insert(key, value);
    }
    for func in &def.functions {
        let key = vm.heap.intern(func.name);
        let kind = if func.is_static { FunctionKind::Static } else { FunctionKind::Function };
        let native = vm.heap.allocate(ObjData::Native(NativeObj {
            name: func.name,
            function: func.function,
            kind,
        }));
        vm.heap.protect(native);
        values.insert(key, Value::Ref(native));
    }
    for class_def in &def.classes {
        let key = vm.heap.intern(class_def.name);
        let class = build_native_class(vm, class_def);
        vm.heap.protect(class);
        values.insert(key, Value::Ref(class));
    }
    vm.heap.module_mut(module).values = values;

    if let Some(preloader) = def.preloader {
        preloader(vm);
    }
    vm.heap.clear_protection(mark);
    Some(module)
}

fn build_native_class(vm: &mut Vm<'_>, def: &ClassDef) -> crate::heap::HeapId {
    let name = vm.heap.intern(def.name);
    let mut class = ClassObj::new(name);

    for field in &def.fields {
        let key = vm.heap.intern(field.name);
        let value = (field.value)(vm);
        if field.is_static {
            class.static_fields.insert(key, value);
        } else {
            class.fields.insert(key, value);
        }
    }
    for func in &def.functions {
        let key = vm.heap.intern(func.name);
        let kind = if func.is_static {
            FunctionKind::Static
        } else if func.name.starts_with('_') {
            FunctionKind::Private
        } else if func.name == def.name {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        let native = vm.heap.allocate(ObjData::Native(NativeObj {
            name: func.name,
            function: func.function,
            kind,
        }));
        vm.heap.protect(native);
        if func.is_static {
            class.static_methods.insert(key, Value::Ref(native));
        } else {
            class.methods.insert(key, Value::Ref(native));
            if func.name == def.name {
                class.initializer = Some(Value::Ref(native));
            }
        }
    }

    vm.heap.allocate(ObjData::Class(class))
}

/// Resolves a source-module path: `<path>.b` then `<path>/index.b`,
/// relative to the importing file's directory and then the standard
/// library root.
#[must_use]
pub fn resolve_source_module(
    base_dir: &Path,
    std_root: Option<&Path>,
    relative: &str,
) -> Option<PathBuf> {
    let mut roots: Vec<&Path> = vec![base_dir];
    if let Some(root) = std_root {
        roots.push(root);
    }
    for root in roots {
        let direct = root.join(format!("{relative}.b"));
        if direct.is_file() {
            return Some(direct);
        }
        let indexed = root.join(relative).join("index.b");
        if indexed.is_file() {
            return Some(indexed);
        }
    }
    None
}

/// The standard-library root: `$BLADE_STD`, or `libs/` beside the
/// executable.
#[must_use]
pub fn default_std_root() -> Option<PathBuf> {
    if let Ok(path) = env::var("BLADE_STD") {
        return Some(PathBuf::from(path));
    }
    env::current_exe().ok().and_then(|exe| exe.parent().map(|dir| dir.join("libs")))
}

#[cfg(test)]
mod tests {
    use super::{native_module_exists, resolve_source_module};

    #[test]
    fn registry_knows_its_modules() {
        assert!(native_module_exists("math"));
        assert!(native_module_exists("os"));
        assert!(!native_module_exists("no_such_module"));
    }

    #[test]
    fn unresolvable_paths_return_none() {
        let missing = resolve_source_module(std::path::Path::new("/nonexistent"), None, "nope");
        assert!(missing.is_none());
    }
}
