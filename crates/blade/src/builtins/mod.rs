//! Builtin functions and per-type method tables.
//!
//! Global intrinsics (`abs`, `typeof`, `print`, …) are native functions
//! installed into the VM globals at startup. Container methods dispatch
//! by receiver type and method name through [`find_method`]; each type's
//! module exposes one `find` table. Every builtin container implements
//! the `@iter`/`@itern` iterator protocol the `for … in` desugaring
//! drives.

pub(crate) mod bytes;
pub(crate) mod dict;
pub(crate) mod file;
pub(crate) mod functions;
pub(crate) mod list;
pub(crate) mod range;
pub(crate) mod string;
pub(crate) mod support;

use crate::heap::{FunctionKind, Heap, NativeObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

/// Installs every global intrinsic into the VM's globals table.
pub(crate) fn register_globals(vm: &mut Vm<'_>) {
    for &(name, function) in functions::GLOBALS {
        let key = vm.heap.intern(name);
        let native = vm.heap.allocate(ObjData::Native(NativeObj {
            name,
            function,
            kind: FunctionKind::Function,
        }));
        vm.globals.insert(key, Value::Ref(native));
    }
}

/// Resolves a builtin method on a container receiver. Returns the
/// canonical (static) method name plus the function.
pub(crate) fn find_method(
    heap: &Heap,
    receiver: Value,
    name: &str,
) -> Option<(&'static str, NativeFn)> {
    let id = receiver.as_ref_id()?;
    match heap.get(id) {
        ObjData::Str(_) => string::find(name),
        ObjData::List(_) => list::find(name),
        ObjData::Dict(_) => dict::find(name),
        ObjData::Bytes(_) => bytes::find(name),
        ObjData::File(_) => file::find(name),
        ObjData::Range(_) => range::find(name),
        _ => None,
    }
}
