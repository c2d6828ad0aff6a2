//! Module loading and binding opcodes.
//!
//! Source modules were compiled at compile time into function constants;
//! `CallImport` executes one in a fresh frame (or binds the cached module
//! for a repeat import). `NativeModule` instantiates a registered native
//! module. The `Select`/`ImportAll`/`Eject` family copies or removes
//! bindings after a module is loaded.

use crate::heap::HeapId;
use crate::modules;
use crate::value::Value;

use super::{Signal, Vm};

impl Vm<'_> {
    /// `CallImport f`: run module function `f` unless its module is
    /// already cached. Pushes nil either way (the compiler pops it).
    pub(crate) fn op_call_import(&mut self) -> Result<(), Signal> {
        let function = self.read_constant().as_ref_id().expect("import constant is a function");
        let module = self.heap.function(function).module;
        let file = self.heap.module(module).file.clone();

        if let Some(&cached) = self.modules.get(&file) {
            // bind under the importing site's chosen name
            let binding = self.heap.module(module).name.clone();
            let name = self.heap.intern_owned(binding);
            let current = self.current_module();
            self.heap.module_mut(current).values.insert(name, Value::Ref(cached));
            self.push(Value::Nil);
            return Ok(());
        }

        self.push(Value::Ref(function));
        self.call_function(function, function, 0)
    }

    /// Called when a module body returns: registers the module in the
    /// cache and binds it into the importer.
    pub(crate) fn register_module(&mut self, function: HeapId) {
        let module = self.heap.function(function).module;
        let file = self.heap.module(module).file.clone();
        let binding = self.heap.module(module).name.clone();
        self.modules.insert(file, module);

        if binding.is_empty() {
            return; // top-level scripts bind nowhere
        }
        let name = self.heap.intern_owned(binding);
        let current = self.current_module();
        self.heap.module_mut(current).values.insert(name, Value::Ref(module));
    }

    /// `NativeModule name binding`: load (or reuse) a registered native
    /// module and bind it.
    pub(crate) fn op_native_module(&mut self) -> Result<(), Signal> {
        let name_id = self.read_string_constant();
        let binding_id = self.read_string_constant();
        let name = self.heap.str_contents(name_id).to_string();
        let key = modules::native_cache_key(&name);

        let module = match self.modules.get(&key) {
            Some(&cached) => cached,
            None => {
                let Some(loaded) = modules::load_native_module(self, &name) else {
                    return Err(self
                        .type_error(&format!("native module '{name}' is not registered"))
                        .into());
                };
                self.modules.insert(key, loaded);
                loaded
            }
        };

        let current = self.current_module();
        self.heap.module_mut(current).values.insert(binding_id, Value::Ref(module));
        self.push(Value::Nil);
        Ok(())
    }

    fn lookup_module(&self, key: &str) -> Result<HeapId, Signal> {
        self.modules
            .get(key)
            .copied()
            .ok_or_else(|| self.type_error(&format!("module '{key}' is not loaded")).into())
    }

    /// `SelectImport path name`: copy one member out of a loaded module.
    pub(crate) fn op_select_import(&mut self) -> Result<(), Signal> {
        let path_id = self.read_string_constant();
        let name_id = self.read_string_constant();
        let path = self.heap.str_contents(path_id).to_string();
        let module = self.lookup_module(&path)?;
        self.select_from_module(module, name_id)
    }

    /// `SelectNativeImport name member`.
    pub(crate) fn op_select_native_import(&mut self) -> Result<(), Signal> {
        let module_name_id = self.read_string_constant();
        let name_id = self.read_string_constant();
        let key = modules::native_cache_key(self.heap.str_contents(module_name_id));
        let module = self.lookup_module(&key)?;
        self.select_from_module(module, name_id)
    }

    fn select_from_module(&mut self, module: HeapId, name: HeapId) -> Result<(), Signal> {
        let value = self.heap.module(module).values.get(&name).copied();
        let Some(value) = value else {
            let module_name = self.heap.module(module).name.clone();
            return Err(self
                .type_error(&format!(
                    "module {module_name} has no member {}",
                    self.heap.str_contents(name)
                ))
                .into());
        };
        let current = self.current_module();
        self.heap.module_mut(current).values.insert(name, value);
        Ok(())
    }

    /// `ImportAll path`: copy every member of a loaded source module.
    pub(crate) fn op_import_all(&mut self) -> Result<(), Signal> {
        let path_id = self.read_string_constant();
        let path = self.heap.str_contents(path_id).to_string();
        let module = self.lookup_module(&path)?;
        self.copy_all_members(module);
        Ok(())
    }

    /// `ImportAllNative name`.
    pub(crate) fn op_import_all_native(&mut self) -> Result<(), Signal> {
        let name_id = self.read_string_constant();
        let key = modules::native_cache_key(self.heap.str_contents(name_id));
        let module = self.lookup_module(&key)?;
        self.copy_all_members(module);
        Ok(())
    }

    fn copy_all_members(&mut self, module: HeapId) {
        let members: Vec<(HeapId, Value)> =
            self.heap.module(module).values.iter().map(|(&k, &v)| (k, v)).collect();
        let current = self.current_module();
        let values = &mut self.heap.module_mut(current).values;
        for (name, value) in members {
            values.insert(name, value);
        }
    }

    /// `EjectImport` / `EjectNativeImport`: drop the module's own binding
    /// after a selective import.
    pub(crate) fn op_eject_import(&mut self) -> Result<(), Signal> {
        let name_id = self.read_string_constant();
        let current = self.current_module();
        self.heap.module_mut(current).values.remove(&name_id);
        Ok(())
    }
}
