//! Calling conventions and property/method resolution.

use smallvec::SmallVec;

use crate::builtins;
use crate::heap::{
    BoundMethodObj, FunctionKind, HeapId, InstanceObj, ListObj, NativeObj, ObjData,
};
use crate::value::Value;

use super::{CallFrame, NativeFn, Signal, Vm, FRAMES_MAX};

/// What the callee slot resolves to, extracted before dispatch so no heap
/// borrow is held across the call.
enum CalleeKind {
    Bound(Value, Value),
    Class,
    Closure(HeapId),
    Function,
    Native(NativeFn),
    NotCallable,
}

impl Vm<'_> {
    /// Dispatches a call on `callee` with `argc` arguments already on the
    /// stack above it.
    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), Signal> {
        let kind = match callee.as_ref_id() {
            Some(id) => match self.heap.get(id) {
                ObjData::BoundMethod(b) => CalleeKind::Bound(b.receiver, b.method),
                ObjData::Class(_) => CalleeKind::Class,
                ObjData::Closure(c) => CalleeKind::Closure(c.function),
                ObjData::Function(_) => CalleeKind::Function,
                ObjData::Native(n) => CalleeKind::Native(n.function),
                _ => CalleeKind::NotCallable,
            },
            None => CalleeKind::NotCallable,
        };

        match kind {
            CalleeKind::Bound(receiver, method) => {
                self.set_peek(argc, receiver);
                self.call_value(method, argc)
            }
            CalleeKind::Class => {
                let class = callee.as_ref_id().expect("class callee is a heap object");
                self.call_class(class, argc)
            }
            CalleeKind::Closure(function) => {
                let closure = callee.as_ref_id().expect("closure callee is a heap object");
                self.call_function(closure, function, argc)
            }
            CalleeKind::Function => {
                let function = callee.as_ref_id().expect("function callee is a heap object");
                self.call_function(function, function, argc)
            }
            CalleeKind::Native(function) => self.call_native_fn(function, argc),
            CalleeKind::NotCallable => {
                Err(self.type_error("only functions and classes can be called").into())
            }
        }
    }

    /// Pushes a frame for a closure or raw function after arity handling:
    /// variadic tails collect into a list, missing arguments pad with nil.
    pub(crate) fn call_function(
        &mut self,
        callee: HeapId,
        function: HeapId,
        argc: usize,
    ) -> Result<(), Signal> {
        let (arity, is_variadic) = {
            let f = self.heap.function(function);
            (f.arity, f.is_variadic)
        };

        let mut argc = argc;
        if is_variadic && argc + 1 >= arity {
            let extra = argc + 1 - arity;
            self.gc_checkpoint();
            let tail = self.stack.split_off(self.stack.len() - extra);
            let list = self.heap.allocate(ObjData::List(ListObj { items: tail }));
            self.push(Value::Ref(list));
            argc = argc - extra + 1;
        } else if !is_variadic && argc < arity {
            for _ in argc..arity {
                self.push(Value::Nil);
            }
            argc = arity;
        }

        if argc != arity {
            let message = if is_variadic {
                format!("expected at least {} arguments but got {argc}", arity - 1)
            } else {
                format!("expected {arity} arguments but got {argc}")
            };
            return Err(self.type_error(&message).into());
        }

        if self.frames.len() >= FRAMES_MAX {
            return Err(self.type_error("stack overflow").into());
        }

        self.frames.push(CallFrame {
            callee: Value::Ref(callee),
            function,
            ip: 0,
            base: self.stack.len() - argc - 1,
            handlers: SmallVec::new(),
        });
        Ok(())
    }

    /// Instantiates `class` into the callee slot and runs its initializer.
    fn call_class(&mut self, class: HeapId, argc: usize) -> Result<(), Signal> {
        self.gc_checkpoint();
        let fields = self.heap.class(class).fields.clone();
        let instance = self.heap.allocate(ObjData::Instance(InstanceObj { class, fields }));
        self.set_peek(argc, Value::Ref(instance));

        let initializer = self.heap.class(class).initializer;
        match initializer {
            Some(init) => self.call_value(init, argc),
            None if argc != 0 => {
                let name = self.heap.str_contents(self.heap.class(class).name).to_string();
                Err(self
                    .type_error(&format!("{name} constructor expects 0 arguments, {argc} given"))
                    .into())
            }
            None => Ok(()),
        }
    }

    /// Invokes a native function. Arguments are copied out of the stack;
    /// the receiver is whatever occupies the callee slot (the bound
    /// receiver for methods, the native itself for plain functions).
    pub(crate) fn call_native_fn(&mut self, function: NativeFn, argc: usize) -> Result<(), Signal> {
        let receiver = self.peek(argc);
        let args: SmallVec<[Value; 8]> =
            self.stack[self.stack.len() - argc..].iter().copied().collect();

        self.native_depth += 1;
        let mark = self.heap.protection_mark();
        let result = function(self, receiver, &args);
        self.heap.clear_protection(mark);
        self.native_depth -= 1;

        match result {
            Ok(value) => {
                self.pop_n(argc + 1);
                self.push(value);
                Ok(())
            }
            Err(err) => Err(Signal::Error(err)),
        }
    }

    /// `Invoke name argc`: fused property-get-then-call on the receiver at
    /// stack distance `argc`.
    pub(crate) fn invoke(
        &mut self,
        name: HeapId,
        argc: usize,
        allow_private: bool,
    ) -> Result<(), Signal> {
        let receiver = self.peek(argc);
        let Some(id) = receiver.as_ref_id() else {
            return Err(self
                .type_error(&format!(
                    "cannot call method {} on object of type {}",
                    self.heap.str_contents(name),
                    self.heap.type_name(receiver)
                ))
                .into());
        };

        match self.heap.get(id) {
            ObjData::Instance(instance) => {
                // a field holding a callable shadows methods
                if let Some(&field) = instance.fields.get(&name) {
                    self.set_peek(argc, field);
                    return self.call_value(field, argc);
                }
                let class = instance.class;
                self.invoke_from_class(class, name, argc, allow_private)
            }
            ObjData::Class(class) => {
                let method = class
                    .static_methods
                    .get(&name)
                    .or_else(|| class.static_fields.get(&name))
                    .copied();
                match method {
                    Some(value) => {
                        self.set_peek(argc, value);
                        self.call_value(value, argc)
                    }
                    None => {
                        let class_name = self.heap.str_contents(class.name).to_string();
                        Err(self
                            .type_error(&format!(
                                "class {class_name} has no static method or field named {}",
                                self.heap.str_contents(name)
                            ))
                            .into())
                    }
                }
            }
            ObjData::Module(module) => match module.values.get(&name).copied() {
                Some(value) => {
                    self.set_peek(argc, value);
                    self.call_value(value, argc)
                }
                None => {
                    let module_name = module.name.clone();
                    Err(self
                        .type_error(&format!(
                            "module {module_name} has no member {}",
                            self.heap.str_contents(name)
                        ))
                        .into())
                }
            },
            ObjData::Dict(dict) => {
                // data entries take precedence over dict methods
                if let Some(&entry) = dict.items.get(&Value::Ref(name)) {
                    self.set_peek(argc, entry);
                    return self.call_value(entry, argc);
                }
                self.invoke_builtin_method(receiver, name, argc)
            }
            _ => self.invoke_builtin_method(receiver, name, argc),
        }
    }

    fn invoke_builtin_method(
        &mut self,
        receiver: Value,
        name: HeapId,
        argc: usize,
    ) -> Result<(), Signal> {
        let method = {
            let name_str = self.heap.str_contents(name);
            builtins::find_method(&self.heap, receiver, name_str)
        };
        match method {
            Some((_, function)) => self.call_native_fn(function, argc),
            None => Err(self
                .type_error(&format!(
                    "cannot call method {} on object of type {}",
                    self.heap.str_contents(name),
                    self.heap.type_name(receiver)
                ))
                .into()),
        }
    }

    /// Looks up `name` in a class's method table and calls it with the
    /// receiver already in the callee slot.
    pub(crate) fn invoke_from_class(
        &mut self,
        class: HeapId,
        name: HeapId,
        argc: usize,
        allow_private: bool,
    ) -> Result<(), Signal> {
        let method = self.heap.class(class).methods.get(&name).copied();
        match method {
            Some(method) => {
                if !allow_private && self.method_kind(method) == Some(FunctionKind::Private) {
                    return Err(self
                        .type_error(&format!(
                            "cannot call private method {} outside its class",
                            self.heap.str_contents(name)
                        ))
                        .into());
                }
                self.call_value(method, argc)
            }
            None => {
                let class_name = self.heap.str_contents(self.heap.class(class).name).to_string();
                if self.heap.class(class).static_methods.contains_key(&name) {
                    return Err(self
                        .type_error(&format!(
                            "cannot call static method {} from instance of {class_name}",
                            self.heap.str_contents(name)
                        ))
                        .into());
                }
                Err(self
                    .type_error(&format!(
                        "undefined method '{}' in {class_name}",
                        self.heap.str_contents(name)
                    ))
                    .into())
            }
        }
    }

    /// The function kind behind a method value, for privacy checks.
    fn method_kind(&self, method: Value) -> Option<FunctionKind> {
        let id = method.as_ref_id()?;
        match self.heap.get(id) {
            ObjData::Closure(c) => Some(self.heap.function(c.function).kind),
            ObjData::Function(f) => Some(f.kind),
            ObjData::Native(n) => Some(n.kind),
            _ => None,
        }
    }

    // --- property access ----------------------------------------------------

    /// `GetProperty` / `GetSelfProperty` resolution over every
    /// property-carrying type.
    pub(crate) fn get_property(&mut self, name: HeapId, allow_private: bool) -> Result<(), Signal> {
        let target = self.peek(0);
        let Some(id) = target.as_ref_id() else {
            return Err(self
                .type_error(&format!(
                    "object of type {} does not carry properties",
                    self.heap.type_name(target)
                ))
                .into());
        };

        match self.heap.get(id) {
            ObjData::Instance(instance) => {
                if let Some(&value) = instance.fields.get(&name) {
                    self.pop();
                    self.push(value);
                    return Ok(());
                }
                let class = instance.class;
                self.bind_method_from(class, name, allow_private)
            }
            ObjData::Dict(dict) => {
                if let Some(&value) = dict.items.get(&Value::Ref(name)) {
                    self.pop();
                    self.push(value);
                    return Ok(());
                }
                self.bind_builtin_method(target, name)
            }
            ObjData::Class(class) => {
                let value = class
                    .static_methods
                    .get(&name)
                    .or_else(|| class.static_fields.get(&name))
                    .copied();
                match value {
                    Some(value) => {
                        self.pop();
                        self.push(value);
                        Ok(())
                    }
                    None => {
                        let class_name = self.heap.str_contents(class.name).to_string();
                        Err(self
                            .type_error(&format!(
                                "class {class_name} does not have a static field or method named {}",
                                self.heap.str_contents(name)
                            ))
                            .into())
                    }
                }
            }
            ObjData::Module(module) => match module.values.get(&name).copied() {
                Some(value) => {
                    self.pop();
                    self.push(value);
                    Ok(())
                }
                None => {
                    let module_name = module.name.clone();
                    Err(self
                        .type_error(&format!(
                            "module {module_name} has no member {}",
                            self.heap.str_contents(name)
                        ))
                        .into())
                }
            },
            ObjData::Str(_) | ObjData::List(_) | ObjData::Bytes(_) | ObjData::Range(_)
            | ObjData::File(_) => self.bind_builtin_method(target, name),
            _ => Err(self
                .type_error(&format!(
                    "object of type {} does not carry properties",
                    self.heap.type_name(target)
                ))
                .into()),
        }
    }

    /// Binds a class method to the receiver on top of the stack.
    pub(crate) fn bind_method_from(
        &mut self,
        class: HeapId,
        name: HeapId,
        allow_private: bool,
    ) -> Result<(), Signal> {
        let method = self.heap.class(class).methods.get(&name).copied();
        let Some(method) = method else {
            return Err(self
                .type_error(&format!("undefined property '{}'", self.heap.str_contents(name)))
                .into());
        };
        if !allow_private && self.method_kind(method) == Some(FunctionKind::Private) {
            return Err(self
                .type_error(&format!(
                    "cannot access private method {} outside its class",
                    self.heap.str_contents(name)
                ))
                .into());
        }
        let receiver = self.peek(0);
        let bound = self.alloc_value(ObjData::BoundMethod(BoundMethodObj { receiver, method }));
        self.pop();
        self.push(bound);
        Ok(())
    }

    /// Binds a builtin (container) method to the receiver on stack top.
    fn bind_builtin_method(&mut self, receiver: Value, name: HeapId) -> Result<(), Signal> {
        let found = {
            let name_str = self.heap.str_contents(name);
            builtins::find_method(&self.heap, receiver, name_str)
        };
        let Some((method_name, function)) = found else {
            return Err(self
                .type_error(&format!(
                    "object of type {} does not have a property {}",
                    self.heap.type_name(receiver),
                    self.heap.str_contents(name)
                ))
                .into());
        };
        let native = self.alloc_value(ObjData::Native(NativeObj {
            name: method_name,
            function,
            kind: FunctionKind::Method,
        }));
        // keep the fresh native reachable while the bound method allocates
        self.push(native);
        let bound = self.alloc_value(ObjData::BoundMethod(BoundMethodObj {
            receiver,
            method: native,
        }));
        self.pop();
        self.pop();
        self.push(bound);
        Ok(())
    }

    /// `SetProperty`: instance fields only.
    pub(crate) fn set_property(&mut self, name: HeapId) -> Result<(), Signal> {
        let target = self.peek(1);
        let Some(id) = target.as_ref_id() else {
            return Err(self
                .type_error(&format!(
                    "object of type {} can not carry properties",
                    self.heap.type_name(target)
                ))
                .into());
        };
        if !matches!(self.heap.get(id), ObjData::Instance(_)) {
            return Err(self
                .type_error(&format!(
                    "object of type {} can not carry properties",
                    self.heap.type_name(target)
                ))
                .into());
        }
        let value = self.peek(0);
        self.heap.instance_mut(id).fields.insert(name, value);
        let value = self.pop();
        self.pop(); // the instance
        self.push(value);
        Ok(())
    }

    // --- returning ----------------------------------------------------------

    pub(crate) fn op_return(&mut self) -> super::OpResult {
        let result = self.pop();
        let frame = self.frames.pop().expect("return without a frame");
        self.close_up_values(frame.base);
        let kind = self.heap.function(frame.function).kind;

        if self.frames.is_empty() {
            self.stack.truncate(frame.base);
            return Ok(super::Flow::Done);
        }

        self.stack.truncate(frame.base);
        self.push(result);

        // a returning module body registers itself with the importer
        if kind == FunctionKind::Script {
            self.register_module(frame.function);
        }
        Ok(super::Flow::Continue)
    }
}
