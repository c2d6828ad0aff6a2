//! The exception subsystem: built-in exception classes, the explicit
//! unwinder, and unhandled-exception reporting.
//!
//! Exceptions never map onto host-language unwinding. `Try` pushes a
//! handler frame onto the current call frame; `Die` (and every runtime
//! error) walks handlers innermost-out, running `finally` blocks along
//! the way. A handler whose class matches receives control at its catch
//! address with the exception staged for `BeginCatch`; a finally-only
//! handler receives control at its finally address with the exception
//! staged for `PublishTry`, which resumes the unwind.

use crate::bytecode::{TRY_NO_ADDRESS, TRY_NO_CLASS};
use crate::exceptions::{ExcClass, RunError, RunResult};
use crate::heap::{ClassObj, FunctionKind, HeapId, InstanceObj, NativeObj, ObjData};
use crate::value::Value;

use super::{ExceptHandler, Signal, Vm};

/// The native initializer shared by the built-in exception classes:
/// assigns the `message` field from the first argument.
fn exception_init(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    let instance = receiver.as_ref_id().expect("exception initializer receiver");
    let message = args.first().copied().unwrap_or(Value::Nil);
    let key = vm.heap.intern("message");
    vm.heap.instance_mut(instance).fields.insert(key, message);
    Ok(receiver)
}

impl Vm<'_> {
    /// Installs `Exception` and `AssertionError` into the globals.
    pub(crate) fn init_exception_classes(&mut self) {
        self.exception_class = self.make_exception_class("Exception", None);
        self.assertion_class =
            self.make_exception_class("AssertionError", Some(self.exception_class));
    }

    fn make_exception_class(&mut self, name: &str, superclass: Option<HeapId>) -> HeapId {
        let name_id = self.heap.intern(name);
        let message_key = self.heap.intern("message");
        let init = self.heap.allocate(ObjData::Native(NativeObj {
            name: "Exception",
            function: exception_init,
            kind: FunctionKind::Initializer,
        }));

        let mut class = ClassObj::new(name_id);
        class.superclass = superclass;
        class.fields.insert(message_key, Value::Nil);
        class.methods.insert(name_id, Value::Ref(init));
        class.initializer = Some(Value::Ref(init));
        let class = self.heap.allocate(ObjData::Class(class));
        self.globals.insert(name_id, Value::Ref(class));
        class
    }

    /// Materializes a runtime error as an exception instance.
    pub(crate) fn make_exception(&mut self, err: &RunError) -> Value {
        let class = match err.class {
            ExcClass::Exception => self.exception_class,
            ExcClass::AssertionError => self.assertion_class,
        };
        self.gc_checkpoint();
        let fields = self.heap.class(class).fields.clone();
        let instance = self.heap.allocate(ObjData::Instance(InstanceObj { class, fields }));
        // keep the fresh instance rooted while the message interns
        self.push(Value::Ref(instance));
        let message = self.intern_string(err.message.clone());
        let key = self.heap.intern("message");
        self.heap.instance_mut(instance).fields.insert(key, message);
        self.pop();
        Value::Ref(instance)
    }

    /// Does `class` appear in `instance_class`'s superclass chain?
    pub(crate) fn class_descends_from(&self, mut instance_class: HeapId, class: HeapId) -> bool {
        loop {
            if instance_class == class {
                return true;
            }
            match self.heap.class(instance_class).superclass {
                Some(superclass) => instance_class = superclass,
                None => return false,
            }
        }
    }

    fn handler_matches(&self, handler_class: Option<HeapId>, exc: Value) -> bool {
        let Some(handler_class) = handler_class else {
            return true; // a class-less catch matches anything
        };
        let Some(id) = exc.as_ref_id() else {
            return false;
        };
        match self.heap.get(id) {
            ObjData::Instance(instance) => self.class_descends_from(instance.class, handler_class),
            _ => false,
        }
    }

    /// Unwinds toward a handler for `exc`. Returns `false` when no frame
    /// can take it — the caller reports it as unhandled.
    pub(crate) fn unwind(&mut self, exc: Value) -> bool {
        loop {
            if self.frames.is_empty() {
                return false;
            }
            let handler = self.frames.last_mut().expect("frame checked above").handlers.pop();
            match handler {
                Some(handler) => {
                    if let Some(catch_ip) = handler.catch_ip {
                        if self.handler_matches(handler.class, exc) {
                            self.close_up_values(handler.stack_len);
                            self.stack.truncate(handler.stack_len);
                            self.frames.last_mut().expect("frame checked above").ip = catch_ip;
                            self.caught_exception = Some(exc);
                            return true;
                        }
                    }
                    if let Some(finally_ip) = handler.finally_ip {
                        // run the finally, then PublishTry resumes the unwind
                        self.close_up_values(handler.stack_len);
                        self.stack.truncate(handler.stack_len);
                        self.frames.last_mut().expect("frame checked above").ip = finally_ip;
                        self.propagating_exception = Some(exc);
                        return true;
                    }
                }
                None => {
                    let frame = self.frames.pop().expect("frame checked above");
                    self.close_up_values(frame.base);
                    self.stack.truncate(frame.base);
                }
            }
        }
    }

    /// `Try class catch finally`: resolves the expected class and pushes a
    /// handler onto the current frame.
    pub(crate) fn op_try(&mut self) -> Result<(), Signal> {
        let class_constant = self.fetch_u16();
        let catch_address = self.fetch_u16();
        let finally_address = self.fetch_u16();

        let class = if class_constant == TRY_NO_CLASS {
            None
        } else {
            let frame = self.frames.last().expect("no active frame");
            let name = self.heap.function(frame.function).blob.constants[class_constant as usize]
                .as_ref_id()
                .expect("exception class constant is a string");
            Some(self.resolve_exception_class(name)?)
        };

        let handler = ExceptHandler {
            class,
            catch_ip: (catch_address != TRY_NO_ADDRESS).then_some(catch_address as usize),
            finally_ip: (finally_address != TRY_NO_ADDRESS).then_some(finally_address as usize),
            stack_len: self.stack.len(),
        };
        self.frames.last_mut().expect("no active frame").handlers.push(handler);
        Ok(())
    }

    fn resolve_exception_class(&mut self, name: HeapId) -> Result<HeapId, Signal> {
        let module = self.current_module();
        let value = self
            .heap
            .module(module)
            .values
            .get(&name)
            .or_else(|| self.globals.get(&name))
            .copied();
        match value.and_then(Value::as_ref_id) {
            Some(id) if matches!(self.heap.get(id), ObjData::Class(_)) => Ok(id),
            _ => Err(self
                .type_error(&format!(
                    "unknown exception class '{}'",
                    self.heap.str_contents(name)
                ))
                .into()),
        }
    }

    /// `PublishTry` ends a finally block: if an exception routed control
    /// here, the unwind resumes; otherwise execution falls through.
    pub(crate) fn op_publish_try(&mut self) -> Result<(), Signal> {
        if let Some(exc) = self.propagating_exception.take() {
            if !self.unwind(exc) {
                return Err(Signal::Fatal(exc));
            }
        }
        Ok(())
    }

    /// `Die`: validate the operand and start unwinding.
    pub(crate) fn op_die(&mut self) -> Result<(), Signal> {
        let exc = self.pop();
        let valid = exc
            .as_ref_id()
            .map(|id| match self.heap.get(id) {
                ObjData::Instance(instance) => {
                    self.class_descends_from(instance.class, self.exception_class)
                }
                _ => false,
            })
            .unwrap_or(false);
        if !valid {
            return Err(self.type_error("instance of Exception expected").into());
        }
        if self.unwind(exc) {
            Ok(())
        } else {
            Err(Signal::Fatal(exc))
        }
    }

    /// Prints the unhandled-exception report: class, message, and a
    /// frame-by-frame stack trace.
    pub(crate) fn report_unhandled(&mut self, exc: Value) {
        let message_key = self.heap.intern("message");
        let (class_name, message) = match exc.as_ref_id().map(|id| self.heap.get(id)) {
            Some(ObjData::Instance(instance)) => {
                let class_name =
                    self.heap.str_contents(self.heap.class(instance.class).name).to_string();
                let message = instance
                    .fields
                    .get(&message_key)
                    .map_or_else(String::new, |&m| self.heap.value_to_string(m));
                (class_name, message)
            }
            _ => ("Exception".to_string(), self.heap.value_to_string(exc)),
        };

        eprintln!("Unhandled Exception: {class_name}: {message}");
        if !self.frames.is_empty() {
            eprintln!("StackTrace:");
            for frame in self.frames.iter().rev() {
                let function = self.heap.function(frame.function);
                let file = self.heap.module(function.module).file.clone();
                let line = function.blob.line_at(frame.ip.saturating_sub(1));
                let name = function
                    .name
                    .map_or_else(|| "<script>".to_string(), |n| {
                        format!("{}()", self.heap.str_contents(n))
                    });
                eprintln!("    File: {file}, Line: {line}, In: {name}");
            }
        }
    }
}
