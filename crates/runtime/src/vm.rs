//! The dispatch loop
//!
//! One [`Vm`] owns everything: the value stack, the frame chain, the loaded
//! modules and the native-module registry. Execution decodes one opcode at a
//! time from the current module's instruction bytes.
//!
//! # Calls and reentrancy
//!
//! Scripted calls made by `call`/`call_method` push a frame and let the same
//! dispatch loop keep running — no host recursion. Host recursion happens
//! only where the VM itself must invoke a callable and use its result:
//! native functions, `for_iter`'s `next()`, constructors and destructors.
//! Those go through [`Vm::call_value`], which runs a nested dispatch until
//! the frame it pushed has returned.
//!
//! # Reference counting
//!
//! Shared ownership is `Rc`; the VM's job is releasing values *explicitly*
//! wherever it discards one (pop, overwrite, scope exit, frame teardown) so
//! that an instance whose last reference disappears runs its destructors at
//! that moment, not at some later collection point. Reference cycles are
//! never collected; scripts that build them leak, as documented.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use deva_core::code::{Constant, DefaultValue};
use deva_core::{Code, ErrorKind, Opcode, RuntimeError, RuntimeResult};

use crate::builtins;
use crate::frame::{CallFrame, Callee, Frame};
use crate::map_builtins;
use crate::module::{find_module_file, load_code, Module, NativeModule};
use crate::string_builtins;
use crate::value::{
    compare_ordered, display, values_equal, FuncRef, Map, MapKey, ModuleRef, NativeFn,
    NativeModuleRef, Value, Vector,
};
use crate::vector_builtins;

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    modules: HashMap<String, ModuleRef>,
    /// Module names in load order, for deterministic cross-module lookup.
    module_order: Vec<String>,
    native_modules: HashMap<String, NativeModuleRef>,
    /// Module whose instruction bytes are currently executing.
    module: ModuleRef,
    ip: usize,
    /// Current source position, maintained by `line_num` markers.
    file: Rc<str>,
    line: u32,
    output: Box<dyn Write>,
    /// Command-line arguments forwarded to the script via `args()`.
    script_args: Vec<String>,
    halted: bool,
}

impl Vm {
    pub fn new() -> Vm {
        Vm::with_output(Box::new(std::io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Vm {
        let bootstrap = Module::new("<bootstrap>", Rc::new(Code::new()));
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            modules: HashMap::new(),
            module_order: Vec::new(),
            native_modules: HashMap::new(),
            module: bootstrap,
            ip: 0,
            file: Rc::from(""),
            line: 0,
            output,
            script_args: Vec::new(),
            halted: false,
        }
    }

    /// Forward command-line arguments to the script; `args()` returns them.
    pub fn set_script_args(&mut self, args: Vec<String>) {
        self.script_args = args;
    }

    pub fn script_args(&self) -> &[String] {
        &self.script_args
    }

    /// Register a native module for `import` and module-qualified lookup.
    pub fn register_native_module(&mut self, module: NativeModuleRef) {
        self.native_modules.insert(module.name().to_string(), module);
    }

    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    /// Execute a compiled module: install it, then run its `@main`.
    pub fn run_code(&mut self, code: Rc<Code>, name: &str) -> RuntimeResult<Value> {
        let module = Module::new(name, code);
        self.install_module(name, module.clone());
        self.halted = false;
        let main = module.code.main_function()?;
        self.call_value(
            Value::Func(FuncRef { module, index: main }),
            Vec::new(),
        )
    }

    /// Release every live value the VM still holds: the stack, the frame
    /// chain and all module globals. Called by the drivers after a run (and
    /// on error) so that the live-object registry drains to zero for
    /// well-formed programs.
    pub fn shutdown(&mut self) -> RuntimeResult<()> {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Call(cf) = frame {
                for v in cf.locals {
                    self.release(v)?;
                }
            }
        }
        while let Some(v) = self.stack.pop() {
            self.release(v)?;
        }
        let modules: Vec<ModuleRef> = self.modules.drain().map(|(_, m)| m).collect();
        self.module_order.clear();
        for module in modules {
            for v in module.take_globals() {
                self.release(v)?;
            }
        }
        Ok(())
    }

    /// Call-frame descriptions, innermost first, for error reports.
    pub fn stack_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .filter_map(|f| f.as_call())
            .map(|cf| cf.describe())
            .collect()
    }

    // -- value stack --------------------------------------------------------

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> RuntimeResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("value stack underflow"))
    }

    // -- reference accounting -----------------------------------------------

    /// Discard a value. When this was the last handle to a heap object the
    /// object is destroyed now: instances run their destructor chain first,
    /// then every child value is released in turn.
    pub fn release(&mut self, v: Value) -> RuntimeResult<()> {
        match v {
            Value::Vec(h) => {
                if Rc::strong_count(&h) == 1 {
                    let children = std::mem::take(&mut h.borrow_mut().items);
                    for child in children {
                        self.release(child)?;
                    }
                }
                Ok(())
            }
            Value::Map(h) | Value::Class(h) => {
                if Rc::strong_count(&h) == 1 {
                    let children = std::mem::take(&mut h.borrow_mut().entries);
                    for (key, value) in children {
                        self.release(key.0)?;
                        self.release(value)?;
                    }
                }
                Ok(())
            }
            Value::Instance(h) => {
                if Rc::strong_count(&h) == 1 && !h.borrow().dying {
                    h.borrow_mut().dying = true;
                    self.run_destructors(&h)?;
                    let children = std::mem::take(&mut h.borrow_mut().entries);
                    for (key, value) in children {
                        self.release(key.0)?;
                        self.release(value)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Destructor dispatch: the instance's class chain, derived first, then
    /// bases depth-first left-to-right, each class's own `delete` at most
    /// once, each called with the dying instance as self.
    fn run_destructors(&mut self, h: &crate::value::MapRef) -> RuntimeResult<()> {
        let class = match h.borrow().get_str("__class__") {
            Some(Value::Class(c)) => c.clone(),
            _ => return Ok(()),
        };
        let mut chain = Vec::new();
        let mut visited = Vec::new();
        collect_class_chain(&class, &mut chain, &mut visited);
        for class in chain {
            let dtor = class.borrow().get_str("delete").cloned();
            if let Some(dtor) = dtor {
                let result = self.call_value(dtor, vec![Value::Instance(h.clone())])?;
                self.release(result)?;
            }
        }
        Ok(())
    }

    // -- calls --------------------------------------------------------------

    /// Invoke a callable reentrantly and hand back its result. Used by the
    /// VM itself (iteration, constructors, destructors) and by native code.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> RuntimeResult<Value> {
        match callee {
            Value::Func(f) => {
                let floor = self.frames.len();
                self.push_scripted_frame(f, args)?;
                self.dispatch_until(floor)?;
                if self.halted {
                    return Ok(Value::Null);
                }
                self.pop()
            }
            Value::NativeFunc(nf) => self.call_native(nf, args),
            other => {
                for a in args {
                    self.release(a)?;
                }
                Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("{} is not callable", other.type_name()),
                ))
            }
        }
    }

    fn push_scripted_frame(&mut self, f: FuncRef, args: Vec<Value>) -> RuntimeResult<()> {
        let fo = f.module.code.function(f.index)?.clone();
        if args.len() as u32 > fo.num_params {
            let n = args.len();
            for a in args {
                self.release(a)?;
            }
            return Err(RuntimeError::new(
                ErrorKind::ArityError,
                format!(
                    "{}() takes {} arguments, {} given",
                    fo.name, fo.num_params, n
                ),
            ));
        }
        let num_args = args.len() as u32;
        let mut locals = vec![Value::Null; fo.num_locals as usize];
        for (i, a) in args.into_iter().enumerate() {
            locals[i] = a;
        }
        // missing parameters take their default, or null
        for i in num_args..fo.num_params {
            if let Some(default) = fo.default_for(i) {
                locals[i as usize] = match default {
                    DefaultValue::Const(idx) => constant_value(&f.module.code, idx)?,
                    DefaultValue::True => Value::Bool(true),
                    DefaultValue::False => Value::Bool(false),
                    DefaultValue::Null => Value::Null,
                };
            }
        }
        self.frames.push(Frame::Call(CallFrame {
            callee: Callee::Scripted(f.clone()),
            locals,
            num_args,
            return_ip: self.ip,
            caller_module: Some(self.module.clone()),
        }));
        self.module = f.module;
        self.ip = fo.addr as usize;
        Ok(())
    }

    fn call_native(&mut self, nf: NativeFn, args: Vec<Value>) -> RuntimeResult<Value> {
        let num_args = args.len() as u32;
        self.frames.push(Frame::Call(CallFrame {
            callee: Callee::Native { name: Rc::from(nf.name) },
            locals: args,
            num_args,
            return_ip: self.ip,
            caller_module: Some(self.module.clone()),
        }));
        let result = (nf.func)(self);
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::internal("native frame vanished"))?;
        if let Frame::Call(cf) = frame {
            for v in cf.locals {
                self.release(v)?;
            }
        }
        result
    }

    /// The native frame on top of the chain; only valid while a native
    /// function is executing.
    pub fn native_frame(&self) -> RuntimeResult<&CallFrame> {
        self.frames
            .last()
            .and_then(|f| f.as_call())
            .filter(|cf| matches!(cf.callee, Callee::Native { .. }))
            .ok_or_else(|| RuntimeError::internal("no native frame is active"))
    }

    // -- dispatch -----------------------------------------------------------

    fn dispatch_until(&mut self, floor: usize) -> RuntimeResult<()> {
        while !self.halted && self.frames.len() > floor {
            if let Err(e) = self.step() {
                return Err(e.with_location(&self.file, self.line));
            }
        }
        Ok(())
    }

    fn fetch_op(&mut self) -> RuntimeResult<Opcode> {
        let byte = *self.module.code.bytes.get(self.ip).ok_or_else(|| {
            RuntimeError::internal(format!("instruction pointer {} out of range", self.ip))
        })?;
        self.ip += 1;
        Opcode::try_from(byte)
            .map_err(|_| RuntimeError::internal(format!("invalid opcode byte {}", byte)))
    }

    fn fetch_operand(&mut self) -> RuntimeResult<u32> {
        let bytes = &self.module.code.bytes;
        if self.ip + 4 > bytes.len() {
            return Err(RuntimeError::internal("truncated instruction operand"));
        }
        let v = u32::from_le_bytes(bytes[self.ip..self.ip + 4].try_into().unwrap());
        self.ip += 4;
        Ok(v)
    }

    fn step(&mut self) -> RuntimeResult<()> {
        let op = self.fetch_op()?;
        let (base, shortcut_operand) = match op.shortcut_slot() {
            Some((base, n)) => (base, Some(n)),
            None => (op, None),
        };

        match base {
            Opcode::Nop => {}
            Opcode::Pop => {
                let v = self.pop()?;
                self.release(v)?;
            }
            Opcode::Push => {
                let idx = match shortcut_operand {
                    Some(n) => n,
                    None => self.fetch_operand()?,
                };
                let v = constant_value(&self.module.code, idx)?;
                self.push(v);
            }
            Opcode::PushTrue => self.push(Value::Bool(true)),
            Opcode::PushFalse => self.push(Value::Bool(false)),
            Opcode::PushNull => self.push(Value::Null),
            Opcode::PushZero => self.push(Value::Num(0.0)),
            Opcode::PushOne => self.push(Value::Num(1.0)),
            Opcode::PushLocal => {
                let slot = match shortcut_operand {
                    Some(n) => n,
                    None => self.fetch_operand()?,
                };
                let v = self.local(slot)?.clone();
                self.push(v);
            }
            Opcode::PushGlobal => {
                let idx = self.fetch_operand()?;
                let name = self.module.code.name(idx)?.to_string();
                let v = self.resolve_name(&name)?;
                self.push(v);
            }
            Opcode::StoreGlobal => {
                let idx = self.fetch_operand()?;
                let v = self.pop()?;
                self.store_name(idx, v)?;
            }
            Opcode::StoreTrue => {
                let idx = self.fetch_operand()?;
                self.store_name(idx, Value::Bool(true))?;
            }
            Opcode::StoreFalse => {
                let idx = self.fetch_operand()?;
                self.store_name(idx, Value::Bool(false))?;
            }
            Opcode::StoreNull => {
                let idx = self.fetch_operand()?;
                self.store_name(idx, Value::Null)?;
            }
            Opcode::StoreLocal => {
                let slot = match shortcut_operand {
                    Some(n) => n,
                    None => self.fetch_operand()?,
                };
                let v = self.pop()?;
                self.set_local(slot, v)?;
            }
            Opcode::DefLocal => {
                let slot = match shortcut_operand {
                    Some(n) => n,
                    None => self.fetch_operand()?,
                };
                let v = self.pop()?;
                self.set_local(slot, v)?;
                if let Some(Frame::Block { slots }) = self.frames.last_mut() {
                    slots.push(slot);
                }
            }
            Opcode::NewMap => {
                let n = self.fetch_operand()?;
                let map = self.build_map(n)?;
                self.push(Value::Map(map));
            }
            Opcode::NewVec => {
                let n = self.fetch_operand()?;
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.push(Value::Vec(Vector::from_items(items)));
            }
            Opcode::NewClass => {
                let n = self.fetch_operand()?;
                let map = self.build_map(n)?;
                self.push(Value::Class(map));
            }
            Opcode::NewInstance => {
                let argc = self.fetch_operand()?;
                self.op_new_instance(argc)?;
            }
            Opcode::Jmp => {
                let target = self.fetch_operand()?;
                self.ip = target as usize;
            }
            Opcode::Jmpf => {
                let target = self.fetch_operand()?;
                let v = self.pop()?;
                let truthy = v.coerce_to_bool()?;
                self.release(v)?;
                if !truthy {
                    self.ip = target as usize;
                }
            }
            Opcode::Eq | Opcode::Neq => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = values_equal(&a, &b);
                self.release(a)?;
                self.release(b)?;
                self.push(Value::Bool(if base == Opcode::Eq { eq } else { !eq }));
            }
            Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                let b = self.pop()?;
                let a = self.pop()?;
                let ord = compare_ordered(&a, &b);
                self.release(a)?;
                self.release(b)?;
                let ord = ord?;
                let result = match base {
                    Opcode::Lt => ord.is_lt(),
                    Opcode::Lte => ord.is_le(),
                    Opcode::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                self.push(Value::Bool(result));
            }
            Opcode::Or | Opcode::And => {
                let b = self.pop()?;
                let a = self.pop()?;
                let (ba, bb) = (a.coerce_to_bool()?, b.coerce_to_bool()?);
                self.release(a)?;
                self.release(b)?;
                self.push(Value::Bool(if base == Opcode::And {
                    ba && bb
                } else {
                    ba || bb
                }));
            }
            Opcode::Neg => {
                let v = self.pop()?;
                match v {
                    Value::Num(n) => self.push(Value::Num(-n)),
                    other => {
                        let name = other.type_name();
                        self.release(other)?;
                        return Err(RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!("cannot negate {}", name),
                        ));
                    }
                }
            }
            Opcode::Not => {
                let v = self.pop()?;
                let truthy = v.coerce_to_bool()?;
                self.release(v)?;
                self.push(Value::Bool(!truthy));
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = arith_impl(base, &a, &b);
                self.release(a)?;
                self.release(b)?;
                self.push(result?);
            }
            Opcode::Call => {
                let argc = self.fetch_operand()?;
                self.op_call(argc, false)?;
            }
            Opcode::CallMethod => {
                let argc = self.fetch_operand()?;
                self.op_call(argc, true)?;
            }
            Opcode::Return => self.op_return()?,
            Opcode::ExitLoop => {
                let target = self.fetch_operand()?;
                let depth = self.fetch_operand()?;
                for _ in 0..depth {
                    self.op_leave()?;
                }
                self.ip = target as usize;
            }
            Opcode::Enter => self.frames.push(Frame::Block { slots: Vec::new() }),
            Opcode::Leave => self.op_leave()?,
            Opcode::ForIter => self.op_for_iter(false)?,
            Opcode::ForIterPair => self.op_for_iter(true)?,
            Opcode::TblLoad => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let result = self.table_get(&obj, &key);
                self.release(key)?;
                self.release(obj)?;
                self.push(result?);
            }
            Opcode::MethodLoad => {
                let key = self.pop()?;
                let name = match &key {
                    Value::Str(s) => s.clone(),
                    other => {
                        return Err(RuntimeError::internal(format!(
                            "method name must be a string, got {}",
                            other.type_name()
                        )))
                    }
                };
                let receiver = self
                    .stack
                    .last()
                    .ok_or_else(|| RuntimeError::internal("value stack underflow"))?
                    .clone();
                let method = self.resolve_method(&receiver, &name);
                self.release(key)?;
                self.release(receiver)?;
                self.push(method?);
            }
            Opcode::LoadSlice2 => {
                let end = self.pop()?;
                let start = self.pop()?;
                let obj = self.pop()?;
                let result = self.slice_get(&obj, &start, &end, None);
                self.release(start)?;
                self.release(end)?;
                self.release(obj)?;
                self.push(result?);
            }
            Opcode::LoadSlice3 => {
                let step = self.pop()?;
                let end = self.pop()?;
                let start = self.pop()?;
                let obj = self.pop()?;
                let result = self.slice_get(&obj, &start, &end, Some(&step));
                self.release(start)?;
                self.release(end)?;
                self.release(step)?;
                self.release(obj)?;
                self.push(result?);
            }
            Opcode::TblStore => {
                let value = self.pop()?;
                let key = self.pop()?;
                let obj = self.pop()?;
                self.table_set(&obj, key, value)?;
                self.release(obj)?;
            }
            Opcode::StoreSlice2 | Opcode::StoreSlice3 => {
                let value = self.pop()?;
                let step = if base == Opcode::StoreSlice3 { Some(self.pop()?) } else { None };
                let end = self.pop()?;
                let start = self.pop()?;
                let obj = self.pop()?;
                let result = self.slice_set(&obj, &start, &end, step.as_ref(), value);
                self.release(start)?;
                self.release(end)?;
                if let Some(step) = step {
                    self.release(step)?;
                }
                self.release(obj)?;
                result?;
            }
            Opcode::AddTblStore
            | Opcode::SubTblStore
            | Opcode::MulTblStore
            | Opcode::DivTblStore
            | Opcode::ModTblStore => {
                let arith = match base {
                    Opcode::AddTblStore => Opcode::Add,
                    Opcode::SubTblStore => Opcode::Sub,
                    Opcode::MulTblStore => Opcode::Mul,
                    Opcode::DivTblStore => Opcode::Div,
                    _ => Opcode::Mod,
                };
                let value = self.pop()?;
                let key = self.pop()?;
                let obj = self.pop()?;
                let current = self.table_get(&obj, &key);
                let result = current.and_then(|current| {
                    let combined = arith_impl(arith, &current, &value);
                    self.release(current)?;
                    combined
                });
                self.release(value)?;
                match result {
                    Ok(combined) => {
                        self.table_set(&obj, key, combined)?;
                        self.release(obj)?;
                    }
                    Err(e) => {
                        self.release(key)?;
                        self.release(obj)?;
                        return Err(e);
                    }
                }
            }
            Opcode::Dup => {
                let n = self.fetch_operand()? as usize;
                let len = self.stack.len();
                let v = self
                    .stack
                    .get(len.checked_sub(n + 1).ok_or_else(|| {
                        RuntimeError::internal("dup reaches below the stack")
                    })?)
                    .cloned()
                    .ok_or_else(|| RuntimeError::internal("dup reaches below the stack"))?;
                self.push(v);
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(RuntimeError::internal("swap needs two stack values"));
                }
                self.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot => {
                let n = self.fetch_operand()? as usize;
                let len = self.stack.len();
                if n < 2 || n > len {
                    return Err(RuntimeError::internal("rot count out of range"));
                }
                let v = self.stack.remove(len - n);
                self.stack.push(v);
            }
            Opcode::Import => {
                let idx = self.fetch_operand()?;
                self.op_import(idx)?;
            }
            Opcode::LineNum => {
                let line = self.fetch_operand()?;
                let file_idx = self.fetch_operand()?;
                if let Constant::Str(s) = self.module.code.constant(file_idx)? {
                    self.file = s.clone();
                }
                self.line = line;
            }
            Opcode::Halt => self.halted = true,
            Opcode::Illegal => {
                return Err(RuntimeError::internal("illegal instruction executed"))
            }
            _ => {
                return Err(RuntimeError::internal(format!(
                    "unhandled opcode {}",
                    base.name()
                )))
            }
        }
        Ok(())
    }

    // -- locals -------------------------------------------------------------

    fn current_call_mut(&mut self) -> RuntimeResult<&mut CallFrame> {
        self.frames
            .iter_mut()
            .rev()
            .find_map(|f| f.as_call_mut())
            .ok_or_else(|| RuntimeError::internal("no active call frame"))
    }

    fn local(&self, slot: u32) -> RuntimeResult<&Value> {
        let cf = self
            .frames
            .iter()
            .rev()
            .find_map(|f| f.as_call())
            .ok_or_else(|| RuntimeError::internal("no active call frame"))?;
        cf.locals
            .get(slot as usize)
            .ok_or_else(|| RuntimeError::internal(format!("local slot {} out of range", slot)))
    }

    fn set_local(&mut self, slot: u32, v: Value) -> RuntimeResult<()> {
        let cf = self.current_call_mut()?;
        let cell = cf.locals.get_mut(slot as usize).ok_or_else(|| {
            RuntimeError::internal(format!("local slot {} out of range", slot))
        })?;
        let old = std::mem::replace(cell, v);
        self.release(old)
    }

    // -- name resolution ----------------------------------------------------

    /// Resolution order for a global load: enclosing frames' locals, the
    /// current module's globals, its function table, loaded modules by name,
    /// other modules' exported names (newest module first), then the global
    /// built-in functions.
    fn resolve_name(&self, name: &str) -> RuntimeResult<Value> {
        for frame in self.frames.iter().rev() {
            let Some(cf) = frame.as_call() else { continue };
            let Callee::Scripted(f) = &cf.callee else { continue };
            if let Some(slot) = f.module.code.function(f.index)?.local_slot(name) {
                return Ok(cf.locals[slot as usize].clone());
            }
        }
        if let Some(idx) = self.module.code.find_name(name) {
            if let Some(v) = self.module.global(idx) {
                return Ok(v);
            }
        }
        if let Some(index) = self.module.code.find_function(name) {
            return Ok(Value::Func(FuncRef { module: self.module.clone(), index }));
        }
        if let Some(m) = self.modules.get(name) {
            return Ok(Value::Module(m.clone()));
        }
        if let Some(m) = self.native_modules.get(name) {
            return Ok(Value::NativeMod(m.clone()));
        }
        // exported names of other loaded modules, newest first
        for module_name in self.module_order.iter().rev() {
            let Some(m) = self.modules.get(module_name) else { continue };
            if Rc::ptr_eq(m, &self.module) {
                continue;
            }
            if let Some(v) = m.export(name) {
                return Ok(v);
            }
        }
        if let Some(nf) = builtins::find(name) {
            return Ok(Value::NativeFunc(nf));
        }
        Err(RuntimeError::new(
            ErrorKind::NameError,
            format!("symbol '{}' not found", name),
        ))
    }

    /// Store through the same outward walk as loads: an enclosing frame that
    /// declares the name takes it; otherwise it binds the current module's
    /// global.
    fn store_name(&mut self, name_idx: u32, v: Value) -> RuntimeResult<()> {
        let name = self.module.code.name(name_idx)?.to_string();
        let mut found: Option<(usize, u32)> = None;
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let Some(cf) = frame.as_call() else { continue };
            let Callee::Scripted(f) = &cf.callee else { continue };
            if let Some(slot) = f.module.code.function(f.index)?.local_slot(&name) {
                found = Some((i, slot));
                break;
            }
        }
        if let Some((frame_idx, slot)) = found {
            let cf = self.frames[frame_idx]
                .as_call_mut()
                .expect("found frame is a call frame");
            let old = std::mem::replace(&mut cf.locals[slot as usize], v);
            return self.release(old);
        }
        let old = self.module.set_global(name_idx, v)?;
        if let Some(old) = old {
            self.release(old)?;
        }
        Ok(())
    }

    // -- calls and returns --------------------------------------------------

    fn op_call(&mut self, argc: u32, is_method_call: bool) -> RuntimeResult<()> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        let callee = self.pop()?;
        let receiver = if is_method_call { Some(self.pop()?) } else { None };

        match callee {
            Value::Func(f) => {
                if let Some(recv) = receiver {
                    if f.module.code.function(f.index)?.is_method {
                        args.insert(0, recv);
                    } else {
                        self.release(recv)?;
                    }
                }
                self.push_scripted_frame(f, args)
            }
            Value::NativeFunc(nf) => {
                if let Some(recv) = receiver {
                    if nf.is_method {
                        args.insert(0, recv);
                    } else {
                        self.release(recv)?;
                    }
                }
                let result = self.call_native(nf, args)?;
                self.push(result);
                Ok(())
            }
            other => {
                let type_name = other.type_name();
                self.release(other)?;
                if let Some(recv) = receiver {
                    self.release(recv)?;
                }
                for a in args {
                    self.release(a)?;
                }
                Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("{} is not callable", type_name),
                ))
            }
        }
    }

    fn op_return(&mut self) -> RuntimeResult<()> {
        let ret = self.pop()?;
        loop {
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| RuntimeError::internal("return with no active frame"))?;
            match frame {
                // block frames above the call are abandoned; their slots are
                // released with the rest of the frame's locals below
                Frame::Block { .. } => continue,
                Frame::Call(cf) => {
                    for v in cf.locals {
                        self.release(v)?;
                    }
                    if let Some(m) = cf.caller_module {
                        self.module = m;
                    }
                    self.ip = cf.return_ip;
                    break;
                }
            }
        }
        self.push(ret);
        Ok(())
    }

    fn op_leave(&mut self) -> RuntimeResult<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::internal("leave with no active frame"))?;
        let Frame::Block { slots } = frame else {
            return Err(RuntimeError::internal("mismatched enter/leave"));
        };
        for slot in slots {
            let old = {
                let cf = self.current_call_mut()?;
                match cf.locals.get_mut(slot as usize) {
                    Some(cell) => std::mem::replace(cell, Value::Null),
                    None => {
                        return Err(RuntimeError::internal(format!(
                            "block slot {} out of range",
                            slot
                        )))
                    }
                }
            };
            self.release(old)?;
        }
        Ok(())
    }

    // -- tables, slices, iteration ------------------------------------------

    fn table_get(&self, obj: &Value, key: &Value) -> RuntimeResult<Value> {
        match obj {
            Value::Vec(h) => {
                let idx = key.integral("vector index")?;
                let inner = h.borrow();
                if idx < 0 || idx as usize >= inner.items.len() {
                    return Err(RuntimeError::new(
                        ErrorKind::IndexError,
                        format!(
                            "vector index {} out of range (length {})",
                            idx,
                            inner.items.len()
                        ),
                    ));
                }
                Ok(inner.items[idx as usize].clone())
            }
            Value::Str(s) => {
                let idx = key.integral("string index")?;
                let ch = if idx < 0 { None } else { s.chars().nth(idx as usize) };
                match ch {
                    Some(c) => Ok(Value::str(&c.to_string())),
                    None => Err(RuntimeError::new(
                        ErrorKind::IndexError,
                        format!("string index {} out of range", idx),
                    )),
                }
            }
            Value::Map(h) | Value::Class(h) | Value::Instance(h) => {
                match h.borrow().get(key) {
                    Some(v) => Ok(v.clone()),
                    None => Err(RuntimeError::new(
                        ErrorKind::KeyError,
                        format!("key {} not found", display(key)),
                    )),
                }
            }
            Value::Module(m) => {
                let name = expect_name(key)?;
                m.export(&name).ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::NameError,
                        format!("module {} has no member '{}'", m.name, name),
                    )
                })
            }
            Value::NativeMod(m) => {
                let name = expect_name(key)?;
                m.get(&name).ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::NameError,
                        format!("module {} has no member '{}'", m.name(), name),
                    )
                })
            }
            other => Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("cannot index {}", other.type_name()),
            )),
        }
    }

    /// Store `value` at `obj[key]`, consuming both and releasing whatever
    /// the slot previously held.
    fn table_set(&mut self, obj: &Value, key: Value, value: Value) -> RuntimeResult<()> {
        match obj {
            Value::Vec(h) => {
                let idx = match key.integral("vector index") {
                    Ok(idx) => idx,
                    Err(e) => {
                        self.release(key)?;
                        self.release(value)?;
                        return Err(e);
                    }
                };
                let len = h.borrow().items.len();
                if idx < 0 || idx as usize >= len {
                    self.release(key)?;
                    self.release(value)?;
                    return Err(RuntimeError::new(
                        ErrorKind::IndexError,
                        format!("vector index {} out of range (length {})", idx, len),
                    ));
                }
                let old = std::mem::replace(&mut h.borrow_mut().items[idx as usize], value);
                self.release(key)?;
                self.release(old)
            }
            Value::Map(h) | Value::Class(h) | Value::Instance(h) => {
                // remove first so an overwritten entry's key is released too
                let mk = MapKey(key);
                let old = h.borrow_mut().entries.remove_entry(&mk);
                h.borrow_mut().entries.insert(mk, value);
                if let Some((old_key, old_value)) = old {
                    self.release(old_key.0)?;
                    self.release(old_value)?;
                }
                Ok(())
            }
            other => {
                let type_name = other.type_name();
                self.release(key)?;
                self.release(value)?;
                Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("cannot assign into {}", type_name),
                ))
            }
        }
    }

    fn slice_get(
        &self,
        obj: &Value,
        start: &Value,
        end: &Value,
        step: Option<&Value>,
    ) -> RuntimeResult<Value> {
        let step = match step {
            Some(v) => {
                let s = v.integral("slice step")?;
                if s <= 0 {
                    return Err(RuntimeError::new(
                        ErrorKind::NumericError,
                        "slice step must be a positive integer",
                    ));
                }
                s as usize
            }
            None => 1,
        };
        match obj {
            Value::Vec(h) => {
                let inner = h.borrow();
                let (s, e) = slice_bounds(start, end, inner.items.len())?;
                let out: Vec<Value> =
                    inner.items[s..e].iter().step_by(step).cloned().collect();
                Ok(Value::Vec(Vector::from_items(out)))
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let (s, e) = slice_bounds(start, end, chars.len())?;
                let out: String = chars[s..e].iter().step_by(step).collect();
                Ok(Value::str(&out))
            }
            other => Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("cannot slice {}", other.type_name()),
            )),
        }
    }

    fn slice_set(
        &mut self,
        obj: &Value,
        start: &Value,
        end: &Value,
        step: Option<&Value>,
        value: Value,
    ) -> RuntimeResult<()> {
        let target = match obj {
            Value::Vec(h) => h.clone(),
            other => {
                let type_name = other.type_name();
                self.release(value)?;
                return Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("cannot slice-assign into {}", type_name),
                ));
            }
        };
        let replacement = match &value {
            Value::Vec(h) => h.borrow().items.clone(),
            other => {
                let type_name = other.type_name();
                self.release(value)?;
                return Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("slice assignment requires a vector, got {}", type_name),
                ));
            }
        };
        let result = (|| -> RuntimeResult<Vec<Value>> {
            let mut removed = Vec::new();
            let mut items = target.borrow_mut();
            let len = items.items.len();
            let (s, e) = slice_bounds(start, end, len)?;
            match step {
                None => {
                    removed.extend(items.items.splice(s..e, replacement));
                }
                Some(step) => {
                    let st = step.integral("slice step")?;
                    if st <= 0 {
                        return Err(RuntimeError::new(
                            ErrorKind::NumericError,
                            "slice step must be a positive integer",
                        ));
                    }
                    let targets: Vec<usize> = (s..e).step_by(st as usize).collect();
                    if targets.len() != replacement.len() {
                        return Err(RuntimeError::new(
                            ErrorKind::IndexError,
                            format!(
                                "slice assignment length mismatch: {} targets, {} values",
                                targets.len(),
                                replacement.len()
                            ),
                        ));
                    }
                    for (slot, new) in targets.into_iter().zip(replacement) {
                        removed.push(std::mem::replace(&mut items.items[slot], new));
                    }
                }
            }
            Ok(removed)
        })();
        match result {
            Ok(removed) => {
                for v in removed {
                    self.release(v)?;
                }
                self.release(value)
            }
            Err(e) => {
                self.release(value)?;
                Err(e)
            }
        }
    }

    /// Resolve `receiver.name` for a call: built-in tables for vector, map
    /// and string receivers, entry lookup for classes and instances (with
    /// the map built-ins as fallback), exported names for modules.
    fn resolve_method(&self, receiver: &Value, name: &str) -> RuntimeResult<Value> {
        match receiver {
            Value::Vec(_) => vector_builtins::find(name)
                .map(Value::NativeFunc)
                .ok_or_else(|| method_error("vector", name)),
            Value::Str(_) => string_builtins::find(name)
                .map(Value::NativeFunc)
                .ok_or_else(|| method_error("string", name)),
            Value::Map(h) => map_builtins::find(name)
                .map(Value::NativeFunc)
                .or_else(|| h.borrow().get_str(name).cloned())
                .ok_or_else(|| method_error("map", name)),
            Value::Class(h) | Value::Instance(h) => h
                .borrow()
                .get_str(name)
                .cloned()
                .or_else(|| map_builtins::find(name).map(Value::NativeFunc))
                .ok_or_else(|| method_error(receiver.type_name(), name)),
            Value::Module(m) => m.export(name).ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::NameError,
                    format!("module {} has no member '{}'", m.name, name),
                )
            }),
            Value::NativeMod(m) => m.get(name).ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::NameError,
                    format!("module {} has no member '{}'", m.name(), name),
                )
            }),
            other => Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("{} has no methods", other.type_name()),
            )),
        }
    }

    /// Drive one iteration step: call `next()` on the enumerable and unpack
    /// its `[more, value]` result onto the stack (value under the flag, key
    /// and value for the pair form).
    fn op_for_iter(&mut self, pair: bool) -> RuntimeResult<()> {
        let container = self.pop()?;
        let next_fn = match self.resolve_method(&container, "next") {
            Ok(f) => f,
            Err(e) => {
                self.release(container)?;
                return Err(e);
            }
        };
        let result = self.call_value(next_fn, vec![container.clone()])?;
        self.release(container)?;

        let (more, item) = match &result {
            Value::Vec(h) => {
                let inner = h.borrow();
                if inner.items.len() != 2 {
                    return Err(RuntimeError::internal(
                        "next() must return a [more, value] pair",
                    ));
                }
                (inner.items[0].clone(), inner.items[1].clone())
            }
            _ => {
                return Err(RuntimeError::internal(
                    "next() must return a [more, value] pair",
                ))
            }
        };
        self.release(result)?;

        let more_flag = more.coerce_to_bool()?;
        if pair {
            if more_flag {
                let (k, v) = match &item {
                    Value::Vec(h) if h.borrow().items.len() == 2 => {
                        let inner = h.borrow();
                        (inner.items[0].clone(), inner.items[1].clone())
                    }
                    other => {
                        let type_name = other.type_name();
                        self.release(item)?;
                        return Err(RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!(
                                "two-variable loop requires key/value pairs, got {}",
                                type_name
                            ),
                        ));
                    }
                };
                self.release(item)?;
                self.push(k);
                self.push(v);
            } else {
                self.release(item)?;
                self.push(Value::Null);
                self.push(Value::Null);
            }
        } else {
            self.push(item);
        }
        self.push(more);
        Ok(())
    }

    // -- classes ------------------------------------------------------------

    /// Pop `2n` key/value pairs (deepest pushed first) into a fresh map.
    fn build_map(&mut self, pairs: u32) -> RuntimeResult<crate::value::MapRef> {
        let mut flat = Vec::with_capacity(pairs as usize * 2);
        for _ in 0..pairs * 2 {
            flat.push(self.pop()?);
        }
        flat.reverse();
        let map = Map::new();
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let mk = MapKey(key);
            let old = map.borrow_mut().entries.remove_entry(&mk);
            map.borrow_mut().entries.insert(mk, value);
            if let Some((old_key, old_value)) = old {
                self.release(old_key.0)?;
                self.release(old_value)?;
            }
        }
        Ok(map)
    }

    fn op_new_instance(&mut self, argc: u32) -> RuntimeResult<()> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        let class_val = self.pop()?;
        let class = match &class_val {
            Value::Class(h) => h.clone(),
            other => {
                let type_name = other.type_name();
                self.release(class_val)?;
                for a in args {
                    self.release(a)?;
                }
                return Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("'new' requires a class, got {}", type_name),
                ));
            }
        };

        // flatten inherited entries, bases first so derived entries win
        let inst_map = Map::new();
        let mut visited = Vec::new();
        flatten_class(&class, &inst_map, &mut visited);
        inst_map.borrow_mut().entries.insert(
            MapKey(Value::str("__class__")),
            Value::Class(class.clone()),
        );
        self.release(class_val)?;

        let instance = Value::Instance(inst_map.clone());
        let ctor = inst_map.borrow().get_str("new").cloned();
        match ctor {
            Some(ctor) => {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(instance.clone());
                full_args.extend(args);
                let result = self.call_value(ctor, full_args)?;
                self.release(result)?;
            }
            None => {
                for a in args {
                    self.release(a)?;
                }
            }
        }
        self.push(instance);
        Ok(())
    }

    // -- modules ------------------------------------------------------------

    fn op_import(&mut self, name_idx: u32) -> RuntimeResult<()> {
        let name = self.module.code.name(name_idx)?.to_string();
        let module_value = if let Some(m) = self.native_modules.get(&name) {
            Value::NativeMod(m.clone())
        } else if let Some(m) = self.modules.get(&name) {
            Value::Module(m.clone())
        } else {
            let path = find_module_file(&name).ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::ImportError,
                    format!("module '{}' not found", name),
                )
            })?;
            let code = load_code(&path)?;
            Value::Module(self.load_module(&name, code)?)
        };
        let old = self.module.set_global(name_idx, module_value)?;
        if let Some(old) = old {
            self.release(old)?;
        }
        Ok(())
    }

    fn install_module(&mut self, name: &str, module: ModuleRef) {
        if self.modules.insert(name.to_string(), module).is_none() {
            self.module_order.push(name.to_string());
        }
    }

    /// Install a module and execute its top level.
    pub fn load_module(&mut self, name: &str, code: Rc<Code>) -> RuntimeResult<ModuleRef> {
        let module = Module::new(name, code);
        // registered before running so circular imports see it
        self.install_module(name, module.clone());
        let main = module.code.main_function()?;
        let result = self.call_value(
            Value::Func(FuncRef { module: module.clone(), index: main }),
            Vec::new(),
        )?;
        self.release(result)?;
        Ok(module)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

// ---------------------------------------------------------------------------
// free helpers
// ---------------------------------------------------------------------------

fn constant_value(code: &Code, idx: u32) -> RuntimeResult<Value> {
    Ok(match code.constant(idx)? {
        Constant::Num(n) => Value::Num(*n),
        Constant::Str(s) => Value::Str(s.clone()),
    })
}

fn expect_name(key: &Value) -> RuntimeResult<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(RuntimeError::new(
            ErrorKind::TypeMismatch,
            format!("module member name must be a string, got {}", other.type_name()),
        )),
    }
}

fn method_error(type_name: &str, method: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::KeyError,
        format!("{} has no method '{}'", type_name, method),
    )
}

fn slice_bounds(start: &Value, end: &Value, len: usize) -> RuntimeResult<(usize, usize)> {
    let s = start.integral("slice start")?;
    let e = end.integral("slice end")?;
    if s < 0 || e < s || e as usize > len {
        return Err(RuntimeError::new(
            ErrorKind::IndexError,
            format!("slice {}:{} out of range (length {})", s, e, len),
        ));
    }
    Ok((s as usize, e as usize))
}

fn collect_class_chain(
    class: &crate::value::MapRef,
    chain: &mut Vec<crate::value::MapRef>,
    visited: &mut Vec<usize>,
) {
    let addr = class.as_ptr() as usize;
    if visited.contains(&addr) {
        return;
    }
    visited.push(addr);
    chain.push(class.clone());
    let bases = class.borrow().get_str("__bases__").cloned();
    if let Some(Value::Vec(bases)) = bases {
        for base in bases.borrow().items.iter() {
            if let Value::Class(b) = base {
                collect_class_chain(b, chain, visited);
            }
        }
    }
}

fn flatten_class(
    class: &crate::value::MapRef,
    out: &crate::value::MapRef,
    visited: &mut Vec<usize>,
) {
    let addr = class.as_ptr() as usize;
    if visited.contains(&addr) {
        return;
    }
    visited.push(addr);
    let bases = class.borrow().get_str("__bases__").cloned();
    if let Some(Value::Vec(bases)) = bases {
        for base in bases.borrow().items.iter() {
            if let Value::Class(b) = base {
                flatten_class(b, out, visited);
            }
        }
    }
    for (key, value) in class.borrow().entries.iter() {
        out.borrow_mut()
            .entries
            .insert(key.clone(), value.clone());
    }
}

/// Arithmetic for `add`..`mod` and the augmented table stores. `add` on two
/// strings concatenates; everything else wants numbers.
pub(crate) fn arith_impl(op: Opcode, a: &Value, b: &Value) -> RuntimeResult<Value> {
    match (op, a, b) {
        (Opcode::Add, Value::Num(x), Value::Num(y)) => Ok(Value::Num(x + y)),
        (Opcode::Add, Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(&s))
        }
        (Opcode::Sub, Value::Num(x), Value::Num(y)) => Ok(Value::Num(x - y)),
        (Opcode::Mul, Value::Num(x), Value::Num(y)) => Ok(Value::Num(x * y)),
        (Opcode::Div, Value::Num(x), Value::Num(y)) => {
            if *y == 0.0 {
                Err(RuntimeError::new(ErrorKind::NumericError, "division by zero"))
            } else {
                Ok(Value::Num(x / y))
            }
        }
        (Opcode::Mod, Value::Num(x), Value::Num(y)) => {
            if *y == 0.0 {
                Err(RuntimeError::new(ErrorKind::NumericError, "modulus by zero"))
            } else {
                // truncation toward zero on the integer casts
                Ok(Value::Num(((*x as i64) % (*y as i64)) as f64))
            }
        }
        (op, a, b) => Err(RuntimeError::new(
            ErrorKind::TypeMismatch,
            format!(
                "invalid operands for '{}': {} and {}",
                op.name(),
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deva_core::FunctionObject;

    fn one_op_main(bytes: Vec<u8>) -> Code {
        let mut code = Code::new();
        code.functions.push(FunctionObject {
            name: "@main".to_string(),
            filename: "t.dv".to_string(),
            first_line: 1,
            num_params: 0,
            defaults: vec![],
            num_locals: 0,
            local_names: vec![],
            names: vec![],
            addr: 0,
            is_method: false,
        });
        code.bytes = bytes;
        code
    }

    #[test]
    fn test_halt_stops_dispatch() {
        // halt before the illegal instruction is ever reached
        let code = one_op_main(vec![
            u8::from(Opcode::Halt),
            u8::from(Opcode::Illegal),
        ]);
        let mut vm = Vm::with_output(Box::new(std::io::sink()));
        let result = vm.run_code(Rc::new(code), "halting").unwrap();
        assert!(matches!(result, Value::Null));
        vm.shutdown().unwrap();
    }

    #[test]
    fn test_illegal_instruction_is_internal_error() {
        let code = one_op_main(vec![u8::from(Opcode::Illegal)]);
        let mut vm = Vm::with_output(Box::new(std::io::sink()));
        let err = vm.run_code(Rc::new(code), "bad").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        vm.shutdown().unwrap();
    }

    #[test]
    fn test_mismatched_leave_is_internal_error() {
        let code = one_op_main(vec![u8::from(Opcode::Leave)]);
        let mut vm = Vm::with_output(Box::new(std::io::sink()));
        let err = vm.run_code(Rc::new(code), "bad").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        vm.shutdown().unwrap();
    }

    #[test]
    fn test_stack_underflow_is_internal_error() {
        let code = one_op_main(vec![u8::from(Opcode::Pop)]);
        let mut vm = Vm::with_output(Box::new(std::io::sink()));
        let err = vm.run_code(Rc::new(code), "bad").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        vm.shutdown().unwrap();
    }

    #[test]
    fn test_arith_add_numbers_and_strings() {
        let v = arith_impl(Opcode::Add, &Value::Num(2.0), &Value::Num(3.0)).unwrap();
        assert!(matches!(v, Value::Num(n) if n == 5.0));
        let v = arith_impl(Opcode::Add, &Value::str("ab"), &Value::str("c")).unwrap();
        assert!(matches!(v, Value::Str(s) if &*s == "abc"));
        let err = arith_impl(Opcode::Add, &Value::Num(1.0), &Value::str("x")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_division_by_zero() {
        let err = arith_impl(Opcode::Div, &Value::Num(1.0), &Value::Num(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NumericError);
        let err = arith_impl(Opcode::Mod, &Value::Num(1.0), &Value::Num(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NumericError);
    }

    #[test]
    fn test_modulus_truncates_toward_zero() {
        let v = arith_impl(Opcode::Mod, &Value::Num(7.0), &Value::Num(3.0)).unwrap();
        assert!(matches!(v, Value::Num(n) if n == 1.0));
        let v = arith_impl(Opcode::Mod, &Value::Num(-7.0), &Value::Num(3.0)).unwrap();
        assert!(matches!(v, Value::Num(n) if n == -1.0));
        let v = arith_impl(Opcode::Mod, &Value::Num(7.5), &Value::Num(2.0)).unwrap();
        assert!(matches!(v, Value::Num(n) if n == 1.0));
    }

    #[test]
    fn test_slice_bounds() {
        assert_eq!(
            slice_bounds(&Value::Num(1.0), &Value::Num(3.0), 5).unwrap(),
            (1, 3)
        );
        assert!(slice_bounds(&Value::Num(3.0), &Value::Num(1.0), 5).is_err());
        assert!(slice_bounds(&Value::Num(0.0), &Value::Num(6.0), 5).is_err());
        let err = slice_bounds(&Value::Num(0.5), &Value::Num(2.0), 5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NumericError);
    }
}
