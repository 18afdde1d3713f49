//! Tree-walking bytecode virtual machine

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::chunk::{OpCode, UpvalueRef};
use crate::module::{FsModuleLoader, ModuleLoader};
use crate::object::{BoundMethod, Class, Closure, Instance, Object, Upvalue};
use crate::value::Value;

/// Maximum depth of nested calls, mirroring the book's fixed-size frame
/// stack without actually bounding it by a fixed array.
const FRAMES_MAX: usize = 64;

/// Toggled by the CLI's `--trace` switch; read by [`VM::run`] when the
/// `debug_trace` build feature is enabled. A build without the feature pays
/// nothing for this even with `--trace` passed.
pub static TRACE_ENABLED: AtomicBool = AtomicBool::new(false);

#[derive(Error, Debug)]
pub enum InterpretError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("compile error")]
    Compile,
    #[error("runtime error")]
    Runtime,
}

struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    base: usize,
}

/// The VM owns the object heap (string interner and object registry) as
/// well as the execution stack, so that [`crate::object::Object`]
/// constructors can intern strings and the compiler can fold constants
/// through it.
pub struct VM {
    strings: RefCell<HashMap<u64, Rc<String>>>,
    objects: RefCell<Vec<Rc<Object>>>,
    globals: RefCell<HashMap<String, Value>>,
    stack: RefCell<Vec<Value>>,
    frames: RefCell<Vec<CallFrame>>,
    open_upvalues: RefCell<Vec<Rc<RefCell<Upvalue>>>>,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self {
            strings: RefCell::new(HashMap::new()),
            objects: RefCell::new(Vec::new()),
            globals: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
            open_upvalues: RefCell::new(Vec::new()),
        }
    }

    pub fn find_string(&self, hash: u64) -> Option<Rc<String>> {
        self.strings.borrow().get(&hash).cloned()
    }

    pub fn add_string(&self, hash: u64, value: Rc<String>) {
        self.strings.borrow_mut().insert(hash, value);
    }

    pub fn add_object(&self, obj: Rc<Object>) {
        self.objects.borrow_mut().push(obj);
    }

    /// Wraps the compiled top-level script `Function` in a closure and
    /// runs it to completion.
    pub fn interpret(&self, function: Rc<Object>) -> Result<(), InterpretError> {
        let closure_obj = Rc::new(Object::Closure(Rc::new(Closure::new(
            function.as_function().clone(),
            Vec::new(),
        ))));
        let closure = match closure_obj.as_ref() {
            Object::Closure(c) => c.clone(),
            _ => unreachable!(),
        };

        self.add_object(closure_obj.clone());
        self.push(Value::Obj(closure_obj));
        self.frames.borrow_mut().push(CallFrame {
            closure,
            ip: 0,
            base: 0,
        });

        self.run()
    }

    fn run(&self) -> Result<(), InterpretError> {
        loop {
            let (instr, idx) = {
                let mut frames = self.frames.borrow_mut();
                let frame = frames.last_mut().expect("run called with no active frame");
                let idx = frame.ip;
                frame.ip += 1;
                (frame.closure.function.chunk.read(idx).clone(), idx)
            };

            #[cfg(feature = "debug_trace")]
            if TRACE_ENABLED.load(Ordering::Relaxed) {
                let frames = self.frames.borrow();
                let frame = frames.last().unwrap();
                frame.closure.function.chunk.disassemble_instruction(idx);
            }

            match instr {
                OpCode::Constant(i) => {
                    let v = self.read_constant(i);
                    self.push(v);
                }
                OpCode::Null => self.push(Value::Null),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal(slot) => {
                    let base = self.current_base();
                    let v = self.stack.borrow()[base + slot as usize].clone();
                    self.push(v);
                }
                OpCode::SetLocal(slot) => {
                    let base = self.current_base();
                    let v = self.peek(0);
                    self.stack.borrow_mut()[base + slot as usize] = v;
                }
                OpCode::GetGlobal(i) => {
                    let key = Self::obj_string(&self.read_constant(i));
                    let v = self.globals.borrow().get(&key).cloned();
                    match v {
                        Some(v) => self.push(v),
                        None => return Err(self.runtime_error(&format!("Undefined variable '{}'.", key))),
                    }
                }
                OpCode::DefineGlobal(i) => {
                    let key = Self::obj_string(&self.read_constant(i));
                    let v = self.pop();
                    self.globals.borrow_mut().insert(key, v);
                }
                OpCode::SetGlobal(i) => {
                    let key = Self::obj_string(&self.read_constant(i));
                    let v = self.peek(0);
                    if !self.globals.borrow().contains_key(&key) {
                        return Err(self.runtime_error(&format!("Undefined variable '{}'.", key)));
                    }
                    self.globals.borrow_mut().insert(key, v);
                }
                OpCode::GetUpvalue(i) => {
                    let v = self.read_upvalue(i);
                    self.push(v);
                }
                OpCode::SetUpvalue(i) => {
                    let v = self.peek(0);
                    self.write_upvalue(i, v);
                }
                OpCode::GetProperty(i) => self.get_property(i)?,
                OpCode::SetProperty(i) => self.set_property(i)?,
                OpCode::GetSuper(i) => self.get_super(i)?,
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.numeric_binary(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.numeric_binary(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.numeric_binary(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.numeric_binary(|a, b| Value::Number(a / b))?,
                OpCode::Mod => self.numeric_binary(|a, b| Value::Number(a % b))?,
                OpCode::Pow => self.numeric_binary(|a, b| Value::Number(a.powf(b)))?,
                // `->`/`<-` are binary numeric operators in Gecco (no distinct runtime
                // behaviour from `+`); see DESIGN.md for why they exist as separate opcodes.
                OpCode::PointRight | OpCode::PointLeft => self.numeric_binary(|a, b| Value::Number(a + b))?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    _ => return Err(self.runtime_error("Operand must be a number.")),
                },
                OpCode::Print => {
                    let v = self.pop();
                    println!("{}", v);
                }
                OpCode::Jump(dist) => self.set_ip(idx + 1 + dist as usize),
                OpCode::JumpIfFalse(dist) => {
                    if self.peek(0).is_falsey() {
                        self.set_ip(idx + 1 + dist as usize);
                    }
                }
                OpCode::Loop(dist) => self.set_ip(idx + 1 - dist as usize),
                OpCode::Call(argc) => {
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke(name, argc) => self.invoke(name, argc)?,
                OpCode::SuperInvoke(name, argc) => self.super_invoke(name, argc)?,
                OpCode::Closure(i, upvalues) => self.make_closure(i, &upvalues),
                OpCode::CloseUpvalue => {
                    let top = self.stack.borrow().len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.borrow_mut().pop().expect("return with no frame");
                    self.close_upvalues(frame.base);
                    let is_top_level = self.frames.borrow().is_empty();

                    // Truncating to `frame.base` also discards the returning
                    // closure itself when `base == 0` (the top-level script
                    // frame), so there's nothing left to pop afterwards.
                    self.stack.borrow_mut().truncate(frame.base);

                    if is_top_level {
                        return Ok(());
                    }
                    self.push(result);
                }
                OpCode::Class(i) => {
                    let name = self.read_constant(i);
                    let name_obj = name.as_obj().expect("class name constant must be a string").clone();
                    let class = Rc::new(Object::Class(Rc::new(Class::new(name_obj))));
                    self.add_object(class.clone());
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => self.inherit()?,
                OpCode::Method(i) => self.define_method(i),
                OpCode::Type(_) => {
                    // Type annotations are checked by nothing at runtime; see
                    // SPEC_FULL.md's Open Question resolution.
                }
            }
        }
    }

    // -- stack helpers -----------------------------------------------------

    fn push(&self, v: Value) {
        self.stack.borrow_mut().push(v);
    }

    fn pop(&self) -> Value {
        self.stack.borrow_mut().pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        let stack = self.stack.borrow();
        stack[stack.len() - 1 - distance].clone()
    }

    fn current_base(&self) -> usize {
        self.frames.borrow().last().unwrap().base
    }

    fn read_constant(&self, idx: u8) -> Value {
        let frames = self.frames.borrow();
        let frame = frames.last().unwrap();
        frame.closure.function.chunk.get_constant(idx).clone()
    }

    fn set_ip(&self, new_ip: usize) {
        self.frames.borrow_mut().last_mut().unwrap().ip = new_ip;
    }

    fn obj_string(v: &Value) -> String {
        match v.as_obj().expect("expected a string value").as_ref() {
            Object::String(s, _) => s.as_ref().clone(),
            other => unreachable!("expected a string constant, found {:?}", other),
        }
    }

    // -- arithmetic ----------------------------------------------------------

    fn numeric_binary(&self, f: impl Fn(f64, f64) -> Value) -> Result<(), InterpretError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(f(a, b));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn add(&self) -> Result<(), InterpretError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b)) => match (a.as_ref(), b.as_ref()) {
                (Object::String(x, _), Object::String(y, _)) => {
                    let concatenated = format!("{}{}", x, y);
                    self.pop();
                    self.pop();
                    let s = Object::from_string(concatenated, self);
                    self.push(Value::Obj(s));
                    Ok(())
                }
                _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
            },
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    // -- calls, methods, classes --------------------------------------------

    fn call_value(&self, callee: Value, arg_count: u8) -> Result<(), InterpretError> {
        let obj = match &callee {
            Value::Obj(o) => o,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };

        match obj.as_ref() {
            Object::Closure(c) => self.call_closure(c.clone(), arg_count),
            Object::Class(class) => {
                let instance = Rc::new(Object::Instance(Rc::new(Instance::new(obj.clone()))));
                self.add_object(instance.clone());

                let slot = self.stack.borrow().len() - arg_count as usize - 1;
                self.stack.borrow_mut()[slot] = Value::Obj(instance);

                match class.find_method("init") {
                    Some(Value::Obj(o)) => match o.as_ref() {
                        Object::Closure(c) => self.call_closure(c.clone(), arg_count),
                        _ => unreachable!(),
                    },
                    Some(_) => unreachable!(),
                    None if arg_count != 0 => {
                        Err(self.runtime_error(&format!("Expected 0 arguments but got {}.", arg_count)))
                    }
                    None => Ok(()),
                }
            }
            Object::BoundMethod(bound) => {
                let slot = self.stack.borrow().len() - arg_count as usize - 1;
                self.stack.borrow_mut()[slot] = bound.receiver.clone();
                self.call_closure(bound.method.clone(), arg_count)
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&self, closure: Rc<Closure>, arg_count: u8) -> Result<(), InterpretError> {
        if arg_count as usize != closure.function.arity {
            return Err(self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, arg_count
            )));
        }

        if self.frames.borrow().len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }

        let base = self.stack.borrow().len() - arg_count as usize - 1;
        self.frames.borrow_mut().push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    fn bind_method(&self, receiver: Value, method: Value) -> Result<Value, InterpretError> {
        let closure = match &method {
            Value::Obj(o) => match o.as_ref() {
                Object::Closure(c) => c.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let bound = Rc::new(Object::BoundMethod(Rc::new(BoundMethod {
            receiver,
            method: closure,
        })));
        self.add_object(bound.clone());
        Ok(Value::Obj(bound))
    }

    fn get_property(&self, idx: u8) -> Result<(), InterpretError> {
        let receiver = self.peek(0);
        let instance = match &receiver {
            Value::Obj(o) => match o.as_ref() {
                Object::Instance(i) => i.clone(),
                _ => return Err(self.runtime_error("Only instances have properties.")),
            },
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };

        let name = Self::obj_string(&self.read_constant(idx));

        if let Some(value) = instance.fields.borrow().get(&name).cloned() {
            self.pop();
            self.push(value);
            return Ok(());
        }

        let class = match instance.class.as_ref() {
            Object::Class(c) => c.clone(),
            _ => unreachable!(),
        };

        match class.find_method(&name) {
            Some(method) => {
                let bound = self.bind_method(receiver, method)?;
                self.pop();
                self.push(bound);
                Ok(())
            }
            None => Err(self.runtime_error(&format!("Undefined property '{}'.", name))),
        }
    }

    fn set_property(&self, idx: u8) -> Result<(), InterpretError> {
        let value = self.peek(0);
        let receiver = self.peek(1);
        let instance = match &receiver {
            Value::Obj(o) => match o.as_ref() {
                Object::Instance(i) => i.clone(),
                _ => return Err(self.runtime_error("Only instances have fields.")),
            },
            _ => return Err(self.runtime_error("Only instances have fields.")),
        };

        let name = Self::obj_string(&self.read_constant(idx));
        instance.fields.borrow_mut().insert(name, value.clone());

        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn get_super(&self, idx: u8) -> Result<(), InterpretError> {
        let name = Self::obj_string(&self.read_constant(idx));
        let superclass = self.pop();
        let receiver = self.pop();

        let class = match &superclass {
            Value::Obj(o) => match o.as_ref() {
                Object::Class(c) => c.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };

        match class.find_method(&name) {
            Some(method) => {
                let bound = self.bind_method(receiver, method)?;
                self.push(bound);
                Ok(())
            }
            None => Err(self.runtime_error(&format!("Undefined property '{}'.", name))),
        }
    }

    fn invoke(&self, name_idx: u8, arg_count: u8) -> Result<(), InterpretError> {
        let name = Self::obj_string(&self.read_constant(name_idx));
        let receiver = self.peek(arg_count as usize);

        let instance = match &receiver {
            Value::Obj(o) => match o.as_ref() {
                Object::Instance(i) => i.clone(),
                _ => return Err(self.runtime_error("Only instances have methods.")),
            },
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        if let Some(field) = instance.fields.borrow().get(&name).cloned() {
            let slot = self.stack.borrow().len() - arg_count as usize - 1;
            self.stack.borrow_mut()[slot] = field.clone();
            return self.call_value(field, arg_count);
        }

        let class = match instance.class.as_ref() {
            Object::Class(c) => c.clone(),
            _ => unreachable!(),
        };
        self.invoke_from_class(&class, &name, arg_count)
    }

    fn invoke_from_class(&self, class: &Rc<Class>, name: &str, arg_count: u8) -> Result<(), InterpretError> {
        match class.find_method(name) {
            Some(Value::Obj(o)) => match o.as_ref() {
                Object::Closure(c) => self.call_closure(c.clone(), arg_count),
                _ => unreachable!(),
            },
            Some(_) => unreachable!(),
            None => Err(self.runtime_error(&format!("Undefined property '{}'.", name))),
        }
    }

    fn super_invoke(&self, name_idx: u8, arg_count: u8) -> Result<(), InterpretError> {
        let name = Self::obj_string(&self.read_constant(name_idx));
        let superclass_val = self.pop();
        let class = match &superclass_val {
            Value::Obj(o) => match o.as_ref() {
                Object::Class(c) => c.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        self.invoke_from_class(&class, &name, arg_count)
    }

    fn inherit(&self) -> Result<(), InterpretError> {
        let superclass_val = self.peek(1);
        let subclass_val = self.peek(0);

        let superclass = match &superclass_val {
            Value::Obj(o) => match o.as_ref() {
                Object::Class(c) => c.clone(),
                _ => return Err(self.runtime_error("Superclass must be a class.")),
            },
            _ => return Err(self.runtime_error("Superclass must be a class.")),
        };
        let subclass = match &subclass_val {
            Value::Obj(o) => match o.as_ref() {
                Object::Class(c) => c.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };

        for (name, method) in superclass.methods.borrow().iter() {
            subclass.methods.borrow_mut().insert(name.clone(), method.clone());
        }

        self.pop(); // discard the subclass; the superclass stays bound as `super`
        Ok(())
    }

    fn define_method(&self, name_idx: u8) {
        let method = self.pop();
        let class_val = self.peek(0);
        let class = match &class_val {
            Value::Obj(o) => match o.as_ref() {
                Object::Class(c) => c.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let name = Self::obj_string(&self.read_constant(name_idx));
        class.methods.borrow_mut().insert(name, method);
    }

    // -- closures and upvalues ------------------------------------------------

    fn make_closure(&self, idx: u8, upvalue_refs: &[UpvalueRef]) {
        let function_val = self.read_constant(idx);
        let function = match &function_val {
            Value::Obj(o) => o.as_function().clone(),
            _ => unreachable!(),
        };

        let base = self.current_base();
        let mut upvalues = Vec::with_capacity(upvalue_refs.len());
        for up in upvalue_refs {
            if up.is_local {
                upvalues.push(self.capture_upvalue(base + up.index as usize));
            } else {
                let frames = self.frames.borrow();
                let frame = frames.last().unwrap();
                upvalues.push(frame.closure.upvalues[up.index as usize].clone());
            }
        }

        let closure = Rc::new(Object::Closure(Rc::new(Closure::new(function, upvalues))));
        self.add_object(closure.clone());
        self.push(Value::Obj(closure));
    }

    fn capture_upvalue(&self, stack_index: usize) -> Rc<RefCell<Upvalue>> {
        let mut open = self.open_upvalues.borrow_mut();
        for up in open.iter() {
            if let Upvalue::Open(i) = *up.borrow() {
                if i == stack_index {
                    return up.clone();
                }
            }
        }
        let created = Rc::new(RefCell::new(Upvalue::Open(stack_index)));
        open.push(created.clone());
        created
    }

    fn close_upvalues(&self, from: usize) {
        let mut open = self.open_upvalues.borrow_mut();
        let stack = self.stack.borrow();
        open.retain(|up| {
            let idx = match *up.borrow() {
                Upvalue::Open(i) => Some(i),
                Upvalue::Closed(_) => None,
            };
            match idx {
                Some(i) if i >= from => {
                    let value = stack[i].clone();
                    *up.borrow_mut() = Upvalue::Closed(value);
                    false
                }
                _ => true,
            }
        });
    }

    fn read_upvalue(&self, idx: u8) -> Value {
        let up = {
            let frames = self.frames.borrow();
            frames.last().unwrap().closure.upvalues[idx as usize].clone()
        };
        let value = match &*up.borrow() {
            Upvalue::Open(i) => self.stack.borrow()[*i].clone(),
            Upvalue::Closed(v) => v.clone(),
        };
        value
    }

    fn write_upvalue(&self, idx: u8, value: Value) {
        let up = {
            let frames = self.frames.borrow();
            frames.last().unwrap().closure.upvalues[idx as usize].clone()
        };
        let open_index = match &*up.borrow() {
            Upvalue::Open(i) => Some(*i),
            Upvalue::Closed(_) => None,
        };
        match open_index {
            Some(i) => self.stack.borrow_mut()[i] = value,
            None => *up.borrow_mut() = Upvalue::Closed(value),
        }
    }

    // -- error reporting -----------------------------------------------------

    fn runtime_error(&self, message: &str) -> InterpretError {
        tracing::error!("{}", message);

        let frames = self.frames.borrow();
        for frame in frames.iter().rev() {
            let line = frame.closure.function.chunk.line(frame.ip.saturating_sub(1));
            tracing::error!("[line {}] in {}", line, frame.closure.function.get_name());
        }

        InterpretError::Runtime
    }
}

impl Drop for VM {
    fn drop(&mut self) {
        #[cfg(feature = "gc_leak_check")]
        {
            for obj in self.objects.borrow().iter() {
                let count = Rc::strong_count(obj);
                if count > 1 {
                    tracing::warn!("leaking object '{}' ({} strong references)", obj, count);
                }
            }
        }
    }
}

/// Compiles and runs `source` against a fresh VM, resolving `include` paths
/// relative to the current working directory. This is the entry point the
/// REPL uses.
pub async fn interpret(source: impl AsRef<str>) -> Result<(), InterpretError> {
    interpret_in_dir(source, FsModuleLoader::cwd()).await
}

/// As [`interpret`], but resolves `include` paths relative to `loader`.
/// `run_file` uses this with a loader rooted at the script's own directory.
pub async fn interpret_with_loader(
    source: impl AsRef<str>,
    loader: impl ModuleLoader,
) -> Result<(), InterpretError> {
    interpret_in_dir(source, loader).await
}

async fn interpret_in_dir(source: impl AsRef<str>, loader: impl ModuleLoader) -> Result<(), InterpretError> {
    let vm = VM::new();
    let function = crate::compiler::compile(source.as_ref(), &vm, &loader)?;
    vm.interpret(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::InMemoryModuleLoader;

    fn run(source: &str) -> Result<(), InterpretError> {
        let vm = VM::new();
        let loader = InMemoryModuleLoader::default();
        let function = crate::compiler::compile(source, &vm, &loader)?;
        vm.interpret(function)
    }

    #[test]
    fn arithmetic_and_print_run_to_completion() {
        assert!(run("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        match run("print x;") {
            Err(InterpretError::Runtime) => {}
            other => panic!("expected a runtime error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn closures_capture_and_mutate_shared_upvalues() {
        let source = r#"
            func makeCounter() {
                var count = 0;
                func counter() {
                    count = count + 1;
                    print count;
                }
                return counter;
            }
            var counter = makeCounter();
            counter();
            counter();
        "#;
        assert!(run(source).is_ok());
    }

    #[test]
    fn classes_instances_and_inheritance_run() {
        let source = r#"
            class Animal {
                init(name) {
                    this.name = name;
                }
                speak() {
                    print this.name;
                }
            }
            class Dog -> Animal {
                speak() {
                    super.speak();
                    print "woof";
                }
            }
            var d = Dog("Rex");
            d.speak();
        "#;
        assert!(run(source).is_ok());
    }

    #[test]
    fn compile_error_propagates_as_compile_variant() {
        match run("var ;") {
            Err(InterpretError::Compile) => {}
            other => panic!("expected a compile error, got {:?}", other.is_ok()),
        }
    }
}
