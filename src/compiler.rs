//! Single-pass compiler: source text straight to a [`Chunk`] of [`OpCode`],
//! no intermediate AST.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::chunk::{Chunk, OpCode, UpvalueRef};
use crate::module::ModuleLoader;
use crate::object::Object;
use crate::scanner::{Scanner, Token, TokenType};
use crate::value::Value;
use crate::vm::{InterpretError, VM};

const LOCALS_MAX: usize = u8::MAX as usize + 1;
const ARGS_MAX: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + - -> <-
    Factor,     // * / % ^
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call => Self::Primary,
            Self::Primary => Self::Primary,
        }
    }
}

impl TokenType {
    fn precedence(self) -> Precedence {
        match self {
            Self::LeftParen | Self::Dot => Precedence::Call,
            Self::Minus | Self::Plus | Self::RightPointer | Self::LeftPointer => Precedence::Term,
            Self::Slash | Self::Star | Self::Mod | Self::Pow => Precedence::Factor,
            Self::BangEqual | Self::EqualEqual => Precedence::Equality,
            Self::Greater | Self::GreaterEqual | Self::Less | Self::LessEqual => Precedence::Comparison,
            Self::And => Precedence::And,
            Self::Or => Precedence::Or,
            _ => Precedence::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy)]
struct Local<'a> {
    name: Token<'a>,
    depth: Option<usize>,
    is_captured: bool,
}

/// One compiler frame per function body being compiled, chained through
/// `enclosing` the way nested scopes chain through a call stack.
struct Compiler<'a> {
    enclosing: Option<Box<Compiler<'a>>>,
    function_type: FunctionType,
    function_name: String,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local<'a>>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: usize,
}

impl<'a> Compiler<'a> {
    fn new(function_type: FunctionType, function_name: String) -> Self {
        let slot_zero_name: &'static str = match function_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Function | FunctionType::Script => "",
        };

        Self {
            enclosing: None,
            function_type,
            function_name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: Token {
                    kind: TokenType::Identifier,
                    lexeme: slot_zero_name,
                    line: 0,
                },
                depth: Some(0),
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }

    fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for i in (0..self.locals.len()).rev() {
            let local = &self.locals[i];
            if local.name.lexeme == name {
                if local.depth.is_none() {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, &'static str> {
        for (i, up) in self.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if self.upvalues.len() >= LOCALS_MAX {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(UpvalueRef { index, is_local });
        Ok(self.upvalues.len() as u8 - 1)
    }

    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let enclosing = match &mut self.enclosing {
            Some(e) => e,
            None => return Ok(None),
        };

        match enclosing.resolve_local(name) {
            Ok(Some(idx)) => {
                enclosing.locals[idx as usize].is_captured = true;
                return Ok(Some(self.add_upvalue(idx, true)?));
            }
            Err(e) => return Err(e),
            Ok(None) => {}
        }

        match enclosing.resolve_upvalue(name)? {
            Some(idx) => Ok(Some(self.add_upvalue(idx, false)?)),
            None => Ok(None),
        }
    }
}

/// Compile-time counterpart of the active `class` body, chained through
/// `enclosing` for nested class declarations; tracks whether `super` is
/// valid here.
struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

fn synthetic_token(lexeme: &'static str) -> Token<'static> {
    Token {
        kind: TokenType::Identifier,
        lexeme,
        line: 0,
    }
}

struct Parser<'a> {
    scanner: RefCell<Scanner<'a>>,
    current: RefCell<Token<'a>>,
    previous: RefCell<Token<'a>>,
    had_error: RefCell<bool>,
    panic_mode: RefCell<bool>,

    compiler: Compiler<'a>,
    class_compiler: Option<Box<ClassCompiler>>,

    /// Set for the duration of an `exp <decl>` so the declaration picks a
    /// bare global name instead of a module-mangled one.
    exp_pending: bool,
    /// `Some(name)` while compiling an `include`d module; top-level
    /// declarations not marked `exp` get their global name mangled with
    /// this prefix so they're invisible to the including script.
    module_prefix: Option<String>,
    /// Bare names of this module's own non-exported globals, so later
    /// references to them within the same module resolve to the mangled
    /// name rather than colliding with an outer global of the same name.
    module_private_globals: HashSet<String>,

    loader: &'a dyn ModuleLoader,
}

impl<'a> Parser<'a> {
    fn new(scanner: Scanner<'a>, module_prefix: Option<String>, loader: &'a dyn ModuleLoader) -> Self {
        Self {
            scanner: RefCell::new(scanner),
            current: RefCell::new(Token::default()),
            previous: RefCell::new(Token::default()),
            had_error: RefCell::new(false),
            panic_mode: RefCell::new(false),
            compiler: Compiler::new(FunctionType::Script, String::new()),
            class_compiler: None,
            exp_pending: false,
            module_prefix,
            module_private_globals: HashSet::new(),
            loader,
        }
    }

    fn had_error(&self) -> bool {
        *self.had_error.borrow()
    }

    fn is_panic_mode(&self) -> bool {
        *self.panic_mode.borrow()
    }

    // -- token stream ---------------------------------------------------------

    fn advance(&self) {
        *self.previous.borrow_mut() = *self.current.borrow();
        loop {
            let tok = self.scanner.borrow_mut().scan_token();
            *self.current.borrow_mut() = tok;
            if !self.check(TokenType::Error) {
                break;
            }
            let msg = self.current.borrow().lexeme;
            self.error_at_current(msg);
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.borrow().kind == kind
    }

    fn check_previous(&self, kind: TokenType) -> bool {
        self.previous.borrow().kind == kind
    }

    fn match_token(&self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&self, kind: TokenType, message: &str) {
        if self.check(kind) {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // -- error reporting --------------------------------------------------------

    fn error_at(&self, token: &Token, message: &str) {
        if self.is_panic_mode() {
            return;
        }
        *self.panic_mode.borrow_mut() = true;

        let location = if token.kind == TokenType::Eof {
            " at end".to_owned()
        } else if token.kind == TokenType::Error {
            String::new()
        } else {
            format!(" at '{}'", token.lexeme)
        };

        tracing::error!("[line {}] Error{}: {}", token.line, location, message);
        *self.had_error.borrow_mut() = true;
    }

    fn error(&self, message: &str) {
        let tok = *self.previous.borrow();
        self.error_at(&tok, message);
    }

    fn error_at_current(&self, message: &str) {
        let tok = *self.current.borrow();
        self.error_at(&tok, message);
    }

    fn synchronize(&self) {
        *self.panic_mode.borrow_mut() = false;

        while !self.check(TokenType::Eof) {
            if self.check_previous(TokenType::Semicolon) {
                return;
            }
            match self.current.borrow().kind {
                TokenType::Class
                | TokenType::Func
                | TokenType::Var
                | TokenType::Let
                | TokenType::Const
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -- emission ---------------------------------------------------------------

    fn emit_instruction(&mut self, instr: OpCode) -> usize {
        let line = self.previous.borrow().line;
        self.compiler.chunk.write(instr, line)
    }

    fn emit_instructions(&mut self, instrs: &[OpCode]) {
        for instr in instrs {
            self.emit_instruction(instr.clone());
        }
    }

    fn emit_return(&mut self) {
        if self.compiler.function_type == FunctionType::Initializer {
            self.emit_instruction(OpCode::GetLocal(0));
        } else {
            self.emit_instruction(OpCode::Null);
        }
        self.emit_instruction(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.compiler.chunk.add_constant(value);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_instruction(OpCode::Constant(idx));
    }

    fn patch_jump(&mut self, idx: usize) {
        let target = self.compiler.chunk.size();
        let distance = target - idx - 1;
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.compiler.chunk.patch_jump(idx, distance as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let here = self.compiler.chunk.size();
        let distance = (here + 1) - loop_start;
        if distance > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_instruction(OpCode::Loop(distance as u16));
    }

    fn identifier_constant(&mut self, name: &str, vm: &VM) -> u8 {
        self.make_constant(Value::Obj(Object::from_str(name, vm)))
    }

    /// Chooses the physical global name for a top-level declaration: bare if
    /// exported (or not inside a module at all), mangled with the module
    /// prefix otherwise.
    fn global_name_constant(&mut self, name: &str, vm: &VM) -> u8 {
        let physical = if self.exp_pending {
            name.to_owned()
        } else if let Some(prefix) = self.module_prefix.clone() {
            self.module_private_globals.insert(name.to_owned());
            format!("{}::{}", prefix, name)
        } else {
            name.to_owned()
        };
        self.identifier_constant(&physical, vm)
    }

    /// Mirrors `global_name_constant`'s mangling decision when *reading* a
    /// global, so code inside a module can refer to its own private
    /// top-level bindings by their bare name.
    fn resolve_global_name(&self, name: &str) -> String {
        match &self.module_prefix {
            Some(prefix) if self.module_private_globals.contains(name) => format!("{}::{}", prefix, name),
            _ => name.to_owned(),
        }
    }

    // -- scope and locals ----------------------------------------------------------

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        while let Some(local) = self.compiler.locals.last() {
            if local.depth.map_or(false, |d| d > self.compiler.scope_depth) {
                let captured = local.is_captured;
                self.compiler.locals.pop();
                if captured {
                    self.emit_instruction(OpCode::CloseUpvalue);
                } else {
                    self.emit_instruction(OpCode::Pop);
                }
            } else {
                break;
            }
        }
    }

    fn add_local(&mut self, name: Token<'a>) {
        if self.compiler.locals.len() >= LOCALS_MAX {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let name = *self.previous.borrow();
        for local in self.compiler.locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.compiler.scope_depth {
                    break;
                }
            }
            if local.name.lexeme == name.lexeme {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let last = self.compiler.locals.len() - 1;
        self.compiler.locals[last].depth = Some(self.compiler.scope_depth);
    }

    fn parse_variable(&mut self, vm: &VM, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.borrow().lexeme.to_owned();
        self.global_name_constant(&name, vm)
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_instruction(OpCode::DefineGlobal(global));
    }

    fn named_variable(&mut self, name: &str, can_assign: bool, vm: &VM) {
        let get;
        let set;

        match self.compiler.resolve_local(name) {
            Ok(Some(idx)) => {
                get = OpCode::GetLocal(idx);
                set = OpCode::SetLocal(idx);
            }
            Ok(None) => match self.compiler.resolve_upvalue(name) {
                Ok(Some(idx)) => {
                    get = OpCode::GetUpvalue(idx);
                    set = OpCode::SetUpvalue(idx);
                }
                Ok(None) => {
                    let physical = self.resolve_global_name(name);
                    let idx = self.identifier_constant(&physical, vm);
                    get = OpCode::GetGlobal(idx);
                    set = OpCode::SetGlobal(idx);
                }
                Err(e) => {
                    self.error(e);
                    return;
                }
            },
            Err(e) => {
                self.error(e);
                return;
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression(vm);
            self.emit_instruction(set);
        } else {
            self.emit_instruction(get);
        }
    }

    // -- function / class frames --------------------------------------------------

    fn begin_function(&mut self, function_type: FunctionType, name: &str) {
        let new_compiler = Compiler::new(function_type, name.to_owned());
        let old_compiler = std::mem::replace(&mut self.compiler, new_compiler);
        self.compiler.enclosing = Some(Box::new(old_compiler));
    }

    fn end_function(&mut self, vm: &VM) -> (Vec<UpvalueRef>, Rc<Object>) {
        self.emit_return();

        #[cfg(feature = "debug_code")]
        if !self.had_error() {
            let label = if self.compiler.function_name.is_empty() {
                "<script>".to_owned()
            } else {
                self.compiler.function_name.clone()
            };
            self.compiler.chunk.disassemble(label);
        }

        let finished = match self.compiler.enclosing.take() {
            Some(enclosing) => std::mem::replace(&mut self.compiler, *enclosing),
            None => std::mem::replace(&mut self.compiler, Compiler::new(FunctionType::Script, String::new())),
        };

        let function = Object::from_chunk(
            &finished.function_name,
            finished.arity,
            finished.upvalues.len(),
            finished.chunk,
            vm,
        );
        (finished.upvalues, function)
    }

    fn push_class_compiler(&mut self) {
        let new_cc = ClassCompiler {
            enclosing: self.class_compiler.take(),
            has_superclass: false,
        };
        self.class_compiler = Some(Box::new(new_cc));
    }

    fn pop_class_compiler(&mut self) {
        let cc = self.class_compiler.take().expect("class compiler stack underflow");
        self.class_compiler = cc.enclosing;
    }

    /// Names of the functions on the active compiler-frame stack,
    /// innermost first. Stands in for the book's GC root-marking pass:
    /// under `Rc` ownership there's nothing to mark, but this still lets a
    /// caller observe exactly which frames are live mid-compile.
    #[allow(dead_code)]
    fn mark_compiler_roots(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(&self.compiler);
        while let Some(c) = current {
            names.push(c.function_name.as_str());
            current = c.enclosing.as_deref();
        }
        names
    }

    // -- expressions ----------------------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence, vm: &VM) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;

        let kind = self.previous.borrow().kind;
        if !self.prefix(kind, can_assign, vm) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= self.current.borrow().kind.precedence() {
            self.advance();
            let kind = self.previous.borrow().kind;
            self.infix(kind, can_assign, vm);
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenType, can_assign: bool, vm: &VM) -> bool {
        match kind {
            TokenType::LeftParen => self.grouping(vm),
            TokenType::Minus | TokenType::Bang => self.unary(vm),
            TokenType::String => self.string(vm),
            TokenType::Number => self.number(),
            TokenType::Identifier => self.variable(can_assign, vm),
            TokenType::False | TokenType::True | TokenType::Null => self.literal(),
            TokenType::Super => self.super_(vm),
            TokenType::This => self.this_(vm),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenType, can_assign: bool, vm: &VM) -> bool {
        match kind {
            TokenType::LeftParen => self.call(vm),
            TokenType::Dot => self.dot(can_assign, vm),
            TokenType::BangEqual
            | TokenType::EqualEqual
            | TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual
            | TokenType::Minus
            | TokenType::Plus
            | TokenType::Slash
            | TokenType::Star
            | TokenType::Mod
            | TokenType::Pow
            | TokenType::RightPointer
            | TokenType::LeftPointer => self.binary(vm),
            TokenType::And => self.and_(vm),
            TokenType::Or => self.or_(vm),
            _ => return false,
        }
        true
    }

    fn expression(&mut self, vm: &VM) {
        self.parse_precedence(Precedence::Assignment, vm);
    }

    fn grouping(&mut self, vm: &VM) {
        self.expression(vm);
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, vm: &VM) {
        let operator = self.previous.borrow().kind;
        self.parse_precedence(Precedence::Unary, vm);
        match operator {
            TokenType::Minus => self.emit_instruction(OpCode::Negate),
            TokenType::Bang => self.emit_instruction(OpCode::Not),
            _ => unreachable!(),
        };
    }

    fn binary(&mut self, vm: &VM) {
        let operator = self.previous.borrow().kind;
        self.parse_precedence(operator.precedence().next(), vm);

        match operator {
            TokenType::BangEqual => self.emit_instructions(&[OpCode::Equal, OpCode::Not]),
            TokenType::EqualEqual => {
                self.emit_instruction(OpCode::Equal);
            }
            TokenType::Greater => {
                self.emit_instruction(OpCode::Greater);
            }
            TokenType::GreaterEqual => self.emit_instructions(&[OpCode::Less, OpCode::Not]),
            TokenType::Less => {
                self.emit_instruction(OpCode::Less);
            }
            TokenType::LessEqual => self.emit_instructions(&[OpCode::Greater, OpCode::Not]),
            TokenType::Plus => {
                self.emit_instruction(OpCode::Add);
            }
            TokenType::Minus => {
                self.emit_instruction(OpCode::Subtract);
            }
            TokenType::Star => {
                self.emit_instruction(OpCode::Multiply);
            }
            TokenType::Slash => {
                self.emit_instruction(OpCode::Divide);
            }
            TokenType::Mod => {
                self.emit_instruction(OpCode::Mod);
            }
            TokenType::Pow => {
                self.emit_instruction(OpCode::Pow);
            }
            TokenType::RightPointer => {
                self.emit_instruction(OpCode::PointRight);
            }
            TokenType::LeftPointer => {
                self.emit_instruction(OpCode::PointLeft);
            }
            _ => unreachable!(),
        };
    }

    fn and_(&mut self, vm: &VM) {
        let end_jump = self.emit_instruction(OpCode::JumpIfFalse(0xffff));
        self.emit_instruction(OpCode::Pop);
        self.parse_precedence(Precedence::And, vm);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, vm: &VM) {
        let else_jump = self.emit_instruction(OpCode::JumpIfFalse(0xffff));
        let end_jump = self.emit_instruction(OpCode::Jump(0xffff));

        self.patch_jump(else_jump);
        self.emit_instruction(OpCode::Pop);

        self.parse_precedence(Precedence::Or, vm);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, vm: &VM) {
        let arg_count = self.argument_list(vm);
        self.emit_instruction(OpCode::Call(arg_count));
    }

    fn argument_list(&mut self, vm: &VM) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression(vm);
                if count == ARGS_MAX {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn dot(&mut self, can_assign: bool, vm: &VM) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.previous.borrow().lexeme.to_owned();
        let name_idx = self.identifier_constant(&name, vm);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression(vm);
            self.emit_instruction(OpCode::SetProperty(name_idx));
        } else if self.match_token(TokenType::LeftParen) {
            let arg_count = self.argument_list(vm);
            self.emit_instruction(OpCode::Invoke(name_idx, arg_count));
        } else {
            self.emit_instruction(OpCode::GetProperty(name_idx));
        }
    }

    fn number(&mut self) {
        let lexeme = self.previous.borrow().lexeme;
        let value: f64 = lexeme.parse().expect("scanner only emits well-formed numbers");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, vm: &VM) {
        let lexeme = self.previous.borrow().lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        self.emit_constant(Value::Obj(Object::from_str(content, vm)));
    }

    fn variable(&mut self, can_assign: bool, vm: &VM) {
        let name = self.previous.borrow().lexeme.to_owned();
        self.named_variable(&name, can_assign, vm);
    }

    fn literal(&mut self) {
        match self.previous.borrow().kind {
            TokenType::Null => self.emit_instruction(OpCode::Null),
            TokenType::False => self.emit_instruction(OpCode::False),
            TokenType::True => self.emit_instruction(OpCode::True),
            _ => unreachable!(),
        };
    }

    fn this_(&mut self, vm: &VM) {
        if self.class_compiler.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false, vm);
    }

    fn super_(&mut self, vm: &VM) {
        match &self.class_compiler {
            None => self.error("Can't use 'super' outside of a class."),
            Some(cc) if !cc.has_superclass => self.error("Can't use 'super' in a class with no superclass."),
            _ => {}
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name = self.previous.borrow().lexeme.to_owned();
        let name_idx = self.identifier_constant(&name, vm);

        self.named_variable("this", false, vm);
        if self.match_token(TokenType::LeftParen) {
            let arg_count = self.argument_list(vm);
            self.named_variable("super", false, vm);
            self.emit_instruction(OpCode::SuperInvoke(name_idx, arg_count));
        } else {
            self.named_variable("super", false, vm);
            self.emit_instruction(OpCode::GetSuper(name_idx));
        }
    }

    // -- type annotations (parsed, never enforced; see SPEC_FULL.md) ----------------

    fn emit_type_marker(&mut self, vm: &VM) {
        let kind = self.current.borrow().kind;
        let ok = matches!(
            kind,
            TokenType::StringLiteral | TokenType::NumberLiteral | TokenType::Any | TokenType::Identifier
        );
        if !ok {
            self.error_at_current("Type value undefined.");
            return;
        }
        self.advance();
        let name = self.previous.borrow().lexeme.to_owned();
        let idx = self.identifier_constant(&name, vm);
        self.emit_instruction(OpCode::Type(idx));
    }

    // -- declarations -----------------------------------------------------------------

    fn declaration(&mut self, vm: &VM) {
        if self.match_token(TokenType::Exp) {
            self.exp_pending = true;
            self.gated_declaration(vm);
            self.exp_pending = false;
        } else {
            self.gated_declaration(vm);
        }

        if self.is_panic_mode() {
            self.synchronize();
        }
    }

    fn gated_declaration(&mut self, vm: &VM) {
        if self.match_token(TokenType::Class) {
            self.class_declaration(vm);
        } else if self.match_token(TokenType::Func) {
            self.func_declaration(vm);
        } else if self.match_token(TokenType::Var) {
            self.var_declaration(vm);
        } else if self.match_token(TokenType::Let) {
            self.let_declaration(vm);
        } else if self.match_token(TokenType::Const) {
            self.const_declaration(vm);
        } else if self.exp_pending {
            self.error("'exp' can only precede a class, func, var, let, or const declaration.");
        } else {
            self.statement(vm);
        }
    }

    fn var_declaration(&mut self, vm: &VM) {
        let global = self.parse_variable(vm, "Expect variable name.");

        if self.match_token(TokenType::Colon) {
            self.emit_type_marker(vm);
        }

        if self.match_token(TokenType::Equal) {
            self.expression(vm);
        } else {
            self.emit_instruction(OpCode::Null);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn let_declaration(&mut self, vm: &VM) {
        let global = self.parse_variable(vm, "Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression(vm);
        } else {
            self.emit_instruction(OpCode::Null);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn const_declaration(&mut self, vm: &VM) {
        let global = self.parse_variable(vm, "Expect constant name.");

        if self.match_token(TokenType::Colon) {
            self.emit_type_marker(vm);
        } else {
            self.error("const declarations must have an explicit type.");
        }

        if self.match_token(TokenType::Equal) {
            self.expression(vm);
        } else {
            self.error("const declarations must have a value.");
            self.emit_instruction(OpCode::Null);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after const declaration.");
        self.define_variable(global);
    }

    fn func_declaration(&mut self, vm: &VM) {
        let global = self.parse_variable(vm, "Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function, vm);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType, vm: &VM) {
        let name = self.previous.borrow().lexeme.to_owned();
        self.begin_function(function_type, &name);
        // No matching `end_scope`: the whole frame (and its locals) is
        // reclaimed by `OP_RETURN` truncating the stack to the frame base.
        self.compiler.scope_depth += 1;

        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                self.compiler.arity += 1;
                if self.compiler.arity > ARGS_MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param = self.parse_variable(vm, "Expect parameter name.");
                self.define_variable(param);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block_statement(vm);

        let (upvalues, function_obj) = self.end_function(vm);
        let idx = self.make_constant(Value::Obj(function_obj));
        self.emit_instruction(OpCode::Closure(idx, upvalues));
    }

    fn method(&mut self, vm: &VM) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name = self.previous.borrow().lexeme.to_owned();
        let name_idx = self.identifier_constant(&name, vm);

        let function_type = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type, vm);
        self.emit_instruction(OpCode::Method(name_idx));
    }

    fn class_declaration(&mut self, vm: &VM) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = *self.previous.borrow();
        let name_idx = self.global_name_constant(class_name.lexeme, vm);
        self.declare_variable();

        self.emit_instruction(OpCode::Class(name_idx));
        self.define_variable(name_idx);

        self.push_class_compiler();

        if self.match_token(TokenType::RightPointer) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false, vm);

            if self.previous.borrow().lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(synthetic_token("super"));
            self.define_variable(0);

            self.named_variable(class_name.lexeme, false, vm);
            self.emit_instruction(OpCode::Inherit);
            self.class_compiler.as_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name.lexeme, false, vm);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method(vm);
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_instruction(OpCode::Pop);

        if self.class_compiler.as_ref().unwrap().has_superclass {
            self.end_scope();
        }

        self.pop_class_compiler();
    }

    // -- statements --------------------------------------------------------------------

    fn statement(&mut self, vm: &VM) {
        if self.match_token(TokenType::Print) {
            self.print_statement(vm);
        } else if self.match_token(TokenType::If) {
            self.if_statement(vm);
        } else if self.match_token(TokenType::While) {
            self.while_statement(vm);
        } else if self.match_token(TokenType::For) {
            self.for_statement(vm);
        } else if self.match_token(TokenType::Return) {
            self.return_statement(vm);
        } else if self.match_token(TokenType::Include) {
            self.include_statement(vm);
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block_statement(vm);
            self.end_scope();
        } else {
            self.expression_statement(vm);
        }
    }

    fn print_statement(&mut self, vm: &VM) {
        self.expression(vm);
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_instruction(OpCode::Print);
    }

    fn expression_statement(&mut self, vm: &VM) {
        self.expression(vm);
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_instruction(OpCode::Pop);
    }

    fn block_statement(&mut self, vm: &VM) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration(vm);
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self, vm: &VM) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression(vm);
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_instruction(OpCode::JumpIfFalse(0xffff));
        self.emit_instruction(OpCode::Pop);
        self.statement(vm);

        let else_jump = self.emit_instruction(OpCode::Jump(0xffff));
        self.patch_jump(then_jump);
        self.emit_instruction(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement(vm);
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self, vm: &VM) {
        let loop_start = self.compiler.chunk.size();
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression(vm);
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_instruction(OpCode::JumpIfFalse(0xffff));
        self.emit_instruction(OpCode::Pop);
        self.statement(vm);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_instruction(OpCode::Pop);
    }

    fn for_statement(&mut self, vm: &VM) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenType::Semicolon) {
            // no initializer clause
        } else if self.match_token(TokenType::Var) {
            self.var_declaration(vm);
        } else if self.match_token(TokenType::Let) {
            self.let_declaration(vm);
        } else {
            self.expression_statement(vm);
        }

        let mut loop_start = self.compiler.chunk.size();

        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression(vm);
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_instruction(OpCode::JumpIfFalse(0xffff)));
            self.emit_instruction(OpCode::Pop);
        }

        if !self.match_token(TokenType::RightParen) {
            let body_jump = self.emit_instruction(OpCode::Jump(0xffff));

            let increment_start = self.compiler.chunk.size();
            self.expression(vm);
            self.emit_instruction(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement(vm);
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_instruction(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self, vm: &VM) {
        if self.compiler.function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression(vm);
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_instruction(OpCode::Return);
        }
    }

    fn include_statement(&mut self, vm: &VM) {
        self.consume(TokenType::String, "Expect a module path string after 'include'.");
        let raw = self.previous.borrow().lexeme;
        let path = raw[1..raw.len() - 1].to_owned();
        self.consume(TokenType::Semicolon, "Expect ';' after include path.");

        let source = match self.loader.load(&path) {
            Ok(s) => s,
            Err(e) => {
                self.error(&format!("Can't load module '{}': {}", path, e));
                return;
            }
        };

        match compile_module(&source, &path, vm, self.loader) {
            Ok(module_function) => {
                let idx = self.make_constant(Value::Obj(module_function));
                self.emit_instruction(OpCode::Closure(idx, Vec::new()));
                self.emit_instruction(OpCode::Call(0));
                self.emit_instruction(OpCode::Pop);
            }
            Err(_) => {
                self.error(&format!("Module '{}' failed to compile.", path));
            }
        }
    }
}

fn compile_unit(
    source: &str,
    module_prefix: Option<String>,
    vm: &VM,
    loader: &dyn ModuleLoader,
) -> Result<Rc<Object>, InterpretError> {
    let scanner = Scanner::new(source);
    let mut parser = Parser::new(scanner, module_prefix, loader);

    parser.advance();
    while !parser.match_token(TokenType::Eof) {
        parser.declaration(vm);
    }

    let (_, function) = parser.end_function(vm);

    if parser.had_error() {
        Err(InterpretError::Compile)
    } else {
        Ok(function)
    }
}

/// Compiles `source` as the top-level script: an implicit `<script>`
/// function whose body is every top-level declaration, with no module
/// prefix (its own top-level globals are never mangled).
pub fn compile(source: &str, vm: &VM, loader: &dyn ModuleLoader) -> Result<Rc<Object>, InterpretError> {
    compile_unit(source, None, vm, loader)
}

/// Compiles `source` as an `include`d module: top-level declarations not
/// marked `exp` get a name mangled with `module_name`, making them
/// structurally unreachable from outside (the mangled name contains `::`,
/// which is not a valid identifier).
fn compile_module(
    source: &str,
    module_name: &str,
    vm: &VM,
    loader: &dyn ModuleLoader,
) -> Result<Rc<Object>, InterpretError> {
    compile_unit(source, Some(module_name.to_owned()), vm, loader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::InMemoryModuleLoader;

    fn compiles(source: &str) -> bool {
        let vm = VM::new();
        let loader = InMemoryModuleLoader::default();
        compile(source, &vm, &loader).is_ok()
    }

    #[test]
    fn accepts_a_well_formed_program() {
        assert!(compiles("var x = 1; print x + 2;"));
    }

    #[test]
    fn rejects_reading_a_local_in_its_own_initializer() {
        assert!(!compiles("{ var a = a; }"));
    }

    #[test]
    fn rejects_return_from_top_level() {
        assert!(!compiles("return 1;"));
    }

    #[test]
    fn rejects_duplicate_locals_in_same_scope() {
        assert!(!compiles("{ var a = 1; var a = 2; }"));
    }

    #[test]
    fn const_without_type_is_an_error() {
        assert!(!compiles("const x = 1;"));
    }

    #[test]
    fn super_outside_class_is_an_error() {
        assert!(!compiles("func f() { print super.x; }"));
    }

    #[test]
    fn classes_with_inheritance_and_methods_compile() {
        assert!(compiles(
            r#"
            class Animal {
                speak() { print "..."; }
            }
            class Dog -> Animal {
                speak() { super.speak(); }
            }
            "#
        ));
    }

    #[test]
    fn exported_module_globals_are_reachable_unmangled() {
        let vm = VM::new();
        let mut modules = std::collections::HashMap::new();
        modules.insert("lib.gec".to_owned(), "exp var shared = 1;".to_owned());
        let loader = InMemoryModuleLoader(modules);
        let source = r#"
            include "lib.gec";
            print shared;
        "#;
        assert!(compile(source, &vm, &loader).is_ok());
    }
}
