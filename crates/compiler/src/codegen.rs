//! Bytecode back-end
//!
//! Walks the decorated AST and lowers it into a [`Code`] module: one
//! instruction buffer for the whole unit, a function object per `def` (plus
//! the synthetic `@main` holding top-level code), interned constants and
//! global names.
//!
//! # Lowering conventions
//!
//! - Function bodies are emitted inline at their definition site, wrapped in
//!   a `jmp` over the body that is back-patched once the body ends.
//! - Identifiers that the scope table resolves to a local of the enclosing
//!   function compile to slot-addressed `pushlocal`/`storelocal`; everything
//!   else is recorded as an external name and compiles to
//!   `pushglobal`/`storeglobal`.
//! - `a && b` / `a || b` duplicate the left operand and jump around the right
//!   operand's evaluation, so the `and`/`or` opcodes only run when both sides
//!   were evaluated.
//! - `for x in c` stows the enumerable in a hidden `@forN` local, rewinds it
//!   once, and drives the loop with `for_iter`, which pushes the next item
//!   and a has-more flag inspected by `jmpf`.
//! - `break`/`continue` lower to `exit_loop`, whose second operand is the
//!   number of block scopes to leave so enter/leave stay balanced.

use std::rc::Rc;

use deva_core::code::{Code, DefaultValue, FunctionObject, ParamDefault};
use deva_core::{Opcode, MAIN_FUNCTION};

use crate::ast::{
    BinaryOp, Expr, ExprNode, FuncDecl, Program, Stmt, StmtNode, UnaryOp,
};
use crate::emit::{InstructionStream, PATCH_SENTINEL};
use crate::error::CompileError;
use crate::scope::ScopeTable;
use crate::semantics::Analysis;

/// Back-end options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Emit `line_num` markers for error reporting and debugging.
    pub debug_info: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { debug_info: true }
    }
}

struct LocalVar {
    name: String,
    block_depth: u32,
    /// Out of scope; slot stays allocated but the name no longer resolves.
    dead: bool,
}

struct LoopFrame {
    /// Continue target.
    start: u32,
    /// Patch sites of `exit_loop` address operands for `break`.
    break_sites: Vec<usize>,
    /// Block depth at the loop statement itself.
    block_depth: u32,
}

/// State for one function being built. The compiler keeps a stack of these;
/// the bottom entry is `@main`.
struct FnContext {
    name: String,
    first_line: u32,
    num_params: u32,
    defaults: Vec<ParamDefault>,
    locals: Vec<LocalVar>,
    /// External names, in first-reference order.
    names: Vec<String>,
    is_method: bool,
    addr: u32,
    block_depth: u32,
    loops: Vec<LoopFrame>,
    iter_count: u32,
}

impl FnContext {
    fn new(name: String, first_line: u32, is_method: bool, addr: u32) -> Self {
        FnContext {
            name,
            first_line,
            num_params: 0,
            defaults: Vec::new(),
            locals: Vec::new(),
            names: Vec::new(),
            is_method,
            addr,
            block_depth: 0,
            loops: Vec::new(),
            iter_count: 0,
        }
    }

    fn alloc_slot(&mut self, name: &str) -> u32 {
        let slot = self.locals.len() as u32;
        self.locals.push(LocalVar {
            name: name.to_string(),
            block_depth: self.block_depth,
            dead: false,
        });
        slot
    }

    /// Innermost visible slot for `name`.
    fn lookup_slot(&self, name: &str) -> Option<u32> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| !l.dead && l.name == name)
            .map(|(i, _)| i as u32)
    }

    fn record_name(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }
}

pub struct Compiler<'a> {
    code: Code,
    out: InstructionStream,
    fns: Vec<FnContext>,
    scopes: &'a ScopeTable,
    file: Rc<str>,
    file_const: Option<u32>,
    debug_info: bool,
    last_line: u32,
}

/// Lower a decorated program into a code module.
pub fn compile(
    program: &Program,
    analysis: &Analysis,
    options: &CompileOptions,
) -> Result<Code, CompileError> {
    let mut compiler = Compiler {
        code: Code::new(),
        out: InstructionStream::new(),
        fns: vec![FnContext::new(MAIN_FUNCTION.to_string(), 1, false, 0)],
        scopes: &analysis.scopes,
        file: program.file.clone(),
        file_const: None,
        debug_info: options.debug_info,
        last_line: 0,
    };
    if options.debug_info {
        compiler.file_const = Some(compiler.code.add_str_constant(&program.file));
    }

    for stmt in &program.statements {
        compiler.compile_statement(stmt)?;
    }
    // @main returns like any function, so imported modules unwind cleanly
    compiler.out.emit(Opcode::PushNull);
    compiler.out.emit(Opcode::Return);

    let main = compiler.fns.pop().expect("@main context");
    debug_assert!(compiler.fns.is_empty(), "unbalanced function contexts");
    let main_fn = compiler.finish_function(main, 0);
    compiler.code.functions.push(main_fn);

    let mut code = compiler.code;
    code.bytes = compiler.out.into_bytes();
    Ok(code)
}

impl<'a> Compiler<'a> {
    fn err(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::semantic(&self.file, line, msg)
    }

    fn fn_mut(&mut self) -> &mut FnContext {
        self.fns.last_mut().expect("function context")
    }

    fn fn_ref(&self) -> &FnContext {
        self.fns.last().expect("function context")
    }

    fn finish_function(&self, ctx: FnContext, num_params: u32) -> FunctionObject {
        FunctionObject {
            name: ctx.name,
            filename: self.file.to_string(),
            first_line: ctx.first_line,
            num_params,
            defaults: ctx.defaults,
            num_locals: ctx.locals.len() as u32,
            local_names: ctx.locals.into_iter().map(|l| l.name).collect(),
            names: ctx.names,
            addr: ctx.addr,
            is_method: ctx.is_method,
        }
    }

    /// Emit a line marker when debug info is on and the line changed.
    fn emit_line(&mut self, line: u32) {
        if !self.debug_info || line == self.last_line {
            return;
        }
        let file_const = self.file_const.expect("file constant interned");
        self.code.lines.add(self.out.len(), line, self.file.clone());
        self.out.emit2(Opcode::LineNum, line, file_const);
        self.last_line = line;
    }

    /// True when the scope table resolves `name` to a local slot of the
    /// function enclosing `scope`.
    fn is_fn_local(&self, scope: usize, name: &str) -> bool {
        self.scopes
            .find_in_function(scope, name)
            .map(|sym| sym.is_local)
            .unwrap_or(false)
    }

    // -- statements ---------------------------------------------------------

    fn compile_statement(&mut self, node: &StmtNode) -> Result<(), CompileError> {
        self.emit_line(node.info.line);
        match &node.stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.out.emit(Opcode::Pop);
            }
            Stmt::LocalDecl { name, init } => {
                match init {
                    Some(init) => self.compile_expr(init)?,
                    None => self.out.emit(Opcode::PushNull),
                }
                let slot = self.fn_mut().alloc_slot(name);
                self.emit_def_local(slot);
            }
            Stmt::ConstDecl { name, init } => {
                // constness is enforced by the semantic checker; the frame
                // slot is an ordinary local
                self.compile_expr(init)?;
                let slot = self.fn_mut().alloc_slot(name);
                self.emit_def_local(slot);
            }
            Stmt::Assign { target, value } => self.compile_assign(target, value)?,
            Stmt::AugAssign { target, op, value } => self.compile_aug_assign(target, *op, value)?,
            Stmt::If { cond, then_body, else_body } => {
                self.compile_expr(cond)?;
                self.out.emit1(Opcode::Jmpf, PATCH_SENTINEL);
                let else_site = self.out.operand_loc(0);
                self.compile_block(then_body)?;
                match else_body {
                    Some(else_body) => {
                        self.out.emit1(Opcode::Jmp, PATCH_SENTINEL);
                        let end_site = self.out.operand_loc(0);
                        let here = self.out.len();
                        self.out.patch(else_site, here);
                        self.compile_block(else_body)?;
                        let here = self.out.len();
                        self.out.patch(end_site, here);
                    }
                    None => {
                        let here = self.out.len();
                        self.out.patch(else_site, here);
                    }
                }
            }
            Stmt::While { cond, body } => {
                let start = self.out.len();
                self.compile_expr(cond)?;
                self.out.emit1(Opcode::Jmpf, PATCH_SENTINEL);
                let exit_site = self.out.operand_loc(0);
                let depth = self.fn_ref().block_depth;
                self.fn_mut().loops.push(LoopFrame {
                    start,
                    break_sites: Vec::new(),
                    block_depth: depth,
                });
                self.compile_block(body)?;
                self.out.emit1(Opcode::Jmp, start);
                let here = self.out.len();
                self.out.patch(exit_site, here);
                let finished = self.fn_mut().loops.pop().expect("loop frame");
                for site in finished.break_sites {
                    self.out.patch(site, here);
                }
            }
            Stmt::ForIn { key, value, iterable, body } => {
                self.compile_for_in(key, value.as_deref(), iterable, body)?;
            }
            Stmt::Break => {
                let depth = {
                    let ctx = self.fn_ref();
                    let frame = ctx.loops.last().ok_or_else(|| {
                        self.err(node.info.line, "'break' outside of a loop")
                    })?;
                    ctx.block_depth - frame.block_depth
                };
                self.out.emit2(Opcode::ExitLoop, PATCH_SENTINEL, depth);
                let site = self.out.operand_loc(1);
                self.fn_mut()
                    .loops
                    .last_mut()
                    .expect("loop frame")
                    .break_sites
                    .push(site);
            }
            Stmt::Continue => {
                let (start, depth) = {
                    let ctx = self.fn_ref();
                    let frame = ctx.loops.last().ok_or_else(|| {
                        self.err(node.info.line, "'continue' outside of a loop")
                    })?;
                    (frame.start, ctx.block_depth - frame.block_depth)
                };
                self.out.emit2(Opcode::ExitLoop, start, depth);
            }
            Stmt::Return(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.out.emit(Opcode::PushNull),
                }
                self.out.emit(Opcode::Return);
            }
            Stmt::Import { module } => {
                let idx = self.code.add_name(module);
                self.fn_mut().record_name(module);
                self.out.emit1(Opcode::Import, idx);
            }
            Stmt::FuncDef(func) => {
                self.compile_function(func, None)?;
            }
            Stmt::ClassDef { name, bases, methods } => {
                self.compile_class(node.info.line, name, bases, methods)?;
            }
            Stmt::Block(body) => self.compile_block(body)?,
        }
        Ok(())
    }

    /// Compile a `{ ... }` body inside its own lexical scope.
    fn compile_block(&mut self, body: &[StmtNode]) -> Result<(), CompileError> {
        self.out.emit(Opcode::Enter);
        self.fn_mut().block_depth += 1;
        for stmt in body {
            self.compile_statement(stmt)?;
        }
        let depth = self.fn_ref().block_depth;
        for local in &mut self.fn_mut().locals {
            if local.block_depth == depth {
                local.dead = true;
            }
        }
        self.fn_mut().block_depth -= 1;
        self.out.emit(Opcode::Leave);
        Ok(())
    }

    fn compile_assign(&mut self, target: &ExprNode, value: &ExprNode) -> Result<(), CompileError> {
        match &target.expr {
            Expr::Ident(name) => {
                if self.is_fn_local(target.info.scope, name) {
                    if let Some(slot) = self.fn_ref().lookup_slot(name) {
                        self.compile_expr(value)?;
                        self.emit_store_local(slot);
                        return Ok(());
                    }
                    // declared later in the scope; fall through to a global
                    // store that the eventual def_local will shadow
                }
                let idx = self.code.add_name(name);
                self.fn_mut().record_name(name);
                // immediate stores for the literal values that have them
                match &value.expr {
                    Expr::Bool(true) => self.out.emit1(Opcode::StoreTrue, idx),
                    Expr::Bool(false) => self.out.emit1(Opcode::StoreFalse, idx),
                    Expr::Null => self.out.emit1(Opcode::StoreNull, idx),
                    _ => {
                        self.compile_expr(value)?;
                        self.out.emit1(Opcode::StoreGlobal, idx);
                    }
                }
                Ok(())
            }
            Expr::Index { target: tbl, index } => {
                self.compile_expr(tbl)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.out.emit(Opcode::TblStore);
                Ok(())
            }
            Expr::Dot { target: obj, member } => {
                self.compile_expr(obj)?;
                self.emit_push_str(member);
                self.compile_expr(value)?;
                self.out.emit(Opcode::TblStore);
                Ok(())
            }
            Expr::Slice2 { target: tbl, start, end } => {
                self.compile_expr(tbl)?;
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.compile_expr(value)?;
                self.out.emit(Opcode::StoreSlice2);
                Ok(())
            }
            Expr::Slice3 { target: tbl, start, end, step } => {
                self.compile_expr(tbl)?;
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.compile_expr(step)?;
                self.compile_expr(value)?;
                self.out.emit(Opcode::StoreSlice3);
                Ok(())
            }
            _ => Err(self.err(target.info.line, "invalid assignment target")),
        }
    }

    fn compile_aug_assign(
        &mut self,
        target: &ExprNode,
        op: BinaryOp,
        value: &ExprNode,
    ) -> Result<(), CompileError> {
        let arith = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            _ => return Err(self.err(target.info.line, "invalid augmented assignment operator")),
        };
        match &target.expr {
            Expr::Ident(_) => {
                self.compile_expr(target)?;
                self.compile_expr(value)?;
                self.out.emit(arith);
                // store back through the plain assignment path
                match &target.expr {
                    Expr::Ident(name) => {
                        if self.is_fn_local(target.info.scope, name) {
                            if let Some(slot) = self.fn_ref().lookup_slot(name) {
                                self.emit_store_local(slot);
                                return Ok(());
                            }
                        }
                        let idx = self.code.add_name(name);
                        self.fn_mut().record_name(name);
                        self.out.emit1(Opcode::StoreGlobal, idx);
                        Ok(())
                    }
                    _ => unreachable!(),
                }
            }
            Expr::Index { target: tbl, index } => {
                self.compile_expr(tbl)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.out.emit(Self::aug_table_op(op));
                Ok(())
            }
            Expr::Dot { target: obj, member } => {
                self.compile_expr(obj)?;
                self.emit_push_str(member);
                self.compile_expr(value)?;
                self.out.emit(Self::aug_table_op(op));
                Ok(())
            }
            _ => Err(self.err(
                target.info.line,
                "augmented assignment requires a variable, index or member target",
            )),
        }
    }

    fn aug_table_op(op: BinaryOp) -> Opcode {
        match op {
            BinaryOp::Add => Opcode::AddTblStore,
            BinaryOp::Sub => Opcode::SubTblStore,
            BinaryOp::Mul => Opcode::MulTblStore,
            BinaryOp::Div => Opcode::DivTblStore,
            BinaryOp::Mod => Opcode::ModTblStore,
            _ => unreachable!("validated by compile_aug_assign"),
        }
    }

    fn compile_for_in(
        &mut self,
        key: &str,
        value: Option<&str>,
        iterable: &ExprNode,
        body: &[StmtNode],
    ) -> Result<(), CompileError> {
        // stow the enumerable in a hidden slot so the stack is clean at
        // every statement boundary inside the loop
        self.compile_expr(iterable)?;
        let iter_name = {
            let ctx = self.fn_mut();
            let n = ctx.iter_count;
            ctx.iter_count += 1;
            format!("@for{}", n)
        };
        let iter_slot = self.fn_mut().alloc_slot(&iter_name);
        self.emit_def_local(iter_slot);

        // rewind once before entering the loop
        self.emit_push_local(iter_slot);
        self.emit_push_str("rewind");
        self.out.emit(Opcode::MethodLoad);
        self.out.emit1(Opcode::CallMethod, 0);
        self.out.emit(Opcode::Pop);

        let key_slot = self.fn_mut().alloc_slot(key);
        let value_slot = value.map(|v| self.fn_mut().alloc_slot(v));

        let start = self.out.len();
        self.emit_push_local(iter_slot);
        self.out.emit(match value_slot {
            Some(_) => Opcode::ForIterPair,
            None => Opcode::ForIter,
        });
        self.out.emit1(Opcode::Jmpf, PATCH_SENTINEL);
        let exhausted_site = self.out.operand_loc(0);
        match value_slot {
            Some(value_slot) => {
                // for_iter_pair pushed key then value
                self.emit_store_local(value_slot);
                self.emit_store_local(key_slot);
            }
            None => self.emit_store_local(key_slot),
        }

        let depth = self.fn_ref().block_depth;
        self.fn_mut().loops.push(LoopFrame {
            start,
            break_sites: Vec::new(),
            block_depth: depth,
        });
        self.compile_block(body)?;
        self.out.emit1(Opcode::Jmp, start);

        // exhausted: the pushed placeholders are still on the stack
        let here = self.out.len();
        self.out.patch(exhausted_site, here);
        self.out.emit(Opcode::Pop);
        if value_slot.is_some() {
            self.out.emit(Opcode::Pop);
        }

        let after = self.out.len();
        let finished = self.fn_mut().loops.pop().expect("loop frame");
        for site in finished.break_sites {
            self.out.patch(site, after);
        }

        // release the container eagerly rather than at scope exit
        self.out.emit(Opcode::PushNull);
        self.emit_store_local(iter_slot);

        let ctx = self.fn_mut();
        for slot in [Some(iter_slot), Some(key_slot), value_slot].into_iter().flatten() {
            ctx.locals[slot as usize].dead = true;
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        decl: &FuncDecl,
        class_name: Option<&str>,
    ) -> Result<(), CompileError> {
        self.out.emit1(Opcode::Jmp, PATCH_SENTINEL);
        let skip_site = self.out.operand_loc(0);

        let name = match class_name {
            Some(class) => format!("{}.{}", class, decl.name),
            None => decl.name.clone(),
        };
        let addr = self.out.len();
        let mut ctx = FnContext::new(name, decl.info.line, class_name.is_some(), addr);
        ctx.num_params = decl.params.len() as u32;
        for (i, param) in decl.params.iter().enumerate() {
            ctx.locals.push(LocalVar {
                name: param.name.clone(),
                block_depth: 0,
                dead: false,
            });
            if let Some(default) = &param.default {
                let value = match &default.expr {
                    Expr::Number(n) => DefaultValue::Const(self.code.add_num_constant(*n)),
                    Expr::Str(s) => DefaultValue::Const(self.code.add_str_constant(s)),
                    Expr::Bool(true) => DefaultValue::True,
                    Expr::Bool(false) => DefaultValue::False,
                    Expr::Null => DefaultValue::Null,
                    _ => {
                        return Err(self.err(
                            default.info.line,
                            "parameter default must be a literal",
                        ))
                    }
                };
                ctx.defaults.push(ParamDefault { param: i as u32, value });
            }
        }
        self.fns.push(ctx);
        self.last_line = 0;
        self.emit_line(decl.info.line);

        for stmt in &decl.body {
            self.compile_statement(stmt)?;
        }
        // implicit `return null` at the end of every body
        self.out.emit(Opcode::PushNull);
        self.out.emit(Opcode::Return);

        let ctx = self.fns.pop().expect("function context");
        let num_params = ctx.num_params;
        let func = self.finish_function(ctx, num_params);
        self.code.functions.push(func);

        let here = self.out.len();
        self.out.patch(skip_site, here);
        self.last_line = 0;
        Ok(())
    }

    fn compile_class(
        &mut self,
        line: u32,
        name: &str,
        bases: &[String],
        methods: &[FuncDecl],
    ) -> Result<(), CompileError> {
        for method in methods {
            self.compile_function(method, Some(name))?;
        }
        self.emit_line(line);

        self.emit_push_str("__name__");
        self.emit_push_str(name);

        self.emit_push_str("__bases__");
        for base in bases {
            self.compile_ident_load(0, base)?;
        }
        self.out.emit1(Opcode::NewVec, bases.len() as u32);

        for method in methods {
            self.emit_push_str(&method.name);
            let qualified = format!("{}.{}", name, method.name);
            self.compile_ident_load(0, &qualified)?;
        }

        let pairs = 2 + methods.len() as u32;
        self.out.emit1(Opcode::NewClass, pairs);

        let idx = self.code.add_name(name);
        self.fn_mut().record_name(name);
        self.out.emit1(Opcode::StoreGlobal, idx);
        Ok(())
    }

    // -- expressions --------------------------------------------------------

    fn compile_expr(&mut self, node: &ExprNode) -> Result<(), CompileError> {
        match &node.expr {
            Expr::Number(n) => self.emit_push_num(*n),
            Expr::Str(s) => self.emit_push_str(s),
            Expr::Bool(true) => self.out.emit(Opcode::PushTrue),
            Expr::Bool(false) => self.out.emit(Opcode::PushFalse),
            Expr::Null => self.out.emit(Opcode::PushNull),
            Expr::Ident(name) => self.compile_ident_load(node.info.scope, name)?,
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.out.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                });
            }
            Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
                // a && b: skip evaluating b when a is already false
                self.compile_expr(lhs)?;
                self.out.emit1(Opcode::Dup, 0);
                self.out.emit1(Opcode::Jmpf, PATCH_SENTINEL);
                let short_site = self.out.operand_loc(0);
                self.compile_expr(rhs)?;
                self.out.emit(Opcode::And);
                self.out.emit1(Opcode::Jmp, PATCH_SENTINEL);
                let end_site = self.out.operand_loc(0);
                let here = self.out.len();
                self.out.patch(short_site, here);
                self.out.emit(Opcode::Pop);
                self.out.emit(Opcode::PushFalse);
                let here = self.out.len();
                self.out.patch(end_site, here);
            }
            Expr::Binary { op: BinaryOp::Or, lhs, rhs } => {
                // a || b: skip evaluating b when a is already true
                self.compile_expr(lhs)?;
                self.out.emit1(Opcode::Dup, 0);
                self.out.emit1(Opcode::Jmpf, PATCH_SENTINEL);
                let rhs_site = self.out.operand_loc(0);
                self.out.emit(Opcode::Pop);
                self.out.emit(Opcode::PushTrue);
                self.out.emit1(Opcode::Jmp, PATCH_SENTINEL);
                let end_site = self.out.operand_loc(0);
                let here = self.out.len();
                self.out.patch(rhs_site, here);
                self.compile_expr(rhs)?;
                self.out.emit(Opcode::Or);
                let here = self.out.len();
                self.out.patch(end_site, here);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.out.emit(match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                    BinaryOp::Mod => Opcode::Mod,
                    BinaryOp::Eq => Opcode::Eq,
                    BinaryOp::Neq => Opcode::Neq,
                    BinaryOp::Lt => Opcode::Lt,
                    BinaryOp::Lte => Opcode::Lte,
                    BinaryOp::Gt => Opcode::Gt,
                    BinaryOp::Gte => Opcode::Gte,
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                });
            }
            Expr::Call { callee, args } => match &callee.expr {
                Expr::Dot { target, member } => {
                    // receiver stays below the method for the implicit self
                    self.compile_expr(target)?;
                    self.emit_push_str(member);
                    self.out.emit(Opcode::MethodLoad);
                    for arg in args {
                        self.compile_expr(arg)?;
                    }
                    self.out.emit1(Opcode::CallMethod, args.len() as u32);
                }
                _ => {
                    self.compile_expr(callee)?;
                    for arg in args {
                        self.compile_expr(arg)?;
                    }
                    self.out.emit1(Opcode::Call, args.len() as u32);
                }
            },
            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.out.emit(Opcode::TblLoad);
            }
            Expr::Slice2 { target, start, end } => {
                self.compile_expr(target)?;
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.out.emit(Opcode::LoadSlice2);
            }
            Expr::Slice3 { target, start, end, step } => {
                self.compile_expr(target)?;
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.compile_expr(step)?;
                self.out.emit(Opcode::LoadSlice3);
            }
            Expr::Dot { target, member } => {
                self.compile_expr(target)?;
                self.emit_push_str(member);
                self.out.emit(Opcode::TblLoad);
            }
            Expr::VecLiteral(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.out.emit1(Opcode::NewVec, items.len() as u32);
            }
            Expr::MapLiteral(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.out.emit1(Opcode::NewMap, pairs.len() as u32);
            }
            Expr::New { class_path, args } => {
                self.compile_ident_load(node.info.scope, &class_path[0])?;
                for segment in &class_path[1..] {
                    self.emit_push_str(segment);
                    self.out.emit(Opcode::TblLoad);
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.out.emit1(Opcode::NewInstance, args.len() as u32);
            }
        }
        Ok(())
    }

    fn compile_ident_load(&mut self, scope: usize, name: &str) -> Result<(), CompileError> {
        if self.is_fn_local(scope, name) {
            if let Some(slot) = self.fn_ref().lookup_slot(name) {
                self.emit_push_local(slot);
                return Ok(());
            }
        }
        let idx = self.code.add_name(name);
        self.fn_mut().record_name(name);
        self.out.emit1(Opcode::PushGlobal, idx);
        Ok(())
    }

    // -- emission helpers ---------------------------------------------------

    fn emit_push_num(&mut self, n: f64) {
        if n == 0.0 && n.is_sign_positive() {
            self.out.emit(Opcode::PushZero);
        } else if n == 1.0 {
            self.out.emit(Opcode::PushOne);
        } else {
            let idx = self.code.add_num_constant(n);
            self.emit_push_const(idx);
        }
    }

    fn emit_push_str(&mut self, s: &str) {
        let idx = self.code.add_str_constant(s);
        self.emit_push_const(idx);
    }

    fn emit_push_const(&mut self, idx: u32) {
        match Opcode::push_const_shortcut(idx) {
            Some(op) => self.out.emit(op),
            None => self.out.emit1(Opcode::Push, idx),
        }
    }

    fn emit_push_local(&mut self, slot: u32) {
        match Opcode::push_local_shortcut(slot) {
            Some(op) => self.out.emit(op),
            None => self.out.emit1(Opcode::PushLocal, slot),
        }
    }

    fn emit_store_local(&mut self, slot: u32) {
        match Opcode::store_local_shortcut(slot) {
            Some(op) => self.out.emit(op),
            None => self.out.emit1(Opcode::StoreLocal, slot),
        }
    }

    fn emit_def_local(&mut self, slot: u32) {
        match Opcode::def_local_shortcut(slot) {
            Some(op) => self.out.emit(op),
            None => self.out.emit1(Opcode::DefLocal, slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::semantics::analyze;
    use deva_core::disasm;

    fn compile_src(src: &str) -> Code {
        let mut prog = parse_source(src, "t.dv").unwrap();
        let analysis = analyze(&mut prog).unwrap();
        compile(&prog, &analysis, &CompileOptions { debug_info: false }).unwrap()
    }

    fn ops(code: &Code) -> Vec<Opcode> {
        disasm::decode(code).unwrap().into_iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_arithmetic_lowering() {
        let code = compile_src("x = 2 + 3 * 4;");
        let ops = ops(&code);
        // 2, 3, 4 pushed; mul before add; stored to the global
        assert_eq!(
            ops,
            vec![
                Opcode::Push0,
                Opcode::Push1,
                Opcode::Push2,
                Opcode::Mul,
                Opcode::Add,
                Opcode::StoreGlobal,
                Opcode::PushNull,
                Opcode::Return
            ]
        );
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let code = compile_src("x = 7 + 7 + 7;");
        assert_eq!(code.constants().len(), 1);
    }

    #[test]
    fn test_local_uses_slot_shortcuts() {
        let code = compile_src("local a = 5; local b = a;");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::DefLocal0));
        assert!(ops.contains(&Opcode::PushLocal0));
        assert!(ops.contains(&Opcode::DefLocal1));
    }

    #[test]
    fn test_main_function_records_locals() {
        let code = compile_src("local a = 1; local b = 2;");
        let main = code.function(code.main_function().unwrap()).unwrap();
        assert_eq!(main.name, "@main");
        assert_eq!(main.num_locals, 2);
        assert_eq!(main.local_names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_free_variable_becomes_external_name() {
        let code = compile_src("def outer() { local x = 7; def inner() { return x; } return 0; }");
        let inner = code.function(code.find_function("inner").unwrap()).unwrap();
        assert!(inner.names.contains(&"x".to_string()));
        assert_eq!(inner.num_locals, 0);
        let outer = code.function(code.find_function("outer").unwrap()).unwrap();
        assert!(outer.local_names.contains(&"x".to_string()));
    }

    #[test]
    fn test_function_bodies_are_jumped_over() {
        let code = compile_src("def f() { return 1; } x = 2;");
        let decoded = disasm::decode(&code).unwrap();
        assert_eq!(decoded[0].op, Opcode::Jmp);
        let f = code.function(code.find_function("f").unwrap()).unwrap();
        // the jump lands right after the function body
        let after_body = decoded
            .iter()
            .find(|i| i.offset == decoded[0].operands[0])
            .expect("jump target decodes to an instruction");
        assert!(after_body.offset > f.addr);
    }

    #[test]
    fn test_if_else_backpatching() {
        let code = compile_src("if 1 < 2 { x = 1; } else { x = 2; }");
        let decoded = disasm::decode(&code).unwrap();
        let jmpf = decoded.iter().find(|i| i.op == Opcode::Jmpf).unwrap();
        let jmp = decoded.iter().find(|i| i.op == Opcode::Jmp).unwrap();
        // both targets decode to real instruction boundaries past the branch
        assert!(decoded.iter().any(|i| i.offset == jmpf.operands[0]));
        assert!(decoded.iter().any(|i| i.offset == jmp.operands[0]));
        assert!(jmpf.operands[0] > jmpf.offset);
        assert!(jmp.operands[0] > jmpf.operands[0]);
    }

    #[test]
    fn test_while_loop_jumps_backward() {
        let code = compile_src("local i = 0; while i < 3 { i += 1; }");
        let decoded = disasm::decode(&code).unwrap();
        let back = decoded
            .iter()
            .filter(|i| i.op == Opcode::Jmp)
            .find(|i| i.operands[0] < i.offset)
            .expect("backward jump to the condition");
        let target = decoded.iter().find(|i| i.offset == back.operands[0]).unwrap();
        assert_eq!(target.op, Opcode::PushLocal0);
    }

    #[test]
    fn test_break_lowers_to_exit_loop_with_depth() {
        let code = compile_src("while true { if 1 { break; } }");
        let decoded = disasm::decode(&code).unwrap();
        let exit = decoded.iter().find(|i| i.op == Opcode::ExitLoop).unwrap();
        // break is inside the while body block plus the if block
        assert_eq!(exit.operands[1], 2);
        // patched to land past the loop's backward jump
        assert!(decoded.iter().any(|i| i.offset == exit.operands[0]));
        assert!(exit.operands[0] > exit.offset);
    }

    #[test]
    fn test_for_in_uses_hidden_iterator_slot() {
        let code = compile_src("for i in [1, 2, 3] { x = i; }");
        let main = code.function(code.main_function().unwrap()).unwrap();
        assert!(main.local_names.iter().any(|n| n == "@for0"));
        assert!(main.local_names.iter().any(|n| n == "i"));
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::ForIter));
        assert!(ops.contains(&Opcode::MethodLoad)); // the rewind call
    }

    #[test]
    fn test_for_in_pair_lowering() {
        let code = compile_src("for k, v in m { x = v; }");
        assert!(ops(&code).contains(&Opcode::ForIterPair));
    }

    #[test]
    fn test_short_circuit_and_emits_jump() {
        let code = compile_src("x = 1 && 2;");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::Dup));
        assert!(ops.contains(&Opcode::Jmpf));
        assert!(ops.contains(&Opcode::And));
    }

    #[test]
    fn test_method_call_lowering() {
        let code = compile_src("v = []; v.append(3);");
        let ops = ops(&code);
        let pos_load = ops.iter().position(|o| *o == Opcode::MethodLoad).unwrap();
        let pos_call = ops.iter().position(|o| *o == Opcode::CallMethod).unwrap();
        assert!(pos_load < pos_call);
    }

    #[test]
    fn test_class_lowering() {
        let code = compile_src(
            "class C { def new(self, n) { self.n = n; } def speak(self) { return self.n; } }",
        );
        assert!(code.find_function("C.new").is_some());
        assert!(code.find_function("C.speak").is_some());
        let new = code.function(code.find_function("C.new").unwrap()).unwrap();
        assert!(new.is_method);
        assert_eq!(new.num_params, 2);
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::NewClass));
    }

    #[test]
    fn test_new_lowering() {
        let code = compile_src("class C { def new(self) { } } x = new C();");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::NewInstance));
    }

    #[test]
    fn test_default_params_reference_constants() {
        let code = compile_src("def f(a, b = 9, c = null) { return b; }");
        let f = code.function(code.find_function("f").unwrap()).unwrap();
        assert_eq!(f.defaults.len(), 2);
        assert_eq!(f.defaults[0].param, 1);
        assert!(matches!(f.defaults[0].value, DefaultValue::Const(_)));
        assert!(matches!(f.defaults[1].value, DefaultValue::Null));
    }

    #[test]
    fn test_debug_info_emits_line_markers() {
        let mut prog = parse_source("x = 1;\ny = 2;\n", "t.dv").unwrap();
        let analysis = analyze(&mut prog).unwrap();
        let code = compile(&prog, &analysis, &CompileOptions { debug_info: true }).unwrap();
        let marks: Vec<_> = disasm::decode(&code)
            .unwrap()
            .into_iter()
            .filter(|i| i.op == Opcode::LineNum)
            .collect();
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].operands[0], 1);
        assert_eq!(marks[1].operands[0], 2);
        assert!(!code.lines.is_empty());
    }

    #[test]
    fn test_store_immediates_for_literal_globals() {
        let code = compile_src("flag = true; gone = null;");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::StoreTrue));
        assert!(ops.contains(&Opcode::StoreNull));
    }
}
