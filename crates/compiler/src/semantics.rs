//! Semantic analysis
//!
//! Walks the raw AST once, building the nested scope table and decorating
//! every node with its scope id and inferred expression type. Checks the
//! rules the grammar cannot express: `const` assignment, redefinition,
//! `break`/`continue` placement, method `self` parameters.
//!
//! Reads of names that resolve nowhere are *not* errors here — assignment
//! can create module globals at run time, so unknown reads compile to a
//! global load and fail with `NameError` if still unbound when executed.

use crate::ast::{Expr, ExprNode, ExprType, FuncDecl, Program, Stmt, StmtNode};
use crate::error::CompileError;
use crate::scope::{ScopeId, ScopeTable, Symbol, SymbolKind};

#[derive(Debug)]
pub struct Analysis {
    pub scopes: ScopeTable,
}

struct Analyzer {
    scopes: ScopeTable,
    errors: Vec<CompileError>,
    current: ScopeId,
    loop_depth: u32,
    file: String,
}

/// Analyze a parsed program, decorating it in place.
pub fn analyze(program: &mut Program) -> Result<Analysis, Vec<CompileError>> {
    let mut analyzer = Analyzer {
        scopes: ScopeTable::new(),
        errors: Vec::new(),
        current: 0,
        loop_depth: 0,
        file: program.file.to_string(),
    };

    // Pre-declare module-level functions and classes so forward references
    // inside earlier bodies resolve.
    for stmt in &program.statements {
        match &stmt.stmt {
            Stmt::FuncDef(func) => {
                analyzer.declare(stmt.info.line, &func.name, SymbolKind::Function, false, false);
            }
            Stmt::ClassDef { name, .. } => {
                analyzer.declare(stmt.info.line, name, SymbolKind::Class, false, false);
            }
            _ => {}
        }
    }

    for stmt in &mut program.statements {
        analyzer.check_statement(stmt);
    }

    if analyzer.errors.is_empty() {
        Ok(Analysis { scopes: analyzer.scopes })
    } else {
        Err(analyzer.errors)
    }
}

impl Analyzer {
    fn error(&mut self, line: u32, msg: impl Into<String>) {
        self.errors.push(CompileError::semantic(&self.file, line, msg));
    }

    fn declare(&mut self, line: u32, name: &str, kind: SymbolKind, is_const: bool, is_local: bool) {
        let fresh = self.scopes.declare(
            self.current,
            name,
            Symbol { kind, is_const, is_extern: false, is_local },
        );
        if !fresh {
            // functions/classes collide; plain variables may be re-assigned
            if matches!(kind, SymbolKind::Function | SymbolKind::Class) {
                self.error(line, format!("redefinition of '{}'", name));
            }
        }
    }

    fn in_child_scope<F: FnOnce(&mut Self)>(&mut self, boundary: bool, f: F) -> ScopeId {
        let parent = self.current;
        let child = self.scopes.push_scope(parent, boundary);
        self.current = child;
        f(self);
        self.current = parent;
        child
    }

    fn check_statement(&mut self, node: &mut StmtNode) {
        node.info.scope = self.current;
        let line = node.info.line;
        match &mut node.stmt {
            Stmt::Expr(expr) => self.check_expr(expr),
            Stmt::LocalDecl { name, init } => {
                if let Some(init) = init {
                    self.check_expr(init);
                }
                if self.scopes.table(self.current).symbols.contains_key(name.as_str()) {
                    self.error(line, format!("'{}' is already declared in this scope", name));
                } else {
                    self.declare(line, name, SymbolKind::Variable, false, true);
                }
            }
            Stmt::ConstDecl { name, init } => {
                self.check_expr(init);
                if self.scopes.table(self.current).symbols.contains_key(name.as_str()) {
                    self.error(line, format!("'{}' is already declared in this scope", name));
                } else {
                    self.declare(line, name, SymbolKind::Variable, true, true);
                }
            }
            Stmt::Assign { target, value } => {
                self.check_expr(value);
                self.check_assign_target(target, line);
            }
            Stmt::AugAssign { target, value, .. } => {
                self.check_expr(value);
                self.check_assign_target(target, line);
            }
            Stmt::If { cond, then_body, else_body } => {
                self.check_expr(cond);
                self.in_child_scope(false, |a| {
                    for stmt in then_body {
                        a.check_statement(stmt);
                    }
                });
                if let Some(else_body) = else_body {
                    self.in_child_scope(false, |a| {
                        for stmt in else_body {
                            a.check_statement(stmt);
                        }
                    });
                }
            }
            Stmt::While { cond, body } => {
                self.check_expr(cond);
                self.loop_depth += 1;
                self.in_child_scope(false, |a| {
                    for stmt in body {
                        a.check_statement(stmt);
                    }
                });
                self.loop_depth -= 1;
            }
            Stmt::ForIn { key, value, iterable, body } => {
                self.check_expr(iterable);
                self.loop_depth += 1;
                let key = key.clone();
                let value = value.clone();
                self.in_child_scope(false, |a| {
                    a.declare(line, &key, SymbolKind::Variable, false, true);
                    if let Some(value) = &value {
                        if *value == key {
                            a.error(line, "loop variables must have distinct names");
                        }
                        a.declare(line, value, SymbolKind::Variable, false, true);
                    }
                    for stmt in body {
                        a.check_statement(stmt);
                    }
                });
                self.loop_depth -= 1;
            }
            Stmt::Break => {
                if self.loop_depth == 0 {
                    self.error(line, "'break' outside of a loop");
                }
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    self.error(line, "'continue' outside of a loop");
                }
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Import { module } => {
                self.declare(line, module, SymbolKind::Module, false, false);
            }
            Stmt::FuncDef(func) => {
                // module-level functions were pre-declared; nested ones not yet
                if !self.scopes.table(self.current).symbols.contains_key(func.name.as_str()) {
                    let name = func.name.clone();
                    self.declare(line, &name, SymbolKind::Function, false, false);
                }
                self.check_function(func);
            }
            Stmt::ClassDef { name, bases, methods } => {
                for base in bases.iter() {
                    if self.scopes.find(self.current, base).is_none() {
                        self.error(line, format!("unknown base class '{}'", base));
                    }
                }
                if !self.scopes.table(self.current).symbols.contains_key(name.as_str()) {
                    let name = name.clone();
                    self.declare(line, &name, SymbolKind::Class, false, false);
                }
                for method in methods {
                    if method.params.first().map(|p| p.name.as_str()) != Some("self") {
                        self.errors.push(CompileError::semantic(
                            &self.file,
                            method.info.line,
                            format!("method '{}' must declare 'self' as its first parameter", method.name),
                        ));
                    }
                    self.check_function(method);
                }
            }
            Stmt::Block(body) => {
                self.in_child_scope(false, |a| {
                    for stmt in body {
                        a.check_statement(stmt);
                    }
                });
            }
        }
    }

    fn check_function(&mut self, func: &mut FuncDecl) {
        func.info.ty = ExprType::FunctionDecl;
        let saved_loop_depth = std::mem::take(&mut self.loop_depth);
        let params = func.params.clone();
        let line = func.info.line;
        let scope = self.in_child_scope(true, |a| {
            for param in &params {
                if a.scopes.table(a.current).symbols.contains_key(param.name.as_str()) {
                    a.error(line, format!("duplicate parameter '{}'", param.name));
                } else {
                    a.declare(line, &param.name, SymbolKind::Param, false, true);
                }
            }
            for stmt in &mut func.body {
                a.check_statement(stmt);
            }
        });
        func.info.scope = scope;
        self.loop_depth = saved_loop_depth;
    }

    fn check_assign_target(&mut self, target: &mut ExprNode, line: u32) {
        match &mut target.expr {
            Expr::Ident(name) => {
                target.info.scope = self.current;
                target.info.ty = ExprType::Variable;
                match self.scopes.find(self.current, name) {
                    Some((_, sym)) if sym.is_const => {
                        self.error(line, format!("cannot assign to const '{}'", name));
                    }
                    Some(_) => {}
                    None => {
                        // first assignment creates a module global
                        let name = name.clone();
                        self.scopes.declare(
                            0,
                            &name,
                            Symbol {
                                kind: SymbolKind::Variable,
                                is_const: false,
                                is_extern: false,
                                is_local: false,
                            },
                        );
                    }
                }
            }
            _ => self.check_expr(target),
        }
    }

    fn check_expr(&mut self, node: &mut ExprNode) {
        node.info.scope = self.current;
        node.info.ty = match &mut node.expr {
            Expr::Number(_) => ExprType::Number,
            Expr::Str(_) => ExprType::Str,
            Expr::Bool(_) => ExprType::Boolean,
            Expr::Null => ExprType::Null,
            Expr::Ident(_) => ExprType::Variable,
            Expr::VecLiteral(items) => {
                for item in items {
                    self.check_expr(item);
                }
                ExprType::Vector
            }
            Expr::MapLiteral(pairs) => {
                for (k, v) in pairs {
                    self.check_expr(k);
                    self.check_expr(v);
                }
                ExprType::Map
            }
            Expr::Unary { operand, .. } => {
                self.check_expr(operand);
                ExprType::NoType
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs);
                self.check_expr(rhs);
                ExprType::NoType
            }
            Expr::Call { callee, args } => {
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
                ExprType::NoType
            }
            Expr::Index { target, index } => {
                self.check_expr(target);
                self.check_expr(index);
                ExprType::NoType
            }
            Expr::Slice2 { target, start, end } => {
                self.check_expr(target);
                self.check_expr(start);
                self.check_expr(end);
                ExprType::NoType
            }
            Expr::Slice3 { target, start, end, step } => {
                self.check_expr(target);
                self.check_expr(start);
                self.check_expr(end);
                self.check_expr(step);
                ExprType::NoType
            }
            Expr::Dot { target, .. } => {
                self.check_expr(target);
                ExprType::NoType
            }
            Expr::New { class_path, args } => {
                let line = node.info.line;
                if let Some(first) = class_path.first() {
                    // a single-segment path must name a known class; dotted
                    // paths resolve through modules at run time
                    if class_path.len() == 1 && self.scopes.find(self.current, first).is_none() {
                        let first = first.clone();
                        self.error(line, format!("unknown class '{}'", first));
                    }
                }
                for arg in args {
                    self.check_expr(arg);
                }
                ExprType::NoType
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn analyze_src(src: &str) -> Result<Analysis, Vec<CompileError>> {
        let mut prog = parse_source(src, "t.dv").unwrap();
        analyze(&mut prog)
    }

    #[test]
    fn test_const_assignment_rejected() {
        let errs = analyze_src("const x = 5; x = 6;").unwrap_err();
        assert!(errs[0].message.contains("const"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let errs = analyze_src("break;").unwrap_err();
        assert!(errs[0].message.contains("break"));
    }

    #[test]
    fn test_local_redeclaration_rejected() {
        let errs = analyze_src("local x = 1; local x = 2;").unwrap_err();
        assert!(errs[0].message.contains("already declared"));
    }

    #[test]
    fn test_shadowing_in_inner_block_allowed() {
        assert!(analyze_src("local x = 1; { local x = 2; }").is_ok());
    }

    #[test]
    fn test_method_without_self_rejected() {
        let errs = analyze_src("class C { def m(a) { } }").unwrap_err();
        assert!(errs[0].message.contains("self"));
    }

    #[test]
    fn test_forward_reference_to_function() {
        assert!(analyze_src("def f() { return g(); } def g() { return 1; }").is_ok());
    }

    #[test]
    fn test_unknown_base_class_rejected() {
        let errs = analyze_src("class D : Missing { def new(self) { } }").unwrap_err();
        assert!(errs[0].message.contains("base class"));
    }

    #[test]
    fn test_scopes_decorated() {
        let mut prog = parse_source("def f(a) { local b = a; }", "t.dv").unwrap();
        let analysis = analyze(&mut prog).unwrap();
        // module scope + function scope
        assert!(analysis.scopes.len() >= 2);
        let Stmt::FuncDef(func) = &prog.statements[0].stmt else { panic!() };
        assert_ne!(func.info.scope, 0);
        assert!(analysis.scopes.find_in_function(func.info.scope, "a").is_some());
    }
}
