//! Static resolution pass for the Lox interpreter.
//!
//! A single AST walk between parsing and evaluation that:
//! 1. **Builds lexical scopes**: a stack of `HashMap<String, bool>` tracking
//!    declared (false) and fully defined (true) names per nested scope.
//! 2. **Enforces static rules**: redeclaration in the same local scope,
//!    reading a variable in its own initializer, `return` outside a
//!    function, value-returning `return` in an initializer, `break` outside
//!    a loop, `this`/`super` misuse, and self-inheritance.
//! 3. **Records binding distances**: every `Variable`, `Assign`, `This`,
//!    and `Super` occurrence found in a scope is reported to the
//!    interpreter as a hop count, enabling direct environment-frame
//!    addressing at runtime. Names found in no scope fall back to the
//!    global environment and get no entry.
//!
//! Diagnostics accumulate; the walk always covers the whole tree so one run
//! surfaces as many static errors as possible.

use std::collections::HashMap;
use std::io::Write;

use log::debug;

use crate::error::LoxError;
use crate::expr::{Expr, ExprId};
use crate::interpreter::Interpreter;
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::Token;

/// What kind of function body (if any) is being resolved. Validates
/// `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// What kind of class body (if any) is being resolved. Validates `this`
/// and `super`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Whether a loop body is being resolved. Validates `break`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LoopType {
    None,
    Loop,
}

/// Resolver: tracks scopes, enforces static rules, and *records* binding
/// distances for locals by calling back into the interpreter.
pub struct Resolver<'interp, W: Write> {
    interpreter: &'interp mut Interpreter<W>,
    scopes: Vec<HashMap<String, bool>>, // false=declared, true=defined
    current_function: FunctionType,
    current_class: ClassType,
    current_loop: LoopType,
    errors: Vec<LoxError>,
}

impl<'interp, W: Write> Resolver<'interp, W> {
    /// Create a new resolver bound to the given interpreter.
    pub fn new(interpreter: &'interp mut Interpreter<W>) -> Self {
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            current_loop: LoopType::None,
            errors: Vec::new(),
        }
    }

    /// Walk all top-level statements. `Err` carries every static error
    /// found in the program.
    pub fn resolve(mut self, statements: &[Stmt]) -> std::result::Result<(), Vec<LoxError>> {
        self.resolve_statements(statements);

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn resolve_statements(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement);
        }
    }

    // ── statement resolution ─────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_statements(statements);
                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                self.declare(name);
                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }
                self.define(name);
            }

            Stmt::Function(declaration) => {
                if let Some(name) = &declaration.name {
                    // Define eagerly so the function can recurse.
                    self.declare(name);
                    self.define(name);
                }
                self.resolve_function(declaration, FunctionType::Function);
            }

            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);

                let enclosing_loop = self.current_loop;
                self.current_loop = LoopType::Loop;
                self.resolve_stmt(body);
                self.current_loop = enclosing_loop;
            }

            Stmt::Break { keyword } => {
                if self.current_loop == LoopType::None {
                    self.error(keyword, "Can't use 'break' outside of a loop.");
                }
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(expr);
                }
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(name);
                self.define(name);

                if let Some(superclass_expr) = superclass {
                    if let Expr::Variable {
                        name: superclass_name,
                        ..
                    } = superclass_expr
                    {
                        if superclass_name.lexeme == name.lexeme {
                            self.error(superclass_name, "A class can't inherit from itself.");
                        }
                    }

                    self.current_class = ClassType::Subclass;
                    self.resolve_expr(superclass_expr);

                    // The methods' closures will see a `super` frame.
                    self.begin_scope();
                    self.define_keyword("super");
                }

                // And, inside that, a `this` frame.
                self.begin_scope();
                self.define_keyword("this");

                for method in methods {
                    let declaration = if method
                        .name
                        .as_ref()
                        .is_some_and(|name| name.lexeme == "init")
                    {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };

                    self.resolve_function(method, declaration);
                }

                self.end_scope();

                if superclass.is_some() {
                    self.end_scope();
                }

                self.current_class = enclosing_class;
            }
        }
    }

    // ── expression resolution ────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => {
                self.resolve_expr(inner);
            }

            Expr::Unary { right, .. } => {
                self.resolve_expr(right);
            }

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Variable { id, name } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(&name.lexeme) == Some(&false) {
                        self.error(name, "Can't read local variable in its own initializer.");
                    }
                }

                self.resolve_local(*id, name);
            }

            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for argument in arguments {
                    self.resolve_expr(argument);
                }
            }

            Expr::Get { object, .. } => {
                self.resolve_expr(object);
            }

            Expr::Set { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }

            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                }

                self.resolve_local(*id, keyword);
            }

            Expr::Super { id, keyword, .. } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'super' outside of a class.");
                } else if self.current_class != ClassType::Subclass {
                    self.error(keyword, "Can't use 'super' in a class with no superclass.");
                }

                self.resolve_local(*id, keyword);
            }

            Expr::Function(declaration) => {
                self.resolve_function(declaration, FunctionType::Function);
            }
        }
    }

    // ── function helper ──────────────────────────────────────────────

    /// Resolve a function's parameters and body in a fresh scope under the
    /// given context. Loop context resets: a `break` inside the body
    /// cannot target a loop outside it.
    fn resolve_function(&mut self, declaration: &FunctionDecl, kind: FunctionType) {
        let enclosing_function = self.current_function;
        let enclosing_loop = self.current_loop;
        self.current_function = kind;
        self.current_loop = LoopType::None;

        self.begin_scope();

        for param in &declaration.params {
            self.declare(param);
            self.define(param);
        }

        self.resolve_statements(&declaration.body);

        self.end_scope();

        self.current_function = enclosing_function;
        self.current_loop = enclosing_loop;
    }

    // ── scope management ─────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    #[inline]
    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&name.lexeme) {
                self.errors.push(LoxError::resolve(
                    name,
                    "Already a variable with this name in this scope.",
                ));
                return;
            }
            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    /// Inject an implicit binding (`this`, `super`) into the current scope.
    fn define_keyword(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    // ── binding-distance helper ──────────────────────────────────────

    /// Record this occurrence as a local at its lexical depth, or leave it
    /// for the global environment if no scope declares it.
    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                debug!("Resolved '{}' at depth {}", name.lexeme, depth);
                self.interpreter.note_local(id, depth);
                return;
            }
        }

        debug!("Resolved '{}' as global", name.lexeme);
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(LoxError::resolve(token, message));
    }
}
