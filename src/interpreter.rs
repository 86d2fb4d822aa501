//! Tree-walking evaluator.
//!
//! Hosts the global environment (with the one native function, `clock`),
//! the locals map filled in by the resolver, and the output sink that
//! `print` writes to. Statements execute against a chain of
//! `Rc<RefCell<Environment>>` frames; every frame pushed on entry to a
//! block, call, or method binding is popped on every exit path.
//!
//! `break` and `return` travel as [`Unwind`] variants distinct from
//! runtime errors. They are consumed by the nearest loop or call frame
//! and must never reach a caller of [`Interpreter::interpret`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::class::{LoxClass, LoxInstance};
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::expr::{Expr, ExprId, LiteralValue};
use crate::function::{LoxFunction, NativeFunction};
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Why evaluation of a statement stopped early.
///
/// `Break` and `Return` are control signals, not errors: they unwind to
/// the nearest enclosing loop or call and carry no diagnostic. Keeping
/// them off the `Fault` path means a bug that lets one escape is loud
/// instead of masquerading as a user error.
enum Unwind {
    Fault(LoxError),
    Break,
    Return(Value),
}

impl From<LoxError> for Unwind {
    fn from(e: LoxError) -> Self {
        Unwind::Fault(e)
    }
}

type Flow<T> = std::result::Result<T, Unwind>;

pub struct Interpreter<W: Write> {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<ExprId, usize>,
    out: W,
}

impl<W: Write> Interpreter<W> {
    /// Build an interpreter whose `print` output goes to `out`.
    pub fn new(out: W) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));

        globals.borrow_mut().define(
            "clock",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: clock_native,
            })),
        );

        Interpreter {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
        }
    }

    /// Record a variable occurrence as a local at the given hop count.
    /// Called by the resolver; occurrences without an entry fall back to
    /// the global environment.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        self.locals.insert(id, depth);
    }

    /// Run a resolved program, stopping at the first runtime error.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        self.run(statements, false)
    }

    /// Like [`interpret`](Self::interpret), but echoes the value of
    /// top-level expression statements, for the REPL.
    pub fn interpret_interactive(&mut self, statements: &[Stmt]) -> Result<()> {
        self.run(statements, true)
    }

    fn run(&mut self, statements: &[Stmt], echo: bool) -> Result<()> {
        for statement in statements {
            let result = match statement {
                Stmt::Expression(expr) if echo => match self.evaluate(expr) {
                    Ok(Value::Nil) => Ok(()),
                    Ok(value) => writeln!(self.out, "{}", value)
                        .map_err(|e| Unwind::Fault(LoxError::Io(e))),
                    Err(unwind) => Err(unwind),
                },

                _ => self.execute(statement),
            };

            match result {
                Ok(()) => {}

                Err(Unwind::Fault(e)) => return Err(e),

                // Implementation bug: the parser and resolver reject any
                // program that could get here.
                Err(Unwind::Break) | Err(Unwind::Return(_)) => {
                    return Err(LoxError::Runtime {
                        message: "A control signal escaped the evaluator.".to_string(),
                        line: 0,
                    });
                }
            }
        }

        Ok(())
    }

    // ── statements ───────────────────────────────────────────────────

    fn execute(&mut self, stmt: &Stmt) -> Flow<()> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(())
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value).map_err(|e| Unwind::Fault(LoxError::Io(e)))?;
                Ok(())
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                self.environment.borrow_mut().define(&name.lexeme, value);
                Ok(())
            }

            Stmt::Block(statements) => {
                let environment = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
                    &self.environment,
                ))));
                self.execute_block(statements, environment)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }
                Ok(())
            }

            Stmt::While { condition, body } => {
                loop {
                    if !is_truthy(&self.evaluate(condition)?) {
                        break;
                    }

                    match self.execute(body) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }

            Stmt::Break { .. } => Err(Unwind::Break),

            Stmt::Function(declaration) => {
                if let Some(name) = &declaration.name {
                    let function = LoxFunction {
                        declaration: Rc::clone(declaration),
                        closure: Rc::clone(&self.environment),
                        is_initializer: false,
                    };

                    self.environment
                        .borrow_mut()
                        .define(&name.lexeme, Value::Function(Rc::new(function)));
                }
                Ok(())
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                Err(Unwind::Return(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    /// Run `statements` in `environment`, restoring the previous frame on
    /// every exit path (normal, fault, or control signal).
    fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> Flow<()> {
        let previous = Rc::clone(&self.environment);
        self.environment = environment;

        let mut result = Ok(());
        for statement in statements {
            if let Err(unwind) = self.execute(statement) {
                result = Err(unwind);
                break;
            }
        }

        self.environment = previous;
        result
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Flow<()> {
        // The name is bound (to nil) before the superclass expression runs,
        // so the class body can already shadow an outer binding.
        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        let superclass_value = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    let token = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };
                    return Err(LoxError::runtime(token, "Superclass must be a class.").into());
                }
            },
            None => None,
        };

        // Method closures share one environment; with a superclass it gets
        // an extra frame binding `super`.
        let mut method_closure = Rc::clone(&self.environment);
        if let Some(superclass) = &superclass_value {
            let environment = Rc::new(RefCell::new(Environment::with_enclosing(method_closure)));
            environment
                .borrow_mut()
                .define("super", Value::Class(Rc::clone(superclass)));
            method_closure = environment;
        }

        let mut method_table = HashMap::new();
        for declaration in methods {
            let Some(method_name) = &declaration.name else {
                continue;
            };

            let function = LoxFunction {
                declaration: Rc::clone(declaration),
                closure: Rc::clone(&method_closure),
                is_initializer: method_name.lexeme == "init",
            };

            method_table.insert(method_name.lexeme.clone(), Rc::new(function));
        }

        let class = LoxClass::new(name.lexeme.clone(), superclass_value, method_table);

        self.environment
            .borrow_mut()
            .assign(name, Value::Class(Rc::new(class)))?;

        Ok(())
    }

    // ── expressions ──────────────────────────────────────────────────

    fn evaluate(&mut self, expr: &Expr) -> Flow<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::Str(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_value = self.evaluate(left)?;

                match operator.token_type {
                    TokenType::OR if is_truthy(&left_value) => Ok(left_value),
                    TokenType::AND if !is_truthy(&left_value) => Ok(left_value),
                    _ => self.evaluate(right),
                }
            }

            Expr::Variable { id, name } => self.lookup_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                if let Some(&distance) = self.locals.get(id) {
                    if !Environment::assign_at(
                        &self.environment,
                        distance,
                        &name.lexeme,
                        value.clone(),
                    ) {
                        return Err(LoxError::runtime(
                            name,
                            format!("Undefined variable '{}'.", name.lexeme),
                        )
                        .into());
                    }
                } else {
                    self.globals.borrow_mut().assign(name, value.clone())?;
                }

                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(self.evaluate(argument)?);
                }

                self.call_value(callee, args, paren)
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => Ok(LoxInstance::get(&instance, name)?),
                    _ => Err(LoxError::runtime(name, "Only instances have properties.").into()),
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;

                let Value::Instance(instance) = object else {
                    return Err(LoxError::runtime(name, "Only instances have fields.").into());
                };

                let value = self.evaluate(value)?;
                instance.borrow_mut().set(name, value.clone());
                Ok(value)
            }

            Expr::This { id, keyword } => self.lookup_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),

            Expr::Function(declaration) => Ok(Value::Function(Rc::new(LoxFunction {
                declaration: Rc::clone(declaration),
                closure: Rc::clone(&self.environment),
                is_initializer: false,
            }))),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Flow<Value> {
        let value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::MINUS => match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(LoxError::runtime(operator, "operand must be a number").into()),
            },

            TokenType::BANG => Ok(Value::Bool(!is_truthy(&value))),

            _ => Err(LoxError::runtime(operator, "Invalid unary operator.").into()),
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Flow<Value> {
        let left_value = self.evaluate(left)?;
        let right_value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::PLUS => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),

                _ => Err(LoxError::runtime(
                    operator,
                    "operands must be two numbers or two strings",
                )
                .into()),
            },

            TokenType::MINUS => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Number(a - b)),

            TokenType::STAR => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Number(a * b)),

            // Division by zero follows IEEE-754: ±inf or NaN, not an error.
            TokenType::SLASH => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Number(a / b)),

            TokenType::GREATER => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Bool(a > b)),

            TokenType::GREATER_EQUAL => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Bool(a >= b)),

            TokenType::LESS => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Bool(a < b)),

            TokenType::LESS_EQUAL => self
                .numeric_operands(operator, left_value, right_value)
                .map(|(a, b)| Value::Bool(a <= b)),

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(is_equal(&left_value, &right_value))),

            TokenType::BANG_EQUAL => Ok(Value::Bool(!is_equal(&left_value, &right_value))),

            _ => Err(LoxError::runtime(operator, "Invalid binary operator.").into()),
        }
    }

    fn numeric_operands(
        &self,
        operator: &Token,
        left: Value,
        right: Value,
    ) -> Flow<(f64, f64)> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            _ => Err(LoxError::runtime(operator, "operands must be numbers").into()),
        }
    }

    fn lookup_variable(&self, id: ExprId, name: &Token) -> Flow<Value> {
        if let Some(&distance) = self.locals.get(&id) {
            Environment::get_at(&self.environment, distance, &name.lexeme).ok_or_else(|| {
                LoxError::runtime(name, format!("Undefined variable '{}'.", name.lexeme)).into()
            })
        } else {
            Ok(self.globals.borrow().get(name)?)
        }
    }

    fn evaluate_super(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Flow<Value> {
        let distance = match self.locals.get(&id) {
            Some(&distance) => distance,
            None => {
                return Err(LoxError::runtime(keyword, "Invalid 'super' binding.").into());
            }
        };

        // `super` sits one frame above the `this` injected at bind time.
        let superclass = Environment::get_at(&self.environment, distance, "super");
        let object = distance
            .checked_sub(1)
            .and_then(|d| Environment::get_at(&self.environment, d, "this"));

        let (Some(Value::Class(superclass)), Some(Value::Instance(object))) = (superclass, object)
        else {
            return Err(LoxError::runtime(keyword, "Invalid 'super' binding.").into());
        };

        let found = superclass.find_method(&method.lexeme).ok_or_else(|| {
            Unwind::Fault(LoxError::runtime(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            ))
        })?;

        Ok(Value::Function(Rc::new(found.bind(object))))
    }

    // ── calls ────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, arguments: Vec<Value>, paren: &Token) -> Flow<Value> {
        match callee {
            Value::NativeFunction(native) => {
                self.check_arity(native.arity, arguments.len(), paren)?;

                (native.func)(&arguments)
                    .map_err(|message| LoxError::runtime(paren, message).into())
            }

            Value::Function(function) => {
                self.check_arity(function.arity(), arguments.len(), paren)?;
                self.call_function(&function, arguments)
            }

            Value::Class(class) => {
                self.check_arity(class.arity(), arguments.len(), paren)?;

                let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));

                if let Some(initializer) = class.find_method("init") {
                    self.call_function(&initializer.bind(Rc::clone(&instance)), arguments)?;
                }

                Ok(Value::Instance(instance))
            }

            _ => Err(LoxError::runtime(paren, "Can only call functions and classes.").into()),
        }
    }

    fn check_arity(&self, expected: usize, got: usize, paren: &Token) -> Flow<()> {
        if expected != got {
            return Err(LoxError::runtime(
                paren,
                format!("Expected {} arguments but got {}.", expected, got),
            )
            .into());
        }
        Ok(())
    }

    fn call_function(&mut self, function: &LoxFunction, arguments: Vec<Value>) -> Flow<Value> {
        let mut environment = Environment::with_enclosing(Rc::clone(&function.closure));

        for (param, argument) in function.declaration.params.iter().zip(arguments) {
            environment.define(&param.lexeme, argument);
        }

        let result = self.execute_block(
            &function.declaration.body,
            Rc::new(RefCell::new(environment)),
        );

        match result {
            Ok(()) => {}

            Err(Unwind::Return(value)) => {
                if !function.is_initializer {
                    return Ok(value);
                }
                // An initializer's bare `return` still yields `this`.
            }

            Err(other) => return Err(other),
        }

        if function.is_initializer {
            return Environment::get_at(&function.closure, 0, "this").ok_or_else(|| {
                Unwind::Fault(LoxError::Runtime {
                    message: "Initializer lost its 'this' binding.".to_string(),
                    line: 0,
                })
            });
        }

        Ok(Value::Nil)
    }
}

/// `nil` and `false` are falsey; everything else is truthy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}

/// Structural equality for primitives, identity for reference values,
/// always false across types.
fn is_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,

        (Value::Bool(a), Value::Bool(b)) => a == b,

        (Value::Number(a), Value::Number(b)) => a == b,

        (Value::Str(a), Value::Str(b)) => a == b,

        (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),

        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),

        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),

        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),

        _ => false,
    }
}

/// Seconds since the Unix epoch, with sub-millisecond resolution.
fn clock_native(_args: &[Value]) -> std::result::Result<Value, String> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("Clock error: {}", e))?
        .as_secs_f64();

    Ok(Value::Number(timestamp))
}
