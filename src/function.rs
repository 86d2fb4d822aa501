use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::class::LoxInstance;
use crate::environment::Environment;
use crate::stmt::FunctionDecl;
use crate::value::Value;

/// Host function exposed to Lox programs (only `clock` today).
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> std::result::Result<Value, String>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// User function: a declaration paired with the environment it closed over.
///
/// Methods are re-wrapped by [`LoxFunction::bind`] so `this` resolves one
/// frame above the method body; `super` (when the class has a superclass)
/// lives one frame further out, installed at class-declaration time.
pub struct LoxFunction {
    pub declaration: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
    pub is_initializer: bool,
}

impl LoxFunction {
    pub fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    pub fn name(&self) -> Option<&str> {
        self.declaration.name.as_ref().map(|t| t.lexeme.as_str())
    }

    /// Wrap this function in a one-entry environment defining `this`.
    pub fn bind(&self, instance: Rc<RefCell<LoxInstance>>) -> LoxFunction {
        let environment = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &self.closure,
        ))));
        environment
            .borrow_mut()
            .define("this", Value::Instance(instance));

        LoxFunction {
            declaration: Rc::clone(&self.declaration),
            closure: environment,
            is_initializer: self.is_initializer,
        }
    }
}

// Closures can reach back to environments that hold this very function, so
// Debug stops at the declaration name instead of walking the chain.
impl fmt::Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxFunction")
            .field("name", &self.name().unwrap_or("<anonymous>"))
            .field("arity", &self.arity())
            .field("is_initializer", &self.is_initializer)
            .finish()
    }
}
