use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{LoxError, Result};
use crate::token::Token;
use crate::value::Value;

/// One frame of the lexical environment chain.
///
/// Frames are shared (`Rc<RefCell<_>>`): every closure holds a strong
/// reference to its defining frame, and a frame holds one to its parent,
/// so a frame lives as long as its longest-lived holder.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Bind (or rebind) a name in this frame.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Read a name, walking outward through enclosing frames.
    pub fn get(&self, name: &Token) -> Result<Value> {
        if let Some(value) = self.values.get(&name.lexeme) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// Rebind an existing name, walking outward through enclosing frames.
    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if self.values.contains_key(&name.lexeme) {
            self.values.insert(name.lexeme.clone(), value);
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// Read a name exactly `distance` hops up the chain. `None` means the
    /// resolver and the runtime chain disagree, which callers surface as a
    /// runtime error.
    pub fn get_at(env: &Rc<RefCell<Environment>>, distance: usize, name: &str) -> Option<Value> {
        let frame = Self::ancestor(env, distance)?;
        let value = frame.borrow().values.get(name).cloned();
        value
    }

    /// Rebind a name exactly `distance` hops up the chain. Returns false if
    /// the frame or the name is missing.
    pub fn assign_at(
        env: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        value: Value,
    ) -> bool {
        match Self::ancestor(env, distance) {
            Some(frame) if frame.borrow().values.contains_key(name) => {
                frame.borrow_mut().values.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    fn ancestor(env: &Rc<RefCell<Environment>>, distance: usize) -> Option<Rc<RefCell<Environment>>> {
        let mut frame = Rc::clone(env);
        for _ in 0..distance {
            let parent = frame.borrow().enclosing.clone()?;
            frame = parent;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn ident(name: &str) -> Token {
        Token::new(TokenType::IDENTIFIER, name.to_string(), 1)
    }

    fn truthy(value: &Value) -> bool {
        matches!(value, Value::Bool(true))
    }

    #[test]
    fn define_then_get() {
        let mut env = Environment::new();
        env.define("answer", Value::Number(42.0));

        match env.get(&ident("answer")) {
            Ok(Value::Number(n)) => assert_eq!(n, 42.0),
            other => panic!("unexpected lookup result: {:?}", other),
        }
    }

    #[test]
    fn get_walks_enclosing_chain() {
        let global = Rc::new(RefCell::new(Environment::new()));
        global.borrow_mut().define("flag", Value::Bool(true));

        let inner = Environment::with_enclosing(Rc::clone(&global));
        let value = inner.get(&ident("flag")).expect("found in parent");
        assert!(truthy(&value));
    }

    #[test]
    fn assign_to_undefined_is_an_error() {
        let mut env = Environment::new();
        assert!(env.assign(&ident("ghost"), Value::Nil).is_err());
    }

    #[test]
    fn get_at_lands_on_the_right_frame() {
        let global = Rc::new(RefCell::new(Environment::new()));
        global.borrow_mut().define("x", Value::Number(1.0));

        let middle = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &global,
        ))));
        middle.borrow_mut().define("x", Value::Number(2.0));

        let leaf = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &middle,
        ))));

        match Environment::get_at(&leaf, 1, "x") {
            Some(Value::Number(n)) => assert_eq!(n, 2.0),
            other => panic!("unexpected: {:?}", other),
        }
        match Environment::get_at(&leaf, 2, "x") {
            Some(Value::Number(n)) => assert_eq!(n, 1.0),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(Environment::get_at(&leaf, 0, "x").is_none());
    }

    #[test]
    fn assign_at_respects_distance() {
        let global = Rc::new(RefCell::new(Environment::new()));
        global.borrow_mut().define("x", Value::Number(1.0));

        let leaf = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &global,
        ))));

        assert!(Environment::assign_at(&leaf, 1, "x", Value::Number(9.0)));
        assert!(!Environment::assign_at(&leaf, 0, "x", Value::Number(9.0)));

        match Environment::get_at(&leaf, 1, "x") {
            Some(Value::Number(n)) => assert_eq!(n, 9.0),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
