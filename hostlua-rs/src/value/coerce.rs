//! Scalar coercions.
//!
//! A coercion never changes the value it is called on: when the held kind
//! already matches, the payload is returned directly; otherwise a copy of the
//! datum is converted following the interpreter's own rules.

use mlua::prelude::*;

use super::{Kind, Value};

impl Value {
    /// Integer view.  Doubles truncate toward zero, saturating; strings use
    /// Lua's numeric conversion; anything unconvertible is 0.
    pub fn as_long(&self) -> i64 {
        match self.datum() {
            LuaValue::Integer(i) => *i,
            LuaValue::Number(f) => *f as i64,
            LuaValue::Boolean(b) => i64::from(*b),
            LuaValue::String(_) => {
                let lua = self.session().lua();
                match lua.coerce_integer(self.datum().clone()) {
                    Ok(Some(i)) => i,
                    _ => lua
                        .coerce_number(self.datum().clone())
                        .ok()
                        .flatten()
                        .map_or(0, |f| f as i64),
                }
            }
            _ => self.compound_flag(),
        }
    }

    /// Floating-point view, following the same rules as [`Value::as_long`].
    pub fn as_double(&self) -> f64 {
        match self.datum() {
            LuaValue::Number(f) => *f,
            LuaValue::Integer(i) => *i as f64,
            LuaValue::Boolean(b) => f64::from(u8::from(*b)),
            LuaValue::String(_) => self
                .session()
                .lua()
                .coerce_number(self.datum().clone())
                .ok()
                .flatten()
                .unwrap_or(0.0),
            _ => self.compound_flag() as f64,
        }
    }

    /// Lua truthiness: only Null and `false` are false.
    pub fn as_bool(&self) -> bool {
        !matches!(self.datum(), LuaValue::Nil | LuaValue::Boolean(false))
    }

    /// String view.  Numbers use Lua's formatting, Null and plain tables are
    /// empty, objects use their `__tostring` when they have one.
    pub fn as_string(&self) -> String {
        match self.datum() {
            LuaValue::String(s) => String::from(s.to_string_lossy()),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(_) | LuaValue::Number(_) => self
                .session()
                .lua()
                .coerce_string(self.datum().clone())
                .ok()
                .flatten()
                .map(|s| String::from(s.to_string_lossy()))
                .unwrap_or_default(),
            _ if self.kind() == Kind::Object => {
                self.session().stringify(self.datum()).unwrap_or_default()
            }
            _ => String::new(),
        }
    }

    /// Binary-safe string view.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self.datum() {
            LuaValue::String(s) => s.as_bytes().to_vec(),
            _ => self.as_string().into_bytes(),
        }
    }

    /// 0 for Null and empty List/Map, 1 for any other compound.
    fn compound_flag(&self) -> i64 {
        match self.kind() {
            Kind::Null => 0,
            Kind::List | Kind::Map if self.size() == 0 => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::session::Session;
    use crate::value::{Kind, Value};

    fn session() -> Session {
        Session::open(&EngineConfig::default()).unwrap()
    }

    fn eval(s: &Session, src: &str) -> Value {
        let chunk = s.compile("test", format!("return {src}").as_bytes()).unwrap();
        Value::new(s, s.execute(&chunk).unwrap()).unwrap()
    }

    #[test]
    fn coercion_leaves_original_untouched() {
        let s = session();
        let v = s.create_scalar(3).unwrap();
        assert_eq!(v.as_double(), 3.0);
        assert_eq!(v.as_long(), 3);
        assert_eq!(v.kind(), Kind::Long);
    }

    #[test]
    fn numbers() {
        let s = session();
        assert_eq!(s.create_scalar(-2.9).unwrap().as_long(), -2);
        assert_eq!(s.create_scalar(f64::NAN).unwrap().as_long(), 0);
        assert_eq!(s.create_scalar(1e300).unwrap().as_long(), i64::MAX);
        assert_eq!(s.create_scalar(true).unwrap().as_long(), 1);
        assert_eq!(s.create_scalar(false).unwrap().as_double(), 0.0);
        assert_eq!(s.create_null().as_long(), 0);
    }

    #[test]
    fn numeric_strings() {
        let s = session();
        assert_eq!(s.create_scalar("42").unwrap().as_long(), 42);
        assert_eq!(s.create_scalar(" 7 ").unwrap().as_long(), 7);
        assert_eq!(s.create_scalar("3.75").unwrap().as_long(), 3);
        assert_eq!(s.create_scalar("0x10").unwrap().as_long(), 16);
        assert_eq!(s.create_scalar("2.5").unwrap().as_double(), 2.5);
        assert_eq!(s.create_scalar("abc").unwrap().as_long(), 0);
        assert_eq!(s.create_scalar("abc").unwrap().as_double(), 0.0);
    }

    #[test]
    fn truthiness() {
        let s = session();
        assert!(!s.create_null().as_bool());
        assert!(!s.create_scalar(false).unwrap().as_bool());
        assert!(s.create_scalar(0).unwrap().as_bool());
        assert!(s.create_scalar("").unwrap().as_bool());
        assert!(s.create_list(0).unwrap().as_bool());
    }

    #[test]
    fn strings() {
        let s = session();
        assert_eq!(s.create_scalar(10).unwrap().as_string(), "10");
        assert_eq!(s.create_scalar(2.0).unwrap().as_string(), "2.0");
        assert_eq!(s.create_scalar(0.5).unwrap().as_string(), "0.5");
        assert_eq!(s.create_scalar(true).unwrap().as_string(), "true");
        assert_eq!(s.create_null().as_string(), "");
        assert_eq!(eval(&s, "{1, 2}").as_string(), "");
    }

    #[test]
    fn object_stringify() {
        let s = session();
        let named = eval(
            &s,
            "setmetatable({}, { __tostring = function() return 'widget' end })",
        );
        assert_eq!(named.as_string(), "widget");

        let failing = eval(
            &s,
            "setmetatable({}, { __tostring = function() error('nope') end })",
        );
        assert_eq!(failing.as_string(), "");

        assert_eq!(s.create_object().unwrap().as_string(), "");
    }

    #[test]
    fn compound_numbers() {
        let s = session();
        assert_eq!(s.create_list(0).unwrap().as_long(), 0);
        assert_eq!(eval(&s, "{1}").as_long(), 1);
        assert_eq!(s.create_object().unwrap().as_double(), 1.0);
    }

    #[test]
    fn bytes_are_binary_safe() {
        let s = session();
        let v = eval(&s, "'a\\0b\\255'");
        assert_eq!(v.as_bytes(), vec![b'a', 0, b'b', 255]);
    }
}
