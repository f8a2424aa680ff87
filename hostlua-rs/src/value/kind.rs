//! Value kinds and host scalars.

use std::fmt;

/// Discriminant of a [`Value`](super::Value).
///
/// List and Map are never stored; they are derived from the keys of the
/// underlying table every time a value is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Long,
    Double,
    Bool,
    String,
    List,
    Map,
    Object,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Long => "long",
            Kind::Double => "double",
            Kind::Bool => "bool",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Object => "object",
        }
    }

    /// List, Map or Object.
    pub fn is_compound(self) -> bool {
        matches!(self, Kind::List | Kind::Map | Kind::Object)
    }

    pub fn is_scalar(self) -> bool {
        matches!(self, Kind::Long | Kind::Double | Kind::Bool | Kind::String)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar payload accepted by [`Session::create_scalar`](crate::Session::create_scalar).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Long(i64),
    Double(f64),
    Bool(bool),
    String(String),
}

impl Scalar {
    pub fn kind(&self) -> Kind {
        match self {
            Scalar::Long(_) => Kind::Long,
            Scalar::Double(_) => Kind::Double,
            Scalar::Bool(_) => Kind::Bool,
            Scalar::String(_) => Kind::String,
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Long(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Long(v.into())
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Double(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::String(v)
    }
}
