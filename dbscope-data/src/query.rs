use std::borrow::Cow;

/// A parameterized SQL statement with a name used for logging and tracing.
///
/// The name never influences execution.
///
/// ```ignore
/// const FIND_USER: Query = Query::new("user_repository.find", "SELECT id, name FROM users WHERE id = $1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    name: Cow<'static, str>,
    raw: Cow<'static, str>,
}

impl Query {
    pub const fn new(name: &'static str, raw: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            raw: Cow::Borrowed(raw),
        }
    }

    /// Build a query from runtime strings (e.g. generated SQL).
    pub fn owned(name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            raw: Cow::Owned(raw.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The statement text with positional placeholders.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// A positional query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Build a positional argument array.
///
/// ```ignore
/// db.exec(&scope, &INSERT_USER, &args!["alice", 42, None::<String>]).await?;
/// ```
#[macro_export]
macro_rules! args {
    () => {{
        let empty: [$crate::Value; 0] = [];
        empty
    }};
    ( $( $arg:expr ),+ $(,)? ) => {
        [ $( $crate::Value::from($arg) ),+ ]
    };
}
