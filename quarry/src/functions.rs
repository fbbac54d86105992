//! The scalar function registry and virtual table providers, both
//! per-connection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::schema::Table;
use crate::types::{Datum, Value};

pub type ScalarFunction = Arc<dyn Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync>;

/// The shape a registered function is looked up under. A `None` arity
/// accepts any argument count.
#[derive(Debug, Clone)]
pub struct FunctionPrototype {
    pub name: String,
    pub arity: Option<usize>,
}

impl FunctionPrototype {
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: name.to_uppercase(),
            arity: Some(arity),
        }
    }

    pub fn variadic(name: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            arity: None,
        }
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, (Option<usize>, ScalarFunction)>,
}

impl FunctionRegistry {
    /// A registry pre-loaded with the built-in scalars.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(
            FunctionPrototype::new("ABS", 1),
            Arc::new(|args| {
                Ok(match args[0].as_number() {
                    Some(n) => Value::double(n.abs()),
                    None => Value::null(args[0].sql_type),
                })
            }),
        );
        registry.register(
            FunctionPrototype::new("UPPER", 1),
            Arc::new(|args| {
                Ok(match &args[0].datum {
                    Datum::Text(s) => Value::text(s.to_uppercase()),
                    _ => Value::null(args[0].sql_type),
                })
            }),
        );
        registry.register(
            FunctionPrototype::new("LOWER", 1),
            Arc::new(|args| {
                Ok(match &args[0].datum {
                    Datum::Text(s) => Value::text(s.to_lowercase()),
                    _ => Value::null(args[0].sql_type),
                })
            }),
        );
        registry.register(
            FunctionPrototype::new("LENGTH", 1),
            Arc::new(|args| {
                Ok(match &args[0].datum {
                    Datum::Text(s) => Value::integer(s.chars().count() as i64),
                    _ => Value::null(args[0].sql_type),
                })
            }),
        );
        registry.register(
            FunctionPrototype::variadic("COALESCE"),
            Arc::new(|args| {
                Ok(args
                    .iter()
                    .find(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| Value::null(crate::types::SqlType::Integer)))
            }),
        );
        registry
    }

    pub fn register(&mut self, prototype: FunctionPrototype, function: ScalarFunction) {
        self.functions
            .insert(prototype.name, (prototype.arity, function));
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        let folded = name.to_uppercase();
        let (arity, function) = self
            .functions
            .get(&folded)
            .ok_or_else(|| EngineError::UndefinedFunction(folded.clone()))?;
        if let Some(expected) = arity {
            if *expected != args.len() {
                return Err(EngineError::UndefinedFunction(format!(
                    "{folded}/{}",
                    args.len()
                )));
            }
        }
        function(args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_uppercase())
    }
}

/// Supplies the rows of a virtual table on every scan.
pub trait VirtualTableProvider: Send + Sync {
    fn rows(&self) -> Vec<Vec<Value>>;
}

impl<F> VirtualTableProvider for F
where
    F: Fn() -> Vec<Vec<Value>> + Send + Sync,
{
    fn rows(&self) -> Vec<Vec<Value>> {
        self()
    }
}

/// A registered virtual table: the schema declared by its CREATE TABLE text
/// plus the provider that materializes rows. Readable by SELECT, rejected
/// for DML.
pub struct VirtualTable {
    pub table: Table,
    pub provider: Arc<dyn VirtualTableProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_callable() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.call("abs", &[Value::integer(-3)]).unwrap();
        assert_eq!(result.as_number(), Some(3.0));

        let result = registry.call("UPPER", &[Value::text("abc")]).unwrap();
        assert_eq!(result.to_string(), "ABC");
    }

    #[test]
    fn unknown_function_reports_42883() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.call("NOPE", &[]).unwrap_err();
        assert_eq!(err.sqlstate(), "42883");
    }

    #[test]
    fn arity_mismatch_is_undefined_function() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry
            .call("ABS", &[Value::integer(1), Value::integer(2)])
            .unwrap_err();
        assert_eq!(err.sqlstate(), "42883");
    }

    #[test]
    fn coalesce_takes_first_non_null() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry
            .call(
                "COALESCE",
                &[
                    Value::null(crate::types::SqlType::Integer),
                    Value::integer(4),
                ],
            )
            .unwrap();
        assert_eq!(result.as_number(), Some(4.0));
    }
}
