//! Custom leaf types: an open extension beside the closed [`Schema`] union.
//!
//! Each entry pairs a discriminator predicate over raw JSON payloads with
//! a handler. Lookup scans entries in registration order.
//!
//! [`Schema`]: crate::schema::Schema

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::Context;
use crate::error::Result;
use crate::walker::Walker;

/// Resolves a custom payload against a document context.
///
/// `walker` carries the filter table and is the continuation for any
/// sub-schema the handler wants resolved.
#[async_trait(?Send)]
pub trait CustomType {
    async fn resolve(
        &self,
        value: &Value,
        context: Context,
        scope: Option<&str>,
        walker: &Walker,
    ) -> Result<Option<Value>>;
}

pub type Discriminator = Rc<dyn Fn(&Value) -> bool>;

/// A registered custom type.
#[derive(Clone)]
pub struct CustomTypeEntry {
    pub name: String,
    pub handler: Rc<dyn CustomType>,
    pub discriminator: Discriminator,
}

impl fmt::Debug for CustomTypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTypeEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of custom types, in registration order.
#[derive(Clone, Default, Debug)]
pub struct CustomTypes {
    entries: Vec<CustomTypeEntry>,
}

impl CustomTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Re-registering a name replaces the handler but
    /// keeps its original position.
    pub fn register<H, D>(&mut self, name: impl Into<String>, handler: H, discriminator: D)
    where
        H: CustomType + 'static,
        D: Fn(&Value) -> bool + 'static,
    {
        let entry = CustomTypeEntry {
            name: name.into(),
            handler: Rc::new(handler),
            discriminator: Rc::new(discriminator),
        };
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CustomTypeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// First entry whose discriminator accepts `value`.
    pub fn find(&self, value: &Value) -> Option<&CustomTypeEntry> {
        self.entries.iter().find(|e| (e.discriminator)(value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Constant(&'static str);

    #[async_trait(?Send)]
    impl CustomType for Constant {
        async fn resolve(
            &self,
            _value: &Value,
            _context: Context,
            _scope: Option<&str>,
            _walker: &Walker,
        ) -> Result<Option<Value>> {
            Ok(Some(Value::String(self.0.to_string())))
        }
    }

    fn tagged(tag: &'static str) -> impl Fn(&Value) -> bool {
        move |v| v.get("$type").and_then(Value::as_str) == Some(tag)
    }

    #[test]
    fn test_find_uses_registration_order() {
        let mut types = CustomTypes::new();
        types.register("first", Constant("1"), |v: &Value| v.get("$type").is_some());
        types.register("second", Constant("2"), tagged("money"));

        let payload = json!({"$type": "money"});
        assert_eq!(types.find(&payload).map(|e| e.name.as_str()), Some("first"));
        assert!(types.find(&json!("h1")).is_none());
    }

    #[test]
    fn test_get_by_name_and_replace() {
        let mut types = CustomTypes::new();
        types.register("money", Constant("a"), tagged("money"));
        types.register("date", Constant("b"), tagged("date"));
        types.register("money", Constant("c"), tagged("cash"));

        assert_eq!(types.len(), 2);
        let money = types.get("money").unwrap();
        assert!((money.discriminator)(&json!({"$type": "cash"})));
        assert!(types.get("missing").is_none());
    }
}
