//! Named string transforms applied by literal `| filter` stages.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::schema::FilterCall;

/// A pure transform of an extracted value, given the stage's arguments.
pub type FilterFn = Rc<dyn Fn(&str, &[String]) -> String>;

/// Filter table, fixed at construction time.
#[derive(Clone, Default)]
pub struct Filters {
    table: HashMap<String, FilterFn>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in set: `trim`, `reverse`, `slice`, `lowercase`,
    /// `uppercase`, `replace`, `collapse`.
    pub fn standard() -> Self {
        Self::new()
            .with("trim", |v, _| v.trim().to_string())
            .with("reverse", |v, _| v.chars().rev().collect())
            .with("slice", slice)
            .with("lowercase", |v, _| v.to_lowercase())
            .with("uppercase", |v, _| v.to_uppercase())
            .with("replace", |v, args| match args {
                [from, to, ..] => v.replace(from.as_str(), to),
                [from] => v.replace(from.as_str(), ""),
                [] => v.to_string(),
            })
            .with("collapse", |v, _| v.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &[String]) -> String + 'static,
    {
        self.insert(name, f);
        self
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str, &[String]) -> String + 'static,
    {
        self.table.insert(name.into(), Rc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.table.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The first stage whose filter is not registered.
    pub fn first_unknown<'a>(&self, calls: &'a [FilterCall]) -> Option<&'a FilterCall> {
        calls.iter().find(|c| !self.contains(&c.name))
    }

    /// Run `calls` over `value`, strictly left to right.
    pub fn apply(&self, value: String, calls: &[FilterCall]) -> Result<String> {
        calls.iter().try_fold(value, |acc, call| {
            let f = self
                .table
                .get(&call.name)
                .ok_or_else(|| Error::UnknownFilter(call.name.clone()))?;
            Ok(f(&acc, &call.args))
        })
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// `slice:n` keeps the first `n` characters; `slice:start,end` keeps
/// `[start, end)`. Character based, never splits a code point.
fn slice(value: &str, args: &[String]) -> String {
    let parse = |s: &String| s.trim().parse::<usize>().ok();
    let (start, end) = match args {
        [n] => (0, parse(n)),
        [start, end, ..] => (parse(start).unwrap_or(0), parse(end)),
        [] => (0, None),
    };
    let chars = value.chars().skip(start);
    match end {
        Some(end) => chars.take(end.saturating_sub(start)).collect(),
        None => chars.collect(),
    }
}
