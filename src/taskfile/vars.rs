//! Variables and ordered variable maps
//!
//! Declaration order matters: later entries may reference earlier ones, and
//! dynamic evaluation order must be deterministic. `Vars` therefore keeps
//! insertion order, unlike a plain `HashMap`.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single variable definition
///
/// Exactly one resolution form is populated: a literal value, a reference to
/// another variable, or a dynamic specification whose value is the trimmed
/// stdout of a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Var {
    /// Literal value (may contain `${...}` references)
    Value(String),

    /// Reference to another variable by name
    Ref {
        #[serde(rename = "ref")]
        reference: String,
    },

    /// Shell-derived value with an optional working directory
    Dynamic {
        sh: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<String>,
    },
}

impl Var {
    /// Create a literal variable
    pub fn value(value: impl Into<String>) -> Self {
        Var::Value(value.into())
    }

    /// Create a dynamic variable
    pub fn dynamic(sh: impl Into<String>) -> Self {
        Var::Dynamic {
            sh: sh.into(),
            dir: None,
        }
    }

    /// The literal value, if this variable has been resolved to one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Var::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Check if this variable requires shell evaluation
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Var::Dynamic { .. })
    }
}

impl From<&str> for Var {
    fn from(value: &str) -> Self {
        Var::Value(value.to_string())
    }
}

impl From<String> for Var {
    fn from(value: String) -> Self {
        Var::Value(value)
    }
}

/// An insertion-ordered mapping of variable name to definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(Vec<(String, Var)>);

impl Vars {
    /// Create an empty variable map
    pub fn new() -> Self {
        Vars(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get a variable by name
    pub fn get(&self, name: &str) -> Option<&Var> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a variable's literal value by name
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Var::as_str)
    }

    /// Set a variable
    ///
    /// Replacing an existing name keeps its position; new names append.
    pub fn set(&mut self, name: impl Into<String>, var: Var) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = var,
            None => self.0.push((name, var)),
        }
    }

    /// Set a variable to a literal value
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, Var::Value(value.into()));
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Var)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Merge another map into this one, in the other map's order
    pub fn merge(&mut self, other: &Vars) {
        for (name, var) in other.iter() {
            self.set(name, var.clone());
        }
    }
}

impl FromIterator<(String, Var)> for Vars {
    fn from_iter<T: IntoIterator<Item = (String, Var)>>(iter: T) -> Self {
        let mut vars = Vars::new();
        for (name, var) in iter {
            vars.set(name, var);
        }
        vars
    }
}

// Serialized as a document mapping; deserialization preserves document order.
impl Serialize for Vars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, var) in &self.0 {
            map.serialize_entry(name, var)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Vars {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VarsVisitor;

        impl<'de> Visitor<'de> for VarsVisitor {
            type Value = Vars;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of variable names to definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Vars, A::Error> {
                let mut vars = Vars::new();
                while let Some((name, var)) = access.next_entry::<String, Var>()? {
                    vars.set(name, var);
                }
                Ok(vars)
            }
        }

        deserializer.deserialize_map(VarsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut vars = Vars::new();
        vars.set_value("b", "1");
        vars.set_value("a", "2");
        vars.set_value("c", "3");

        let names: Vec<&str> = vars.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut vars = Vars::new();
        vars.set_value("first", "1");
        vars.set_value("second", "2");
        vars.set_value("first", "changed");

        let names: Vec<&str> = vars.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(vars.get_value("first"), Some("changed"));
    }

    #[test]
    fn test_get_value_only_for_literals() {
        let mut vars = Vars::new();
        vars.set("dyn", Var::dynamic("echo hi"));
        vars.set_value("lit", "value");

        assert_eq!(vars.get_value("dyn"), None);
        assert_eq!(vars.get_value("lit"), Some("value"));
        assert!(vars.get("dyn").unwrap().is_dynamic());
    }

    #[test]
    fn test_merge_appends_and_overrides() {
        let mut base = Vars::new();
        base.set_value("a", "1");
        base.set_value("b", "2");

        let mut overlay = Vars::new();
        overlay.set_value("b", "two");
        overlay.set_value("c", "3");

        base.merge(&overlay);
        let entries: Vec<(&str, &str)> = base
            .iter()
            .map(|(n, v)| (n, v.as_str().unwrap()))
            .collect();
        assert_eq!(entries, vec![("a", "1"), ("b", "two"), ("c", "3")]);
    }

    #[test]
    fn test_deserialize_var_forms() {
        let literal: Var = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(literal, Var::Value("plain".to_string()));

        let reference: Var = serde_json::from_str(r#"{"ref": "OTHER"}"#).unwrap();
        assert_eq!(
            reference,
            Var::Ref {
                reference: "OTHER".to_string()
            }
        );

        let dynamic: Var = serde_json::from_str(r#"{"sh": "git rev-parse HEAD"}"#).unwrap();
        assert!(dynamic.is_dynamic());
    }

    #[test]
    fn test_deserialize_preserves_document_order() {
        let vars: Vars = serde_json::from_str(r#"{"z": "1", "a": "2", "m": "3"}"#).unwrap();
        let names: Vec<&str> = vars.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
