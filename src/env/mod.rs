// proctalk/src/env/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Categorized, typed environment variables fed into launched processes.
//!
//! Variable names are unique across the whole set, regardless of category. A variable
//! whose `defined` flag is off is actively removed from a launched process's environment
//! rather than inherited.

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

use crate::message::Value;

mod file;

pub use file::{load_file, parse_str, render, write_file, EnvLoadWarning};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    #[error("variable '{name}' is already defined in category '{category}'")]
    DuplicateVariable { name: String, category: String },

    #[error("unknown variable type '{0}'")]
    UnknownType(String),

    #[error("value '{value}' is not a valid {var_type}")]
    InvalidValue { value: String, var_type: VarType },

    #[error("variable name must not be empty")]
    EmptyName,
}

/// Declared type of an environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Boolean,
    Integer,
    Double,
    String,
    Path,
}

impl VarType {
    /// Resolves a type name or one of its synonyms, case-insensitively.
    pub fn parse(text: &str) -> Result<VarType, EnvError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" | "flag" => Ok(VarType::Boolean),
            "integer" | "int" | "long" | "number" => Ok(VarType::Integer),
            "double" | "float" | "real" | "decimal" => Ok(VarType::Double),
            "string" | "str" | "text" => Ok(VarType::String),
            "path" | "file" | "dir" | "directory" => Ok(VarType::Path),
            _ => Err(EnvError::UnknownType(text.trim().to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VarType::Boolean => "boolean",
            VarType::Integer => "integer",
            VarType::Double => "double",
            VarType::String => "string",
            VarType::Path => "path",
        }
    }

    /// Parses raw text into a value of this type.
    pub fn parse_value(&self, raw: &str) -> Result<Value, EnvError> {
        let raw = raw.trim();
        let invalid = || EnvError::InvalidValue {
            value: raw.to_string(),
            var_type: *self,
        };
        match self {
            VarType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
            VarType::Integer => raw.parse::<i64>().map(Value::Integer).map_err(|_| invalid()),
            VarType::Double => raw.parse::<f64>().map(Value::Float).map_err(|_| invalid()),
            VarType::String | VarType::Path => Ok(Value::String(raw.to_string())),
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named, typed variable.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvVar {
    pub category: String,
    pub name: String,
    pub var_type: VarType,
    pub defined: bool,
    pub value: Option<Value>,
}

impl EnvVar {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        var_type: VarType,
        defined: bool,
        value: Option<Value>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            var_type,
            defined,
            value,
        }
    }

    /// The text written into a process environment.
    pub fn value_text(&self) -> String {
        self.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }
}

/// An ordered set of variables, unique by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentVarSet {
    vars: IndexMap<String, EnvVar>,
}

impl EnvironmentVarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable; a name already present in any category is rejected.
    pub fn insert(&mut self, var: EnvVar) -> Result<(), EnvError> {
        if var.name.trim().is_empty() {
            return Err(EnvError::EmptyName);
        }
        if let Some(existing) = self.vars.get(&var.name) {
            return Err(EnvError::DuplicateVariable {
                name: var.name.clone(),
                category: existing.category.clone(),
            });
        }
        self.vars.insert(var.name.clone(), var);
        Ok(())
    }

    /// Replaces (or adds) a variable by name, keeping its position if present.
    pub fn upsert(&mut self, var: EnvVar) {
        self.vars.insert(var.name.clone(), var);
    }

    pub fn remove(&mut self, name: &str) -> Option<EnvVar> {
        self.vars.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&EnvVar> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.vars.values()
    }

    /// Distinct category names, in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for var in self.vars.values() {
            if !seen.contains(&var.category.as_str()) {
                seen.push(&var.category);
            }
        }
        seen
    }

    /// Read view over the variables of one category.
    pub fn category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a EnvVar> + 'a {
        self.vars.values().filter(move |v| v.category == category)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Environment edits for a process launch: `Some(value)` sets, `None` removes.
    pub fn materialize(&self) -> Vec<(String, Option<String>)> {
        self.vars
            .values()
            .map(|v| {
                let value = if v.defined { Some(v.value_text()) } else { None };
                (v.name.clone(), value)
            })
            .collect()
    }

    /// Writes every variable into `command`'s environment.
    pub fn apply_to(&self, command: &mut tokio::process::Command) {
        for (name, value) in self.materialize() {
            match value {
                Some(value) => {
                    command.env(&name, value);
                }
                None => {
                    command.env_remove(&name);
                }
            }
        }
    }
}
