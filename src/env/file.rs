// proctalk/src/env/file.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Flat-file format for [`EnvironmentVarSet`].
//!
//! One variable per line: `type,category,name,defined[,value]`. A `#` starts a comment
//! that runs to the end of the line. Blank and malformed lines are skipped; malformed
//! ones produce an [`EnvLoadWarning`] instead of failing the whole load.

use std::fmt;
use std::path::Path;

use crate::error::{ProctalkError, Result as ProctalkResult};

use super::{EnvVar, EnvironmentVarSet, VarType};

const FILE_HEADER: &str = "# type,category,name,defined,value\n";

/// Non-fatal problems found while reading an environment file.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvLoadWarning {
    /// The line does not have the four mandatory fields.
    MissingFields { line: usize, found: usize },

    /// The type column is not one of the known type names or synonyms.
    UnknownType { line: usize, type_name: String },

    /// The defined column is not a boolean.
    InvalidDefinedFlag { line: usize, text: String },

    /// The value does not parse as the declared type.
    ValueError { line: usize, error: String },

    /// The variable name is empty or was already used earlier in the file.
    Rejected { line: usize, error: String },
}

impl fmt::Display for EnvLoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvLoadWarning::MissingFields { line, found } => {
                write!(f, "line {}: expected at least 4 fields, found {}", line, found)
            }
            EnvLoadWarning::UnknownType { line, type_name } => {
                write!(f, "line {}: unknown variable type '{}'", line, type_name)
            }
            EnvLoadWarning::InvalidDefinedFlag { line, text } => {
                write!(f, "line {}: defined flag '{}' is not a boolean", line, text)
            }
            EnvLoadWarning::ValueError { line, error } => {
                write!(f, "line {}: {}", line, error)
            }
            EnvLoadWarning::Rejected { line, error } => {
                write!(f, "line {}: {}", line, error)
            }
        }
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<Option<EnvVar>, EnvLoadWarning> {
    let content = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    if content.trim().is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = content.splitn(5, ',').collect();
    if fields.len() < 4 {
        return Err(EnvLoadWarning::MissingFields {
            line: line_no,
            found: fields.len(),
        });
    }

    let var_type = VarType::parse(fields[0]).map_err(|_| EnvLoadWarning::UnknownType {
        line: line_no,
        type_name: fields[0].trim().to_string(),
    })?;
    let category = fields[1].trim();
    let name = fields[2].trim();
    let defined = parse_flag(fields[3]).ok_or_else(|| EnvLoadWarning::InvalidDefinedFlag {
        line: line_no,
        text: fields[3].trim().to_string(),
    })?;

    let raw_value = fields.get(4).map(|v| v.trim()).filter(|v| !v.is_empty());
    let value = match raw_value {
        Some(raw) => Some(var_type.parse_value(raw).map_err(|e| EnvLoadWarning::ValueError {
            line: line_no,
            error: e.to_string(),
        })?),
        None if defined && matches!(var_type, VarType::String | VarType::Path) => {
            Some(crate::message::Value::String(String::new()))
        }
        None if defined => {
            return Err(EnvLoadWarning::ValueError {
                line: line_no,
                error: format!("defined {} variable '{}' has no value", var_type, name),
            })
        }
        None => None,
    };

    Ok(Some(EnvVar::new(category, name, var_type, defined, value)))
}

/// Parses the whole file content. Never fails; problems come back as warnings.
pub fn parse_str(content: &str) -> (EnvironmentVarSet, Vec<EnvLoadWarning>) {
    let mut set = EnvironmentVarSet::new();
    let mut warnings = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        match parse_line(line_no, line) {
            Ok(Some(var)) => {
                if let Err(e) = set.insert(var) {
                    warnings.push(EnvLoadWarning::Rejected {
                        line: line_no,
                        error: e.to_string(),
                    });
                }
            }
            Ok(None) => {}
            Err(warning) => warnings.push(warning),
        }
    }

    (set, warnings)
}

/// Renders a set in the flat-file format.
pub fn render(set: &EnvironmentVarSet) -> String {
    let mut out = String::from(FILE_HEADER);
    for var in set.iter() {
        out.push_str(&format!(
            "{},{},{},{}",
            var.var_type, var.category, var.name, var.defined
        ));
        if let Some(value) = &var.value {
            out.push(',');
            out.push_str(&value.to_string());
        }
        out.push('\n');
    }
    out
}

/// Reads an environment file, logging every skipped line.
pub async fn load_file(path: &Path) -> ProctalkResult<(EnvironmentVarSet, Vec<EnvLoadWarning>)> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProctalkError::io_with_path(path.to_path_buf(), e))?;
    let (set, warnings) = parse_str(&content);
    for warning in &warnings {
        tracing::warn!("Skipping entry in {:?}: {}", path, warning);
    }
    tracing::debug!("Loaded {} environment variables from {:?}", set.len(), path);
    Ok((set, warnings))
}

pub async fn write_file(path: &Path, set: &EnvironmentVarSet) -> ProctalkResult<()> {
    tokio::fs::write(path, render(set))
        .await
        .map_err(|e| ProctalkError::io_with_path(path.to_path_buf(), e))
}
