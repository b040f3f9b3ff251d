//! Column names relative to a beam group

use crate::error::{Result, SubsetError};
use std::fmt;
use std::str::FromStr;

/// A requested column: a dataset path under the beam group, optionally
/// narrowed to one component of a 2D dataset
///
/// `geolocation.sensitivity_a2` and `geolocation/sensitivity_a2` are the
/// same column; the slash form is canonical. A trailing `[i]` picks
/// component `i` of each sample (negative `i` counts from the end).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    path: String,
    component: Option<i64>,
}

impl ColumnSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SubsetError::InvalidColumn("empty column name".to_string()));
        }

        let (path, component) = split_component(raw)?;
        let path = normalize_path(path);

        if path.split('/').any(str::is_empty) {
            return Err(SubsetError::InvalidColumn(format!(
                "{} has an empty path segment",
                raw
            )));
        }
        if let Some(c) = path.chars().find(|c| c.is_whitespace() || "[]`'\"".contains(*c)) {
            return Err(SubsetError::InvalidColumn(format!(
                "{} contains {:?}",
                raw, c
            )));
        }

        Ok(Self { path, component })
    }

    /// Comma-separated list, blanks ignored
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        text.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Dataset path relative to the beam group, in slash form
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn component(&self) -> Option<i64> {
        self.component
    }

    /// Output column name
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Some(i) => write!(f, "{}[{}]", self.path, i),
            None => f.write_str(&self.path),
        }
    }
}

impl FromStr for ColumnSpec {
    type Err = SubsetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Rewrite dotted names to slash form
pub fn normalize_path(name: &str) -> String {
    name.trim().replace('.', "/")
}

fn split_component(raw: &str) -> Result<(&str, Option<i64>)> {
    let Some(stripped) = raw.strip_suffix(']') else {
        return Ok((raw, None));
    };

    let open = stripped.rfind('[').ok_or_else(|| {
        SubsetError::InvalidColumn(format!("{} has an unmatched ']'", raw))
    })?;
    let index = stripped[open + 1..].trim();
    let component = index.parse::<i64>().map_err(|_| {
        SubsetError::InvalidColumn(format!(
            "{}: component index must be an integer, found {:?}",
            raw, index
        ))
    })?;

    Ok((&stripped[..open], Some(component)))
}
