//! In-memory keyed tables.
//!
//! A [`Table`] is a named, row-oriented collection of [`Value`] cells with a
//! header of column names. Key columns (`pid`, `lid`, ...) must hold integers;
//! every other column is carried through the pipeline as an opaque payload.
//! A field read from CSV is only typed as a number when writing it back gives
//! the same text; anything else (`"02134"`, `"3.0"`, `" 7"`) stays text and is
//! converted on demand by [`Value::as_int`] and [`Value::as_f64`].

pub mod store;

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

pub use store::{FieldRole, TableMetadata, TableStore};

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Parse a raw field. Empty is Null; integers and floats are typed only
    /// when their canonical rendering is the field itself, otherwise the text
    /// is kept verbatim.
    pub fn parse(field: &str) -> Value {
        if field.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = field.parse::<i64>() {
            if i.to_string() == field {
                return Value::Int(i);
            }
        }
        if let Ok(f) = field.parse::<f64>() {
            if f.is_finite() && f.to_string() == field {
                return Value::Float(f);
            }
        }
        Value::Text(field.to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            // Float columns with integral values show up after a pandas round trip
            Value::Float(f) => float_as_int(*f),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(float_as_int))
            }
            Value::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used for sorting: Null < numbers < text. Numeric text
    /// compares as the number it spells.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => match (a, b) {
                    (Value::Text(x), Value::Text(y)) => x.cmp(y),
                    _ => Ordering::Equal,
                },
            },
        }
    }
}

fn float_as_int(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, checking every row against the header width.
    pub fn from_rows(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        let name = name.into();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(Error::domain(format!(
                "{}: row {} has {} fields, header has {}",
                name,
                i,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { name, columns, rows })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_parts(self) -> (String, Vec<String>, Vec<Row>) {
        (self.name, self.columns, self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::domain(format!("table '{}' has no column '{}'", self.name, name)))
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::domain(format!(
                "{}: row has {} fields, header has {}",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        &self.rows[row][column]
    }

    /// Read an integer cell, failing on Null or non-integral values.
    pub fn int_at(&self, row: usize, column: usize) -> Result<i64> {
        self.rows[row][column].as_int().ok_or_else(|| {
            Error::domain(format!(
                "{}.{} row {}: expected integer, found '{}'",
                self.name, self.columns[column], row, self.rows[row][column]
            ))
        })
    }

    pub fn int_column(&self, name: &str) -> Result<Vec<i64>> {
        let idx = self.column_index(name)?;
        (0..self.rows.len()).map(|r| self.int_at(r, idx)).collect()
    }

    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row[idx].as_f64().ok_or_else(|| {
                    Error::domain(format!(
                        "{}.{} row {}: expected number, found '{}'",
                        self.name, name, r, row[idx]
                    ))
                })
            })
            .collect()
    }

    /// Replace a column's values, appending the column if it does not exist yet.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(Error::cardinality(
                format!("{}.{} assignment", self.name, name),
                self.rows.len(),
                values.len(),
            ));
        }
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let idx = self.column_index(name)?;
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        Ok(())
    }

    pub fn drop_columns_if_present(&mut self, names: &[&str]) {
        for name in names {
            if let Some(idx) = self.columns.iter().position(|c| c == name) {
                self.columns.remove(idx);
                for row in &mut self.rows {
                    row.remove(idx);
                }
            }
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.column_index(from)?;
        if from != to && self.has_column(to) {
            return Err(Error::domain(format!(
                "table '{}' already has a column '{}'",
                self.name, to
            )));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// New table whose row `i` is this table's row `order[i]`.
    pub fn take_rows(&self, order: &[usize]) -> Result<Table> {
        let mut rows = Vec::with_capacity(order.len());
        for &old in order {
            let row = self.rows.get(old).ok_or_else(|| {
                Error::domain(format!(
                    "{}: row index {} out of range (len {})",
                    self.name,
                    old,
                    self.rows.len()
                ))
            })?;
            rows.push(row.clone());
        }
        Ok(Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Row positions in the stable order given by `keys`.
    pub fn sorted_order(&self, keys: &[&str], descending: bool) -> Result<Vec<usize>> {
        let idx = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let ord = idx
                .iter()
                .map(|&c| self.rows[a][c].total_cmp(&self.rows[b][c]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(order)
    }

    pub fn sort_by_columns(&mut self, keys: &[&str]) -> Result<()> {
        let order = self.sorted_order(keys, false)?;
        let mut taken: Vec<Option<Row>> = std::mem::take(&mut self.rows).into_iter().map(Some).collect();
        self.rows = order
            .into_iter()
            .map(|i| taken[i].take().unwrap_or_default())
            .collect();
        Ok(())
    }

    /// Append the rows of `other`, which must share this table's header.
    pub fn extend(&mut self, other: Table) -> Result<()> {
        if other.columns != self.columns {
            return Err(Error::domain(format!(
                "cannot concatenate '{}' onto '{}': headers differ",
                other.name, self.name
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Projection onto the named columns, in the given order.
    pub fn select(&self, columns: &[&str]) -> Result<Table> {
        let idx = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Table {
            name: self.name.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }
}

/// Integer-only table, used for remap tables and in tests.
pub fn int_table(name: &str, columns: &[&str], rows: &[&[i64]]) -> Table {
    Table {
        name: name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|r| r.iter().map(|&v| Value::Int(v)).collect())
            .collect(),
    }
}
