use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::error::{CoreError, Result};

/// Substrings that mark a column as a measurement (intensity, TIC, median, weighted m/z).
pub const MEASUREMENT_MARKERS: [&str; 4] = ["int", "tic", "median", "weight_mz"];

/// A named numeric column, `None` marks a missing value.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: &str, values: Vec<Option<f64>>) -> Self {
        Column { name: name.to_string(), values }
    }

    /// Column without missing values.
    pub fn from_values(name: &str, values: &[f64]) -> Self {
        Column::new(name, values.iter().map(|&v| Some(v)).collect())
    }

    pub fn is_measurement(&self) -> bool {
        is_measurement_column(&self.name)
    }
}

/// Whether a column name carries one of the [`MEASUREMENT_MARKERS`].
///
/// Markers match case-sensitively, so the joined `TIC` column is not a measurement.
pub fn is_measurement_column(name: &str) -> bool {
    MEASUREMENT_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Whether a column name holds a compound intensity.
pub fn is_intensity_column(name: &str) -> bool {
    name.contains("int")
}

/// Column-oriented per-spot table: spot names plus numeric columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasurementFrame {
    pub spot_names: Vec<String>,
    columns: Vec<Column>,
}

impl MeasurementFrame {
    pub fn new(spot_names: Vec<String>) -> Self {
        MeasurementFrame { spot_names, columns: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.spot_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spot_names.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Values of a column; errors if the column does not exist.
    pub fn values(&self, name: &str) -> Result<&[Option<f64>]> {
        self.column(name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| CoreError::ColumnNotFound(name.to_string()))
    }

    /// Add a column, replacing one with the same name.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if column.values.len() != self.len() {
            return Err(CoreError::ColumnLength {
                name: column.name.clone(),
                expected: self.len(),
                found: column.values.len(),
            });
        }
        match self.column_mut(&column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn measurement_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_measurement())
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn intensity_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| is_intensity_column(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// New frame with rows in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> MeasurementFrame {
        MeasurementFrame {
            spot_names: rows.iter().map(|&i| self.spot_names[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: rows.iter().map(|&i| c.values[i]).collect(),
                })
                .collect(),
        }
    }

    /// New frame keeping the rows where `keep` is true.
    pub fn filter_rows(&self, keep: &[bool]) -> MeasurementFrame {
        let rows: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, &k)| k)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&rows)
    }

    /// Stable ascending sort by a numeric column, missing values last.
    pub fn sort_by_column(&self, name: &str) -> Result<MeasurementFrame> {
        let values = self.values(name)?;
        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.sort_by_key(|&i| match values[i] {
            Some(v) if !v.is_nan() => (0, OrderedFloat(v)),
            _ => (1, OrderedFloat(0.0)),
        });
        Ok(self.take_rows(&rows))
    }

    /// Inner join on spot name. Rows follow `self`; unmatched rows are dropped.
    pub fn inner_join(&self, other: &MeasurementFrame) -> Result<MeasurementFrame> {
        let index: HashMap<&str, usize> = other
            .spot_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for (i, name) in self.spot_names.iter().enumerate() {
            if let Some(&j) = index.get(name.as_str()) {
                left_rows.push(i);
                right_rows.push(j);
            }
        }

        let mut joined = self.take_rows(&left_rows);
        let right = other.take_rows(&right_rows);
        for column in right.columns {
            if joined.column(&column.name).is_none() {
                joined.push_column(column)?;
            }
        }
        Ok(joined)
    }

    /// Borrow rows `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> FrameSlice<'_> {
        FrameSlice { frame: self, start, end }
    }
}

/// Borrowed contiguous row range of a [`MeasurementFrame`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSlice<'a> {
    frame: &'a MeasurementFrame,
    start: usize,
    end: usize,
}

impl<'a> FrameSlice<'a> {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn values(&self, name: &str) -> Result<&'a [Option<f64>]> {
        let column = self.frame.values(name)?;
        Ok(&column[self.start..self.end])
    }

    /// Non-missing values of a column inside the slice.
    pub fn valid(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .values(name)?
            .iter()
            .filter_map(|v| *v)
            .filter(|v| !v.is_nan())
            .collect())
    }
}
