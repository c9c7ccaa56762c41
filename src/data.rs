use crate::curve::DcaError;
use ndarray::{Array1, ArrayView1, Axis};

/// Immutable named-column observation set.
///
/// Columns are `f64` with NaN encoding a missing value. All curve estimation
/// runs against one `CohortData`; resamples and folds are materialized as new
/// instances via [`CohortData::select_rows`], so no view ever outlives or
/// mutates the original.
#[derive(Debug, Clone)]
pub struct CohortData {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
    n_rows: usize,
}

impl CohortData {
    /// Build from `(name, values)` pairs. All columns must be non-empty and
    /// of equal length, with no duplicate names.
    pub fn new(columns: Vec<(String, Vec<f64>)>) -> Result<Self, DcaError> {
        if columns.is_empty() {
            return Err(DcaError::InvalidInput(
                "observation set must have at least one column".to_string(),
            ));
        }
        let n_rows = columns[0].1.len();
        if n_rows == 0 {
            return Err(DcaError::InvalidInput(
                "observation set must have at least one row".to_string(),
            ));
        }
        let mut names = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != n_rows {
                return Err(DcaError::InvalidInput(format!(
                    "column '{}' has {} rows but '{}' has {}",
                    name,
                    values.len(),
                    names.first().map(String::as_str).unwrap_or(""),
                    n_rows
                )));
            }
            if names.contains(&name) {
                return Err(DcaError::InvalidInput(format!(
                    "duplicate column name '{name}'"
                )));
            }
            names.push(name);
            arrays.push(Array1::from_vec(values));
        }
        Ok(Self {
            names,
            columns: arrays,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].view())
    }

    /// Materialize the rows at `indices` (repeats allowed) as a new set.
    pub fn select_rows(&self, indices: &[usize]) -> CohortData {
        let columns = self
            .columns
            .iter()
            .map(|col| col.select(Axis(0), indices))
            .collect();
        CohortData {
            names: self.names.clone(),
            columns,
            n_rows: indices.len(),
        }
    }

    /// Drop every row with a NaN in any of the `referenced` columns and
    /// return the cleaned set together with the number of removed rows.
    ///
    /// Columns not named in `referenced` are kept as-is (their NaNs are not
    /// consulted); callers resolve column presence before calling.
    pub fn drop_incomplete(&self, referenced: &[String]) -> (CohortData, usize) {
        let checked: Vec<&Array1<f64>> = self
            .names
            .iter()
            .zip(&self.columns)
            .filter(|(name, _)| referenced.iter().any(|r| r == *name))
            .map(|(_, col)| col)
            .collect();
        let keep: Vec<usize> = (0..self.n_rows)
            .filter(|&i| checked.iter().all(|col| !col[i].is_nan()))
            .collect();
        let dropped = self.n_rows - keep.len();
        if dropped == 0 {
            return (self.clone(), 0);
        }
        (self.select_rows(&keep), dropped)
    }

    /// Check that every value of `name` is exactly 0.0 or 1.0.
    pub fn validate_outcome(&self, name: &str) -> Result<(), DcaError> {
        let col = self.column(name).ok_or_else(|| DcaError::MissingVariable {
            name: name.to_string(),
        })?;
        for (i, &v) in col.iter().enumerate() {
            if v != 0.0 && v != 1.0 {
                return Err(DcaError::InvalidInput(format!(
                    "outcome column '{name}' must be coded 0/1, found {v} at row {i}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> CohortData {
        CohortData::new(vec![
            ("d".to_string(), vec![1.0, 0.0, 1.0, 0.0]),
            ("x".to_string(), vec![0.5, f64::NAN, 2.0, -1.0]),
            ("z".to_string(), vec![f64::NAN, 1.0, 1.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_and_duplicate_columns() {
        let ragged = CohortData::new(vec![
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![1.0]),
        ]);
        assert!(ragged.is_err());

        let dup = CohortData::new(vec![
            ("a".to_string(), vec![1.0]),
            ("a".to_string(), vec![2.0]),
        ]);
        assert!(dup.is_err());

        assert!(CohortData::new(vec![]).is_err());
        assert!(CohortData::new(vec![("a".to_string(), vec![])]).is_err());
    }

    #[test]
    fn drop_incomplete_only_consults_referenced_columns() {
        let data = toy();
        // Only 'x' referenced: row 1 goes, row 0's NaN in 'z' stays.
        let (clean, dropped) = data.drop_incomplete(&["d".to_string(), "x".to_string()]);
        assert_eq!(dropped, 1);
        assert_eq!(clean.n_rows(), 3);
        assert!(clean.column("z").unwrap()[0].is_nan());

        let (all, none_dropped) = data.drop_incomplete(&["d".to_string()]);
        assert_eq!(none_dropped, 0);
        assert_eq!(all.n_rows(), 4);
    }

    #[test]
    fn select_rows_gathers_with_repeats() {
        let data = toy();
        let picked = data.select_rows(&[2, 2, 0]);
        assert_eq!(picked.n_rows(), 3);
        let x = picked.column("x").unwrap();
        assert_eq!(x[0], 2.0);
        assert_eq!(x[1], 2.0);
        assert_eq!(x[2], 0.5);
    }

    #[test]
    fn outcome_must_be_binary() {
        let data = CohortData::new(vec![("d".to_string(), vec![0.0, 1.0, 0.5])]).unwrap();
        assert!(data.validate_outcome("d").is_err());
        let ok = CohortData::new(vec![("d".to_string(), vec![0.0, 1.0, 1.0])]).unwrap();
        assert!(ok.validate_outcome("d").is_ok());
    }
}
