//! Value-extraction façade (`spec.md` §4.8): the contract the index
//! invokes on its column collaborator to populate bitvectors during build
//! and to run residual scans.

use crate::error::Result;
use crate::predicate::Scalar;

/// Typed column values, one entry per row, in row order. Populated by
/// [`ValueSource::get_values_array`] — position `i` of the array
/// corresponds to row `i` of every bitvector the index produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int(v) => v.len(),
            ColumnValues::UInt(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_at(&self, i: usize) -> Scalar {
        match self {
            ColumnValues::Int(v) => Scalar::Int(v[i]),
            ColumnValues::UInt(v) => Scalar::UInt(v[i]),
            ColumnValues::Float(v) => Scalar::Float(v[i]),
            ColumnValues::Text(v) => Scalar::Text(v[i].clone()),
        }
    }
}

/// The collaborator contract an encoding needs from its column/table
/// during build and during a residual scan.
pub trait ValueSource {
    /// Returns every row's value, in row order. The length must equal the
    /// column's declared row count `N`.
    fn get_values_array(&self) -> Result<ColumnValues>;

    /// Raw bytes for row `i` of a categorical/text column. Only called for
    /// `ColumnType::ShortString`/`ColumnType::Keyword` columns.
    fn get_string(&self, i: usize) -> Result<Vec<u8>>;
}

/// An in-memory [`ValueSource`] over an already-materialized array —
/// what the build path and tests use instead of a live table cursor.
pub struct ArrayValueSource {
    values: ColumnValues,
}

impl ArrayValueSource {
    pub fn new(values: ColumnValues) -> Self {
        Self { values }
    }
}

impl ValueSource for ArrayValueSource {
    fn get_values_array(&self) -> Result<ColumnValues> {
        Ok(self.values.clone())
    }

    fn get_string(&self, i: usize) -> Result<Vec<u8>> {
        match &self.values {
            ColumnValues::Text(v) => Ok(v[i].clone().into_bytes()),
            other => Ok(other.scalar_at(i).as_f64().to_string().into_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_value_source_round_trips_values() {
        let src = ArrayValueSource::new(ColumnValues::Int(vec![1, 2, 3]));
        let got = src.get_values_array().unwrap();
        assert_eq!(got, ColumnValues::Int(vec![1, 2, 3]));
    }

    #[test]
    fn array_value_source_exposes_text_bytes() {
        let src = ArrayValueSource::new(ColumnValues::Text(vec!["hello".into(), "world".into()]));
        assert_eq!(src.get_string(1).unwrap(), b"world".to_vec());
    }
}
