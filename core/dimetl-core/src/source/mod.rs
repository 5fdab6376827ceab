//! Data sources: pull-based row producers.
//!
//! Every source implements [`DataSource`]: `next_row` hands out one row at a
//! time until it returns `Ok(None)`. Sources compose by ownership, a
//! combinator owning the boxed sources it pulls from:
//!
//! ```text
//! DelimitedSource ─┐
//!                  ├─ MergeJoinSource ─ TransformingSource ─ FilteringSource ─▶ rows()
//! DelimitedSource ─┘
//! ```
//!
//! Iteration is single-pass. `reset` rewinds a source when every source it
//! depends on can be rewound; otherwise it fails with
//! [`EtlError::NotRestartable`].

pub mod delimited;
pub mod filter;
pub mod join;
pub mod round_robin;
pub mod transform;

use crate::error::{EtlError, EtlResult};
use crate::row::Row;

pub use delimited::{CastKind, DelimitedConfig, DelimitedSource};
pub use filter::FilteringSource;
pub use join::{HashJoinSource, MergeJoinSource};
pub use round_robin::RoundRobinSource;
pub use transform::TransformingSource;

/// Pull-based producer of rows.
pub trait DataSource: Send {
    /// Next row, or `None` once the source is exhausted.
    fn next_row(&mut self) -> EtlResult<Option<Row>>;

    /// Rewind to the first row.
    fn reset(&mut self) -> EtlResult<()> {
        Err(EtlError::NotRestartable(self.describe()))
    }

    /// Short name used in logs and errors.
    fn describe(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("source")
            .to_string()
    }

    /// Adapt the source into an iterator of `EtlResult<Row>`.
    fn rows(self) -> Rows<Self>
    where
        Self: Sized,
    {
        Rows {
            source: self,
            failed: false,
        }
    }
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        (**self).next_row()
    }

    fn reset(&mut self) -> EtlResult<()> {
        (**self).reset()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Iterator over a source. Stops after the first error, which aborts the run.
pub struct Rows<S> {
    source: S,
    failed: bool,
}

impl<S> Rows<S> {
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: DataSource> Iterator for Rows<S> {
    type Item = EtlResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.source.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Rows held in memory. Restartable.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
    pos: usize,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl FromIterator<Row> for MemorySource {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl DataSource for MemorySource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn reset(&mut self) -> EtlResult<()> {
        self.pos = 0;
        Ok(())
    }
}

/// Drains its sources one after another.
pub struct UnionSource {
    sources: Vec<Box<dyn DataSource>>,
    current: usize,
}

impl UnionSource {
    pub fn new(sources: Vec<Box<dyn DataSource>>) -> Self {
        Self {
            sources,
            current: 0,
        }
    }
}

impl DataSource for UnionSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if let Some(row) = source.next_row()? {
                return Ok(Some(row));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn reset(&mut self) -> EtlResult<()> {
        for source in &mut self.sources {
            source.reset()?;
        }
        self.current = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::row::Value;

    fn ids(rows: Vec<Row>) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| r.get("id").and_then(Value::to_int))
            .collect()
    }

    #[test]
    fn test_memory_source_reset() {
        let mut src: MemorySource = (1..=3).map(|i| row! { "id" => i }).collect();
        assert_eq!(src.next_row().unwrap().unwrap().get("id"), Some(&Value::Int(1)));
        src.reset().unwrap();
        let all: Vec<Row> = src.rows().collect::<EtlResult<_>>().unwrap();
        assert_eq!(ids(all), vec![1, 2, 3]);
    }

    #[test]
    fn test_union_source_concatenates() {
        let a: MemorySource = (1..=2).map(|i| row! { "id" => i }).collect();
        let b: MemorySource = (3..=4).map(|i| row! { "id" => i }).collect();
        let union = UnionSource::new(vec![Box::new(a), Box::new(b)]);
        let all: Vec<Row> = union.rows().collect::<EtlResult<_>>().unwrap();
        assert_eq!(ids(all), vec![1, 2, 3, 4]);
    }

    struct Failing;

    impl DataSource for Failing {
        fn next_row(&mut self) -> EtlResult<Option<Row>> {
            Err(EtlError::store("connection reset"))
        }
    }

    #[test]
    fn test_rows_stops_after_error() {
        let mut rows = Failing.rows();
        assert!(rows.next().unwrap().is_err());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_default_reset_is_not_restartable() {
        let err = Failing.reset().unwrap_err();
        assert!(matches!(err, EtlError::NotRestartable(name) if name == "Failing"));
    }
}
