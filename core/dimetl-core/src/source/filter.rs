//! Filtering source: yields only the rows a predicate accepts.

use crate::error::EtlResult;
use crate::row::Row;
use crate::source::DataSource;

type Predicate = Box<dyn FnMut(&Row) -> bool + Send>;

/// Passes through the rows of its input for which the predicate holds.
pub struct FilteringSource {
    input: Box<dyn DataSource>,
    predicate: Predicate,
}

impl FilteringSource {
    pub fn new(
        input: impl DataSource + 'static,
        predicate: impl FnMut(&Row) -> bool + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            predicate: Box::new(predicate),
        }
    }
}

impl DataSource for FilteringSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        while let Some(row) = self.input.next_row()? {
            if (self.predicate)(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> EtlResult<()> {
        self.input.reset()
    }

    fn describe(&self) -> String {
        format!("FilteringSource({})", self.input.describe())
    }
}
