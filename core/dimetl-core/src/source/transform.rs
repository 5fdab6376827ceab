//! Transforming source: mutates every row in place before yielding it.
//!
//! Transforms run in registration order. They may add, remove or change
//! fields and may carry side effects (a [`SequenceGenerator`] assigning
//! identifiers is the usual one); keeping those deterministic with respect
//! to processing order is up to the caller.
//!
//! [`SequenceGenerator`]: crate::sequence::SequenceGenerator

use crate::error::EtlResult;
use crate::row::Row;
use crate::source::DataSource;

type Transform = Box<dyn FnMut(&mut Row) -> EtlResult<()> + Send>;

/// Applies a chain of row transforms to its input.
pub struct TransformingSource {
    input: Box<dyn DataSource>,
    transforms: Vec<Transform>,
}

impl TransformingSource {
    pub fn new(input: impl DataSource + 'static) -> Self {
        Self {
            input: Box::new(input),
            transforms: Vec::new(),
        }
    }

    /// Append a transform to the chain.
    pub fn with_transform(
        mut self,
        transform: impl FnMut(&mut Row) -> EtlResult<()> + Send + 'static,
    ) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }
}

impl DataSource for TransformingSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        let Some(mut row) = self.input.next_row()? else {
            return Ok(None);
        };
        for transform in &mut self.transforms {
            transform(&mut row)?;
        }
        Ok(Some(row))
    }

    fn reset(&mut self) -> EtlResult<()> {
        self.input.reset()
    }

    fn describe(&self) -> String {
        format!("TransformingSource({})", self.input.describe())
    }
}
