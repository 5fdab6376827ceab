//! Round-robin source: interleaves several sources batch by batch.
//!
//! Up to `batchsize` rows are pulled from each source in turn, cycling until
//! every source is exhausted. A source that runs dry is skipped from then on.
//! Fairness holds at batch granularity; rows of one source keep their order.

use crate::error::{EtlError, EtlResult};
use crate::row::Row;
use crate::source::DataSource;

pub struct RoundRobinSource {
    sources: Vec<Box<dyn DataSource>>,
    exhausted: Vec<bool>,
    batchsize: usize,
    current: usize,
    taken: usize,
}

impl RoundRobinSource {
    pub fn new(sources: Vec<Box<dyn DataSource>>, batchsize: usize) -> EtlResult<Self> {
        if batchsize == 0 {
            return Err(EtlError::config("round-robin batchsize must be at least 1"));
        }
        Ok(Self {
            exhausted: vec![false; sources.len()],
            sources,
            batchsize,
            current: 0,
            taken: 0,
        })
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.sources.len().max(1);
        self.taken = 0;
    }
}

impl DataSource for RoundRobinSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        while self.exhausted.iter().any(|done| !done) {
            if self.exhausted[self.current] {
                self.advance();
                continue;
            }
            match self.sources[self.current].next_row()? {
                Some(row) => {
                    self.taken += 1;
                    if self.taken == self.batchsize {
                        self.advance();
                    }
                    return Ok(Some(row));
                }
                None => {
                    self.exhausted[self.current] = true;
                    self.advance();
                }
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> EtlResult<()> {
        for source in &mut self.sources {
            source.reset()?;
        }
        self.exhausted.fill(false);
        self.current = 0;
        self.taken = 0;
        Ok(())
    }
}
