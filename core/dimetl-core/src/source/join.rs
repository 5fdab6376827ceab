//! Join sources: combine two inputs on a shared key.
//!
//! Both joins are inner joins that merge the right row's fields into the
//! left row (the right side wins on a name clash).
//!
//! - [`MergeJoinSource`]: both inputs sorted ascending by key, O(n+m), no
//!   buffering beyond one group of equal right keys. Unsorted input is not
//!   detected; it simply yields fewer matches.
//! - [`HashJoinSource`]: the right input is indexed in memory up front and
//!   the left input is streamed. Only the last right row per key is kept.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value};
use crate::source::DataSource;
use ahash::AHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::{debug, warn};

fn key_of(row: &Row, key: &str, side: &str) -> EtlResult<Value> {
    row.get(key)
        .cloned()
        .ok_or_else(|| EtlError::config(format!("{side} join key '{key}' is missing from row")))
}

/// Sort-merge join of two key-ordered inputs.
pub struct MergeJoinSource {
    left: Box<dyn DataSource>,
    right: Box<dyn DataSource>,
    leftkey: String,
    rightkey: String,
    /// Consecutive right rows sharing `group_key`
    group: SmallVec<[Row; 4]>,
    group_key: Option<Value>,
    /// Next unconsumed right row
    lookahead: Option<Row>,
    right_done: bool,
    output: VecDeque<Row>,
}

impl MergeJoinSource {
    pub fn new(
        left: impl DataSource + 'static,
        leftkey: impl Into<String>,
        right: impl DataSource + 'static,
        rightkey: impl Into<String>,
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            leftkey: leftkey.into(),
            rightkey: rightkey.into(),
            group: SmallVec::new(),
            group_key: None,
            lookahead: None,
            right_done: false,
            output: VecDeque::new(),
        }
    }

    fn fill_lookahead(&mut self) -> EtlResult<()> {
        if self.lookahead.is_none() && !self.right_done {
            self.lookahead = self.right.next_row()?;
            self.right_done = self.lookahead.is_none();
        }
        Ok(())
    }

    /// Load the group of right rows whose key equals `key`, skipping smaller keys.
    fn load_group(&mut self, key: &Value) -> EtlResult<()> {
        self.group.clear();
        self.group_key = None;
        loop {
            self.fill_lookahead()?;
            let Some(next) = &self.lookahead else {
                return Ok(());
            };
            match key_of(next, &self.rightkey, "right")?.cmp(key) {
                Ordering::Less => self.lookahead = None,
                Ordering::Greater => return Ok(()),
                Ordering::Equal => {
                    if let Some(row) = self.lookahead.take() {
                        self.group.push(row);
                    }
                    self.group_key = Some(key.clone());
                }
            }
        }
    }
}

impl DataSource for MergeJoinSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        loop {
            if let Some(row) = self.output.pop_front() {
                return Ok(Some(row));
            }
            let Some(left) = self.left.next_row()? else {
                return Ok(None);
            };
            let key = key_of(&left, &self.leftkey, "left")?;
            if self.group_key.as_ref() != Some(&key) {
                self.load_group(&key)?;
            }
            for right in &self.group {
                let mut joined = left.clone();
                joined.merge(right);
                self.output.push_back(joined);
            }
        }
    }

    fn reset(&mut self) -> EtlResult<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.group.clear();
        self.group_key = None;
        self.lookahead = None;
        self.right_done = false;
        self.output.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "MergeJoinSource({}, {})",
            self.left.describe(),
            self.right.describe()
        )
    }
}

/// Hash join: build an index over the right input, probe it with the left.
pub struct HashJoinSource {
    left: Box<dyn DataSource>,
    right: Box<dyn DataSource>,
    leftkey: String,
    rightkey: String,
    /// Built on the first pull
    index: Option<AHashMap<Value, Row>>,
}

impl HashJoinSource {
    pub fn new(
        left: impl DataSource + 'static,
        leftkey: impl Into<String>,
        right: impl DataSource + 'static,
        rightkey: impl Into<String>,
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            leftkey: leftkey.into(),
            rightkey: rightkey.into(),
            index: None,
        }
    }

    fn build_phase(&mut self) -> EtlResult<AHashMap<Value, Row>> {
        let mut index = AHashMap::new();
        let mut collisions = 0usize;
        while let Some(row) = self.right.next_row()? {
            let key = key_of(&row, &self.rightkey, "right")?;
            if index.insert(key, row).is_some() {
                collisions += 1;
            }
        }
        if collisions > 0 {
            warn!(
                source = %self.right.describe(),
                collisions,
                "hash join index kept only the last row for duplicate keys"
            );
        }
        debug!(keys = index.len(), "hash join index built");
        Ok(index)
    }
}

impl DataSource for HashJoinSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        if self.index.is_none() {
            self.index = Some(self.build_phase()?);
        }
        while let Some(mut left) = self.left.next_row()? {
            let key = key_of(&left, &self.leftkey, "left")?;
            if let Some(right) = self.index.as_ref().and_then(|idx| idx.get(&key)) {
                left.merge(right);
                return Ok(Some(left));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> EtlResult<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.index = None;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "HashJoinSource({}, {})",
            self.left.describe(),
            self.right.describe()
        )
    }
}
