//! Snowflaked dimension: a tree (or DAG) of dimension tables.
//!
//! Nodes live in an arena (`Vec<Arc<dyn DimensionTable>>`) with index-based
//! child lists. Each parent stores its children's surrogate keys as
//! foreign-key attributes named after the child's key field. `ensure`
//! resolves strictly bottom-up: a parent row is only touched once every
//! child below it has a surrogate key in the row.
//!
//! ```text
//! page ─┬─ serverversion ── server
//!       └─ domain ── topleveldomain
//! ```

use crate::dimension::DimensionTable;
use crate::error::{EtlError, EtlResult};
use crate::row::{NameMapping, Row, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Assembles a [`SnowflakedDimension`] and checks its shape.
#[derive(Default)]
pub struct SnowflakeBuilder {
    nodes: Vec<Arc<dyn DimensionTable>>,
    links: Vec<(String, Vec<String>)>,
}

impl SnowflakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Tables are identified by name.
    pub fn table(mut self, table: Arc<dyn DimensionTable>) -> Self {
        self.add_table(table);
        self
    }

    /// Declare that `parent` references each of `children` by foreign key.
    pub fn link<S: Into<String>>(mut self, parent: impl Into<String>, children: impl IntoIterator<Item = S>) -> Self {
        self.links
            .push((parent.into(), children.into_iter().map(Into::into).collect()));
        self
    }

    /// Register `parent` and `children` and link them in one step.
    pub fn reference(mut self, parent: Arc<dyn DimensionTable>, children: Vec<Arc<dyn DimensionTable>>) -> Self {
        let names: Vec<String> = children.iter().map(|c| c.name().to_string()).collect();
        let parent_name = parent.name().to_string();
        self.add_table(parent);
        for child in children {
            self.add_table(child);
        }
        self.link(parent_name, names)
    }

    fn add_table(&mut self, table: Arc<dyn DimensionTable>) {
        // registering the same table twice is harmless
        if !self.nodes.iter().any(|n| Arc::ptr_eq(n, &table)) {
            self.nodes.push(table);
        }
    }

    pub fn build(self) -> EtlResult<SnowflakedDimension> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name(), i).is_some() {
                return Err(EtlError::config(format!(
                    "two different tables are named '{}'",
                    node.name()
                )));
            }
        }
        if self.nodes.is_empty() {
            return Err(EtlError::config("snowflaked dimension has no tables"));
        }

        let n = self.nodes.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (parent, kids) in &self.links {
            let p = *index.get(parent.as_str()).ok_or_else(|| {
                EtlError::config(format!("link references unknown table '{parent}'"))
            })?;
            for kid in kids {
                let c = *index.get(kid.as_str()).ok_or_else(|| {
                    EtlError::config(format!("link references unknown table '{kid}'"))
                })?;
                if children[p].contains(&c) {
                    continue;
                }
                let fk = self.nodes[c].key();
                if !self.nodes[p].attributes().iter().any(|a| a == fk) {
                    return Err(EtlError::config(format!(
                        "table '{}' has no foreign-key attribute '{fk}' for child '{}'",
                        self.nodes[p].name(),
                        self.nodes[c].name()
                    )));
                }
                children[p].push(c);
                parents[c].push(p);
            }
        }

        let roots: Vec<usize> = (0..n).filter(|&i| parents[i].is_empty()).collect();

        // Kahn's algorithm over child → parent edges: a node becomes ready
        // once all its children are resolved.
        let mut pending: Vec<usize> = children.iter().map(Vec::len).collect();
        let mut height = vec![0usize; n];
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &p in &parents[node] {
                height[p] = height[p].max(height[node] + 1);
                pending[p] -= 1;
                if pending[p] == 0 {
                    ready.push_back(p);
                }
            }
        }
        if order.len() < n {
            let cyclic: Vec<&str> = (0..n)
                .filter(|&i| pending[i] > 0)
                .map(|i| self.nodes[i].name())
                .collect();
            return Err(EtlError::config(format!(
                "snowflake references form a cycle through {cyclic:?}"
            )));
        }
        let root = match roots.as_slice() {
            [root] => *root,
            _ => {
                let names: Vec<&str> = roots.iter().map(|&i| self.nodes[i].name()).collect();
                return Err(EtlError::config(format!(
                    "snowflaked dimension needs exactly one root table, found {names:?}"
                )));
            }
        };

        let depth = height[root];
        let mut levels = vec![Vec::new(); depth + 1];
        for &i in &order {
            levels[height[i]].push(i);
        }
        debug!(
            root = %self.nodes[root].name(),
            tables = n,
            levels = depth + 1,
            "snowflaked dimension built"
        );
        Ok(SnowflakedDimension {
            nodes: self.nodes,
            children,
            root,
            order,
            levels,
        })
    }
}

/// Normalized dimension whose `ensure` fills in the whole hierarchy.
pub struct SnowflakedDimension {
    nodes: Vec<Arc<dyn DimensionTable>>,
    children: Vec<Vec<usize>>,
    root: usize,
    /// Bottom-up resolution order, root last
    order: Vec<usize>,
    /// Node indexes grouped by height above the leaves
    levels: Vec<Vec<usize>>,
}

impl SnowflakedDimension {
    /// Build from `(parent, children)` references.
    pub fn new(references: Vec<(Arc<dyn DimensionTable>, Vec<Arc<dyn DimensionTable>>)>) -> EtlResult<Self> {
        references
            .into_iter()
            .fold(SnowflakeBuilder::new(), |b, (parent, kids)| b.reference(parent, kids))
            .build()
    }

    pub fn root(&self) -> &Arc<dyn DimensionTable> {
        &self.nodes[self.root]
    }

    /// Table names per level, leaves first and the root last.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| self.nodes[i].name()).collect())
            .collect()
    }

    /// Children of a table, by name.
    pub fn children_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .position(|n| n.name() == name)
            .map(|i| self.children[i].iter().map(|&c| self.nodes[c].name()).collect())
            .unwrap_or_default()
    }

    fn resolve_children(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<()> {
        for &i in self.order.iter().filter(|&&i| i != self.root) {
            let node = &self.nodes[i];
            let key = node.ensure(row, namemapping)?;
            row.set_mapped(node.key(), namemapping, key);
        }
        Ok(())
    }

    /// Bottom-up ensure whose root must be a slowly changing dimension.
    pub fn scdensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        if !self.root().is_versioned() {
            return Err(EtlError::config(format!(
                "scdensure needs a versioned root, '{}' is not",
                self.root().name()
            )));
        }
        self.ensure(row, namemapping)
    }
}

impl DimensionTable for SnowflakedDimension {
    fn name(&self) -> &str {
        self.root().name()
    }

    fn key(&self) -> &str {
        self.root().key()
    }

    fn attributes(&self) -> &[String] {
        self.root().attributes()
    }

    fn lookupatts(&self) -> &[String] {
        self.root().lookupatts()
    }

    fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        self.root().lookup(row, namemapping)
    }

    /// Resolve every child, then insert the root row.
    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        self.resolve_children(row, namemapping)?;
        self.root().insert(row, namemapping)
    }

    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        self.resolve_children(row, namemapping)?;
        self.root().ensure(row, namemapping)
    }

    fn getbykey(&self, keyvalue: &Value) -> EtlResult<Option<Row>> {
        self.root().getbykey(keyvalue)
    }

    fn reset_cache(&self) -> EtlResult<()> {
        self.nodes.iter().try_for_each(|n| n.reset_cache())
    }

    fn is_versioned(&self) -> bool {
        self.root().is_versioned()
    }
}
