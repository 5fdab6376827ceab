//! # dimetl: dimensional ETL
//!
//! Building blocks for loading a star or snowflake schema: pull-based row
//! sources, dimension tables that hand out surrogate keys, and fact tables
//! that load in bulk. The target warehouse is reached through the [`Store`]
//! trait only; the crate never speaks SQL.
//!
//! ## Quick start
//!
//! ```rust
//! use dimetl_core::{row, CachedDimension, DimensionConfig, DimensionTable, MemoryStore, NameMapping};
//! use std::sync::Arc;
//!
//! # fn main() -> dimetl_core::EtlResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let servers = CachedDimension::new(
//!     store.clone(),
//!     DimensionConfig::new("server", "serverid", ["server"]),
//! )?;
//!
//! let mut row = row! { "server" => "nginx" };
//! let key = servers.ensure(&mut row, &NameMapping::new())?;
//! assert_eq!(servers.ensure(&mut row! { "server" => "nginx" }, &NameMapping::new())?, key);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline shape
//!
//! ```text
//! DataSource ──▶ transform/filter/join ──▶ Dimension::ensure ──▶ keys into row
//!                                                              │
//!                                           BulkFactTable::insert ──▶ BulkLoader
//!                                                              │
//!                                        ConnectionWrapper::commit (end_load + commit)
//! ```
//!
//! ## Modules
//!
//! - [`row`]: `Value`, `Row`, `NameMapping`
//! - [`source`]: `DataSource` and its combinators
//! - [`dimension`]: cached, slowly changing and snowflaked dimensions
//! - [`fact`]: fact tables, bulk fact tables and bulk loaders
//! - [`store`]: the `Store` trait, in-memory and sled backends
//! - [`sequence`]: surrogate/identifier sequences
//! - [`config`]: warehouse layouts from JSON

pub mod config;
pub mod dimension;
pub mod error;
pub mod fact;
pub mod logging;
pub mod row;
pub mod sequence;
pub mod source;
pub mod store;

pub use config::WarehouseConfig;
pub use dimension::{
    AnyDimension, CacheStats, CachedDimension, DimensionConfig, DimensionTable, ScdConfig,
    SlowlyChangingDimension, SnowflakeBuilder, SnowflakedDimension,
};
pub use error::{EtlError, EtlResult};
pub use fact::{
    BulkConfig, BulkFactTable, BulkLoadRequest, BulkLoader, DelimitedFileLoader, FactConfig,
    FactTable, ParquetLoader, StoreLoader,
};
pub use row::{NameMapping, Row, Value};
pub use sequence::SequenceGenerator;
pub use source::{
    CastKind, DataSource, DelimitedConfig, DelimitedSource, FilteringSource, HashJoinSource,
    MemorySource, MergeJoinSource, RoundRobinSource, TransformingSource, UnionSource,
};
pub use store::{ConnectionWrapper, Loadable, MemoryStore, SledStore, Store};
