//! The catalog interface the storage and execution layers consume.
//!
//! Catalog internals (persistence, name resolution, DDL) live outside this
//! crate; recovery and the executors only need the lookups below.

use std::sync::Arc;

use crate::errors::StorageError;
use crate::record::ColumnList;
use crate::table::Table;
use crate::Oid;

pub trait Catalog {
    fn get_table(&self, oid: Oid) -> Result<Arc<Table>, StorageError>;

    fn get_table_column_list(&self, oid: Oid) -> Result<ColumnList, StorageError>;

    fn get_database_oid(&self, table_oid: Oid) -> Result<Oid, StorageError>;

    /// Estimated row count, read by the optimizer.
    fn get_cardinality(&self, table_oid: Oid) -> Result<usize, StorageError>;

    /// Estimated distinct values in a column, read by the optimizer.
    fn get_distinct(&self, table_oid: Oid, column: &str) -> Result<usize, StorageError>;
}
