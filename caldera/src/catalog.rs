//! An in-memory catalog. The production system catalog lives elsewhere;
//! this implementation backs the executors in tests and embedded use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata::catalog::Catalog;
use strata::record::ColumnList;
use strata::table::Table;
use strata::{Oid, StorageError};

#[derive(Default)]
pub struct MemoryCatalog {
    tables: Mutex<HashMap<Oid, Arc<Table>>>,
    cardinalities: Mutex<HashMap<Oid, usize>>,
    distincts: Mutex<HashMap<(Oid, String), usize>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, table: Arc<Table>) {
        self.tables.lock().unwrap().insert(table.oid(), table);
    }

    pub fn set_cardinality(&self, table_oid: Oid, rows: usize) {
        self.cardinalities.lock().unwrap().insert(table_oid, rows);
    }

    pub fn set_distinct(&self, table_oid: Oid, column: &str, distinct: usize) {
        self.distincts
            .lock()
            .unwrap()
            .insert((table_oid, column.to_string()), distinct);
    }
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, oid: Oid) -> Result<Arc<Table>, StorageError> {
        self.tables
            .lock()
            .unwrap()
            .get(&oid)
            .cloned()
            .ok_or(StorageError::TableNotFound(oid))
    }

    fn get_table_column_list(&self, oid: Oid) -> Result<ColumnList, StorageError> {
        Ok(self.get_table(oid)?.column_list().clone())
    }

    fn get_database_oid(&self, table_oid: Oid) -> Result<Oid, StorageError> {
        Ok(self.get_table(table_oid)?.db_oid())
    }

    fn get_cardinality(&self, table_oid: Oid) -> Result<usize, StorageError> {
        Ok(self
            .cardinalities
            .lock()
            .unwrap()
            .get(&table_oid)
            .copied()
            .unwrap_or(0))
    }

    fn get_distinct(&self, table_oid: Oid, column: &str) -> Result<usize, StorageError> {
        Ok(self
            .distincts
            .lock()
            .unwrap()
            .get(&(table_oid, column.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
