//! Row-at-a-time operators: literal values, filter, and sort.

use std::cmp::Ordering;

use strata::record::{Record, Value};

use super::{BoxedExecutor, Executor};
use crate::errors::EngineError;
use crate::expr::Expression;
use crate::plan::OrderDirection;

/// Leaf producing literal rows; the source below Insert.
pub struct ValuesExecutor<'a> {
    rows: &'a [Vec<Expression>],
    cursor: usize,
}

impl<'a> ValuesExecutor<'a> {
    pub(super) fn new(rows: &'a [Vec<Expression>]) -> Self {
        Self { rows, cursor: 0 }
    }
}

impl<'a> Executor for ValuesExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        let Some(exprs) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let empty = Record::new(Vec::new());
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(expr.evaluate(&empty)?);
        }
        Ok(Some(Record::new(values)))
    }
}

/// Passes through records satisfying the predicate.
pub struct FilterExecutor<'a> {
    child: BoxedExecutor<'a>,
    predicate: &'a Expression,
}

impl<'a> FilterExecutor<'a> {
    pub(super) fn new(child: BoxedExecutor<'a>, predicate: &'a Expression) -> Self {
        Self { child, predicate }
    }
}

impl<'a> Executor for FilterExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        loop {
            match self.child.next()? {
                Some(record) => {
                    if self.predicate.evaluate(&record)? == Value::Bool(true) {
                        return Ok(Some(record));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

/// Materializing sort. Multi-key ordering sorts the whole input on the
/// first key, then re-sorts each run of equal values on the next key, and
/// so on; run boundaries are recomputed per key.
pub struct OrderByExecutor<'a> {
    child: BoxedExecutor<'a>,
    order_bys: &'a [(OrderDirection, Expression)],
    sorted: Vec<(Record, Value)>,
    cursor: usize,
}

impl<'a> OrderByExecutor<'a> {
    pub(super) fn new(
        child: BoxedExecutor<'a>,
        order_bys: &'a [(OrderDirection, Expression)],
    ) -> Self {
        Self {
            child,
            order_bys,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

fn compare_keys(a: &(Record, Value), b: &(Record, Value)) -> Ordering {
    a.1.compare(&b.1)
}

fn sort_range(records: &mut [(Record, Value)], direction: OrderDirection) {
    match direction {
        OrderDirection::Asc | OrderDirection::Default => records.sort_by(compare_keys),
        OrderDirection::Desc => records.sort_by(|a, b| compare_keys(b, a)),
    }
}

impl<'a> Executor for OrderByExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()?;
        self.sorted.clear();
        self.cursor = 0;
        while let Some(record) = self.child.next()? {
            self.sorted.push((record, Value::Null));
        }

        let mut partitions: Vec<usize> = Vec::new();
        for (key_index, (direction, expr)) in self.order_bys.iter().enumerate() {
            for entry in &mut self.sorted {
                entry.1 = expr.evaluate(&entry.0)?;
            }

            if key_index == 0 {
                sort_range(&mut self.sorted, *direction);
            } else {
                let mut bounds = partitions.clone();
                bounds.push(self.sorted.len());
                for window in bounds.windows(2) {
                    sort_range(&mut self.sorted[window[0]..window[1]], *direction);
                }
            }

            // Boundaries of equal-value runs for the next key.
            partitions.clear();
            partitions.push(0);
            for i in 1..self.sorted.len() {
                if self.sorted[i].1.compare(&self.sorted[i - 1].1) != Ordering::Equal {
                    partitions.push(i);
                }
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        let Some(entry) = self.sorted.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(entry.0.clone()))
    }
}
