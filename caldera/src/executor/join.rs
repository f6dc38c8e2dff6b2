//! Nested-loop and merge joins.

use std::cmp::Ordering;

use strata::record::{Record, Value};

use super::{BoxedExecutor, Executor};
use crate::errors::EngineError;
use crate::expr::Expression;
use crate::plan::JoinType;

/// Nested loop join over all four join types. The right side is
/// materialized once in `init`; each right row carries a matched bit so
/// RIGHT and FULL joins can emit the unmatched remainder after the left
/// side is exhausted.
pub struct NestedLoopJoinExecutor<'a> {
    left: BoxedExecutor<'a>,
    right: BoxedExecutor<'a>,
    join_condition: Option<&'a Expression>,
    join_type: JoinType,
    right_rows: Vec<(Record, bool)>,
    right_cursor: usize,
    left_record: Option<Record>,
    left_matched: bool,
    left_arity: usize,
    right_arity: usize,
    unmatched_cursor: usize,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub(super) fn new(
        left: BoxedExecutor<'a>,
        right: BoxedExecutor<'a>,
        join_condition: Option<&'a Expression>,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            join_condition,
            join_type,
            right_rows: Vec::new(),
            right_cursor: 0,
            left_record: None,
            left_matched: false,
            left_arity: 0,
            right_arity: 0,
            unmatched_cursor: 0,
        }
    }

    fn matches(&self, left: &Record, right: &Record) -> Result<bool, EngineError> {
        match self.join_condition {
            Some(condition) => Ok(condition.evaluate_join(left, right)? == Value::Bool(true)),
            None => Ok(true),
        }
    }
}

impl<'a> Executor for NestedLoopJoinExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.left.init()?;
        self.right.init()?;

        self.right_rows.clear();
        while let Some(record) = self.right.next()? {
            self.right_rows.push((record, false));
        }
        self.right_arity = self.right_rows.first().map(|(r, _)| r.len()).unwrap_or(0);

        self.left_record = self.left.next()?;
        self.left_arity = self.left_record.as_ref().map(|r| r.len()).unwrap_or(0);
        self.left_matched = false;
        self.right_cursor = 0;
        self.unmatched_cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        loop {
            let Some(left_record) = self.left_record.clone() else {
                // Left side exhausted: RIGHT and FULL joins now emit the
                // right rows no left row ever matched, null-padded.
                if matches!(self.join_type, JoinType::Right | JoinType::Full)
                    && self.left_arity > 0
                {
                    while self.unmatched_cursor < self.right_rows.len() {
                        let index = self.unmatched_cursor;
                        self.unmatched_cursor += 1;
                        if !self.right_rows[index].1 {
                            self.right_rows[index].1 = true;
                            let mut out = Record::nulls(self.left_arity);
                            out.append(&self.right_rows[index].0);
                            return Ok(Some(out));
                        }
                    }
                }
                return Ok(None);
            };

            while self.right_cursor < self.right_rows.len() {
                let index = self.right_cursor;
                self.right_cursor += 1;
                if self.matches(&left_record, &self.right_rows[index].0)? {
                    self.right_rows[index].1 = true;
                    self.left_matched = true;
                    let mut out = left_record.clone();
                    out.append(&self.right_rows[index].0);
                    return Ok(Some(out));
                }
            }

            // This left row has seen the whole right side.
            let emit_null_padded = matches!(self.join_type, JoinType::Left | JoinType::Full)
                && !self.left_matched
                && self.right_arity > 0;
            self.left_record = self.left.next()?;
            self.left_matched = false;
            self.right_cursor = 0;
            if emit_null_padded {
                let mut out = left_record;
                out.append(&Record::nulls(self.right_arity));
                return Ok(Some(out));
            }
        }
    }
}

/// Merge join over inputs sorted on the join keys. `last_match` buffers
/// the current run of equal right rows so consecutive equal left rows can
/// replay it.
pub struct MergeJoinExecutor<'a> {
    left: BoxedExecutor<'a>,
    right: BoxedExecutor<'a>,
    left_key: &'a Expression,
    right_key: &'a Expression,
    left_record: Option<Record>,
    right_record: Option<Record>,
    last_match: Vec<Record>,
    index: usize,
}

impl<'a> MergeJoinExecutor<'a> {
    pub(super) fn new(
        left: BoxedExecutor<'a>,
        right: BoxedExecutor<'a>,
        left_key: &'a Expression,
        right_key: &'a Expression,
    ) -> Self {
        Self {
            left,
            right,
            left_key,
            right_key,
            left_record: None,
            right_record: None,
            last_match: Vec::new(),
            index: 0,
        }
    }
}

impl<'a> Executor for MergeJoinExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.left.init()?;
        self.right.init()?;
        self.right_record = self.right.next()?;
        self.left_record = self.left.next()?;
        self.last_match.clear();
        self.index = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        // Drain the buffered run of equal right rows for the current left
        // row, reusing it while consecutive left rows share the key.
        while !self.last_match.is_empty() {
            if self.index < self.last_match.len() {
                let mut out = self
                    .left_record
                    .clone()
                    .expect("a buffered match implies a current left row");
                out.append(&self.last_match[self.index]);
                self.index += 1;
                return Ok(Some(out));
            }

            let previous = self.left_record.take();
            self.left_record = self.left.next()?;
            let same_key = match (&self.left_record, &previous) {
                (Some(current), Some(previous)) => {
                    self.left_key
                        .evaluate(current)?
                        .compare(&self.left_key.evaluate(previous)?)
                        == Ordering::Equal
                }
                _ => false,
            };
            if !same_key {
                self.last_match.clear();
            }
            self.index = 0;
        }

        while self.left_record.is_some() && self.right_record.is_some() {
            let mut left_value = self.left_key.evaluate(self.left_record.as_ref().unwrap())?;
            let mut right_value = self
                .right_key
                .evaluate(self.right_record.as_ref().unwrap())?;

            while left_value.compare(&right_value) == Ordering::Less {
                self.left_record = self.left.next()?;
                match &self.left_record {
                    Some(record) => left_value = self.left_key.evaluate(record)?,
                    None => return Ok(None),
                }
            }
            while left_value.compare(&right_value) == Ordering::Greater {
                self.right_record = self.right.next()?;
                match &self.right_record {
                    Some(record) => right_value = self.right_key.evaluate(record)?,
                    None => return Ok(None),
                }
            }

            if left_value.compare(&right_value) == Ordering::Equal {
                let right = self.right_record.clone().unwrap();
                let mut out = self.left_record.clone().unwrap();
                out.append(&right);

                // Collect the whole run of right rows equal to this key.
                self.last_match.push(right);
                self.right_record = self.right.next()?;
                while let Some(record) = &self.right_record {
                    if self.right_key.evaluate(record)?.compare(&left_value) != Ordering::Equal {
                        break;
                    }
                    self.last_match.push(record.clone());
                    self.right_record = self.right.next()?;
                }

                self.index += 1;
                return Ok(Some(out));
            }
        }
        Ok(None)
    }
}
