//! LIMIT/OFFSET executor.
//!
//! Skips `offset` child records on the first pull, then passes through at
//! most `count` records. A missing count means unlimited.

use strata::record::Record;

use crate::errors::EngineError;
use crate::executor::{BoxedExecutor, Executor};

pub struct LimitExecutor<'a> {
    child: BoxedExecutor<'a>,
    offset: usize,
    count: Option<usize>,

    remaining_offset: usize,
    remaining_count: Option<usize>,
}

impl<'a> LimitExecutor<'a> {
    pub fn new(child: BoxedExecutor<'a>, offset: Option<usize>, count: Option<usize>) -> Self {
        let offset = offset.unwrap_or(0);
        Self {
            child,
            offset,
            count,
            remaining_offset: offset,
            remaining_count: count,
        }
    }
}

impl<'a> Executor for LimitExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()?;
        self.remaining_offset = self.offset;
        self.remaining_count = self.count;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        if self.remaining_count == Some(0) {
            return Ok(None);
        }

        while self.remaining_offset > 0 {
            if self.child.next()?.is_none() {
                // Child exhausted inside the offset.
                self.remaining_offset = 0;
                return Ok(None);
            }
            self.remaining_offset -= 1;
        }

        let record = self.child.next()?;
        if record.is_some() {
            if let Some(remaining) = &mut self.remaining_count {
                *remaining -= 1;
            }
        }
        Ok(record)
    }
}
