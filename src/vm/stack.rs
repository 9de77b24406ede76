//! Operand stack.
//!
//! The stack is bounded at creation and never resizes. It also carries a
//! movable *floor*: the base of the current call frame. Pops and peeks may
//! not reach below the floor, which keeps a callee from consuming its
//! caller's operands.

use super::Value;
use super::error::{VmError, VmResult};

/// Capability interface of the operand stack.
pub trait OperandStack {
    /// Push a value. Fails with `StackOverflow` at the depth limit, leaving
    /// the stack unchanged.
    fn push(&mut self, value: Value) -> VmResult<()>;

    /// Pop the top value. Fails with `StackUnderflow` at the floor.
    fn pop(&mut self) -> VmResult<Value>;

    /// Borrow the value `depth_from_top` entries below the top (0 = top).
    fn peek(&self, depth_from_top: usize) -> VmResult<&Value>;

    fn depth(&self) -> usize;

    fn max_depth(&self) -> usize;

    fn floor(&self) -> usize;

    /// Move the floor. A floor above the current depth is rejected.
    fn set_floor(&mut self, floor: usize) -> VmResult<()>;

    /// Remove everything between `base` and the top `keep` values, shifting
    /// those values down so they start at `base`.
    ///
    /// Requires `base <= depth - keep`; nothing is modified on error.
    fn collapse(&mut self, base: usize, keep: usize) -> VmResult<()>;

    /// All values, bottom first.
    fn as_slice(&self) -> &[Value];

    /// Drop every value and release the backing storage.
    fn release(&mut self);

    /// Number of values above the floor.
    fn available(&self) -> usize {
        self.depth() - self.floor()
    }

    fn top(&self) -> Option<&Value> {
        self.peek(0).ok()
    }
}

/// Bounds-checked operand stack backed by a preallocated `Vec`.
#[derive(Debug)]
pub struct BoundedStack {
    values: Vec<Value>,
    max_depth: usize,
    floor: usize,
}

impl BoundedStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            values: Vec::with_capacity(max_depth.min(1024)),
            max_depth,
            floor: 0,
        }
    }
}

impl OperandStack for BoundedStack {
    #[inline]
    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.values.len() >= self.max_depth {
            return Err(VmError::StackOverflow {
                max: self.max_depth,
            });
        }
        self.values.push(value);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> VmResult<Value> {
        if self.values.len() <= self.floor {
            return Err(VmError::StackUnderflow);
        }
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    fn peek(&self, depth_from_top: usize) -> VmResult<&Value> {
        if depth_from_top >= self.available() {
            return Err(VmError::StackUnderflow);
        }
        let index = self.values.len() - 1 - depth_from_top;
        self.values.get(index).ok_or(VmError::StackUnderflow)
    }

    #[inline]
    fn depth(&self) -> usize {
        self.values.len()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    fn floor(&self) -> usize {
        self.floor
    }

    fn set_floor(&mut self, floor: usize) -> VmResult<()> {
        if floor > self.values.len() {
            return Err(VmError::StackUnderflow);
        }
        self.floor = floor;
        Ok(())
    }

    fn collapse(&mut self, base: usize, keep: usize) -> VmResult<()> {
        let depth = self.values.len();
        let kept_from = depth.checked_sub(keep).ok_or(VmError::StackUnderflow)?;
        if base > kept_from {
            return Err(VmError::StackUnderflow);
        }
        self.values.drain(base..kept_from);
        if self.floor > self.values.len() {
            self.floor = self.values.len();
        }
        Ok(())
    }

    fn as_slice(&self) -> &[Value] {
        &self.values
    }

    fn release(&mut self) {
        self.values = Vec::new();
        self.floor = 0;
    }
}
