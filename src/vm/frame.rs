//! Call frames.
//!
//! The frame stack always holds at least the root frame. Each frame records
//! where to resume in the caller, the operand-stack depth that forms its
//! floor, and a fixed window of locals.

use super::Value;
use super::error::{VmError, VmResult};
use super::stack::OperandStack;

/// Bookkeeping for one active call.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Offset of the instruction after the CALL.
    pub return_ip: usize,
    /// Operand-stack depth at entry, after the arguments were popped.
    pub base_stack_depth: usize,
    locals: Box<[Value]>,
}

impl CallFrame {
    fn new(return_ip: usize, base_stack_depth: usize, locals: usize) -> Self {
        Self {
            return_ip,
            base_stack_depth,
            locals: vec![Value::Null; locals].into_boxed_slice(),
        }
    }

    pub fn local(&self, index: usize) -> VmResult<Value> {
        self.locals
            .get(index)
            .copied()
            .ok_or(VmError::InvalidLocal {
                index,
                window: self.locals.len(),
            })
    }

    pub fn set_local(&mut self, index: usize, value: Value) -> VmResult<()> {
        let window = self.locals.len();
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(VmError::InvalidLocal { index, window })?;
        *slot = value;
        Ok(())
    }

    pub fn locals(&self) -> &[Value] {
        &self.locals
    }
}

/// Ordered call frames; the last one is current.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<CallFrame>,
    max_call_depth: usize,
    locals_per_frame: usize,
}

impl FrameStack {
    /// Create a frame stack holding only the root frame.
    pub fn new(max_call_depth: usize, locals_per_frame: usize) -> Self {
        let mut frames = Vec::with_capacity(max_call_depth.min(64) + 1);
        frames.push(CallFrame::new(0, 0, locals_per_frame));
        Self {
            frames,
            max_call_depth,
            locals_per_frame,
        }
    }

    /// Number of active calls, not counting the root frame.
    pub fn call_depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub fn current(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Enter a call: move `argc` arguments off the operand stack into the new
    /// frame's locals and raise the stack floor to the new frame's base.
    ///
    /// All preconditions are checked before anything is mutated.
    pub fn push_call<S: OperandStack + ?Sized>(
        &mut self,
        stack: &mut S,
        return_ip: usize,
        argc: usize,
    ) -> VmResult<()> {
        if self.call_depth() >= self.max_call_depth {
            return Err(VmError::CallDepthExceeded {
                max: self.max_call_depth,
            });
        }
        if argc > self.locals_per_frame {
            return Err(VmError::InvalidLocal {
                index: argc - 1,
                window: self.locals_per_frame,
            });
        }
        if stack.available() < argc {
            return Err(VmError::StackUnderflow);
        }

        let mut frame = CallFrame::new(return_ip, 0, self.locals_per_frame);
        // First pushed argument lands in local 0.
        for index in (0..argc).rev() {
            let arg = stack.pop()?;
            frame.set_local(index, arg)?;
        }
        frame.base_stack_depth = stack.depth();
        stack.set_floor(frame.base_stack_depth)?;
        self.frames.push(frame);
        Ok(())
    }

    /// Leave the current call, keeping the top `count` values as results.
    ///
    /// The operand stack is truncated to the frame's base with the results
    /// shifted down onto it, the caller's floor is restored, and the return
    /// address is handed back.
    pub fn pop_call<S: OperandStack + ?Sized>(
        &mut self,
        stack: &mut S,
        count: usize,
    ) -> VmResult<usize> {
        if self.frames.len() <= 1 {
            return Err(VmError::FrameUnderflow);
        }
        if stack.available() < count {
            return Err(VmError::StackUnderflow);
        }

        let frame = self.frames.pop().ok_or(VmError::FrameUnderflow)?;
        stack.collapse(frame.base_stack_depth, count)?;
        let caller_floor = self
            .frames
            .last()
            .map(|caller| caller.base_stack_depth)
            .unwrap_or(0);
        stack.set_floor(caller_floor)?;
        Ok(frame.return_ip)
    }

    /// Drop every frame, including the root.
    pub fn release(&mut self) {
        self.frames = Vec::new();
    }
}
