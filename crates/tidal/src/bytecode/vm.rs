//! The stack machine.
//!
//! A VM executes one compiled program against a render context. Memory is
//! three stacks: the value stack with a fixed capacity and a stack pointer,
//! the block-frame stack (the top frame's instruction pointer drives the
//! dispatch loop), and the output-buffer stack whose bottom is the final
//! output. `for`/`tablerow` push one frame and one buffer each; `capture`
//! pushes a buffer only. Frames, buffers and extension frames release in
//! LIFO order on every path, including `break`/`continue` unwinding.
//!
//! Partial templates run in a nested VM: `include` over the caller's
//! context, `render` over an isolated child context. Only the outermost
//! VM's bottom buffer counts toward the output-byte ceiling; partial output
//! arrives there through a single flush.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::bytecode::code::{CompiledBlock, Constant, Program, TagDispatch, loop_body_entry};
use crate::bytecode::op::{Opcode, read_u16};
use crate::context::{Context, ExtensionFrame};
use crate::drops::{ForLoopDrop, LoopDrop, LoopIter, TableRowDrop};
use crate::environment::Environment;
use crate::error::{Error, ErrorKind, Mode, Result};
use crate::filters::FilterCall;
use crate::loader::template_base_name;
use crate::value::{RangeValue, Value};

/// Fixed capacity of the value stack.
pub const STACK_SIZE: usize = 2048;

/// One invocation of a compiled block.
#[derive(Debug)]
struct Frame {
    block: Arc<CompiledBlock>,
    ip: usize,
    base_pointer: usize,
    /// Free variables captured by the caller, in capture order.
    free: Vec<Value>,
    /// Whether this frame pushed a loop extension frame onto the context.
    pushed_extension: bool,
    /// Index of this frame's output buffer in the buffer stack.
    buffer_index: usize,
}

/// Renders `program` as the outermost template of a render.
pub fn render(env: &Environment, program: &Arc<Program>, context: &mut Context<'_>) -> Result<String> {
    Vm::new(env, Arc::clone(program), context, true).run()
}

struct Vm<'e, 'c, 'g> {
    env: &'e Environment,
    program: Arc<Program>,
    /// Constant pool, converted to runtime values once per render.
    consts: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    frames: SmallVec<[Frame; 4]>,
    buffers: SmallVec<[String; 4]>,
    context: &'c mut Context<'g>,
    /// True for the outermost VM of a render, whose bottom buffer is the
    /// root output stream.
    root: bool,
    output_bytes: usize,
}

impl<'e, 'c, 'g> Vm<'e, 'c, 'g> {
    fn new(
        env: &'e Environment,
        program: Arc<Program>,
        context: &'c mut Context<'g>,
        root: bool,
    ) -> Self {
        let consts = program.constants.iter().map(constant_value).collect();
        let main = Arc::clone(&program.main);
        let mut frames = SmallVec::new();
        frames.push(Frame {
            block: main,
            ip: 0,
            base_pointer: 0,
            free: Vec::new(),
            pushed_extension: false,
            buffer_index: 0,
        });
        let mut buffers = SmallVec::new();
        buffers.push(String::new());
        Self {
            env,
            program,
            consts,
            stack: vec![Value::Nil; STACK_SIZE],
            sp: 0,
            frames,
            buffers,
            context,
            root,
            output_bytes: 0,
        }
    }

    // ------------------------------------------------------------------
    // Fetch, stack and buffer primitives

    fn frame(&self) -> &Frame {
        self.frames.last().expect("at least the main frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least the main frame")
    }

    fn fetch_u8(&mut self) -> usize {
        let frame = self.frame_mut();
        let value = usize::from(frame.block.instructions[frame.ip]);
        frame.ip += 1;
        value
    }

    fn fetch_u16(&mut self) -> usize {
        let frame = self.frame_mut();
        let value = read_u16(&frame.block.instructions, frame.ip);
        frame.ip += 2;
        value
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(Error::new(ErrorKind::StackOverflow, "value stack exhausted"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        debug_assert!(self.sp > 0, "pop from empty stack");
        self.sp -= 1;
        std::mem::replace(&mut self.stack[self.sp], Value::Nil)
    }

    /// Writes to the current buffer, enforcing the output ceiling when the
    /// target is the root output stream.
    fn write_str(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        if self.root && self.buffers.len() == 1 {
            self.output_bytes += s.len();
            if let Some(max) = self.env.limits().max_output_bytes {
                if self.output_bytes > max {
                    return Err(Error::new(
                        ErrorKind::OutputStreamLimit,
                        format!("output stream limit reached: {} > {max}", self.output_bytes),
                    ));
                }
            }
        }
        self.buffers.last_mut().expect("at least the root buffer").push_str(s);
        Ok(())
    }

    fn pop_buffer(&mut self) -> String {
        debug_assert!(self.buffers.len() > 1, "pop of the root buffer");
        self.buffers.pop().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Tolerance

    /// Applies the tolerance policy to a recoverable error, pushing a
    /// neutral value in its place in warn/lax mode.
    fn recover_push(&mut self, err: Error, fallback: Value) -> Result<()> {
        self.recover(err)?;
        self.push(fallback)
    }

    /// Applies the tolerance policy to a recoverable error with no value.
    fn recover(&mut self, err: Error) -> Result<()> {
        if err.is_fatal() || self.env.mode() == Mode::Strict {
            return Err(err);
        }
        if self.env.mode() == Mode::Warn {
            self.context.warn(err);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // The dispatch loop

    fn run(mut self) -> Result<String> {
        loop {
            let frame = self.frame();
            if frame.ip >= frame.block.instructions.len() {
                if self.frames.len() == 1 {
                    break;
                }
                return Err(Error::typ("compiled block ended without STOP"));
            }
            let op = {
                let frame = self.frame_mut();
                let byte = frame.block.instructions[frame.ip];
                frame.ip += 1;
                Opcode::decode(byte)?
            };
            self.execute(op)?;
        }
        debug_assert_eq!(self.buffers.len(), 1, "unbalanced buffer stack");
        Ok(self.buffers.pop().unwrap_or_default())
    }

    fn execute(&mut self, op: Opcode) -> Result<()> {
        match op {
            Opcode::Constant => {
                let idx = self.fetch_u16();
                let value = self.consts[idx].clone();
                self.push(value)?;
            }
            Opcode::Pop => {
                let value = self.pop();
                let mut rendered = String::new();
                value.render_to(&mut rendered);
                self.write_str(&rendered)?;
            }
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::Empty => self.push(Value::Empty)?,
            Opcode::Nop => self.push(Value::Nop)?,
            Opcode::Eq
            | Opcode::Ne
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Contains
            | Opcode::And
            | Opcode::Or => {
                let right = self.pop();
                let left = self.pop();
                match binary_op(op, &left, &right) {
                    Ok(value) => self.push(value)?,
                    Err(err) => self.recover_push(err, Value::Bool(false))?,
                }
            }
            Opcode::Minus => {
                let value = self.pop();
                match value {
                    Value::Int(n) => self.push(Value::Int(-n))?,
                    Value::Float(x) => self.push(Value::Float(-x))?,
                    other => self.recover_push(
                        Error::typ(format!("cannot negate {}", other.kind())),
                        Value::Nil,
                    )?,
                }
            }
            Opcode::Jump => {
                let pos = self.fetch_u16();
                self.frame_mut().ip = pos;
            }
            Opcode::JumpIfNot => {
                let pos = self.fetch_u16();
                if !self.pop().is_truthy() {
                    self.frame_mut().ip = pos;
                }
            }
            Opcode::JumpIfEmpty => {
                let pos = self.fetch_u16();
                if matches!(self.pop(), Value::Empty) {
                    self.frame_mut().ip = pos;
                }
            }
            Opcode::SetLocal => {
                let idx = self.fetch_u16();
                let value = self.pop();
                let name = self.program.local_names[idx].clone();
                self.context.set_local(&name, value, self.env.limits())?;
            }
            Opcode::GetLocal => {
                let idx = self.fetch_u16();
                let name = &self.program.local_names[idx];
                let value = self
                    .context
                    .get_local(name)
                    .unwrap_or_else(|| Value::undefined(name));
                self.push(value)?;
            }
            Opcode::GetBlock => {
                let idx = self.fetch_u8();
                let value = self.stack[self.frame().base_pointer + idx].clone();
                self.push(value)?;
            }
            Opcode::GetFree => {
                let idx = self.fetch_u8();
                let value = self.frame().free[idx].clone();
                self.push(value)?;
            }
            Opcode::GetIndex => {
                let key = self.pop();
                let obj = self.pop();
                match obj.get_index(&key) {
                    Some(value) => self.push(value)?,
                    None => {
                        let name = key.render();
                        if self.env.strict_undefined() {
                            return Err(Error::typ(format!("'{name}' is undefined")));
                        }
                        self.push(Value::undefined(&name))?;
                    }
                }
            }
            Opcode::Resolve => {
                let name = self.pop().render();
                match self.context.resolve(&name) {
                    Some(value) => self.push(value)?,
                    None => {
                        if self.env.strict_undefined() {
                            return Err(Error::typ(format!("'{name}' is undefined")));
                        }
                        self.push(Value::undefined(&name))?;
                    }
                }
            }
            Opcode::CallFilter => {
                let name_idx = self.fetch_u16();
                let npos = self.fetch_u8();
                let nkw = self.fetch_u8();
                self.call_filter(name_idx, npos, nkw)?;
            }
            Opcode::Capture => {
                self.buffers.push(String::new());
            }
            Opcode::SetCapture => {
                let idx = self.fetch_u16();
                let captured = self.pop_buffer();
                let name = self.program.local_names[idx].clone();
                self.context
                    .set_local(&name, Value::str(captured), self.env.limits())?;
            }
            Opcode::Increment => {
                let idx = self.fetch_u16();
                let name = self.consts[idx].render();
                let value = self.context.increment(&name);
                self.push(Value::Int(value))?;
            }
            Opcode::Decrement => {
                let idx = self.fetch_u16();
                let name = self.consts[idx].render();
                let value = self.context.decrement(&name);
                self.push(Value::Int(value))?;
            }
            Opcode::Cycle => {
                let nargs = self.fetch_u8();
                let group = self.pop();
                let mut args = Vec::with_capacity(nargs);
                for _ in 0..nargs {
                    args.push(self.pop());
                }
                let key = match &group {
                    Value::Nop => {
                        let shape: Vec<String> = args.iter().map(Value::render).collect();
                        format!("$args:{}", shape.join("\u{1}"))
                    }
                    named => format!("$named:{}", named.render()),
                };
                let value = self.context.cycle(key, &args);
                self.push(value)?;
            }
            Opcode::Step => {
                let slot = self.fetch_u16();
                self.step_iterator(slot)?;
            }
            Opcode::For => {
                let num_block_vars = self.fetch_u8();
                let num_free = self.fetch_u8();
                self.exec_loop(false, num_block_vars, num_free)?;
            }
            Opcode::TableRow => {
                let num_block_vars = self.fetch_u8();
                let num_free = self.fetch_u8();
                self.exec_loop(true, num_block_vars, num_free)?;
            }
            Opcode::Stop => self.stop_iteration()?,
            Opcode::Break => self.handle_break()?,
            Opcode::Continue => self.handle_continue()?,
            Opcode::ExecBlock => {
                let nargs = self.fetch_u8();
                let _num_free = self.fetch_u8();
                match self.pop() {
                    Value::TagName(TagDispatch::Include) => self.exec_include(nargs)?,
                    Value::TagName(TagDispatch::Render) => self.exec_render(nargs)?,
                    other => {
                        return Err(Error::typ(format!(
                            "expected a tag dispatch token, found {}",
                            other.kind()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Filters

    fn call_filter(&mut self, name_idx: usize, npos: usize, nkw: usize) -> Result<()> {
        let mut kwargs = Vec::with_capacity(nkw);
        for _ in 0..nkw {
            let value = self.pop();
            let key = self.pop();
            kwargs.push((key.render(), value));
        }
        kwargs.reverse();
        let mut args = Vec::with_capacity(npos);
        for _ in 0..npos {
            args.push(self.pop());
        }
        let value = self.pop();
        let name = self.consts[name_idx].render();

        let Some(filter) = self.env.filters().get(&name).cloned() else {
            // Lax mode passes the left value through unchanged.
            let err = Error::new(ErrorKind::NoSuchFilter, format!("'{name}'"));
            return self.recover_push(err, value);
        };
        let call = FilterCall {
            name: &name,
            value: value.clone(),
            args,
            kwargs,
            env: self.env,
        };
        match filter.call(call) {
            Ok(result) => self.push(result),
            Err(err) => self.recover_push(err, Value::undefined("")),
        }
    }

    // ------------------------------------------------------------------
    // Loops

    /// Begins a `for` or `tablerow` loop: materializes the windowed
    /// iteration items, pushes the loop buffer and frame, and initializes
    /// the block slots with the first item and the loop drop. An empty
    /// sequence pushes the Empty sentinel for the body's `JUMPIFEMPTY`.
    fn exec_loop(&mut self, tablerow: bool, _num_block_vars: usize, num_free: usize) -> Result<()> {
        let block = match self.pop() {
            Value::Block(block) => block,
            other => return Err(Error::typ(format!("expected a compiled block, found {}", other.kind()))),
        };
        let mut free = Vec::with_capacity(num_free);
        for _ in 0..num_free {
            free.push(self.pop());
        }
        free.reverse();
        let start = self.pop();
        let stop = self.pop();
        let cols_value = if tablerow { Some(self.pop()) } else { None };
        let limit_value = self.pop();
        let offset_value = self.pop();
        let reversed = self.pop().is_truthy();
        let drop_name = self.pop().render();
        let var_name = self.pop().render();

        let items = match window_items(&start, &stop, &offset_value, &limit_value, reversed) {
            Ok(items) => items,
            Err(err) => {
                // In warn/lax mode a bad loop source iterates empty, which
                // sends the body to its else branch.
                self.recover(err)?;
                Vec::new()
            }
        };
        let cols = match cols_value.as_ref().map_or(Ok(None), |value| window_bound("cols", value)) {
            Ok(cols) => cols,
            Err(err) => {
                self.recover(err)?;
                None
            }
        };

        let num_locals = usize::from(block.num_locals);
        if self.sp + num_locals + 2 > STACK_SIZE {
            return Err(Error::new(ErrorKind::StackOverflow, "value stack exhausted"));
        }
        self.buffers.push(String::new());
        let base_pointer = self.sp;
        for slot in 0..num_locals {
            self.stack[base_pointer + slot] = Value::Nil;
        }
        self.sp = base_pointer + num_locals;
        let mut frame = Frame {
            block,
            ip: 0,
            base_pointer,
            free,
            pushed_extension: false,
            buffer_index: self.buffers.len() - 1,
        };

        if items.is_empty() {
            self.frames.push(frame);
            return self.push(Value::Empty);
        }

        self.context.count_loop_iteration(self.env.limits())?;
        let length = items.len();
        let (drop_value, iter) = if tablerow {
            let cols = cols.unwrap_or(length);
            let drop = Rc::new(RefCell::new(TableRowDrop::new(drop_name, length, cols)));
            (Value::TableRow(Rc::clone(&drop)), LoopIter::new(items, LoopDrop::Table(drop)))
        } else {
            let parentloop = self.context.current_forloop();
            let drop = Rc::new(RefCell::new(ForLoopDrop::new(drop_name, length, parentloop)));
            (Value::ForLoop(Rc::clone(&drop)), LoopIter::new(items, LoopDrop::For(drop)))
        };

        let iter = Rc::new(RefCell::new(iter));
        let first = {
            let buffer = self.buffers.last_mut().expect("loop buffer");
            iter.borrow_mut().step(buffer)
        }
        .expect("non-empty iterator yields a first item");
        self.stack[base_pointer] = first;
        if num_locals > 1 {
            self.stack[base_pointer + 1] = drop_value.clone();
        }
        self.context.push_extension(ExtensionFrame::Loop {
            var: var_name.into(),
            drop: drop_value,
        });
        frame.pushed_extension = true;
        self.frames.push(frame);
        self.push(Value::Iter(iter))?;
        self.push(Value::Nop)
    }

    /// Advances the top-of-stack iterator into the given block slot, or
    /// takes the end-of-iteration path on exhaustion.
    fn step_iterator(&mut self, slot: usize) -> Result<()> {
        let iter = match &self.stack[self.sp - 1] {
            Value::Iter(iter) => Rc::clone(iter),
            other => return Err(Error::typ(format!("expected a loop iterator, found {}", other.kind()))),
        };
        let next = {
            let buffer = self.buffers.last_mut().expect("loop buffer");
            iter.borrow_mut().step(buffer)
        };
        match next {
            Some(value) => {
                self.context.count_loop_iteration(self.env.limits())?;
                let base_pointer = self.frame().base_pointer;
                self.stack[base_pointer + slot] = value;
                Ok(())
            }
            None => self.stop_iteration(),
        }
    }

    /// Pops the current block frame and flushes its buffer to the parent.
    fn stop_iteration(&mut self) -> Result<()> {
        let frame = self.frames.pop().expect("a block frame to pop");
        if frame.pushed_extension {
            self.context.pop_extension();
        }
        self.sp = frame.base_pointer;
        // Collapse buffers the body opened but never closed (a capture
        // interrupted by break/continue) into the frame's buffer first.
        while self.buffers.len() > frame.buffer_index + 1 {
            let open = self.buffers.pop().unwrap_or_default();
            self.buffers.last_mut().expect("frame buffer").push_str(&open);
        }
        let buffer = self.pop_buffer();
        self.write_str(&buffer)
    }

    fn in_loop(&self) -> bool {
        self.frames.iter().skip(1).any(|frame| frame.block.is_loop)
    }

    /// Unwinds block frames up to and including the nearest loop frame,
    /// flushing each frame's buffer on the way out.
    fn handle_break(&mut self) -> Result<()> {
        if !self.in_loop() {
            return self.recover(Error::typ("'break' used outside of a loop"));
        }
        loop {
            let is_loop = self.frame().block.is_loop;
            self.stop_iteration()?;
            if is_loop {
                return Ok(());
            }
        }
    }

    /// Unwinds to the nearest loop frame, then advances its iterator and
    /// re-enters the body, or finishes the loop on exhaustion.
    fn handle_continue(&mut self) -> Result<()> {
        if !self.in_loop() {
            return self.recover(Error::typ("'continue' used outside of a loop"));
        }
        while !self.frame().block.is_loop {
            self.stop_iteration()?;
        }
        let iter = match &self.stack[self.sp - 1] {
            Value::Iter(iter) => Rc::clone(iter),
            other => return Err(Error::typ(format!("expected a loop iterator, found {}", other.kind()))),
        };
        let next = {
            let buffer = self.buffers.last_mut().expect("loop buffer");
            iter.borrow_mut().step(buffer)
        };
        match next {
            Some(value) => {
                self.context.count_loop_iteration(self.env.limits())?;
                let base_pointer = self.frame().base_pointer;
                self.stack[base_pointer] = value;
                self.frame_mut().ip = loop_body_entry();
                Ok(())
            }
            None => self.stop_iteration(),
        }
    }

    // ------------------------------------------------------------------
    // Partial templates

    fn exec_include(&mut self, nargs: usize) -> Result<()> {
        let name_value = self.pop();
        let bind_value = self.pop();
        let alias_value = self.pop();
        let nkw = nargs.saturating_sub(3) / 2;
        let mut kwargs = Vec::with_capacity(nkw);
        for _ in 0..nkw {
            let value = self.pop();
            let key = self.pop();
            kwargs.push((key.render(), value));
        }

        if self.context.include_disabled() {
            let err = Error::new(
                ErrorKind::DisabledTag,
                "include usage is not allowed in this context",
            );
            return self.recover(err);
        }

        let name = name_value.render();
        self.context.enter_partial("include", self.env.limits())?;
        let outcome = self.run_include(&name, bind_value, alias_value, kwargs);
        self.context.leave_partial();
        match outcome {
            Ok(output) => self.write_str(&output),
            Err(err) => self.recover(err),
        }
    }

    fn run_include(
        &mut self,
        name: &str,
        bind: Value,
        alias: Value,
        kwargs: Vec<(String, Value)>,
    ) -> Result<String> {
        let (program, warnings) = self.env.compile_partial(name)?;
        for warning in warnings {
            self.context.warn(warning);
        }
        let mut bindings: AHashMap<String, Value> = kwargs.into_iter().collect();
        if !matches!(bind, Value::Nop) {
            let key = match &alias {
                Value::Str(s) => s.to_string(),
                _ => template_base_name(name).to_string(),
            };
            bindings.insert(key, bind);
        }
        let pushed = !bindings.is_empty();
        if pushed {
            self.context.push_extension(ExtensionFrame::Bindings(bindings));
        }
        let result = Vm::new(self.env, program, &mut *self.context, false).run();
        if pushed {
            self.context.pop_extension();
        }
        result.map_err(|err| err.in_template(name))
    }

    fn exec_render(&mut self, nargs: usize) -> Result<()> {
        let name_value = self.pop();
        let repeat = self.pop().is_truthy();
        let bind_value = self.pop();
        let alias_value = self.pop();
        let nkw = nargs.saturating_sub(4) / 2;
        let mut kwargs = Vec::with_capacity(nkw);
        for _ in 0..nkw {
            let value = self.pop();
            let key = self.pop();
            kwargs.push((key.render(), value));
        }

        let name = name_value.render();
        self.context.enter_partial("render", self.env.limits())?;
        let outcome = self.run_render(&name, repeat, bind_value, alias_value, kwargs);
        self.context.leave_partial();
        match outcome {
            Ok(output) => self.write_str(&output),
            Err(err) => self.recover(err),
        }
    }

    fn run_render(
        &mut self,
        name: &str,
        repeat: bool,
        bind: Value,
        alias: Value,
        kwargs: Vec<(String, Value)>,
    ) -> Result<String> {
        let (program, warnings) = self.env.compile_partial(name)?;
        for warning in warnings {
            self.context.warn(warning);
        }
        let key = match &alias {
            Value::Str(s) => s.to_string(),
            _ => template_base_name(name).to_string(),
        };
        let mut bindings: AHashMap<String, Value> = kwargs.into_iter().collect();
        let mut child = self.context.isolated_child(self.env.limits());
        let mut output = String::new();

        let result = (|| -> Result<()> {
            if repeat {
                let items = iterable_items(&bind)?;
                if !bindings.is_empty() {
                    child.push_extension(ExtensionFrame::Bindings(bindings));
                }
                // A fresh forloop drop per render invocation, deliberately
                // without a parentloop link into the caller.
                let drop = Rc::new(RefCell::new(ForLoopDrop::new(
                    format!("{key}-{name}"),
                    items.len(),
                    None,
                )));
                let drop_value = Value::ForLoop(Rc::clone(&drop));
                child.push_extension(ExtensionFrame::Loop {
                    var: key.clone().into(),
                    drop: drop_value,
                });
                for item in items {
                    child.count_loop_iteration(self.env.limits())?;
                    drop.borrow_mut().step(item);
                    output.push_str(&Vm::new(self.env, Arc::clone(&program), &mut child, false).run()?);
                }
            } else {
                if !matches!(bind, Value::Nop) {
                    bindings.insert(key, bind);
                }
                if !bindings.is_empty() {
                    child.push_extension(ExtensionFrame::Bindings(bindings));
                }
                output = Vm::new(self.env, program, &mut child, false).run()?;
            }
            Ok(())
        })();

        self.context.absorb(child);
        result.map_err(|err| err.in_template(name))?;
        Ok(output)
    }
}

/// Converts a pool constant into a runtime value.
fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Int(n) => Value::Int(*n),
        Constant::Float(x) => Value::Float(*x),
        Constant::Str(s) => Value::str(s),
        Constant::Range { start, stop } => Value::Range(RangeValue { start: *start, stop: *stop }),
        Constant::Block(block) => Value::Block(Arc::clone(block)),
        Constant::Tag(tag) => Value::TagName(*tag),
    }
}

fn binary_op(op: Opcode, left: &Value, right: &Value) -> Result<Value> {
    use std::cmp::Ordering;
    let result = match op {
        Opcode::Eq => left.liquid_eq(right),
        Opcode::Ne => !left.liquid_eq(right),
        Opcode::Gt => left.liquid_cmp(right)? == Ordering::Greater,
        Opcode::Ge => left.liquid_cmp(right)? != Ordering::Less,
        Opcode::Contains => left.liquid_contains(right)?,
        Opcode::And => left.is_truthy() && right.is_truthy(),
        Opcode::Or => left.is_truthy() || right.is_truthy(),
        _ => unreachable!("not a binary opcode"),
    };
    Ok(Value::Bool(result))
}

/// Turns a loop source into a list of items.
///
/// Undefined iterates as empty; a hash yields `[key, value]` pairs; a
/// string is a single item.
fn iterable_items(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.as_ref().clone()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Value::array(vec![Value::str(k), v.clone()]))
            .collect()),
        Value::Range(range) => Ok(range.iter().map(Value::Int).collect()),
        Value::Str(s) => Ok(vec![Value::Str(Rc::clone(s))]),
        Value::Undefined(_) => Ok(Vec::new()),
        other => Err(Error::typ(format!("can't iterate {}", other.kind()))),
    }
}

/// Coerces an `offset`/`limit`/`cols` operand. Nil-likes mean "not given".
fn window_bound(what: &str, value: &Value) -> Result<Option<usize>> {
    match value {
        Value::Nil | Value::Undefined(_) | Value::Nop => Ok(None),
        Value::Int(n) => Ok(Some(usize::try_from(*n).unwrap_or(0))),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Some(usize::try_from(n).unwrap_or(0)))
            .map_err(|_| Error::typ(format!("invalid '{what}' value '{s}'"))),
        other => Err(Error::typ(format!("invalid '{what}' value of kind {}", other.kind()))),
    }
}

/// Materializes and windows the iteration sequence: apply `offset` and
/// `limit`, then reverse if asked. The length is computed once, here.
fn window_items(
    start: &Value,
    stop: &Value,
    offset: &Value,
    limit: &Value,
    reversed: bool,
) -> Result<Vec<Value>> {
    let mut items = match (start, stop) {
        (Value::Int(a), Value::Int(b)) => RangeValue { start: *a, stop: *b }
            .iter()
            .map(Value::Int)
            .collect(),
        (Value::Int(_), other) => {
            return Err(Error::typ(format!(
                "range bounds must be integers, found {}",
                other.kind()
            )));
        }
        _ => iterable_items(start)?,
    };
    if let Some(offset) = window_bound("offset", offset)? {
        items.drain(..offset.min(items.len()));
    }
    if let Some(limit) = window_bound("limit", limit)? {
        items.truncate(limit);
    }
    if reversed {
        items.reverse();
    }
    Ok(items)
}
