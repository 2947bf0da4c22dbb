//! The parse-tree to bytecode compiler.
//!
//! Compilation keeps a stack of scopes, one per compiled block, each with
//! its own instruction buffer and the last two emitted instructions. The
//! symbol table nests in lockstep with the scopes: template-level names are
//! LOCAL symbols resolved through the VM's name-keyed namespace, loop body
//! names are BLOCK symbols addressed relative to the frame base pointer,
//! and a BLOCK symbol referenced from a nested block becomes a FREE symbol
//! captured at loop entry.
//!
//! Forward jumps are emitted with a placeholder operand and patched via
//! `change_operand` once the target is known. Every patched target is
//! strictly past its patch site.

use std::sync::Arc;

use ahash::AHashMap;

use crate::ast::{Block, ConditionalBranch, Node, ParseTree, WhenClause};
use crate::bytecode::code::{CompiledBlock, Constant, Program, TagDispatch, loop_body_entry};
use crate::bytecode::op::{Instructions, Opcode, make};
use crate::error::{Error, Result};
use crate::expression::{
    Expression, FilterCallExpr, FilteredExpression, IdentifierPath, InfixOp, LoopExpression,
    LoopSource, PathElement, PrefixOp,
};

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// Template-scope: the VM's name-keyed locals namespace.
    Local,
    /// A stack slot of the current compiled block.
    Block,
    /// Captured from an enclosing compiled block.
    Free,
}

/// A resolved name: where it lives and its dense index there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
struct SymbolTable {
    store: AHashMap<String, Symbol>,
    num_definitions: usize,
    /// Outer-scope originals of this block's FREE symbols, in index order.
    free: Vec<Symbol>,
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

impl CompilationScope {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            last: None,
            previous: None,
        }
    }
}

/// Hashable key for constant pool deduplication.
#[derive(Debug, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    /// Float bit pattern; equal bits are equal constants.
    Float(u64),
    Str(Box<str>),
    Range(i64, i64),
    Tag(TagDispatch),
}

/// Compiles a parse tree into a program.
pub fn compile(tree: &ParseTree) -> Result<Program> {
    let mut compiler = Compiler::new();
    for statement in &tree.statements {
        compiler.compile_node(statement)?;
    }
    Ok(compiler.finish())
}

struct Compiler {
    scopes: Vec<CompilationScope>,
    tables: Vec<SymbolTable>,
    constants: Vec<Constant>,
    constant_index: AHashMap<ConstKey, usize>,
    local_names: Vec<Box<str>>,
    synthesized: usize,
}

impl Compiler {
    fn new() -> Self {
        Self {
            scopes: vec![CompilationScope::new()],
            tables: vec![SymbolTable::default()],
            constants: Vec::new(),
            constant_index: AHashMap::new(),
            local_names: Vec::new(),
            synthesized: 0,
        }
    }

    fn finish(mut self) -> Program {
        let scope = self.scopes.pop().expect("root scope");
        Program {
            main: Arc::new(CompiledBlock {
                instructions: scope.instructions,
                num_locals: 0,
                num_parameters: 0,
                num_free: 0,
                is_loop: false,
            }),
            constants: self.constants,
            local_names: self.local_names,
        }
    }

    // ------------------------------------------------------------------
    // Scopes and symbols

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::new());
        self.tables.push(SymbolTable::default());
    }

    /// Pops the current scope, returning its instructions, the captured
    /// free symbols (outer-scope originals) and the block definition count.
    fn leave_scope(&mut self) -> (Instructions, Vec<Symbol>, usize) {
        let scope = self.scopes.pop().expect("nested scope");
        let table = self.tables.pop().expect("nested symbol table");
        (scope.instructions, table.free, table.num_definitions)
    }

    /// Defines (or reuses) a template-scope name in the root table.
    fn define_local(&mut self, name: &str) -> Symbol {
        if let Some(symbol) = self.tables[0].store.get(name) {
            return symbol.clone();
        }
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Local,
            index: self.local_names.len(),
        };
        self.local_names.push(name.into());
        self.tables[0].store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Defines a block-scope name in the current (nested) table.
    fn define_block(&mut self, name: &str) -> Symbol {
        let table = self.tables.last_mut().expect("symbol table");
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Block,
            index: table.num_definitions,
        };
        table.num_definitions += 1;
        table.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn resolve(&mut self, name: &str) -> Option<Symbol> {
        self.resolve_at(self.tables.len() - 1, name)
    }

    /// Walks outward from `layer`. A BLOCK symbol found in an enclosing
    /// block becomes a FREE symbol here (and at every intermediate layer),
    /// recorded in the free-symbol list for capture at loop entry.
    fn resolve_at(&mut self, layer: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.tables[layer].store.get(name) {
            return Some(symbol.clone());
        }
        if layer == 0 {
            return None;
        }
        let outer = self.resolve_at(layer - 1, name)?;
        match outer.scope {
            SymbolScope::Local => Some(outer),
            SymbolScope::Block | SymbolScope::Free => {
                let table = &mut self.tables[layer];
                let symbol = Symbol {
                    name: name.to_string(),
                    scope: SymbolScope::Free,
                    index: table.free.len(),
                };
                table.free.push(outer);
                table.store.insert(name.to_string(), symbol.clone());
                Some(symbol)
            }
        }
    }

    /// Emits the load matching a symbol's scope.
    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Block => self.emit(Opcode::GetBlock, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
        };
    }

    // ------------------------------------------------------------------
    // Emission

    fn current_scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compilation scope")
    }

    fn current_position(&self) -> usize {
        self.scopes.last().expect("compilation scope").instructions.len()
    }

    /// Encodes and appends one instruction, returning its position.
    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let scope = self.current_scope();
        let position = scope.instructions.len();
        scope.instructions.extend_from_slice(&instruction);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode: op, position });
        position
    }

    #[cfg(test)]
    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scopes
            .last()
            .and_then(|scope| scope.last)
            .is_some_and(|last| last.opcode == op)
    }

    #[cfg(test)]
    fn previous_instruction_is(&self, op: Opcode) -> bool {
        self.scopes
            .last()
            .and_then(|scope| scope.previous)
            .is_some_and(|previous| previous.opcode == op)
    }

    /// Rewrites the operands of an already emitted instruction in place.
    fn change_operand(&mut self, position: usize, operands: &[usize]) {
        let scope = self.current_scope();
        let op = Opcode::decode(scope.instructions[position]).expect("patch site holds an opcode");
        let instruction = make(op, operands);
        scope.instructions[position..position + instruction.len()].copy_from_slice(&instruction);
    }

    fn add_constant(&mut self, constant: Constant) -> usize {
        let key = match &constant {
            Constant::Int(n) => Some(ConstKey::Int(*n)),
            Constant::Float(x) => Some(ConstKey::Float(x.to_bits())),
            Constant::Str(s) => Some(ConstKey::Str(s.clone())),
            Constant::Range { start, stop } => Some(ConstKey::Range(*start, *stop)),
            Constant::Tag(tag) => Some(ConstKey::Tag(*tag)),
            Constant::Block(_) => None,
        };
        if let Some(key) = key {
            if let Some(&idx) = self.constant_index.get(&key) {
                return idx;
            }
            let idx = self.constants.len();
            self.constants.push(constant);
            self.constant_index.insert(key, idx);
            idx
        } else {
            self.constants.push(constant);
            self.constants.len() - 1
        }
    }

    fn emit_constant(&mut self, constant: Constant) -> usize {
        let idx = self.add_constant(constant);
        self.emit(Opcode::Constant, &[idx])
    }

    fn emit_string(&mut self, s: &str) -> usize {
        self.emit_constant(Constant::Str(s.into()))
    }

    // ------------------------------------------------------------------
    // Nodes

    /// Compiles one node, stamping errors with the node's source line.
    fn compile_node(&mut self, node: &Node) -> Result<()> {
        self.compile_node_inner(node).map_err(|err| match node.line() {
            Some(line) => err.at_line(line),
            None => err,
        })
    }

    fn compile_node_inner(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Literal { text } => {
                self.emit_string(text);
                self.emit(Opcode::Pop, &[]);
            }
            Node::Output { expr, .. } => {
                self.compile_filtered(expr)?;
                self.emit(Opcode::Pop, &[]);
            }
            Node::Assign { expr, .. } => {
                self.compile_filtered(&expr.value)?;
                let symbol = self.define_local(&expr.name);
                self.emit(Opcode::SetLocal, &[symbol.index]);
            }
            Node::Capture { name, block, .. } => {
                self.emit(Opcode::Capture, &[]);
                self.compile_block(block)?;
                let symbol = self.define_local(name);
                self.emit(Opcode::SetCapture, &[symbol.index]);
            }
            Node::If { branches, default, .. } => {
                self.compile_if(branches, default.as_ref(), false)?;
            }
            Node::Unless { branches, default, .. } => {
                self.compile_if(branches, default.as_ref(), true)?;
            }
            Node::Case { expr, whens, default, .. } => {
                self.compile_case(expr, whens, default.as_ref())?;
            }
            Node::For { expr, block, default, .. } => {
                self.compile_loop(expr, block, default.as_ref(), false)?;
            }
            Node::TableRow { expr, block, .. } => {
                self.compile_loop(expr, block, None, true)?;
            }
            Node::Cycle { group, args, .. } => {
                for arg in args.iter().rev() {
                    self.compile_expression(arg)?;
                }
                match group {
                    Some(group) => self.compile_expression(group)?,
                    None => {
                        self.emit(Opcode::Nop, &[]);
                    }
                }
                self.emit(Opcode::Cycle, &[args.len()]);
                self.emit(Opcode::Pop, &[]);
            }
            Node::Increment { name, .. } => {
                let idx = self.add_constant(Constant::Str(name.as_str().into()));
                self.emit(Opcode::Increment, &[idx]);
                self.emit(Opcode::Pop, &[]);
            }
            Node::Decrement { name, .. } => {
                let idx = self.add_constant(Constant::Str(name.as_str().into()));
                self.emit(Opcode::Decrement, &[idx]);
                self.emit(Opcode::Pop, &[]);
            }
            Node::Break { .. } => {
                self.emit(Opcode::Break, &[]);
            }
            Node::Continue { .. } => {
                self.emit(Opcode::Continue, &[]);
            }
            Node::Include { name, bind, args, .. } => {
                for (key, value) in args {
                    self.emit_string(key);
                    self.compile_expression(value)?;
                }
                match bind.as_ref().and_then(|b| b.alias.as_deref()) {
                    Some(alias) => {
                        self.emit_string(alias);
                    }
                    None => {
                        self.emit(Opcode::Nop, &[]);
                    }
                }
                match bind {
                    Some(bind) => self.compile_expression(&bind.value)?,
                    None => {
                        self.emit(Opcode::Nop, &[]);
                    }
                }
                self.compile_expression(name)?;
                self.emit_constant(Constant::Tag(TagDispatch::Include));
                self.emit(Opcode::ExecBlock, &[3 + 2 * args.len(), 0]);
            }
            Node::Render { name, bind, repeat, args, .. } => {
                for (key, value) in args {
                    self.emit_string(key);
                    self.compile_expression(value)?;
                }
                match bind.as_ref().and_then(|b| b.alias.as_deref()) {
                    Some(alias) => {
                        self.emit_string(alias);
                    }
                    None => {
                        self.emit(Opcode::Nop, &[]);
                    }
                }
                match bind {
                    Some(bind) => self.compile_expression(&bind.value)?,
                    None => {
                        self.emit(Opcode::Nop, &[]);
                    }
                }
                self.emit(if *repeat { Opcode::True } else { Opcode::False }, &[]);
                self.compile_expression(name)?;
                self.emit_constant(Constant::Tag(TagDispatch::Render));
                self.emit(Opcode::ExecBlock, &[4 + 2 * args.len(), 0]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        for statement in &block.statements {
            self.compile_node(statement)?;
        }
        Ok(())
    }

    /// Compiles an `if`/`unless` chain.
    ///
    /// For `unless`, the first branch runs on a falsy condition: `JUMPIFNOT`
    /// jumps straight into the body and a trampoline jump skips it
    /// otherwise. Later `elsif` branches behave as in `if`.
    fn compile_if(
        &mut self,
        branches: &[ConditionalBranch],
        default: Option<&Block>,
        invert_first: bool,
    ) -> Result<()> {
        let mut end_jumps = Vec::new();

        for (i, branch) in branches.iter().enumerate() {
            self.compile_expression(&branch.condition)?;
            if invert_first && i == 0 {
                let jump_to_body = self.emit(Opcode::JumpIfNot, &[9999]);
                let jump_to_next = self.emit(Opcode::Jump, &[9999]);
                let body = self.current_position();
                self.change_operand(jump_to_body, &[body]);
                self.compile_block(&branch.block)?;
                end_jumps.push(self.emit(Opcode::Jump, &[9999]));
                let next = self.current_position();
                self.change_operand(jump_to_next, &[next]);
            } else {
                let jump_to_next = self.emit(Opcode::JumpIfNot, &[9999]);
                self.compile_block(&branch.block)?;
                end_jumps.push(self.emit(Opcode::Jump, &[9999]));
                let next = self.current_position();
                self.change_operand(jump_to_next, &[next]);
            }
        }

        if let Some(default) = default {
            self.compile_block(default)?;
        }

        let end = self.current_position();
        for jump in end_jumps {
            self.change_operand(jump, &[end]);
        }
        Ok(())
    }

    /// Compiles a `case` tag.
    ///
    /// Every `when` whose candidate list matches fires, so the branches
    /// chain without an early exit; a synthesized local records whether any
    /// branch fired, and the `else` block runs only when it did not.
    fn compile_case(
        &mut self,
        discriminant: &Expression,
        whens: &[WhenClause],
        default: Option<&Block>,
    ) -> Result<()> {
        let flag = default.map(|_| {
            let name = format!("$case{}", self.synthesized);
            self.synthesized += 1;
            let symbol = self.define_local(&name);
            self.emit(Opcode::False, &[]);
            self.emit(Opcode::SetLocal, &[symbol.index]);
            symbol
        });

        for when in whens {
            for (i, candidate) in when.candidates.iter().enumerate() {
                self.compile_expression(discriminant)?;
                self.compile_expression(candidate)?;
                self.emit(Opcode::Eq, &[]);
                if i > 0 {
                    self.emit(Opcode::Or, &[]);
                }
            }
            let jump_past = self.emit(Opcode::JumpIfNot, &[9999]);
            self.compile_block(&when.block)?;
            if let Some(flag) = &flag {
                self.emit(Opcode::True, &[]);
                self.emit(Opcode::SetLocal, &[flag.index]);
            }
            let past = self.current_position();
            self.change_operand(jump_past, &[past]);
        }

        if let (Some(default), Some(flag)) = (default, &flag) {
            self.emit(Opcode::GetLocal, &[flag.index]);
            let jump_to_else = self.emit(Opcode::JumpIfNot, &[9999]);
            let jump_to_end = self.emit(Opcode::Jump, &[9999]);
            let else_start = self.current_position();
            self.change_operand(jump_to_else, &[else_start]);
            self.compile_block(default)?;
            let end = self.current_position();
            self.change_operand(jump_to_end, &[end]);
        }
        Ok(())
    }

    /// Compiles a `for` or `tablerow` loop.
    ///
    /// Loop parameters go on the stack outermost first: the loop variable
    /// name, the drop name, the `reversed` flag, `offset`, `limit`, the
    /// column count (tablerow), the source (stop under start for ranges,
    /// nil under the collection otherwise), then the captured free
    /// variables and the compiled body.
    fn compile_loop(
        &mut self,
        expr: &LoopExpression,
        block: &Block,
        default: Option<&Block>,
        tablerow: bool,
    ) -> Result<()> {
        self.emit_string(&expr.var);
        self.emit_string(&expr.drop_name());
        self.emit(if expr.reversed { Opcode::True } else { Opcode::False }, &[]);
        self.compile_optional(expr.offset.as_ref())?;
        self.compile_optional(expr.limit.as_ref())?;
        if tablerow {
            self.compile_optional(expr.cols.as_ref())?;
        }
        match &expr.source {
            LoopSource::Range { start, stop } => {
                self.compile_expression(stop)?;
                self.compile_expression(start)?;
            }
            LoopSource::Identifier(path) => {
                self.emit(Opcode::Nil, &[]);
                self.compile_identifier(path)?;
            }
        }

        self.enter_scope();
        let var = self.define_block(&expr.var);
        self.define_block(if tablerow { "tablerowloop" } else { "forloop" });

        let jump_if_empty = self.emit(Opcode::JumpIfEmpty, &[9999]);
        debug_assert_eq!(self.current_position(), loop_body_entry());
        self.compile_block(block)?;
        self.emit(Opcode::Step, &[var.index]);
        self.emit(Opcode::Jump, &[loop_body_entry()]);
        let empty_target = self.current_position();
        self.change_operand(jump_if_empty, &[empty_target]);
        if let Some(default) = default {
            self.compile_block(default)?;
        }
        self.emit(Opcode::Stop, &[]);

        let (instructions, free_symbols, num_locals) = self.leave_scope();
        let num_free = free_symbols.len();
        let compiled = CompiledBlock {
            instructions,
            num_locals: u8::try_from(num_locals)
                .map_err(|_| Error::typ("too many block-scope names"))?,
            num_parameters: 0,
            num_free: u8::try_from(num_free).map_err(|_| Error::typ("too many free variables"))?,
            is_loop: !tablerow,
        };
        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }
        self.emit_constant(Constant::Block(Arc::new(compiled)));
        self.emit(
            if tablerow { Opcode::TableRow } else { Opcode::For },
            &[2, num_free],
        );
        Ok(())
    }

    /// Compiles an optional loop modifier, pushing nil when absent.
    fn compile_optional(&mut self, expr: Option<&Expression>) -> Result<()> {
        match expr {
            Some(expr) => self.compile_expression(expr),
            None => {
                self.emit(Opcode::Nil, &[]);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    fn compile_filtered(&mut self, expr: &FilteredExpression) -> Result<()> {
        self.compile_expression(&expr.expr)?;
        for filter in &expr.filters {
            self.compile_filter(filter)?;
        }
        Ok(())
    }

    fn compile_filter(&mut self, filter: &FilterCallExpr) -> Result<()> {
        // Positional arguments are pushed in reverse so the VM pops them in
        // declaration order; keyword pairs sit above them.
        for arg in filter.args.iter().rev() {
            self.compile_expression(arg)?;
        }
        for (key, value) in &filter.kwargs {
            self.emit_string(key);
            self.compile_expression(value)?;
        }
        let name_idx = self.add_constant(Constant::Str(filter.name.as_str().into()));
        self.emit(
            Opcode::CallFilter,
            &[name_idx, filter.args.len(), filter.kwargs.len()],
        );
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Nil => {
                self.emit(Opcode::Nil, &[]);
            }
            Expression::Empty => {
                self.emit(Opcode::Empty, &[]);
            }
            Expression::Bool(true) => {
                self.emit(Opcode::True, &[]);
            }
            Expression::Bool(false) => {
                self.emit(Opcode::False, &[]);
            }
            Expression::Int(n) => {
                self.emit_constant(Constant::Int(*n));
            }
            Expression::Float(x) => {
                self.emit_constant(Constant::Float(*x));
            }
            Expression::Str(s) => {
                self.emit_string(s);
            }
            Expression::Range { start, stop } => match (start.as_ref(), stop.as_ref()) {
                (Expression::Int(start), Expression::Int(stop)) => {
                    self.emit_constant(Constant::Range { start: *start, stop: *stop });
                }
                _ => {
                    return Err(Error::typ(
                        "range bounds outside a loop must be integer literals",
                    ));
                }
            },
            Expression::Identifier(path) => self.compile_identifier(path)?,
            Expression::Prefix { op: PrefixOp::Minus, right } => {
                self.compile_expression(right)?;
                self.emit(Opcode::Minus, &[]);
            }
            Expression::Infix { left, op, right } => match op {
                // The opcode set has no LT/LE: swap the operand order and
                // compare with GT/GE.
                InfixOp::Lt | InfixOp::Le => {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(
                        if *op == InfixOp::Lt { Opcode::Gt } else { Opcode::Ge },
                        &[],
                    );
                }
                _ => {
                    self.compile_expression(left)?;
                    self.compile_expression(right)?;
                    let opcode = match op {
                        InfixOp::Eq => Opcode::Eq,
                        InfixOp::Ne => Opcode::Ne,
                        InfixOp::Gt => Opcode::Gt,
                        InfixOp::Ge => Opcode::Ge,
                        InfixOp::Contains => Opcode::Contains,
                        InfixOp::And => Opcode::And,
                        InfixOp::Or => Opcode::Or,
                        InfixOp::Lt | InfixOp::Le => unreachable!("handled above"),
                    };
                    self.emit(opcode, &[]);
                }
            },
        }
        Ok(())
    }

    /// Compiles an identifier path.
    ///
    /// The head resolves through the symbol table when the name is known;
    /// otherwise it becomes a runtime `RESOLVE`. Dotted and bracketed
    /// access is repeated `GETINDEX`, with nested subscripts compiled
    /// recursively.
    fn compile_identifier(&mut self, path: &IdentifierPath) -> Result<()> {
        let mut elements = path.0.iter();
        let Some(PathElement::Name(head)) = elements.next() else {
            return Err(Error::typ("identifier paths start with a name"));
        };
        match self.resolve(head) {
            Some(symbol) => self.load_symbol(&symbol),
            None => {
                self.emit_string(head);
                self.emit(Opcode::Resolve, &[]);
            }
        }
        for element in elements {
            match element {
                PathElement::Name(name) => {
                    self.emit_string(name);
                }
                PathElement::Index(index) => {
                    self.emit_constant(Constant::Int(*index));
                }
                PathElement::Nested(nested) => self.compile_identifier(nested)?,
            }
            self.emit(Opcode::GetIndex, &[]);
        }
        Ok(())
    }
}

/// Decodes instructions into `(opcode, operands)` pairs, for tests.
#[cfg(test)]
pub fn decode(ins: &[u8]) -> Vec<(Opcode, Vec<usize>)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < ins.len() {
        let op = Opcode::decode(ins[pos]).expect("valid opcode");
        let (operands, read) = crate::bytecode::op::read_operands(op, ins, pos + 1);
        out.push((op, operands));
        pos += 1 + read;
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Mode;
    use crate::parse::parse;

    fn compile_source(source: &str) -> Program {
        let (tree, _) = parse(source, Mode::Strict).unwrap();
        compile(&tree).unwrap()
    }

    #[test]
    fn output_compiles_to_resolve_and_pop() {
        let program = compile_source("{{ you }}");
        assert_eq!(
            decode(&program.main.instructions),
            vec![
                (Opcode::Constant, vec![0]),
                (Opcode::Resolve, vec![]),
                (Opcode::Pop, vec![]),
            ]
        );
        assert_eq!(program.constants, vec![Constant::Str("you".into())]);
    }

    #[test]
    fn dotted_access_is_repeated_getindex() {
        let program = compile_source("{{ a.b[1] }}");
        assert_eq!(
            decode(&program.main.instructions),
            vec![
                (Opcode::Constant, vec![0]),
                (Opcode::Resolve, vec![]),
                (Opcode::Constant, vec![1]),
                (Opcode::GetIndex, vec![]),
                (Opcode::Constant, vec![2]),
                (Opcode::GetIndex, vec![]),
                (Opcode::Pop, vec![]),
            ]
        );
    }

    #[test]
    fn assign_defines_a_dense_local_slot() {
        let program = compile_source("{% assign x = 1 %}{% assign y = 2 %}{% assign x = 3 %}");
        let names: Vec<&str> = program.local_names.iter().map(AsRef::as_ref).collect();
        assert_eq!(names, vec!["x", "y"]);
        let decoded = decode(&program.main.instructions);
        assert_eq!(decoded[1], (Opcode::SetLocal, vec![0]));
        assert_eq!(decoded[3], (Opcode::SetLocal, vec![1]));
        // Re-assignment reuses the slot.
        assert_eq!(decoded[5], (Opcode::SetLocal, vec![0]));
    }

    #[test]
    fn less_than_swaps_operands_for_gt() {
        let program = compile_source("{% if a < b %}x{% endif %}");
        let decoded = decode(&program.main.instructions);
        // b resolved first, then a, then GT.
        assert_eq!(program.constants[0], Constant::Str("b".into()));
        assert_eq!(program.constants[1], Constant::Str("a".into()));
        assert_eq!(decoded[4], (Opcode::Gt, vec![]));
    }

    #[test]
    fn if_jumps_are_patched_forward() {
        let program = compile_source("{% if a %}1{% else %}2{% endif %}");
        let decoded = decode(&program.main.instructions);
        let (Opcode::JumpIfNot, not_target) = &decoded[2] else {
            panic!("expected JumpIfNot, got {decoded:?}");
        };
        let (Opcode::Jump, end_target) = &decoded[5] else {
            panic!("expected Jump, got {decoded:?}");
        };
        // Both jumps land strictly past their patch sites.
        assert_eq!(not_target, &vec![14]);
        assert_eq!(end_target, &vec![18]);
        assert_eq!(decoded.len(), 8);
    }

    #[test]
    fn loop_bodies_become_block_constants() {
        let program = compile_source("{% for i in (1..3) %}{{ i }}{% endfor %}");
        let block = program
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Block(block) => Some(block),
                _ => None,
            })
            .expect("a compiled block constant");
        assert!(block.is_loop);
        assert_eq!(block.num_locals, 2);
        assert_eq!(block.num_free, 0);
        let body = decode(&block.instructions);
        assert_eq!(body[0].0, Opcode::JumpIfEmpty);
        // Loop variable is block slot 0.
        assert_eq!(body[1], (Opcode::GetBlock, vec![0]));
        assert_eq!(body[3], (Opcode::Step, vec![0]));
        assert_eq!(body[4], (Opcode::Jump, vec![loop_body_entry()]));
        assert_eq!(body.last().unwrap().0, Opcode::Stop);

        let main = decode(&program.main.instructions);
        assert_eq!(main.last().unwrap(), &(Opcode::For, vec![2, 0]));
    }

    #[test]
    fn nested_loops_capture_outer_block_vars_as_free() {
        let program = compile_source(
            "{% for a in (1..2) %}{% for b in (1..2) %}{{ a }}{{ b }}{% endfor %}{% endfor %}",
        );
        let blocks: Vec<_> = program
            .constants
            .iter()
            .filter_map(|c| match c {
                Constant::Block(block) => Some(block),
                _ => None,
            })
            .collect();
        assert_eq!(blocks.len(), 2);
        // Inner block compiled first: reads `a` as a free variable.
        let inner = decode(&blocks[0].instructions);
        assert_eq!(blocks[0].num_free, 1);
        assert!(inner.contains(&(Opcode::GetFree, vec![0])));
        // Outer block loads `a` from its own slot before pushing the inner
        // block constant.
        let outer = decode(&blocks[1].instructions);
        assert!(outer.contains(&(Opcode::GetBlock, vec![0])));
        assert!(outer.iter().any(|(op, operands)| *op == Opcode::For && operands == &vec![2, 1]));
    }

    #[test]
    fn tablerow_blocks_are_not_loop_blocks() {
        let program = compile_source("{% tablerow i in (1..4) cols:2 %}{{ i }}{% endtablerow %}");
        let block = program
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Block(block) => Some(block),
                _ => None,
            })
            .expect("a compiled block constant");
        assert!(!block.is_loop);
        let main = decode(&program.main.instructions);
        assert_eq!(main.last().unwrap(), &(Opcode::TableRow, vec![2, 0]));
    }

    #[test]
    fn constants_are_deduplicated() {
        let program = compile_source("{{ 'a' }}{{ 'a' }}{{ 1 }}{{ 1 }}");
        assert_eq!(
            program.constants,
            vec![Constant::Str("a".into()), Constant::Int(1)]
        );
    }

    #[test]
    fn filters_encode_positional_and_keyword_counts() {
        let program = compile_source("{{ x | default: 'none', allow_false: true }}");
        let decoded = decode(&program.main.instructions);
        let call = decoded
            .iter()
            .find(|(op, _)| *op == Opcode::CallFilter)
            .expect("a CallFilter instruction");
        let name_idx = call.1[0];
        assert_eq!(program.constants[name_idx], Constant::Str("default".into()));
        assert_eq!(&call.1[1..], &[1, 1]);
    }

    #[test]
    fn case_without_else_has_no_flag_local() {
        let program = compile_source("{% case x %}{% when 1 %}a{% when 1 %}b{% endcase %}");
        assert!(program.local_names.is_empty());
    }

    #[test]
    fn dynamic_range_outside_loop_is_rejected() {
        let (tree, _) = parse("{{ (1..n) }}", Mode::Strict).unwrap();
        assert!(compile(&tree).is_err());
    }

    #[test]
    fn peephole_state_tracks_the_last_two_instructions() {
        let mut compiler = Compiler::new();
        compiler.emit(Opcode::True, &[]);
        compiler.emit(Opcode::Pop, &[]);
        assert!(compiler.last_instruction_is(Opcode::Pop));
        assert!(compiler.previous_instruction_is(Opcode::True));
        assert!(!compiler.last_instruction_is(Opcode::True));
    }
}
