use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, warn};

use crate::ast::{Expr, Stmt};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::instruction::{Instruction, Operand};
use crate::opcode::OperationKind;
use crate::types::Type;

/// Handle to a variable. Locals are addressed by frame slot, arguments
/// included; statics and globals live in the unit-wide [`Globals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarRef {
    Local(u32),
    Static(u32),
    Global(u32),
    Temp(u32),
}

impl VarRef {
    pub fn default_name(self) -> String {
        match self {
            VarRef::Local(i) => format!("local_{i}"),
            VarRef::Static(i) => format!("static_{i}"),
            VarRef::Global(i) => format!("global_{i}"),
            VarRef::Temp(i) => format!("temp_{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Argument,
    Local,
    Static,
    Global,
    Temporary,
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Unchanged,
    Refined,
    Conflict { existing: Type, inferred: Type },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub index: u32,
    pub identifier: String,
    pub ty: Type,
    pub scope: VarScope,
    /// Set once a concrete type has been inferred.
    pub type_locked: bool,
    pub initializer: Option<i64>,
}

impl Variable {
    pub fn new(index: u32, identifier: impl Into<String>, scope: VarScope) -> Self {
        Self {
            index,
            identifier: identifier.into(),
            ty: Type::unknown(),
            scope,
            type_locked: false,
            initializer: None,
        }
    }

    /// Records that this variable holds a value of type `ty`.
    ///
    /// The unknown type never locks. Once locked, only refinements of unknown
    /// parts are accepted; anything else leaves the type alone and reports a
    /// conflict.
    pub fn infer(&mut self, ty: &Type) -> Inference {
        if ty.is_unknown() {
            return Inference::Unchanged;
        }
        if !self.type_locked {
            self.type_locked = true;
            if self.ty == *ty {
                return Inference::Unchanged;
            }
            debug!(variable = %self.identifier, ty = %ty, "inferred type");
            self.ty = ty.clone();
            return Inference::Refined;
        }
        match self.ty.merge(ty) {
            Some(merged) if merged == self.ty => Inference::Unchanged,
            Some(merged) => {
                debug!(variable = %self.identifier, ty = %merged, "refined type");
                self.ty = merged;
                Inference::Refined
            }
            None => Inference::Conflict { existing: self.ty.clone(), inferred: ty.clone() },
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.identifier)
    }
}

/// Read access to variables for typing and rendering.
pub trait VarLookup {
    fn variable(&self, r: VarRef) -> Option<&Variable>;

    fn name(&self, r: VarRef) -> String {
        self.variable(r).map(|v| v.identifier.clone()).unwrap_or_else(|| r.default_name())
    }
}

/// Statics and globals shared by every function of a unit.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    statics: BTreeMap<u32, Variable>,
    globals: BTreeMap<u32, Variable>,
}

impl Globals {
    /// Pre-populates one static per entry of the unit's static table.
    pub fn from_statics(values: &[i64]) -> Self {
        let mut out = Self::default();
        for (i, value) in values.iter().enumerate() {
            let mut var = Variable::new(i as u32, VarRef::Static(i as u32).default_name(), VarScope::Static);
            var.ty = Type::int();
            var.initializer = Some(*value);
            out.statics.insert(i as u32, var);
        }
        out
    }

    pub fn static_mut(&mut self, index: u32) -> &mut Variable {
        self.statics
            .entry(index)
            .or_insert_with(|| Variable::new(index, VarRef::Static(index).default_name(), VarScope::Static))
    }

    pub fn global_mut(&mut self, index: u32) -> &mut Variable {
        self.globals
            .entry(index)
            .or_insert_with(|| Variable::new(index, VarRef::Global(index).default_name(), VarScope::Global))
    }

    pub fn statics(&self) -> impl Iterator<Item = &Variable> {
        self.statics.values()
    }

    pub fn globals(&self) -> impl Iterator<Item = &Variable> {
        self.globals.values()
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub start_address: u32,
    pub instructions: Vec<Instruction>,
    pub predecessors: Vec<u32>,
    pub successors: Vec<u32>,
    /// Operand stack inherited from the first predecessor to reach this block.
    pub entry_stack: Option<Vec<Expr>>,
    pub statements: Vec<Stmt>,
}

impl BasicBlock {
    fn new(start_address: u32) -> Self {
        Self {
            start_address,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            entry_stack: None,
            statements: Vec::new(),
        }
    }

    pub fn end_address(&self) -> u32 {
        self.instructions.last().map(|i| i.next_address()).unwrap_or(self.start_address)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub address: u32,
    pub name: String,
    pub arguments: Vec<Variable>,
    /// Frame slots after the arguments, grown on first reference.
    pub locals: Vec<Variable>,
    pub temporaries: Vec<Variable>,
    pub blocks: BTreeMap<u32, BasicBlock>,
    pub entry: u32,
    pub return_var: Variable,
    pub visited: BTreeSet<u32>,
}

impl Function {
    fn new(address: u32, name: String, args: u8, locals: u8) -> Self {
        let arguments = (0..args as u32)
            .map(|i| Variable::new(i, VarRef::Local(i).default_name(), VarScope::Argument))
            .collect();
        let locals = (args as u32..locals.max(args) as u32)
            .map(|i| Variable::new(i, VarRef::Local(i).default_name(), VarScope::Local))
            .collect();
        Self {
            address,
            name: name.clone(),
            arguments,
            locals,
            temporaries: Vec::new(),
            blocks: BTreeMap::new(),
            entry: address,
            return_var: Variable::new(0, name, VarScope::Return),
            visited: BTreeSet::new(),
        }
    }

    pub fn arg_count(&self) -> u32 {
        self.arguments.len() as u32
    }

    pub fn slot(&self, index: u32) -> Option<&Variable> {
        let args = self.arg_count();
        if index < args {
            self.arguments.get(index as usize)
        } else {
            self.locals.get((index - args) as usize)
        }
    }

    pub fn slot_mut(&mut self, index: u32) -> &mut Variable {
        let args = self.arg_count();
        if index < args {
            return &mut self.arguments[index as usize];
        }
        let rel = (index - args) as usize;
        while self.locals.len() <= rel {
            let i = args + self.locals.len() as u32;
            self.locals.push(Variable::new(i, VarRef::Local(i).default_name(), VarScope::Local));
        }
        &mut self.locals[rel]
    }

    pub fn new_temp(&mut self, ty: Type) -> VarRef {
        let i = self.temporaries.len() as u32;
        let mut var = Variable::new(i, VarRef::Temp(i).default_name(), VarScope::Temporary);
        var.ty = ty;
        var.type_locked = true;
        self.temporaries.push(var);
        VarRef::Temp(i)
    }

    pub fn edge_count(&self) -> usize {
        self.blocks.values().map(|b| b.successors.len()).sum()
    }
}

/// A function's own variables plus the unit globals.
pub struct Scope<'a> {
    pub function: &'a Function,
    pub globals: &'a Globals,
}

impl VarLookup for Scope<'_> {
    fn variable(&self, r: VarRef) -> Option<&Variable> {
        match r {
            VarRef::Local(i) => self.function.slot(i),
            VarRef::Temp(i) => self.function.temporaries.get(i as usize),
            VarRef::Static(i) => self.globals.statics.get(&i),
            VarRef::Global(i) => self.globals.globals.get(&i),
        }
    }
}

/// Splits a decoded instruction stream into functions and basic blocks and
/// wires up the control-flow graph.
pub fn build_functions(instructions: Vec<Instruction>, diagnostics: &mut Vec<Diagnostic>) -> Vec<Function> {
    let mut functions: Vec<(Function, Vec<Instruction>)> = Vec::new();

    for ins in instructions {
        if let Operand::Enter { args, locals, name } = &ins.operands {
            let func = Function::new(ins.address, name.clone(), *args, *locals);
            functions.push((func, vec![ins]));
            continue;
        }
        match functions.last_mut() {
            Some((_, body)) => body.push(ins),
            None if ins.operation == OperationKind::Nop => {}
            None => {
                let kind = DiagnosticKind::OrphanInstruction { instruction: ins.to_string() };
                warn!(address = ins.address, "{kind}");
                diagnostics.push(Diagnostic { function: None, address: Some(ins.address), kind });
            }
        }
    }

    functions
        .into_iter()
        .map(|(mut func, body)| {
            preset_return(&mut func, &body);
            split_blocks(&mut func, body);
            link_blocks(&mut func);
            debug!(function = %func.name, blocks = func.blocks.len(), edges = func.edge_count(), "built function");
            func
        })
        .collect()
}

/// Fixes the result footprint from the first `ret` so calls into functions
/// that have not been simulated yet still push the right number of slots.
fn preset_return(func: &mut Function, body: &[Instruction]) {
    let first_ret = body.iter().find_map(|i| match i.operands {
        Operand::Ret { values, .. } => Some(values),
        _ => None,
    });
    func.return_var.ty = match first_ret.unwrap_or(0) {
        0 => Type::Void,
        _ => Type::unknown(),
    };
}

fn block_starts(func: &Function, body: &[Instruction]) -> BTreeSet<u32> {
    let mut starts = BTreeSet::new();
    starts.insert(func.address);

    let lo = func.address;
    let hi = body.last().map(|i| i.next_address()).unwrap_or(lo);
    let inside = |a: u32| (lo..hi).contains(&a);

    for ins in body {
        for target in ins.jump_targets() {
            if inside(target) {
                starts.insert(target);
            }
        }
        if ins.operation.is_conditional_branch() && inside(ins.next_address()) {
            starts.insert(ins.next_address());
        }
    }
    starts
}

fn split_blocks(func: &mut Function, body: Vec<Instruction>) {
    let starts = block_starts(func, &body);
    let mut current: Option<BasicBlock> = None;

    for ins in body {
        if starts.contains(&ins.address) || current.is_none() {
            if let Some(done) = current.take() {
                func.blocks.insert(done.start_address, done);
            }
            current = Some(BasicBlock::new(ins.address));
        }
        if let Some(block) = current.as_mut() {
            block.instructions.push(ins);
        }
    }
    if let Some(done) = current {
        func.blocks.insert(done.start_address, done);
    }
}

fn link_blocks(func: &mut Function) {
    let mut edges: Vec<(u32, Vec<u32>)> = Vec::new();

    for (&start, block) in &func.blocks {
        let mut succs: Vec<u32> = Vec::new();
        let add = |succs: &mut Vec<u32>, to: u32| {
            if func.blocks.contains_key(&to) && !succs.contains(&to) {
                succs.push(to);
            }
        };

        for ins in &block.instructions {
            let op = ins.operation;
            if op.is_conditional_branch() {
                add(&mut succs, ins.next_address());
            }
            if op.is_branch() || op == OperationKind::Switch {
                for target in ins.jump_targets() {
                    add(&mut succs, target);
                }
            }
        }

        if let Some(last) = block.instructions.last() {
            if !last.operation.ends_block() {
                add(&mut succs, last.next_address());
            }
        }
        edges.push((start, succs));
    }

    for (from, succs) in edges {
        for &to in &succs {
            if let Some(target) = func.blocks.get_mut(&to) {
                target.predecessors.push(from);
            }
        }
        if let Some(block) = func.blocks.get_mut(&from) {
            block.successors = succs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::decode_code;

    fn build(code: &[u8]) -> (Vec<Function>, Vec<Diagnostic>) {
        let instrs = decode_code(code, code.len() as u32).unwrap();
        let mut diags = Vec::new();
        (build_functions(instrs, &mut diags), diags)
    }

    #[test]
    fn inference_locks_and_conflicts_once() {
        let mut v = Variable::new(0, "local_0", VarScope::Local);
        assert_eq!(v.infer(&Type::unknown()), Inference::Unchanged);
        assert!(!v.type_locked);
        assert_eq!(v.infer(&Type::int()), Inference::Refined);
        assert_eq!(v.infer(&Type::int()), Inference::Unchanged);
        assert!(matches!(v.infer(&Type::float()), Inference::Conflict { .. }));
        assert_eq!(v.ty, Type::int());
    }

    #[test]
    fn locked_pointer_accepts_refinement() {
        let mut v = Variable::new(0, "local_0", VarScope::Local);
        v.infer(&Type::pointer(Type::unknown()));
        assert_eq!(v.infer(&Type::pointer(Type::vector3())), Inference::Refined);
        assert_eq!(v.ty, Type::pointer(Type::vector3()));
    }

    #[test]
    fn statics_are_prepopulated_but_unlocked() {
        let mut g = Globals::from_statics(&[0, 7]);
        assert_eq!(g.statics().count(), 2);
        let s = g.static_mut(1);
        assert_eq!(s.initializer, Some(7));
        assert!(!s.type_locked);
        assert_eq!(s.infer(&Type::float()), Inference::Refined);

        g.global_mut(12);
        assert_eq!(g.globals().map(|v| v.identifier.as_str()).collect::<Vec<_>>(), ["global_12"]);
    }

    #[test]
    fn one_function_per_enter() {
        // enter 1 2 "a"; ret 1 0; enter 0 0 ""; ret 0 0
        let code = [45, 1, 2, 0, 1, b'a', 46, 1, 0, 45, 0, 0, 0, 0, 46, 0, 0];
        let (funcs, diags) = build(&code);
        assert!(diags.is_empty());
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].name, "a");
        assert_eq!(funcs[0].arguments.len(), 1);
        assert_eq!(funcs[0].locals.len(), 1);
        assert_eq!(funcs[1].name, "anonymous_9");
        assert!(funcs.iter().all(|f| !f.blocks.is_empty()));
    }

    #[test]
    fn conditional_branch_gets_two_edges() {
        // 0: enter 0 0 ""   5: push_1   6: bz -> 10   9: push_2   10: ret 0 0
        let code = [45, 0, 0, 0, 0, 111, 86, 1, 0, 112, 46, 0, 0];
        let (funcs, _) = build(&code);
        let f = &funcs[0];
        assert_eq!(f.blocks.keys().copied().collect::<Vec<_>>(), vec![0, 9, 10]);
        assert_eq!(f.blocks[&0].successors, vec![9, 10]);
        assert_eq!(f.blocks[&9].successors, vec![10]);
        assert_eq!(f.blocks[&10].predecessors, vec![0, 9]);
        assert!(f.blocks[&10].successors.is_empty());
    }

    #[test]
    fn orphan_instructions_are_reported() {
        let code = [0, 111, 45, 0, 0, 0, 0, 46, 0, 0];
        let (funcs, diags) = build(&code);
        assert_eq!(funcs.len(), 1);
        assert_eq!(diags.len(), 1);
        assert!(matches!(diags[0].kind, DiagnosticKind::OrphanInstruction { .. }));
        assert_eq!(diags[0].address, Some(1));
    }

    #[test]
    fn return_footprint_comes_from_first_ret() {
        let code = [45, 0, 0, 0, 0, 116, 46, 0, 1, 45, 0, 0, 0, 0, 46, 0, 0];
        let (funcs, _) = build(&code);
        assert!(funcs[0].return_var.ty.is_unknown());
        assert_eq!(funcs[0].return_var.ty.stack_size(), 1);
        assert!(funcs[1].return_var.ty.is_void());
    }
}
