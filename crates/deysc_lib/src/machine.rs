use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ScriptUnit;
use crate::ast::{BinaryOp, Expr, Immediate, Stmt, UnaryOp};
use crate::error::{DeyscError, Diagnostic, DiagnosticKind};
use crate::function::{Function, Globals, Inference, Scope, VarRef, Variable};
use crate::instruction::{Instruction, Operand};
use crate::native::{self, NativeDb, NativeSpec};
use crate::opcode::OperationKind;
use crate::types::Type;

/// Most slots a single explode spreads onto the stack.
const MAX_EXPLODE_SLOTS: usize = 0x1000;

/// Symbolic operand stack and statements of the block being simulated.
struct BlockState {
    stack: Vec<Expr>,
    stmts: Vec<Stmt>,
}

/// Replays each function's blocks against a symbolic operand stack, turning
/// instructions back into statements and inferring variable types on the way.
pub struct Machine<'a> {
    unit: &'a ScriptUnit,
    natives: &'a NativeDb,
    functions: &'a mut [Function],
    globals: &'a mut Globals,
    diagnostics: &'a mut Vec<Diagnostic>,
    by_address: HashMap<u32, usize>,
    annotate: bool,
    current: usize,
}

impl<'a> Machine<'a> {
    pub fn new(
        unit: &'a ScriptUnit,
        natives: &'a NativeDb,
        functions: &'a mut [Function],
        globals: &'a mut Globals,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self {
        let by_address = functions.iter().enumerate().map(|(i, f)| (f.address, i)).collect();
        Self {
            unit,
            natives,
            functions,
            globals,
            diagnostics,
            by_address,
            annotate: false,
            current: 0,
        }
    }

    /// Prefix every instruction's statements with an `asm("…")` comment.
    pub fn annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    pub fn run(&mut self) -> Result<(), DeyscError> {
        for i in 0..self.functions.len() {
            self.decompile_function(i)?;
        }
        Ok(())
    }

    pub fn decompile_function(&mut self, index: usize) -> Result<(), DeyscError> {
        self.current = index;
        let entry = self.func().entry;
        if let Some(block) = self.func_mut().blocks.get_mut(&entry) {
            block.entry_stack.get_or_insert_with(Vec::new);
        }

        let mut worklist = vec![entry];
        while let Some(address) = worklist.pop() {
            if !self.func_mut().visited.insert(address) {
                continue;
            }
            let (instructions, stack, successors) = match self.func().blocks.get(&address) {
                Some(b) => (b.instructions.clone(), b.entry_stack.clone().unwrap_or_default(), b.successors.clone()),
                None => continue,
            };
            debug!(function = %self.func().name, block = address, depth = stack.len(), "simulating block");

            let mut st = BlockState { stack, stmts: Vec::new() };
            for ins in &instructions {
                if self.annotate {
                    st.stmts.push(Stmt::Comment(format!("asm(\"{ins}\")")));
                }
                self.step(&mut st, ins)?;
            }

            for &succ in &successors {
                self.hand_off(succ, &st.stack);
            }
            if let Some(block) = self.func_mut().blocks.get_mut(&address) {
                block.statements = st.stmts;
            }
            for &succ in successors.iter().rev() {
                if !self.func().visited.contains(&succ) {
                    worklist.push(succ);
                }
            }
        }
        Ok(())
    }

    /// The first predecessor to arrive fixes a block's entry stack.
    fn hand_off(&mut self, to: u32, stack: &[Expr]) {
        if self.func().visited.contains(&to) {
            return;
        }
        let expected = match self.func_mut().blocks.get_mut(&to) {
            Some(block) => match &block.entry_stack {
                None => {
                    block.entry_stack = Some(stack.to_vec());
                    return;
                }
                Some(existing) => existing.len(),
            },
            None => return,
        };
        if expected != stack.len() {
            self.diag(Some(to), DiagnosticKind::EntryStackMismatch { block: to, expected, found: stack.len() });
        }
    }

    fn func(&self) -> &Function {
        &self.functions[self.current]
    }

    fn func_mut(&mut self) -> &mut Function {
        &mut self.functions[self.current]
    }

    fn scope(&self) -> Scope<'_> {
        Scope { function: &self.functions[self.current], globals: &*self.globals }
    }

    fn type_of(&self, e: &Expr) -> Type {
        e.data_type(&self.scope())
    }

    fn diag(&mut self, address: Option<u32>, kind: DiagnosticKind) {
        let function = self.func().name.clone();
        warn!(function = %function, address, "{kind}");
        self.diagnostics.push(Diagnostic { function: Some(function), address, kind });
    }

    fn var_mut(&mut self, r: VarRef) -> &mut Variable {
        match r {
            VarRef::Local(i) => self.functions[self.current].slot_mut(i),
            VarRef::Static(i) => self.globals.static_mut(i),
            VarRef::Global(i) => self.globals.global_mut(i),
            VarRef::Temp(i) => {
                let func = &mut self.functions[self.current];
                while func.temporaries.len() <= i as usize {
                    func.new_temp(Type::unknown());
                }
                &mut func.temporaries[i as usize]
            }
        }
    }

    fn record_inference(&mut self, address: u32, variable: String, result: Inference) {
        if let Inference::Conflict { existing, inferred } = result {
            self.diag(
                Some(address),
                DiagnosticKind::TypeConflict { variable, existing: existing.to_string(), inferred: inferred.to_string() },
            );
        }
    }

    /// Pushes type knowledge down to the variables an expression names.
    fn infer(&mut self, address: u32, e: &Expr, ty: &Type) {
        if ty.is_unknown() {
            return;
        }
        match e {
            Expr::Var(r) => {
                let var = self.var_mut(*r);
                let result = var.infer(ty);
                let name = var.identifier.clone();
                self.record_inference(address, name, result);
            }
            Expr::AddressOf(inner) => match ty.pointee() {
                Some(pointee) => self.infer(address, inner, pointee),
                None => self.infer(address, inner, ty),
            },
            Expr::Deref(inner) => self.infer(address, inner, &Type::pointer(ty.clone())),
            _ => {}
        }
    }

    fn infer_return(&mut self, address: u32, ty: &Type) {
        let var = &mut self.functions[self.current].return_var;
        let result = var.infer(ty);
        let name = var.identifier.clone();
        self.record_inference(address, name, result);
    }

    fn pop(&mut self, st: &mut BlockState, address: u32) -> Expr {
        match st.stack.pop() {
            Some(e) => e,
            None => {
                self.diag(Some(address), DiagnosticKind::StackUnderflow);
                Expr::Underflow
            }
        }
    }

    /// Pops `n` values in push order. A shortfall is reported once and padded
    /// with placeholders at the bottom.
    fn pop_n(&mut self, st: &mut BlockState, address: u32, n: usize) -> Vec<Expr> {
        let available = n.min(st.stack.len());
        let popped = st.stack.split_off(st.stack.len() - available);
        if available == n {
            return popped;
        }
        self.diag(Some(address), DiagnosticKind::StackUnderflow);
        let mut out = vec![Expr::Underflow; n - available];
        out.extend(popped);
        out
    }

    fn peek(&mut self, st: &mut BlockState, address: u32) -> Expr {
        match st.stack.last() {
            Some(e) => e.clone(),
            None => {
                self.diag(Some(address), DiagnosticKind::StackUnderflow);
                Expr::Underflow
            }
        }
    }

    /// Pops a length that must be an integer literal.
    fn pop_length(&mut self, st: &mut BlockState, address: u32) -> Option<usize> {
        let e = self.pop(st, address);
        match e.as_int() {
            Some(n) if n >= 0 => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            _ => {
                let found = crate::emit::render_expr(&e, &self.scope());
                self.diag(Some(address), DiagnosticKind::NonImmediateLength { found });
                None
            }
        }
    }

    fn bound_length(&mut self, address: u32, length: usize, limit: usize) -> usize {
        if length <= limit {
            return length;
        }
        self.diag(Some(address), DiagnosticKind::LengthOutOfRange { length, limit });
        limit
    }

    fn assign(&mut self, st: &mut BlockState, address: u32, dest: Expr, value: Expr) {
        let ty = self.type_of(&value);
        self.infer(address, &dest, &ty);
        st.stmts.push(Stmt::Assign { dest, value });
    }

    fn field_name(&self, base: &Expr, offset: i64) -> String {
        let ty = self.type_of(base);
        match ty.field_at(offset as usize) {
            Some(field) => field.name.clone(),
            None => format!("field_{offset}"),
        }
    }

    fn step(&mut self, st: &mut BlockState, ins: &Instruction) -> Result<(), DeyscError> {
        use OperationKind as K;

        let address = ins.address;
        let imm = ins.operands.as_int();

        match ins.operation {
            K::Nop | K::Enter => {}

            K::Push => self.push_immediate(st, &ins.operands),
            K::PushStr => {
                let offset = self.pop(st, address);
                let literal = offset
                    .as_int()
                    .and_then(|o| usize::try_from(o).ok())
                    .and_then(|o| self.unit.string_at(o));
                st.stack.push(match literal {
                    Some(s) => Expr::Immediate(Immediate::Str(s)),
                    None => Expr::Cast { ty: Type::string(), expr: Box::new(offset) },
                });
            }
            K::Dup => {
                let top = self.peek(st, address);
                st.stack.push(top);
            }
            K::Drop => {
                self.pop(st, address);
            }

            op if op.is_arithmetic() && ins.operation.is_unary() => {
                let uop = if op == K::Not { UnaryOp::Not } else { UnaryOp::Neg };
                let operands = self.pop_n(st, address, ins.lanes as usize);
                st.stack.extend(operands.into_iter().map(|e| Expr::unary(uop, e)));
            }
            op if op.is_arithmetic() || op.is_comparison() => {
                let bop = binary_op(op);
                if let Some(rhs) = imm {
                    let lhs = self.pop(st, address);
                    st.stack.push(Expr::binary(bop, lhs, Expr::int(rhs)));
                } else {
                    let lanes = ins.lanes as usize;
                    let rhs = self.pop_n(st, address, lanes);
                    let lhs = self.pop_n(st, address, lanes);
                    for (l, r) in lhs.into_iter().zip(rhs) {
                        st.stack.push(Expr::binary(bop, l, r));
                    }
                }
            }
            K::ItoF | K::FtoI => {
                let ty = if ins.operation == K::ItoF { Type::float() } else { Type::int() };
                let e = self.pop(st, address);
                st.stack.push(Expr::Cast { ty, expr: Box::new(e) });
            }

            K::GetLocal | K::GetLocalP | K::GetStatic | K::GetStaticP | K::GetGlobal | K::GetGlobalP => {
                let index = imm.unwrap_or(0) as u32;
                let r = match ins.operation {
                    K::GetLocal | K::GetLocalP => VarRef::Local(index),
                    K::GetStatic | K::GetStaticP => VarRef::Static(index),
                    _ => VarRef::Global(index),
                };
                self.var_mut(r);
                let e = Expr::Var(r);
                let pointer = matches!(ins.operation, K::GetLocalP | K::GetStaticP | K::GetGlobalP);
                st.stack.push(if pointer { Expr::AddressOf(Box::new(e)) } else { e });
            }
            K::FieldGet | K::FieldGetP => {
                let base = self.pop(st, address);
                let field = self.field_name(&base, imm.unwrap_or(0));
                let e = Expr::Field { base: Box::new(base), field };
                st.stack.push(if ins.operation == K::FieldGetP { Expr::AddressOf(Box::new(e)) } else { e });
            }
            K::ArrayGet | K::ArrayGetP => {
                let array = self.pop(st, address);
                let index = self.pop(st, address);
                let e = Expr::Index { base: Box::new(array), index: Box::new(index) };
                st.stack.push(if ins.operation == K::ArrayGetP { Expr::AddressOf(Box::new(e)) } else { e });
            }
            K::GetP => {
                let p = self.pop(st, address);
                st.stack.push(deref(p));
            }

            K::SetLocal | K::SetStatic | K::SetGlobal => {
                let index = imm.unwrap_or(0) as u32;
                let r = match ins.operation {
                    K::SetLocal => VarRef::Local(index),
                    K::SetStatic => VarRef::Static(index),
                    _ => VarRef::Global(index),
                };
                self.var_mut(r);
                let value = self.pop(st, address);
                self.assign(st, address, Expr::Var(r), value);
            }
            K::FieldSet => {
                let base = self.pop(st, address);
                let field = self.field_name(&base, imm.unwrap_or(0));
                let value = self.pop(st, address);
                self.assign(st, address, Expr::Field { base: Box::new(base), field }, value);
            }
            K::ArraySet => {
                let array = self.pop(st, address);
                let index = self.pop(st, address);
                let value = self.pop(st, address);
                self.assign(st, address, Expr::Index { base: Box::new(array), index: Box::new(index) }, value);
            }
            K::SetP => {
                let dest = self.pop(st, address);
                let value = self.pop(st, address);
                self.assign(st, address, deref(dest), value);
            }
            K::SetPPeek => {
                let value = self.pop(st, address);
                let dest = self.peek(st, address);
                self.assign(st, address, deref(dest), value);
            }

            K::Implode => self.implode(st, address),
            K::Explode => self.explode(st, address),

            K::Call => self.direct_call(st, ins)?,
            K::CallN => self.native_call(st, ins)?,
            K::Ret => self.ret(st, ins)?,

            K::Branch => {
                if let Some(target) = ins.branch_target() {
                    st.stmts.push(Stmt::Goto(target));
                }
            }
            K::BranchZ => {
                let cond = self.pop(st, address).negate();
                if let Some(target) = ins.branch_target() {
                    st.stmts.push(Stmt::IfGoto { cond, target, fallthrough: ins.next_address() });
                }
            }
            op if op.is_conditional_branch() => {
                let rhs = self.pop(st, address);
                let lhs = self.pop(st, address);
                let cond = Expr::binary(branch_op(op), lhs, rhs);
                if let Some(target) = ins.branch_target() {
                    st.stmts.push(Stmt::IfGoto { cond, target, fallthrough: ins.next_address() });
                }
            }
            K::Switch => {
                let value = self.pop(st, address);
                if let Operand::Switch(cases) = &ins.operands {
                    st.stmts.push(Stmt::Switch { value, cases: cases.clone() });
                }
            }

            K::StrCpy | K::ItoS | K::AppendStr | K::AppendInt => {
                let dest = self.pop(st, address);
                let src = self.pop(st, address);
                let size = Expr::int(imm.unwrap_or(0));
                st.stmts.push(Stmt::Expr(Expr::Call {
                    name: ins.mnemonic.to_string(),
                    args: vec![dest, src, size],
                    result: Type::Void,
                }));
            }

            K::Unknown => {
                self.diag(Some(address), DiagnosticKind::UnknownOpcode { opcode: ins.opcode });
                st.stmts.push(Stmt::Asm(ins.to_string()));
            }
            _ => st.stmts.push(Stmt::Asm(ins.to_string())),
        }
        Ok(())
    }

    fn push_immediate(&mut self, st: &mut BlockState, operands: &Operand) {
        let ints: Vec<i64> = match *operands {
            Operand::U8(v) => vec![v as i64],
            Operand::U8x2(a, b) => vec![a as i64, b as i64],
            Operand::U8x3(a, b, c) => vec![a as i64, b as i64, c as i64],
            Operand::U16(v) => vec![v as i64],
            Operand::U24(v) => vec![v as i64],
            Operand::U32(v) => vec![v as i32 as i64],
            Operand::ImplicitInt(v) => vec![v as i64],
            Operand::F32(v) | Operand::ImplicitFloat(v) => {
                st.stack.push(Expr::Immediate(Immediate::Float(v)));
                return;
            }
            _ => Vec::new(),
        };
        st.stack.extend(ints.into_iter().map(Expr::int));
    }

    fn implode(&mut self, st: &mut BlockState, address: u32) {
        let dest = self.pop(st, address);
        let Some(len) = self.pop_length(st, address) else {
            return;
        };
        let len = self.bound_length(address, len, st.stack.len());
        let values = self.pop_n(st, address, len);
        let elem = values.first().map(|v| self.type_of(v)).unwrap_or_else(Type::unknown);
        self.infer(address, &dest, &Type::pointer(Type::array(elem, len)));
        st.stmts.push(Stmt::Assign { dest: deref(dest), value: Expr::ArrayLiteral(values) });
    }

    fn explode(&mut self, st: &mut BlockState, address: u32) {
        let src = self.pop(st, address);
        let Some(len) = self.pop_length(st, address) else {
            return;
        };
        let len = self.bound_length(address, len, MAX_EXPLODE_SLOTS);
        let known = self.type_of(&src);
        if known.pointee().unwrap_or(&known).is_unknown() {
            self.infer(address, &src, &Type::pointer(Type::guess(len)));
        }
        let ty = self.type_of(&src);
        st.stack.extend(ty.explode(src, len));
    }

    fn direct_call(&mut self, st: &mut BlockState, ins: &Instruction) -> Result<(), DeyscError> {
        let address = ins.address;
        let target = match ins.operands {
            Operand::Call { target } => target,
            _ => return Ok(()),
        };
        let Some(&callee) = self.by_address.get(&target) else {
            return Err(DeyscError::UnknownCallTarget {
                function: self.func().name.clone(),
                address,
                instruction: ins.to_string(),
                target,
            });
        };

        let arg_count = self.functions[callee].arguments.len();
        let args = self.pop_n(st, address, arg_count);
        for (i, arg) in args.iter().enumerate() {
            let param_ty = self.functions[callee].arguments[i].ty.clone();
            if param_ty.is_unknown() {
                let arg_ty = self.type_of(arg);
                self.functions[callee].arguments[i].infer(&arg_ty);
            } else {
                self.infer(address, arg, &param_ty);
            }
        }

        let name = self.functions[callee].name.clone();
        let result = self.functions[callee].return_var.ty.clone();
        self.emit_call(st, name, args, result);
        Ok(())
    }

    fn native_call(&mut self, st: &mut BlockState, ins: &Instruction) -> Result<(), DeyscError> {
        let address = ins.address;
        let (in_slots, out_slots, index) = match ins.operands {
            Operand::Native { in_slots, out_slots, index } => (in_slots, out_slots, index),
            _ => return Ok(()),
        };
        let Some(&raw) = self.unit.natives.get(index as usize) else {
            return Err(DeyscError::InvalidNativeIndex {
                function: self.func().name.clone(),
                address,
                instruction: ins.to_string(),
                index,
                count: self.unit.natives.len(),
            });
        };

        let hash = native::unmangle(raw, self.unit.code_length, index as usize);
        let resolved = self.natives.resolve(hash, in_slots as usize, out_slots as usize);
        let mut spec = resolved.spec;
        let mut rename = !resolved.synthesized;

        if resolved.synthesized {
            self.diag(Some(address), DiagnosticKind::SynthesizedNative { hash, name: spec.name.clone() });
        } else if spec.in_slots() != in_slots as usize || spec.out_slots() != out_slots as usize {
            self.diag(
                Some(address),
                DiagnosticKind::NativeArityMismatch {
                    name: spec.name.clone(),
                    expected_in: spec.in_slots(),
                    expected_out: spec.out_slots(),
                    found_in: in_slots,
                    found_out: out_slots,
                },
            );
            spec = NativeSpec::synthesize(spec.name, in_slots as usize, out_slots as usize);
            rename = false;
        }

        let mut args = Vec::with_capacity(spec.params.len());
        for param in spec.params.iter().rev() {
            let arg = match param.ty.stack_size() {
                0 => continue,
                1 => self.pop(st, address),
                n => Expr::ArrayLiteral(self.pop_n(st, address, n)),
            };
            args.push(arg);
        }
        args.reverse();

        let params = spec.params.iter().filter(|p| p.ty.stack_size() > 0);
        for (arg, param) in args.iter().zip(params) {
            self.infer(address, arg, &param.ty);
            if rename {
                if let Expr::Var(VarRef::Temp(t)) = arg {
                    self.rename_temp(*t, &param.name);
                }
            }
        }

        self.emit_call(st, spec.name, args, spec.result);
        Ok(())
    }

    fn rename_temp(&mut self, index: u32, name: &str) {
        let func = &mut self.functions[self.current];
        let taken = func.arguments.iter().chain(&func.locals).chain(&func.temporaries).any(|v| v.identifier == name);
        let identifier = if taken { format!("{name}_{index}") } else { name.to_string() };
        if let Some(temp) = func.temporaries.get_mut(index as usize) {
            temp.identifier = identifier;
        }
    }

    /// A call with a result becomes a fresh temporary whose slots are pushed.
    fn emit_call(&mut self, st: &mut BlockState, name: String, args: Vec<Expr>, result: Type) {
        let size = result.stack_size();
        let call = Expr::Call { name, args, result: result.clone() };
        if size == 0 {
            st.stmts.push(Stmt::Expr(call));
            return;
        }
        let temp = self.func_mut().new_temp(result.clone());
        st.stmts.push(Stmt::Declare { var: temp, value: call });
        if size == 1 {
            st.stack.push(Expr::Var(temp));
        } else {
            st.stack.extend(result.explode(Expr::Var(temp), size));
        }
    }

    fn ret(&mut self, st: &mut BlockState, ins: &Instruction) -> Result<(), DeyscError> {
        let address = ins.address;
        let values = match ins.operands {
            Operand::Ret { values, .. } => values,
            _ => 0,
        };
        match values {
            0 => {
                self.infer_return(address, &Type::Void);
                st.stmts.push(Stmt::Return(None));
            }
            1 => {
                let value = self.pop(st, address);
                let ty = self.type_of(&value);
                self.infer_return(address, &ty);
                st.stmts.push(Stmt::Return(Some(value)));
            }
            count => {
                return Err(DeyscError::TooManyReturnValues {
                    function: self.func().name.clone(),
                    address,
                    instruction: ins.to_string(),
                    count,
                });
            }
        }
        Ok(())
    }
}

/// `*&x` collapses to `x`.
fn deref(e: Expr) -> Expr {
    match e {
        Expr::AddressOf(inner) => *inner,
        other => Expr::Deref(Box::new(other)),
    }
}

fn binary_op(op: OperationKind) -> BinaryOp {
    use OperationKind as K;
    match op {
        K::Add => BinaryOp::Add,
        K::Sub => BinaryOp::Sub,
        K::Mul => BinaryOp::Mul,
        K::Div => BinaryOp::Div,
        K::Mod => BinaryOp::Mod,
        K::And => BinaryOp::And,
        K::Or => BinaryOp::Or,
        K::Xor => BinaryOp::Xor,
        K::CmpEq => BinaryOp::Eq,
        K::CmpNe => BinaryOp::Ne,
        K::CmpGt => BinaryOp::Gt,
        K::CmpGe => BinaryOp::Ge,
        K::CmpLt => BinaryOp::Lt,
        _ => BinaryOp::Le,
    }
}

fn branch_op(op: OperationKind) -> BinaryOp {
    use OperationKind as K;
    match op {
        K::BranchNe => BinaryOp::Ne,
        K::BranchEq => BinaryOp::Eq,
        K::BranchGt => BinaryOp::Gt,
        K::BranchGe => BinaryOp::Ge,
        K::BranchLt => BinaryOp::Lt,
        _ => BinaryOp::Le,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::build_functions;
    use crate::instruction::decode_code;

    fn unit(code: Vec<u8>) -> ScriptUnit {
        ScriptUnit { name: "test".into(), code_length: code.len() as u32, code, ..Default::default() }
    }

    fn simulate(unit: &ScriptUnit, db: &NativeDb) -> Result<(Vec<Function>, Globals, Vec<Diagnostic>), DeyscError> {
        let instrs = decode_code(&unit.code, unit.code_length)?;
        let mut diags = Vec::new();
        let mut funcs = build_functions(instrs, &mut diags);
        let mut globals = Globals::from_statics(&unit.statics);
        Machine::new(unit, db, &mut funcs, &mut globals, &mut diags).run()?;
        Ok((funcs, globals, diags))
    }

    fn statements(f: &Function) -> Vec<Stmt> {
        f.blocks.values().flat_map(|b| b.statements.clone()).collect()
    }

    #[test]
    fn operands_pop_right_then_left() {
        // enter; getlocalb 0; push_1; subi; setlocalb 0; ret 0 0
        let u = unit(vec![45, 1, 1, 0, 0, 56, 0, 111, 2, 57, 0, 46, 1, 0]);
        let (funcs, _, diags) = simulate(&u, &NativeDb::new()).unwrap();
        assert!(diags.is_empty());
        let stmts = statements(&funcs[0]);
        assert_eq!(
            stmts[0],
            Stmt::Assign {
                dest: Expr::Var(VarRef::Local(0)),
                value: Expr::binary(BinaryOp::Sub, Expr::Var(VarRef::Local(0)), Expr::int(1)),
            }
        );
        assert_eq!(funcs[0].arguments[0].ty, Type::int());
    }

    #[test]
    fn folded_immediate_is_right_operand() {
        // enter; push_2; addimb 7; ret 0 1
        let u = unit(vec![45, 0, 0, 0, 0, 112, 61, 7, 46, 0, 1]);
        let (funcs, _, _) = simulate(&u, &NativeDb::new()).unwrap();
        assert_eq!(
            statements(&funcs[0]),
            vec![Stmt::Return(Some(Expr::binary(BinaryOp::Add, Expr::int(2), Expr::int(7))))]
        );
        assert_eq!(funcs[0].return_var.ty, Type::int());
    }

    #[test]
    fn underflow_yields_placeholder_and_diagnostic() {
        let u = unit(vec![45, 0, 0, 0, 0, 43, 46, 0, 0]);
        let (_, _, diags) = simulate(&u, &NativeDb::new()).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::StackUnderflow);
    }

    #[test]
    fn short_stack_for_vector_op_reports_once() {
        // enter; push_1 x4; addv; ret 0 0
        let u = unit(vec![45, 0, 0, 0, 0, 111, 111, 111, 111, 26, 46, 0, 0]);
        let (_, _, diags) = simulate(&u, &NativeDb::new()).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::StackUnderflow);
    }

    #[test]
    fn two_return_values_are_fatal() {
        let u = unit(vec![45, 0, 0, 0, 0, 111, 111, 46, 0, 2]);
        let err = simulate(&u, &NativeDb::new()).unwrap_err();
        assert!(matches!(err, DeyscError::TooManyReturnValues { count: 2, .. }));
    }

    #[test]
    fn call_to_nowhere_is_fatal() {
        let u = unit(vec![45, 0, 0, 0, 0, 93, 0x40, 0, 0, 46, 0, 0]);
        let err = simulate(&u, &NativeDb::new()).unwrap_err();
        assert!(matches!(err, DeyscError::UnknownCallTarget { target: 0x40, .. }));
    }

    #[test]
    fn native_index_out_of_range_is_fatal() {
        let u = unit(vec![45, 0, 0, 0, 0, 44, 0, 0, 3, 46, 0, 0]);
        let err = simulate(&u, &NativeDb::new()).unwrap_err();
        assert!(matches!(err, DeyscError::InvalidNativeIndex { index: 3, count: 0, .. }));
    }

    #[test]
    fn explode_of_unknown_source_guesses_vector() {
        // enter 0 4; push_3; getlocalpb 1; explode; drop x3; ret
        let u = unit(vec![45, 0, 4, 0, 0, 113, 55, 1, 50, 43, 43, 43, 46, 0, 0]);
        let (funcs, _, diags) = simulate(&u, &NativeDb::new()).unwrap();
        assert!(diags.is_empty());
        assert_eq!(funcs[0].slot(1).unwrap().ty, Type::vector3());
    }

    #[test]
    fn implode_infers_array_onto_destination() {
        // push_1 push_2 push_2(len) getlocalpb 0 implode
        let u = unit(vec![45, 0, 2, 0, 0, 111, 112, 112, 55, 0, 51, 46, 0, 0]);
        let (funcs, _, _) = simulate(&u, &NativeDb::new()).unwrap();
        assert_eq!(funcs[0].slot(0).unwrap().ty, Type::array(Type::int(), 2));
        assert_eq!(
            statements(&funcs[0])[0],
            Stmt::Assign {
                dest: Expr::Var(VarRef::Local(0)),
                value: Expr::ArrayLiteral(vec![Expr::int(1), Expr::int(2)]),
            }
        );
    }

    #[test]
    fn conflicting_assignment_reports_once() {
        // setlocalb 0 <- 1; setlocalb 0 <- 1.0
        let u = unit(vec![45, 0, 1, 0, 0, 111, 57, 0, 120, 57, 0, 46, 0, 0]);
        let (funcs, _, diags) = simulate(&u, &NativeDb::new()).unwrap();
        let conflicts: Vec<_> =
            diags.iter().filter(|d| matches!(d.kind, DiagnosticKind::TypeConflict { .. })).collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(funcs[0].slot(0).unwrap().ty, Type::int());
    }

    #[test]
    fn forward_call_uses_precomputed_result() {
        // f: call g; ret 0 1      g: push_5; ret 0 1
        let u = unit(vec![45, 0, 0, 0, 0, 93, 12, 0, 0, 46, 0, 1, 45, 0, 0, 0, 0, 115, 46, 0, 1]);
        let (funcs, _, _) = simulate(&u, &NativeDb::new()).unwrap();
        let stmts = statements(&funcs[0]);
        assert!(matches!(stmts[0], Stmt::Declare { var: VarRef::Temp(0), .. }));
        assert_eq!(stmts[1], Stmt::Return(Some(Expr::Var(VarRef::Temp(0)))));
    }

    #[test]
    fn real_native_renames_temporary_arguments() {
        let mut db = NativeDb::new();
        let hash = 0x1234u64;
        db.insert(hash, NativeSpec {
            name: "PLAYER_ID".into(),
            jhash: None,
            params: vec![],
            result: Type::Scalar("Player".into()),
        });
        db.insert(0x99, NativeSpec {
            name: "GET_PLAYER_PED".into(),
            jhash: None,
            params: vec![crate::native::NativeParam { name: "player".into(), ty: Type::Scalar("Player".into()) }],
            result: Type::Scalar("Ped".into()),
        });
        let code = vec![45, 0, 0, 0, 0, 44, 1, 0, 0, 44, (1 << 2) | 1, 0, 1, 43, 46, 0, 0];
        let len = code.len() as u32;
        let mut u = unit(code);
        u.natives = vec![hash.rotate_right(len % 64), 0x99u64.rotate_right((len + 1) % 64)];
        let (funcs, _, diags) = simulate(&u, &db).unwrap();
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(funcs[0].temporaries[0].identifier, "player");
        assert_eq!(funcs[0].temporaries[1].identifier, "temp_1");
    }
}
