use crate::function::{VarLookup, VarRef};
use crate::types::Type;

#[derive(Debug, Clone, PartialEq)]
pub enum Immediate {
    Int(i64),
    Float(f32),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le)
    }

    /// Logical complement of a comparison.
    pub fn negated(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Immediate(Immediate),
    Var(VarRef),
    AddressOf(Box<Expr>),
    Deref(Box<Expr>),
    Field { base: Box<Expr>, field: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Cast { ty: Type, expr: Box<Expr> },
    Call { name: String, args: Vec<Expr>, result: Type },
    ArrayLiteral(Vec<Expr>),
    /// Stand-in for a value popped from an empty stack.
    Underflow,
}

impl Expr {
    pub fn int(v: i64) -> Expr {
        Expr::Immediate(Immediate::Int(v))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary { op, operand: Box::new(operand) }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Immediate(Immediate::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Logical negation, folding into comparisons and double negations.
    pub fn negate(self) -> Expr {
        match self {
            Expr::Binary { op, lhs, rhs } if op.is_comparison() => match op.negated() {
                Some(op) => Expr::Binary { op, lhs, rhs },
                None => Expr::unary(UnaryOp::Not, Expr::Binary { op, lhs, rhs }),
            },
            Expr::Unary { op: UnaryOp::Not, operand } => *operand,
            other => Expr::unary(UnaryOp::Not, other),
        }
    }

    pub fn data_type(&self, vars: &dyn VarLookup) -> Type {
        match self {
            Expr::Immediate(Immediate::Int(_)) => Type::int(),
            Expr::Immediate(Immediate::Float(_)) => Type::float(),
            Expr::Immediate(Immediate::Str(_)) => Type::string(),
            Expr::Var(r) => vars.variable(*r).map(|v| v.ty.clone()).unwrap_or_else(Type::unknown),
            Expr::AddressOf(inner) => Type::pointer(inner.data_type(vars)),
            Expr::Deref(inner) => inner.data_type(vars).pointee().cloned().unwrap_or_else(Type::unknown),
            Expr::Field { base, field } => {
                let base_ty = base.data_type(vars);
                let strct = base_ty.pointee().unwrap_or(&base_ty);
                match strct {
                    Type::Struct { fields, .. } => fields
                        .iter()
                        .find(|f| f.name == *field)
                        .map(|f| f.ty.clone())
                        .unwrap_or_else(Type::unknown),
                    _ => Type::unknown(),
                }
            }
            Expr::Index { base, .. } => {
                let base_ty = base.data_type(vars);
                match base_ty.pointee().unwrap_or(&base_ty) {
                    Type::Array(elem, _) => (**elem).clone(),
                    _ => Type::unknown(),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    return Type::bool();
                }
                let l = lhs.data_type(vars);
                if l.is_unknown() { rhs.data_type(vars) } else { l }
            }
            Expr::Unary { op: UnaryOp::Not, .. } => Type::bool(),
            Expr::Unary { operand, .. } => operand.data_type(vars),
            Expr::Cast { ty, .. } => ty.clone(),
            Expr::Call { result, .. } => result.clone(),
            Expr::ArrayLiteral(elems) => {
                let elem = elems.first().map(|e| e.data_type(vars)).unwrap_or_else(Type::unknown);
                Type::array(elem, elems.len())
            }
            Expr::Underflow => Type::unknown(),
        }
    }

    /// Calls `f` for every variable referenced anywhere in this expression.
    pub fn visit_vars(&self, f: &mut dyn FnMut(VarRef)) {
        match self {
            Expr::Immediate(_) | Expr::Underflow => {}
            Expr::Var(r) => f(*r),
            Expr::AddressOf(e) | Expr::Deref(e) | Expr::Cast { expr: e, .. } => e.visit_vars(f),
            Expr::Unary { operand, .. } => operand.visit_vars(f),
            Expr::Field { base, .. } => base.visit_vars(f),
            Expr::Index { base, index } => {
                base.visit_vars(f);
                index.visit_vars(f);
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_vars(f);
                rhs.visit_vars(f);
            }
            Expr::Call { args, .. } | Expr::ArrayLiteral(args) => {
                for a in args {
                    a.visit_vars(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { dest: Expr, value: Expr },
    /// Introduces a temporary holding a call result.
    Declare { var: VarRef, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    IfGoto { cond: Expr, target: u32, fallthrough: u32 },
    Goto(u32),
    Switch { value: Expr, cases: Vec<(u32, u32)> },
    Asm(String),
    Comment(String),
}

impl Stmt {
    /// Variables read or written by this statement. The variable introduced by
    /// a `Declare` does not count.
    pub fn visit_vars(&self, f: &mut dyn FnMut(VarRef)) {
        match self {
            Stmt::Assign { dest, value } => {
                dest.visit_vars(f);
                value.visit_vars(f);
            }
            Stmt::Declare { value, .. } => value.visit_vars(f),
            Stmt::Expr(e) | Stmt::Return(Some(e)) | Stmt::Switch { value: e, .. } => e.visit_vars(f),
            Stmt::IfGoto { cond, .. } => cond.visit_vars(f),
            Stmt::Return(None) | Stmt::Goto(_) | Stmt::Asm(_) | Stmt::Comment(_) => {}
        }
    }

    /// Addresses this statement can transfer control to.
    pub fn jump_targets(&self) -> Vec<u32> {
        match self {
            Stmt::IfGoto { target, fallthrough, .. } => vec![*target, *fallthrough],
            Stmt::Goto(t) => vec![*t],
            Stmt::Switch { cases, .. } => cases.iter().map(|(_, t)| *t).collect(),
            _ => Vec::new(),
        }
    }
}
