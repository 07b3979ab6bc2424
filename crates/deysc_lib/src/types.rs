use std::fmt;

use crate::ast::{Expr, Immediate};

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// Closed set of value types the decompiler reasons about.
///
/// Every type occupies a fixed number of operand-stack slots; aggregates
/// explode into exactly that many sub-expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Scalar(String),
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Struct { name: String, fields: Vec<Field> },
}

impl Type {
    pub fn unknown() -> Type {
        Type::Scalar(UNKNOWN.into())
    }

    pub fn int() -> Type {
        Type::Scalar("int".into())
    }

    pub fn float() -> Type {
        Type::Scalar("float".into())
    }

    pub fn bool() -> Type {
        Type::Scalar("bool".into())
    }

    pub fn string() -> Type {
        Type::Scalar("string".into())
    }

    pub fn pointer(to: Type) -> Type {
        Type::Pointer(Box::new(to))
    }

    pub fn array(elem: Type, len: usize) -> Type {
        Type::Array(Box::new(elem), len)
    }

    pub fn vector3() -> Type {
        let float = |name: &str| Field { name: name.into(), ty: Type::float() };
        Type::Struct {
            name: "Vector3".into(),
            fields: vec![float("x"), float("y"), float("z")],
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Scalar(name) if name == UNKNOWN)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Number of operand-stack slots a value of this type occupies.
    pub fn stack_size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::Scalar(_) | Type::Pointer(_) => 1,
            Type::Array(elem, len) => elem.stack_size() * len,
            Type::Struct { fields, .. } => fields.iter().map(|f| f.ty.stack_size()).sum(),
        }
    }

    /// Best guess for a block of `len` slots moved by explode/implode.
    pub fn guess(len: usize) -> Type {
        match len {
            0 => Type::Void,
            1 => Type::unknown(),
            3 => Type::vector3(),
            n => Type::array(Type::unknown(), n),
        }
    }

    /// Parses a native catalog type string.
    pub fn parse(s: &str) -> Type {
        let s = s.trim();
        match s {
            "" | "Any" => Type::unknown(),
            "void" => Type::Void,
            "int" => Type::int(),
            "float" => Type::float(),
            "BOOL" | "bool" => Type::bool(),
            "char*" | "const char*" => Type::string(),
            "Vector3" => Type::vector3(),
            _ => match s.strip_suffix('*') {
                Some(inner) => Type::pointer(Type::parse(inner)),
                None => Type::Scalar(s.to_string()),
            },
        }
    }

    /// Combines what is already known with a new observation. Unknown parts on
    /// either side are filled from the other; `None` means the two disagree.
    pub fn merge(&self, other: &Type) -> Option<Type> {
        if self.is_unknown() {
            return Some(other.clone());
        }
        if other.is_unknown() {
            return Some(self.clone());
        }
        match (self, other) {
            (Type::Pointer(a), Type::Pointer(b)) => Some(Type::pointer(a.merge(b)?)),
            (Type::Array(a, n), Type::Array(b, m)) if n == m => Some(Type::array(a.merge(b)?, *n)),
            _ if self == other => Some(self.clone()),
            _ => None,
        }
    }

    /// Field whose first slot is `slot`, for struct types and pointers to them.
    pub fn field_at(&self, slot: usize) -> Option<&Field> {
        match self {
            Type::Pointer(inner) => inner.field_at(slot),
            Type::Struct { fields, .. } => {
                let mut offset = 0;
                for field in fields {
                    if offset == slot {
                        return Some(field);
                    }
                    offset += field.ty.stack_size();
                }
                None
            }
            _ => None,
        }
    }

    /// Splits `base`, a value of this type, into exactly `count` slot-sized
    /// expressions.
    ///
    /// An array literal of `count` elements is handed back as its elements,
    /// so implode followed by explode of the same length is the identity.
    pub fn explode(&self, base: Expr, count: usize) -> Vec<Expr> {
        if let Expr::ArrayLiteral(elems) = &base {
            if elems.len() == count {
                return elems.clone();
            }
        }

        let mut out = match self {
            Type::Void => Vec::new(),
            Type::Scalar(_) if count == 1 => vec![base.clone()],
            Type::Scalar(_) => Vec::new(),
            Type::Pointer(inner) => inner.explode(base.clone(), count),
            Type::Struct { fields, .. } => {
                let mut out = Vec::new();
                for field in fields {
                    let node = Expr::Field { base: Box::new(base.clone()), field: field.name.clone() };
                    match field.ty.stack_size() {
                        0 => {}
                        1 => out.push(node),
                        n => out.extend(field.ty.explode(node, n)),
                    }
                }
                out
            }
            Type::Array(elem, len) => {
                let elem_size = elem.stack_size();
                let mut out = Vec::new();
                for i in 0..*len {
                    let node = Expr::index(base.clone(), i);
                    if elem_size > 1 {
                        out.extend(elem.explode(node, elem_size));
                    } else if elem_size == 1 {
                        out.push(node);
                    }
                }
                out
            }
        };

        out.truncate(count);
        for i in out.len()..count {
            out.push(Expr::index(base.clone(), i));
        }
        out
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(name) => write!(f, "{name}"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::Array(elem, len) => write!(f, "{elem}[{len}]"),
            Type::Struct { name, .. } => write!(f, "{name}"),
        }
    }
}

impl Expr {
    fn index(base: Expr, i: usize) -> Expr {
        Expr::Index {
            base: Box::new(base),
            index: Box::new(Expr::Immediate(Immediate::Int(i as i64))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::VarRef;

    fn var(i: u32) -> Expr {
        Expr::Var(VarRef::Local(i))
    }

    #[test]
    fn stack_sizes() {
        assert_eq!(Type::Void.stack_size(), 0);
        assert_eq!(Type::int().stack_size(), 1);
        assert_eq!(Type::pointer(Type::vector3()).stack_size(), 1);
        assert_eq!(Type::vector3().stack_size(), 3);
        assert_eq!(Type::array(Type::vector3(), 4).stack_size(), 12);
    }

    #[test]
    fn catalog_type_strings() {
        assert_eq!(Type::parse("void"), Type::Void);
        assert_eq!(Type::parse("BOOL"), Type::bool());
        assert_eq!(Type::parse("const char*"), Type::string());
        assert_eq!(Type::parse("Vector3*"), Type::pointer(Type::vector3()));
        assert_eq!(Type::parse("Ped"), Type::Scalar("Ped".into()));
        assert!(Type::parse("Any").is_unknown());
    }

    #[test]
    fn explode_struct_yields_fields() {
        let nodes = Type::vector3().explode(var(0), 3);
        let names: Vec<_> = nodes
            .iter()
            .map(|n| match n {
                Expr::Field { field, .. } => field.as_str(),
                _ => "?",
            })
            .collect();
        assert_eq!(names, ["x", "y", "z"]);
    }

    #[test]
    fn explode_pads_with_indexes() {
        let nodes = Type::int().explode(var(1), 3);
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| matches!(n, Expr::Index { .. })));

        assert_eq!(Type::int().explode(var(1), 1), vec![var(1)]);
        assert!(Type::Void.explode(var(1), 0).is_empty());
    }

    #[test]
    fn explode_inverts_array_literal() {
        let elems = vec![var(0), var(1), var(2)];
        let lit = Expr::ArrayLiteral(elems.clone());
        assert_eq!(Type::guess(3).explode(lit.clone(), 3), elems);
        assert_eq!(Type::unknown().explode(lit, 3), elems);
    }

    #[test]
    fn merge_fills_unknowns_and_rejects_mismatch() {
        let p = Type::pointer(Type::unknown());
        assert_eq!(p.merge(&Type::pointer(Type::int())), Some(Type::pointer(Type::int())));
        assert_eq!(Type::int().merge(&Type::unknown()), Some(Type::int()));
        assert_eq!(Type::int().merge(&Type::float()), None);
        assert_eq!(Type::array(Type::int(), 2).merge(&Type::array(Type::int(), 3)), None);
    }

    #[test]
    fn field_lookup_by_slot() {
        let v = Type::pointer(Type::vector3());
        assert_eq!(v.field_at(2).map(|f| f.name.as_str()), Some("z"));
        assert!(v.field_at(3).is_none());
        assert!(Type::int().field_at(0).is_none());
    }
}
