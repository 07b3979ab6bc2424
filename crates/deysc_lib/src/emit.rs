use std::collections::BTreeSet;

use crate::ast::{Expr, Immediate, Stmt};
use crate::function::{Function, Globals, Scope, VarLookup, VarRef};

const INDENT: &str = "    ";

fn needs_parens(e: &Expr) -> bool {
    matches!(e, Expr::Binary { .. })
}

fn operand(e: &Expr, vars: &dyn VarLookup) -> String {
    let s = render_expr(e, vars);
    if needs_parens(e) { format!("({s})") } else { s }
}

pub fn render_expr(e: &Expr, vars: &dyn VarLookup) -> String {
    match e {
        Expr::Immediate(Immediate::Int(v)) => v.to_string(),
        Expr::Immediate(Immediate::Float(v)) => format!("{v:?}"),
        Expr::Immediate(Immediate::Str(s)) => format!("\"{}\"", s.escape_default()),
        Expr::Var(r) => vars.name(*r),
        Expr::AddressOf(inner) => format!("&{}", operand(inner, vars)),
        Expr::Deref(inner) => format!("*{}", operand(inner, vars)),
        Expr::Field { base, field } => match base.as_ref() {
            Expr::AddressOf(inner) => format!("{}.{field}", operand(inner, vars)),
            b if b.data_type(vars).is_pointer() => format!("{}->{field}", operand(b, vars)),
            b => format!("{}.{field}", operand(b, vars)),
        },
        Expr::Index { base, index } => {
            let base = match base.as_ref() {
                Expr::AddressOf(inner) => inner.as_ref(),
                b => b,
            };
            format!("{}[{}]", operand(base, vars), render_expr(index, vars))
        }
        Expr::Binary { op, lhs, rhs } => {
            format!("{} {} {}", operand(lhs, vars), op.symbol(), operand(rhs, vars))
        }
        Expr::Unary { op, operand: inner } => format!("{}{}", op.symbol(), operand(inner, vars)),
        Expr::Cast { ty, expr } => format!("({ty}){}", operand(expr, vars)),
        Expr::Call { name, args, .. } => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, vars)).collect();
            format!("{name}({})", args.join(", "))
        }
        Expr::ArrayLiteral(elems) => {
            let elems: Vec<String> = elems.iter().map(|a| render_expr(a, vars)).collect();
            format!("{{{}}}", elems.join(", "))
        }
        Expr::Underflow => "<underflow>".into(),
    }
}

fn label(address: u32) -> String {
    format!("L_{address:08x}")
}

/// One output line of a function body before labels are pruned.
enum Line {
    Label(u32),
    Jump { text: String, targets: Vec<u32> },
    Text(String),
}

fn referenced_vars(func: &Function) -> BTreeSet<VarRef> {
    let mut seen = BTreeSet::new();
    for block in func.blocks.values() {
        for stmt in &block.statements {
            stmt.visit_vars(&mut |r| {
                seen.insert(r);
            });
        }
    }
    seen
}

fn stmt_lines(stmt: &Stmt, next_block: Option<u32>, vars: &Scope<'_>, used: &BTreeSet<VarRef>, out: &mut Vec<Line>) {
    let text = |s: String| Line::Text(format!("{INDENT}{s}"));
    match stmt {
        Stmt::Assign { dest, value } => {
            out.push(text(format!("{} = {};", render_expr(dest, vars), render_expr(value, vars))));
        }
        Stmt::Declare { var, value } => {
            let value = render_expr(value, vars);
            if used.contains(var) {
                let decl = match vars.variable(*var) {
                    Some(v) => v.to_string(),
                    None => var.default_name(),
                };
                out.push(text(format!("{decl} = {value};")));
            } else {
                out.push(text(format!("{value};")));
            }
        }
        Stmt::Expr(e) => out.push(text(format!("{};", render_expr(e, vars)))),
        Stmt::Return(None) => out.push(text("return;".into())),
        Stmt::Return(Some(e)) => out.push(text(format!("return {};", render_expr(e, vars)))),
        Stmt::IfGoto { cond, target, fallthrough } => {
            out.push(Line::Jump {
                text: format!("{INDENT}if ({}) goto {};", render_expr(cond, vars), label(*target)),
                targets: vec![*target],
            });
            if next_block != Some(*fallthrough) {
                out.push(Line::Jump { text: format!("{INDENT}goto {};", label(*fallthrough)), targets: vec![*fallthrough] });
            }
        }
        Stmt::Goto(target) => {
            out.push(Line::Jump { text: format!("{INDENT}goto {};", label(*target)), targets: vec![*target] });
        }
        Stmt::Switch { value, cases } => {
            let mut s = format!("{INDENT}switch ({}) {{\n", render_expr(value, vars));
            for (value, target) in cases {
                s.push_str(&format!("{INDENT}case {value}: goto {};\n", label(*target)));
            }
            s.push_str(&format!("{INDENT}}}"));
            out.push(Line::Jump { text: s, targets: cases.iter().map(|(_, t)| *t).collect() });
        }
        Stmt::Asm(s) => out.push(text(format!("asm(\"{}\");", s.escape_default()))),
        Stmt::Comment(s) => out.push(text(format!("/* {s} */"))),
    }
}

pub fn render_function(func: &Function, globals: &Globals, optimize: bool) -> String {
    let vars = Scope { function: func, globals };
    let used = referenced_vars(func);

    let args: Vec<String> = func.arguments.iter().map(|a| a.to_string()).collect();
    let mut out = format!("{} {}({}) {{\n", func.return_var.ty, func.name, args.join(", "));

    for local in &func.locals {
        if used.contains(&VarRef::Local(local.index)) {
            out.push_str(&format!("{INDENT}{local};\n"));
        }
    }

    let starts: Vec<u32> = func.blocks.keys().copied().collect();
    let mut lines: Vec<Line> = Vec::new();
    for (i, block) in func.blocks.values().enumerate() {
        let next_block = starts.get(i + 1).copied();
        lines.push(Line::Label(block.start_address));

        if !func.visited.contains(&block.start_address) {
            lines.push(Line::Text(format!("{INDENT}/* unreachable */")));
            for ins in &block.instructions {
                lines.push(Line::Text(format!("{INDENT}/* asm(\"{ins}\") */")));
            }
            continue;
        }

        let count = block.statements.len();
        for (j, stmt) in block.statements.iter().enumerate() {
            if optimize && j + 1 == count {
                if let Stmt::Goto(target) = stmt {
                    if Some(*target) == next_block {
                        continue;
                    }
                }
            }
            stmt_lines(stmt, next_block, &vars, &used, &mut lines);
        }
    }

    let targets: BTreeSet<u32> = lines
        .iter()
        .flat_map(|l| match l {
            Line::Jump { targets, .. } => targets.clone(),
            _ => Vec::new(),
        })
        .collect();

    for line in lines {
        match line {
            Line::Label(a) if targets.contains(&a) => out.push_str(&format!("{}:\n", label(a))),
            Line::Label(_) => {}
            Line::Jump { text, .. } | Line::Text(text) => {
                out.push_str(&text);
                out.push('\n');
            }
        }
    }

    out.push_str("}\n");
    out
}

/// File-scope declarations followed by every function.
pub fn render_unit(functions: &[Function], globals: &Globals, optimize: bool) -> String {
    let mut out = String::new();

    for s in globals.statics() {
        match s.initializer {
            Some(v) if v != 0 => out.push_str(&format!("static {s} = {v};\n")),
            _ => out.push_str(&format!("static {s};\n")),
        }
    }
    for g in globals.globals() {
        out.push_str(&format!("extern {g};\n"));
    }

    for func in functions {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&render_function(func, globals, optimize));
    }
    out
}
