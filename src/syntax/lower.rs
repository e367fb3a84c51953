//! Lowering from the `rustpython-parser` tree to the dialect tree.
//!
//! Constructs the dialect does not have become syntax errors at their source
//! position. Every statement and expression node counts against
//! [`MAX_NESTING`], so the tree handed on has bounded depth.

use super::ast::*;
use super::{LineIndex, SyntaxError, MAX_NESTING};
use rustpython_parser::ast::{self as py, Ranged};

type LResult<T> = Result<T, SyntaxError>;

pub(super) fn program(suite: &[py::Stmt], lines: &LineIndex<'_>) -> LResult<Program> {
    let mut lower = Lower {
        lines,
        depth: 0,
        loop_depth: 0,
    };
    Ok(Program {
        body: lower.block(suite)?,
    })
}

struct Lower<'a> {
    lines: &'a LineIndex<'a>,
    depth: usize,
    loop_depth: usize,
}

fn name(id: &py::Identifier) -> String {
    id.as_str().to_string()
}

fn bin_op(op: &py::Operator) -> BinOp {
    match op {
        py::Operator::Add => BinOp::Add,
        py::Operator::Sub => BinOp::Sub,
        py::Operator::Mult => BinOp::Mul,
        py::Operator::MatMult => BinOp::MatMul,
        py::Operator::Div => BinOp::Div,
        py::Operator::Mod => BinOp::Mod,
        py::Operator::Pow => BinOp::Pow,
        py::Operator::LShift => BinOp::LShift,
        py::Operator::RShift => BinOp::RShift,
        py::Operator::BitOr => BinOp::BitOr,
        py::Operator::BitXor => BinOp::BitXor,
        py::Operator::BitAnd => BinOp::BitAnd,
        py::Operator::FloorDiv => BinOp::FloorDiv,
    }
}

fn unary_op(op: &py::UnaryOp) -> UnaryOp {
    match op {
        py::UnaryOp::Invert => UnaryOp::Invert,
        py::UnaryOp::Not => UnaryOp::Not,
        py::UnaryOp::UAdd => UnaryOp::Pos,
        py::UnaryOp::USub => UnaryOp::Neg,
    }
}

fn cmp_op(op: &py::CmpOp) -> CmpOp {
    match op {
        py::CmpOp::Eq => CmpOp::Eq,
        py::CmpOp::NotEq => CmpOp::NotEq,
        py::CmpOp::Lt => CmpOp::Lt,
        py::CmpOp::LtE => CmpOp::LtE,
        py::CmpOp::Gt => CmpOp::Gt,
        py::CmpOp::GtE => CmpOp::GtE,
        py::CmpOp::Is => CmpOp::Is,
        py::CmpOp::IsNot => CmpOp::IsNot,
        py::CmpOp::In => CmpOp::In,
        py::CmpOp::NotIn => CmpOp::NotIn,
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else if !text.is_empty() {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

impl Lower<'_> {
    fn loc(&self, node: &impl Ranged) -> Location {
        self.lines.locate(node.range().start())
    }

    fn reject(&self, message: &str, node: &impl Ranged) -> SyntaxError {
        SyntaxError::new(message, self.loc(node))
    }

    fn enter(&mut self, loc: Location) -> LResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new("program is nested too deeply", loc));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ====================================================================
    // Statements
    // ====================================================================

    fn block(&mut self, stmts: &[py::Stmt]) -> LResult<Vec<Stmt>> {
        stmts.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn loop_body(&mut self, body: &[py::Stmt]) -> LResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block(body);
        self.loop_depth -= 1;
        body
    }

    /// Function and class bodies start outside any loop
    fn scope_body(&mut self, body: &[py::Stmt]) -> LResult<Vec<Stmt>> {
        let outer = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block(body);
        self.loop_depth = outer;
        body
    }

    fn stmt(&mut self, stmt: &py::Stmt) -> LResult<Stmt> {
        let loc = self.loc(stmt);
        self.enter(loc)?;
        let kind = self.stmt_kind(stmt, loc)?;
        self.leave();
        Ok(Stmt { kind, loc })
    }

    fn stmt_kind(&mut self, stmt: &py::Stmt, loc: Location) -> LResult<StmtKind> {
        Ok(match stmt {
            py::Stmt::Expr(s) => StmtKind::Expr(self.expr(&s.value)?),
            py::Stmt::Assign(s) => StmtKind::Assign {
                targets: s
                    .targets
                    .iter()
                    .map(|target| self.target(target))
                    .collect::<LResult<_>>()?,
                value: self.expr(&s.value)?,
            },
            py::Stmt::AugAssign(s) => {
                let target = self.expr(&s.target)?;
                if !matches!(
                    target.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(SyntaxError::new(
                        "illegal target for augmented assignment",
                        target.loc,
                    ));
                }
                StmtKind::AugAssign {
                    target,
                    op: bin_op(&s.op),
                    value: self.expr(&s.value)?,
                }
            }
            py::Stmt::AnnAssign(_) => {
                return Err(self.reject("annotated assignments are not supported", stmt))
            }
            py::Stmt::If(s) => StmtKind::If {
                test: self.expr(&s.test)?,
                body: self.block(&s.body)?,
                orelse: self.block(&s.orelse)?,
            },
            py::Stmt::While(s) => {
                self.no_loop_else(&s.orelse)?;
                StmtKind::While {
                    test: self.expr(&s.test)?,
                    body: self.loop_body(&s.body)?,
                }
            }
            py::Stmt::For(s) => self.for_loop(&s.target, &s.iter, &s.body, &s.orelse)?,
            py::Stmt::AsyncFor(s) => self.for_loop(&s.target, &s.iter, &s.body, &s.orelse)?,
            py::Stmt::Break(_) => {
                if self.loop_depth == 0 {
                    return Err(SyntaxError::new("'break' outside loop", loc));
                }
                StmtKind::Break
            }
            py::Stmt::Continue(_) => {
                if self.loop_depth == 0 {
                    return Err(SyntaxError::new("'continue' not properly in loop", loc));
                }
                StmtKind::Continue
            }
            py::Stmt::Pass(_) => StmtKind::Pass,
            py::Stmt::Return(s) => StmtKind::Return(self.opt(&s.value)?),
            py::Stmt::Import(s) => StmtKind::Import {
                modules: s.names.iter().map(|alias| name(&alias.name)).collect(),
            },
            py::Stmt::ImportFrom(s) => StmtKind::ImportFrom {
                module: s.module.as_ref().map_or_else(|| ".".to_string(), name),
                names: s.names.iter().map(|alias| name(&alias.name)).collect(),
            },
            py::Stmt::FunctionDef(f) => {
                self.function(&f.name, &f.args, &f.body, &f.decorator_list, loc)?
            }
            py::Stmt::AsyncFunctionDef(f) => {
                self.function(&f.name, &f.args, &f.body, &f.decorator_list, loc)?
            }
            py::Stmt::ClassDef(c) => {
                self.no_decorators(&c.decorator_list)?;
                StmtKind::ClassDef {
                    name: name(&c.name),
                    bases: self.exprs(&c.bases)?,
                    body: self.scope_body(&c.body)?,
                }
            }
            py::Stmt::Global(s) => StmtKind::Global(s.names.iter().map(name).collect()),
            py::Stmt::Nonlocal(s) => StmtKind::Nonlocal(s.names.iter().map(name).collect()),
            py::Stmt::Delete(s) => StmtKind::Delete(
                s.targets
                    .iter()
                    .map(|target| self.target(target))
                    .collect::<LResult<_>>()?,
            ),
            py::Stmt::With(s) => StmtKind::With {
                items: self.with_items(&s.items)?,
                body: self.block(&s.body)?,
            },
            py::Stmt::AsyncWith(s) => StmtKind::With {
                items: self.with_items(&s.items)?,
                body: self.block(&s.body)?,
            },
            py::Stmt::Try(s) => StmtKind::Try {
                body: self.block(&s.body)?,
                handlers: self.handlers(&s.handlers)?,
                orelse: self.block(&s.orelse)?,
                finalbody: self.block(&s.finalbody)?,
            },
            py::Stmt::Raise(s) => StmtKind::Raise(self.opt(&s.exc)?),
            py::Stmt::Assert(s) => StmtKind::Assert {
                test: self.expr(&s.test)?,
                msg: self.opt(&s.msg)?,
            },
            py::Stmt::Match(_) => {
                return Err(self.reject("match statements are not supported", stmt))
            }
            py::Stmt::TryStar(_) => {
                return Err(self.reject("'except*' handlers are not supported", stmt))
            }
            #[allow(unreachable_patterns)]
            _ => return Err(self.reject("this statement is not supported", stmt)),
        })
    }

    fn no_loop_else(&self, orelse: &[py::Stmt]) -> LResult<()> {
        match orelse.first() {
            Some(first) => Err(self.reject("loop 'else' clauses are not supported", first)),
            None => Ok(()),
        }
    }

    fn no_decorators(&self, decorators: &[py::Expr]) -> LResult<()> {
        match decorators.first() {
            Some(first) => Err(self.reject("decorators are not supported", first)),
            None => Ok(()),
        }
    }

    fn for_loop(
        &mut self,
        target: &py::Expr,
        iter: &py::Expr,
        body: &[py::Stmt],
        orelse: &[py::Stmt],
    ) -> LResult<StmtKind> {
        self.no_loop_else(orelse)?;
        Ok(StmtKind::For {
            target: self.target(target)?,
            iter: self.expr(iter)?,
            body: self.loop_body(body)?,
        })
    }

    fn function(
        &mut self,
        id: &py::Identifier,
        args: &py::Arguments,
        body: &[py::Stmt],
        decorators: &[py::Expr],
        loc: Location,
    ) -> LResult<StmtKind> {
        self.no_decorators(decorators)?;
        Ok(StmtKind::FunctionDef {
            name: name(id),
            params: self.params(args, loc)?,
            body: self.scope_body(body)?,
        })
    }

    fn params(&mut self, args: &py::Arguments, loc: Location) -> LResult<Vec<Param>> {
        if !args.posonlyargs.is_empty()
            || !args.kwonlyargs.is_empty()
            || args.vararg.is_some()
            || args.kwarg.is_some()
        {
            return Err(SyntaxError::new(
                "only plain positional parameters are supported",
                loc,
            ));
        }
        let mut params: Vec<Param> = Vec::with_capacity(args.args.len());
        for arg in &args.args {
            let param_loc = self.lines.locate(arg.def.range.start());
            let param_name = name(&arg.def.arg);
            if params.iter().any(|p| p.name == param_name) {
                return Err(SyntaxError::new(
                    format!("duplicate argument '{}' in function definition", param_name),
                    param_loc,
                ));
            }
            params.push(Param {
                name: param_name,
                default: self.opt(&arg.default)?,
                loc: param_loc,
            });
        }
        Ok(params)
    }

    fn with_items(&mut self, items: &[py::WithItem]) -> LResult<Vec<WithItem>> {
        items
            .iter()
            .map(|item| {
                Ok(WithItem {
                    context: self.expr(&item.context_expr)?,
                    target: match item.optional_vars.as_deref() {
                        Some(target) => Some(self.target(target)?),
                        None => None,
                    },
                })
            })
            .collect()
    }

    fn handlers(&mut self, handlers: &[py::ExceptHandler]) -> LResult<Vec<ExceptHandler>> {
        handlers
            .iter()
            .map(|handler| {
                let py::ExceptHandler::ExceptHandler(h) = handler;
                Ok(ExceptHandler {
                    kind: self.opt(&h.type_)?,
                    name: h.name.as_ref().map(name),
                    body: self.block(&h.body)?,
                    loc: self.lines.locate(h.range.start()),
                })
            })
            .collect()
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    fn expr(&mut self, expr: &py::Expr) -> LResult<Expr> {
        let loc = self.loc(expr);
        self.enter(loc)?;
        let kind = self.expr_kind(expr)?;
        self.leave();
        Ok(Expr::new(kind, loc))
    }

    fn boxed(&mut self, expr: &py::Expr) -> LResult<Box<Expr>> {
        self.expr(expr).map(Box::new)
    }

    fn opt(&mut self, expr: &Option<Box<py::Expr>>) -> LResult<Option<Expr>> {
        expr.as_deref().map(|e| self.expr(e)).transpose()
    }

    fn opt_boxed(&mut self, expr: &Option<Box<py::Expr>>) -> LResult<Option<Box<Expr>>> {
        Ok(self.opt(expr)?.map(Box::new))
    }

    fn exprs(&mut self, exprs: &[py::Expr]) -> LResult<Vec<Expr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    /// An assignment, loop or `del` target
    fn target(&mut self, expr: &py::Expr) -> LResult<Expr> {
        let target = self.expr(expr)?;
        assignable(&target)?;
        Ok(target)
    }

    fn expr_kind(&mut self, expr: &py::Expr) -> LResult<ExprKind> {
        Ok(match expr {
            py::Expr::Constant(c) => ExprKind::Const(self.constant(&c.value, expr)?),
            py::Expr::JoinedStr(j) => ExprKind::FString(self.fstring(&j.values)?),
            py::Expr::FormattedValue(f) => ExprKind::FString(vec![self.field(f)?]),
            py::Expr::Name(n) => ExprKind::Name(name(&n.id)),
            py::Expr::Attribute(a) => ExprKind::Attribute {
                value: self.boxed(&a.value)?,
                attr: name(&a.attr),
            },
            py::Expr::Subscript(s) => ExprKind::Subscript {
                value: self.boxed(&s.value)?,
                index: self.boxed(&s.slice)?,
            },
            py::Expr::Slice(s) => ExprKind::Slice {
                lower: self.opt_boxed(&s.lower)?,
                upper: self.opt_boxed(&s.upper)?,
                step: self.opt_boxed(&s.step)?,
            },
            py::Expr::Call(c) => self.call(c)?,
            py::Expr::UnaryOp(u) => ExprKind::Unary {
                op: unary_op(&u.op),
                operand: self.boxed(&u.operand)?,
            },
            py::Expr::BinOp(b) => ExprKind::Binary {
                left: self.boxed(&b.left)?,
                op: bin_op(&b.op),
                right: self.boxed(&b.right)?,
            },
            py::Expr::BoolOp(b) => ExprKind::BoolOp {
                op: match b.op {
                    py::BoolOp::And => BoolOp::And,
                    py::BoolOp::Or => BoolOp::Or,
                },
                values: self.exprs(&b.values)?,
            },
            py::Expr::Compare(c) => ExprKind::Compare {
                left: self.boxed(&c.left)?,
                ops: c.ops.iter().map(cmp_op).collect(),
                comparators: self.exprs(&c.comparators)?,
            },
            py::Expr::IfExp(i) => ExprKind::IfExp {
                test: self.boxed(&i.test)?,
                body: self.boxed(&i.body)?,
                orelse: self.boxed(&i.orelse)?,
            },
            py::Expr::List(l) => ExprKind::List(self.exprs(&l.elts)?),
            py::Expr::Tuple(t) => ExprKind::Tuple(self.exprs(&t.elts)?),
            py::Expr::Dict(d) => {
                let mut pairs = Vec::with_capacity(d.values.len());
                for (key, value) in d.keys.iter().zip(&d.values) {
                    let Some(key) = key else {
                        return Err(self.reject("dictionary unpacking is not supported", value));
                    };
                    pairs.push((self.expr(key)?, self.expr(value)?));
                }
                ExprKind::Dict(pairs)
            }
            py::Expr::ListComp(c) => ExprKind::ListComp {
                elt: self.boxed(&c.elt)?,
                generators: self.generators(&c.generators)?,
            },
            // Generators are evaluated eagerly
            py::Expr::GeneratorExp(c) => ExprKind::ListComp {
                elt: self.boxed(&c.elt)?,
                generators: self.generators(&c.generators)?,
            },
            py::Expr::DictComp(c) => ExprKind::DictComp {
                key: self.boxed(&c.key)?,
                value: self.boxed(&c.value)?,
                generators: self.generators(&c.generators)?,
            },
            py::Expr::Lambda(l) => {
                let loc = self.loc(expr);
                ExprKind::Lambda {
                    params: self.params(&l.args, loc)?,
                    body: self.boxed(&l.body)?,
                }
            }
            py::Expr::Yield(y) => ExprKind::Yield(self.opt_boxed(&y.value)?),
            py::Expr::Await(a) => ExprKind::Await(self.boxed(&a.value)?),
            py::Expr::Set(_) | py::Expr::SetComp(_) => {
                return Err(self.reject("set literals are not supported", expr))
            }
            py::Expr::NamedExpr(_) => {
                return Err(self.reject("assignment expressions are not supported", expr))
            }
            py::Expr::Starred(_) => {
                return Err(self.reject("starred expressions are not supported", expr))
            }
            py::Expr::YieldFrom(_) => {
                return Err(self.reject("'yield from' is not supported", expr))
            }
        })
    }

    fn constant(&self, value: &py::Constant, node: &py::Expr) -> LResult<Constant> {
        Ok(match value {
            py::Constant::None => Constant::None,
            py::Constant::Bool(b) => Constant::Bool(*b),
            py::Constant::Str(s) => Constant::Str(s.clone()),
            py::Constant::Int(i) => Constant::Int(
                i.to_string()
                    .parse()
                    .map_err(|_| self.reject("integer literal is too large", node))?,
            ),
            py::Constant::Float(f) => Constant::Float(*f),
            py::Constant::Bytes(_) => {
                return Err(self.reject("bytes literals are not supported", node))
            }
            py::Constant::Complex { .. } => {
                return Err(self.reject("complex literals are not supported", node))
            }
            py::Constant::Ellipsis => return Err(self.reject("'...' is not supported", node)),
            py::Constant::Tuple(_) => {
                return Err(self.reject("constant tuples are not supported", node))
            }
        })
    }

    fn call(&mut self, call: &py::ExprCall) -> LResult<ExprKind> {
        let func = self.boxed(&call.func)?;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            if matches!(arg, py::Expr::Starred(_)) {
                return Err(self.reject("star arguments are not supported", arg));
            }
            args.push(self.expr(arg)?);
        }
        let mut keywords: Vec<Keyword> = Vec::with_capacity(call.keywords.len());
        for keyword in &call.keywords {
            let loc = self.lines.locate(keyword.range.start());
            let Some(arg) = &keyword.arg else {
                return Err(SyntaxError::new("'**' arguments are not supported", loc));
            };
            let kw_name = name(arg);
            if keywords.iter().any(|k| k.name == kw_name) {
                return Err(SyntaxError::new(
                    format!("keyword argument repeated: {}", kw_name),
                    loc,
                ));
            }
            keywords.push(Keyword {
                name: kw_name,
                value: self.expr(&keyword.value)?,
                loc,
            });
        }
        Ok(ExprKind::Call {
            func,
            args,
            keywords,
        })
    }

    fn generators(&mut self, generators: &[py::Comprehension]) -> LResult<Vec<Comprehension>> {
        generators
            .iter()
            .map(|g| {
                Ok(Comprehension {
                    target: self.target(&g.target)?,
                    iter: self.expr(&g.iter)?,
                    ifs: self.exprs(&g.ifs)?,
                })
            })
            .collect()
    }

    fn fstring(&mut self, values: &[py::Expr]) -> LResult<Vec<FStringPart>> {
        let mut parts = Vec::new();
        for value in values {
            match value {
                py::Expr::Constant(py::ExprConstant {
                    value: py::Constant::Str(text),
                    ..
                }) => push_literal(&mut parts, text),
                py::Expr::FormattedValue(field) => parts.push(self.field(field)?),
                other => return Err(self.reject("unexpected f-string part", other)),
            }
        }
        Ok(parts)
    }

    fn field(&mut self, field: &py::ExprFormattedValue) -> LResult<FStringPart> {
        let spec = match field.format_spec.as_deref() {
            Some(spec) => Some(self.format_spec(spec)?),
            None => None,
        };
        Ok(FStringPart::Field {
            expr: self.boxed(&field.value)?,
            spec,
            repr: matches!(
                field.conversion,
                py::ConversionFlag::Repr | py::ConversionFlag::Ascii
            ),
        })
    }

    /// Format specs must be plain text; `{x:{width}}` is not supported
    fn format_spec(&self, spec: &py::Expr) -> LResult<String> {
        let py::Expr::JoinedStr(joined) = spec else {
            return Err(self.reject("unexpected format spec", spec));
        };
        joined
            .values
            .iter()
            .map(|part| match part {
                py::Expr::Constant(py::ExprConstant {
                    value: py::Constant::Str(text),
                    ..
                }) => Ok(text.as_str()),
                other => Err(self.reject("nested format specs are not supported", other)),
            })
            .collect()
    }
}

fn assignable(target: &Expr) -> LResult<()> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().try_for_each(assignable),
        _ => Err(SyntaxError::new("cannot assign to expression", target.loc)),
    }
}

#[cfg(test)]
mod tests {
    use crate::syntax::ast::*;
    use crate::syntax::{parse_program, Location};

    fn single(src: &str) -> StmtKind {
        let program = parse_program(src).unwrap();
        assert_eq!(program.body.len(), 1, "{:?}", program.body);
        program.body.into_iter().next().unwrap().kind
    }

    #[test]
    fn test_assignment_and_call_chain() {
        let kind = single("result = df.groupby('region')['sales'].sum()\n");
        let StmtKind::Assign { targets, value } = kind else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0].kind, ExprKind::Name(n) if n == "result"));
        assert!(matches!(value.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn test_precedence() {
        let StmtKind::Expr(expr) = single("1 + 2 * 3 ** 2") else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op, right, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_compound_statements() {
        let program = parse_program(
            "total = 0\nfor x in range(10):\n    if x % 2 == 0:\n        total += x\n    elif x > 7:\n        break\n    else:\n        continue\nwhile total > 0: total -= 1\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[1].kind, StmtKind::For { .. }));
        assert!(matches!(program.body[2].kind, StmtKind::While { .. }));
        assert_eq!(program.body[1].loc, Location::new(2, 1));
    }

    #[test]
    fn test_forbidden_constructs_still_parse() {
        assert!(matches!(single("import os, sys"), StmtKind::Import { .. }));
        assert!(matches!(
            single("from os import path as p"),
            StmtKind::ImportFrom { module, .. } if module == "os"
        ));
        assert!(matches!(
            single("from . import x"),
            StmtKind::ImportFrom { module, .. } if module == "."
        ));
        assert!(matches!(single("def f(a, b=1):\n    return a\n"), StmtKind::FunctionDef { .. }));
        assert!(matches!(single("async def f():\n    await g()\n"), StmtKind::FunctionDef { .. }));
        assert!(matches!(single("class A(object):\n    pass\n"), StmtKind::ClassDef { .. }));
        assert!(matches!(
            single("try:\n    x = 1\nexcept Exception as e:\n    pass\n"),
            StmtKind::Try { .. }
        ));
        assert!(matches!(single("with open('f') as fh:\n    pass\n"), StmtKind::With { .. }));
        assert!(matches!(single("del x"), StmtKind::Delete(_)));
        assert!(matches!(single("global x"), StmtKind::Global(_)));
    }

    #[test]
    fn test_comprehensions_and_lambda() {
        let StmtKind::Assign { value, .. } = single("y = [v * 2 for v in xs if v > 0]") else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::ListComp { .. }));
        let StmtKind::Assign { value, .. } = single("y = {k: v for k, v in pairs}") else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::DictComp { .. }));
        let StmtKind::Assign { value, .. } = single("y = sum(v for v in xs)") else {
            panic!("expected assignment");
        };
        let ExprKind::Call { args, .. } = value.kind else {
            panic!("expected call");
        };
        assert!(matches!(args[0].kind, ExprKind::ListComp { .. }));
        let StmtKind::Expr(expr) = single("sorted(xs, key=lambda p: p[1])") else {
            panic!("expected expression");
        };
        let ExprKind::Call { keywords, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(keywords[0].value.kind, ExprKind::Lambda { .. }));
    }

    #[test]
    fn test_fstring_fields() {
        let StmtKind::Expr(expr) = single("f\"total: {x:.2f} of {len(xs)} {{ok}} {name!r}\"")
        else {
            panic!("expected expression");
        };
        let ExprKind::FString(parts) = expr.kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 6);
        assert!(matches!(&parts[0], FStringPart::Literal(t) if t == "total: "));
        assert!(matches!(
            &parts[1],
            FStringPart::Field { spec: Some(s), repr: false, .. } if s == ".2f"
        ));
        assert!(matches!(&parts[4], FStringPart::Literal(t) if t == " {ok} "));
        assert!(matches!(&parts[5], FStringPart::Field { spec: None, repr: true, .. }));
    }

    #[test]
    fn test_slices_and_comparisons() {
        let StmtKind::Expr(expr) = single("xs[1:-1:2]") else {
            panic!("expected expression");
        };
        let ExprKind::Subscript { index, .. } = expr.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(index.kind, ExprKind::Slice { .. }));
        let StmtKind::Expr(expr) = single("0 < x <= 5 and y not in z") else {
            panic!("expected expression");
        };
        assert!(matches!(expr.kind, ExprKind::BoolOp { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_syntax_errors() {
        for src in [
            "x = (1, 2",
            "break",
            "def f():\n    continue\n",
            "for x in y:\n    pass\nelse:\n    pass\n",
            "x: int = 3",
            "{1, 2}",
            "f(*args)",
            "f(**kwargs)",
            "f(a=1, a=2)",
            "def f(*args):\n    pass\n",
            "@decorator\ndef f():\n    pass\n",
            "1 = x",
            "(y := 3)",
            "x = 10 ** 100",
            "x = b'raw'",
            "  x = 1",
            "if x:\npass",
        ] {
            assert!(parse_program(src).is_err(), "{src:?} should not parse");
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("x = {}1{}", "[".repeat(100), "]".repeat(100));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
        let ok = format!("x = {}1{}", "[".repeat(10), "]".repeat(10));
        assert!(parse_program(&ok).is_ok());

        let mut block = String::new();
        for level in 0..80 {
            block.push_str(&"    ".repeat(level));
            block.push_str("if x:\n");
        }
        block.push_str(&"    ".repeat(80));
        block.push_str("pass\n");
        let err = parse_program(&block).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_very_deep_input_is_an_error() {
        let deep = format!("x = {}1", "-".repeat(50_000));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_error_location() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert!(err.loc.line >= 2, "{:?}", err.loc);
        let err = parse_program("x = 1\nfor v in xs:\n    pass\nbreak\n").unwrap_err();
        assert_eq!(err.loc, Location::new(4, 1));
    }
}
