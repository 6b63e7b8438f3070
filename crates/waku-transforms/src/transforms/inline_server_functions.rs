use anyhow::Result;
use swc_core::{
    atoms::Atom,
    common::{DUMMY_SP, SyntaxContext, util::take::Take},
    ecma::{
        ast::*,
        visit::{VisitMut, VisitMutWith, noop_visit_mut_type},
    },
};

use super::REGISTER_SERVER_REFERENCE;
use crate::{
    FxIndexSet,
    ast::{
        bind_null, call_expr, collect_identifiers, collect_local_names_in_arrow,
        collect_local_names_in_function, const_decl, export_const, expr_stmt,
        find_last_import_index, has_use_server_directive, ident, strip_use_server_directives,
    },
};

const HOISTED_PREFIX: &str = "__waku_func";

enum HoistedKind {
    /// Hoisted from a function declaration; re-declared as an exported
    /// function under the generated name.
    Decl(Box<Function>),
    /// Hoisted from a function or arrow expression.
    Expr(Box<Expr>),
}

struct Hoisted {
    name: Atom,
    kind: HoistedKind,
}

fn arrow_block_body(arrow: &ArrowExpr) -> Option<&BlockStmt> {
    match &*arrow.body {
        BlockStmtOrExpr::BlockStmt(body) => Some(body),
        BlockStmtOrExpr::Expr(..) => None,
    }
}

fn is_inline_server_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Fn(f) => has_use_server_directive(f.function.body.as_ref()),
        Expr::Arrow(arrow) => has_use_server_directive(arrow_block_body(arrow)),
        _ => false,
    }
}

fn is_inline_server_fn(f: &Function) -> bool {
    has_use_server_directive(f.body.as_ref())
}

fn closure_params(closure_vars: &[Atom]) -> impl Iterator<Item = Pat> + '_ {
    closure_vars
        .iter()
        .map(|name| Pat::Ident(Ident::new(name.clone(), DUMMY_SP, SyntaxContext::empty()).into()))
}

fn prepend_params_to_function(function: &mut Function, closure_vars: &[Atom]) {
    if let Some(body) = &mut function.body {
        strip_use_server_directives(body);
    }
    let params = closure_params(closure_vars)
        .map(Param::from)
        .chain(function.params.drain(..))
        .collect();
    function.params = params;
}

fn prepend_params_to_expr(expr: &mut Expr, closure_vars: &[Atom]) {
    match expr {
        Expr::Fn(f) => prepend_params_to_function(&mut f.function, closure_vars),
        Expr::Arrow(arrow) => {
            if let BlockStmtOrExpr::BlockStmt(body) = &mut *arrow.body {
                strip_use_server_directives(body);
            }
            let params = closure_params(closure_vars)
                .chain(arrow.params.drain(..))
                .collect();
            arrow.params = params;
        }
        _ => {}
    }
}

/// Hoists closures whose body starts with `"use server"` into top-level
/// exports named `__waku_func<N>`.
///
/// Variables the closure captures from its nearest enclosing function become
/// leading parameters of the hoisted function, and the closure itself is
/// replaced by `__waku_func<N>.bind(null, ...captured)`.
#[derive(Default)]
struct InlineServerFunctions {
    /// Local names of the enclosing functions, innermost last.
    scopes: Vec<FxIndexSet<Atom>>,
    hoisted: Vec<Hoisted>,
}

impl InlineServerFunctions {
    fn next_name(&self) -> Atom {
        format!("{HOISTED_PREFIX}{}", self.hoisted.len() + 1).into()
    }

    /// Names bound in the nearest enclosing function that the closure refers
    /// to, in the enclosing function's declaration order.
    fn closure_vars(&self, idents: &FxIndexSet<Atom>, own_locals: &FxIndexSet<Atom>) -> Vec<Atom> {
        let Some(parent) = self.scopes.last() else {
            return vec![];
        };
        parent
            .iter()
            .filter(|name| idents.contains(*name) && !own_locals.contains(*name))
            .cloned()
            .collect()
    }

    fn hoist_function(&mut self, mut function: Box<Function>) -> Expr {
        let closure_vars = self.closure_vars(
            &collect_identifiers(&*function),
            &collect_local_names_in_function(&function),
        );
        let name = self.next_name();
        tracing::trace!(%name, ?closure_vars, "hoisting inline server function");
        prepend_params_to_function(&mut function, &closure_vars);
        let bound = bind_null(&name, &closure_vars);
        self.hoisted.push(Hoisted {
            name,
            kind: HoistedKind::Decl(function),
        });
        bound
    }

    fn hoist_expr(&mut self, mut expr: Box<Expr>) -> Expr {
        let own_locals = match &*expr {
            Expr::Fn(f) => collect_local_names_in_function(&f.function),
            Expr::Arrow(arrow) => collect_local_names_in_arrow(arrow),
            _ => FxIndexSet::default(),
        };
        let closure_vars = self.closure_vars(&collect_identifiers(&*expr), &own_locals);
        let name = self.next_name();
        tracing::trace!(%name, ?closure_vars, "hoisting inline server closure");
        prepend_params_to_expr(&mut expr, &closure_vars);
        let bound = bind_null(&name, &closure_vars);
        self.hoisted.push(Hoisted {
            name,
            kind: HoistedKind::Expr(expr),
        });
        bound
    }

    fn into_module_items(self, server_id: &str) -> Vec<ModuleItem> {
        self.hoisted
            .into_iter()
            .flat_map(|Hoisted { name, kind }| match kind {
                HoistedKind::Decl(function) => vec![
                    ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
                        span: DUMMY_SP,
                        decl: Decl::Fn(FnDecl {
                            ident: ident(&name),
                            declare: false,
                            function,
                        }),
                    })),
                    expr_stmt(call_expr(
                        REGISTER_SERVER_REFERENCE,
                        vec![ident(&name).into(), server_id.into(), name.as_str().into()],
                    )),
                ],
                HoistedKind::Expr(expr) => vec![export_const(
                    ident(&name),
                    call_expr(
                        REGISTER_SERVER_REFERENCE,
                        vec![*expr, server_id.into(), name.as_str().into()],
                    ),
                )],
            })
            .collect()
    }
}

impl VisitMut for InlineServerFunctions {
    noop_visit_mut_type!();

    fn visit_mut_function(&mut self, f: &mut Function) {
        self.scopes.push(collect_local_names_in_function(f));
        f.visit_mut_children_with(self);
        self.scopes.pop();
    }

    fn visit_mut_arrow_expr(&mut self, arrow: &mut ArrowExpr) {
        self.scopes.push(collect_local_names_in_arrow(arrow));
        arrow.visit_mut_children_with(self);
        self.scopes.pop();
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        if is_inline_server_expr(expr) {
            let closure = Box::new(expr.take());
            *expr = self.hoist_expr(closure);
        }
    }

    fn visit_mut_decl(&mut self, decl: &mut Decl) {
        decl.visit_mut_children_with(self);

        if let Decl::Fn(f) = decl
            && is_inline_server_fn(&f.function)
        {
            let original = f.ident.clone();
            let bound = self.hoist_function(std::mem::take(&mut f.function));
            *decl = const_decl(original, bound).into();
        }
    }

    fn visit_mut_module_item(&mut self, item: &mut ModuleItem) {
        item.visit_mut_children_with(self);

        if let ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(ExportDefaultDecl {
            decl: DefaultDecl::Fn(f),
            ..
        })) = item
            && is_inline_server_fn(&f.function)
        {
            let bound = self.hoist_function(std::mem::take(&mut f.function));
            *item = ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr {
                span: DUMMY_SP,
                expr: Box::new(bound),
            }));
        }
    }
}

/// Extracts inline `"use server"` closures from anywhere in `module`.
///
/// The hoisted exports are inserted right after the leading imports and the
/// server id is only requested when something was hoisted. Returns whether
/// the module changed.
#[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
pub fn transform_inline_server_functions<F>(module: &mut Module, get_server_id: F) -> Result<bool>
where
    F: Fn() -> Result<Atom>,
{
    let mut visitor = InlineServerFunctions::default();
    module.visit_mut_with(&mut visitor);
    if visitor.hoisted.is_empty() {
        return Ok(false);
    }
    let server_id = get_server_id()?;
    let index = find_last_import_index(&module.body);
    module
        .body
        .splice(index..index, visitor.into_module_items(&server_id));
    Ok(true)
}
