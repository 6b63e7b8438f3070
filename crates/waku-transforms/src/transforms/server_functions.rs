use anyhow::Result;
use swc_core::{
    atoms::Atom,
    common::util::take::Take,
    ecma::ast::*,
};

use super::REGISTER_SERVER_REFERENCE;
use crate::ast::{call_expr, export_default, expr_stmt, strip_use_server_directives};

fn strip_expr_directives(expr: &mut Expr) {
    match expr {
        Expr::Fn(FnExpr { function, .. }) => {
            if let Some(body) = &mut function.body {
                strip_use_server_directives(body);
            }
        }
        Expr::Arrow(arrow) => {
            if let BlockStmtOrExpr::BlockStmt(body) = &mut *arrow.body {
                strip_use_server_directives(body);
            }
        }
        _ => {}
    }
}

fn is_function_expr(expr: &Expr) -> bool {
    matches!(expr, Expr::Fn(..) | Expr::Arrow(..))
}

/// `registerServerReference(function, serverId, name)`
fn register_function_expr(mut function: Expr, server_id: &str, name: &str) -> Expr {
    strip_expr_directives(&mut function);
    call_expr(
        REGISTER_SERVER_REFERENCE,
        vec![function, server_id.into(), name.into()],
    )
}

/// Registers every exported function of a `"use server"` module as a server
/// reference under its export name.
///
/// * `export function f() {}` gets a `registerServerReference(f, id, "f")`
///   statement right after the declaration.
/// * `export const f = () => {}` and function expressions are wrapped in
///   place.
/// * `export default function () {}` becomes a wrapped default export
///   expression.
///
/// Returns whether any export was registered.
pub fn transform_exported_server_functions<F>(module: &mut Module, get_server_id: F) -> Result<bool>
where
    F: Fn() -> Result<Atom>,
{
    let mut changed = false;
    let mut body = Vec::with_capacity(module.body.len());
    for item in module.body.drain(..) {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(mut export)) => {
                let mut registration = None;
                match &mut export.decl {
                    // Overload signatures and ambient declarations have
                    // no runtime binding to register.
                    Decl::Fn(f) if f.function.body.is_none() || f.declare => {}
                    Decl::Fn(f) => {
                        changed = true;
                        if let Some(body) = &mut f.function.body {
                            strip_use_server_directives(body);
                        }
                        let server_id = get_server_id()?;
                        registration = Some(expr_stmt(call_expr(
                            REGISTER_SERVER_REFERENCE,
                            vec![
                                f.ident.clone().into(),
                                server_id.as_str().into(),
                                f.ident.sym.as_str().into(),
                            ],
                        )));
                    }
                    Decl::Var(var) => {
                        for decl in &mut var.decls {
                            let (Pat::Ident(name), Some(init)) = (&decl.name, &mut decl.init) else {
                                continue;
                            };
                            if !is_function_expr(init) {
                                continue;
                            }
                            changed = true;
                            let server_id = get_server_id()?;
                            let function = *init.take();
                            *init = Box::new(register_function_expr(
                                function,
                                &server_id,
                                &name.id.sym,
                            ));
                        }
                    }
                    _ => {}
                }
                body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)));
                body.extend(registration);
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(ExportDefaultDecl {
                decl: DefaultDecl::Fn(function),
                ..
            })) => {
                changed = true;
                let server_id = get_server_id()?;
                body.push(export_default(register_function_expr(
                    function.into(),
                    &server_id,
                    "default",
                )));
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(mut export))
                if is_function_expr(&export.expr) =>
            {
                changed = true;
                let server_id = get_server_id()?;
                let function = *export.expr.take();
                export.expr = register_function_expr(function, &server_id, "default").into();
                body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)));
            }
            item => body.push(item),
        }
    }
    module.body = body;
    Ok(changed)
}
