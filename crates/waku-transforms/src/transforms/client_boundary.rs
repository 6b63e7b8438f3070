use std::collections::VecDeque;

use anyhow::{Result, bail};
use rustc_hash::{FxHashMap, FxHashSet};
use swc_core::{
    atoms::{Atom, atom},
    common::{DUMMY_SP, SyntaxContext},
    ecma::ast::*,
};

use super::{REGISTER_CLIENT_REFERENCE, SERVER_EDGE_RUNTIME};
use crate::{
    FxIndexSet,
    ast::{
        call_expr, collect_identifiers, export_const, export_named_or_default, named_import,
        throwing_arrow,
    },
    exports::{collect_export_names, export_name_atom},
};

pub const ALLOW_SERVER: &str = "unstable_allowServer";
pub const ALLOW_SERVER_SOURCE: &str = "waku/client";

#[derive(Clone, Copy, Debug, Default)]
pub struct ClientBoundaryOptions {
    /// Keep `unstable_allowServer` values as plain exports instead of also
    /// registering them as client references.
    pub dce_only: bool,
}

/// A binding exported as `export const name = unstable_allowServer(expr)`.
struct AllowServerItem {
    name: Atom,
    expr: Box<Expr>,
}

/// A top-level, non-exported declaration an allow-server value may depend on.
enum TopLevelDecl<'a> {
    Var(&'a VarDeclarator),
    Fn(&'a FnDecl),
    Class(&'a ClassDecl),
}

impl TopLevelDecl<'_> {
    fn identifiers(&self) -> FxIndexSet<Atom> {
        match self {
            TopLevelDecl::Var(d) => collect_identifiers(*d),
            TopLevelDecl::Fn(f) => collect_identifiers(*f),
            TopLevelDecl::Class(c) => collect_identifiers(*c),
        }
    }
}

/// Local name the allow-server marker is imported under. Falls back to the
/// unaliased name.
fn find_allow_server_ident(module: &Module) -> Atom {
    for item in &module.body {
        if let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = item
            && import.src.value.as_str() == Some(ALLOW_SERVER_SOURCE)
        {
            for specifier in &import.specifiers {
                if let ImportSpecifier::Named(named) = specifier
                    && let Some(imported) = &named.imported
                    && export_name_atom(imported) == ALLOW_SERVER
                {
                    return named.local.sym.clone();
                }
            }
            break;
        }
    }
    atom!("unstable_allowServer")
}

fn take_allow_server_items(module: &Module, allow_server: &Atom) -> Result<Vec<AllowServerItem>> {
    let mut items = vec![];
    for item in &module.body {
        let ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
            decl: Decl::Var(var),
            ..
        })) = item
        else {
            continue;
        };
        for decl in &var.decls {
            let (Pat::Ident(name), Some(init)) = (&decl.name, &decl.init) else {
                continue;
            };
            let Expr::Call(CallExpr {
                callee: Callee::Expr(callee),
                args,
                ..
            }) = &**init
            else {
                continue;
            };
            if !matches!(&**callee, Expr::Ident(callee) if callee.sym == *allow_server) {
                continue;
            }
            if args.len() != 1 || args[0].spread.is_some() {
                bail!("allowServer should have exactly one argument");
            }
            items.push(AllowServerItem {
                name: name.id.sym.clone(),
                expr: args[0].expr.clone(),
            });
        }
    }
    Ok(items)
}

fn top_level_declarations(module: &Module) -> FxHashMap<Atom, Vec<TopLevelDecl<'_>>> {
    let mut declarations: FxHashMap<Atom, Vec<TopLevelDecl<'_>>> = FxHashMap::default();
    for item in &module.body {
        let ModuleItem::Stmt(Stmt::Decl(decl)) = item else {
            continue;
        };
        match decl {
            Decl::Var(var) => {
                for d in &var.decls {
                    if let Pat::Ident(ident) = &d.name {
                        declarations
                            .entry(ident.id.sym.clone())
                            .or_default()
                            .push(TopLevelDecl::Var(d));
                    }
                }
            }
            Decl::Fn(f) => declarations
                .entry(f.ident.sym.clone())
                .or_default()
                .push(TopLevelDecl::Fn(f)),
            Decl::Class(c) => declarations
                .entry(c.ident.sym.clone())
                .or_default()
                .push(TopLevelDecl::Class(c)),
            _ => {}
        }
    }
    declarations
}

/// Transitive closure of the top-level declarations reachable from `seeds`.
///
/// Names in `excluded` are never added nor followed.
pub(crate) fn collect_dependencies(
    module: &Module,
    seeds: impl IntoIterator<Item = Atom>,
    excluded: &FxHashSet<Atom>,
) -> FxIndexSet<Atom> {
    let declarations = top_level_declarations(module);
    let mut dependencies = FxIndexSet::default();
    let mut queue = VecDeque::new();
    for seed in seeds {
        if !excluded.contains(&seed) && dependencies.insert(seed.clone()) {
            queue.push_back(seed);
        }
    }
    while let Some(name) = queue.pop_front() {
        for decl in declarations.get(&name).into_iter().flatten() {
            for ident in decl.identifiers() {
                if !excluded.contains(&ident) && dependencies.insert(ident.clone()) {
                    queue.push_back(ident);
                }
            }
        }
    }
    dependencies
}

fn import_specifier_local(specifier: &ImportSpecifier) -> &Atom {
    match specifier {
        ImportSpecifier::Named(s) => &s.local.sym,
        ImportSpecifier::Default(s) => &s.local.sym,
        ImportSpecifier::Namespace(s) => &s.local.sym,
    }
}

fn retain_dependencies(module: &mut Module, dependencies: &FxIndexSet<Atom>) {
    module.body.retain_mut(|item| match item {
        ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
            import
                .specifiers
                .retain(|s| dependencies.contains(import_specifier_local(s)));
            !import.specifiers.is_empty()
        }
        ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => {
            var.decls.retain(
                |d| matches!(&d.name, Pat::Ident(ident) if dependencies.contains(&ident.id.sym)),
            );
            !var.decls.is_empty()
        }
        ModuleItem::Stmt(Stmt::Decl(Decl::Fn(f))) => dependencies.contains(&f.ident.sym),
        ModuleItem::Stmt(Stmt::Decl(Decl::Class(c))) => dependencies.contains(&c.ident.sym),
        _ => false,
    });
}

/// Strips a `"use client"` module down to what the server graph may keep.
///
/// Every export is dropped, except `unstable_allowServer(expr)` bindings:
/// their wrapped expression and the top-level declarations and imports it
/// transitively depends on are retained, and the binding is re-exported
/// (registered as a client reference unless `dce_only` is set).
///
/// Returns the names that still need a client reference stub.
pub fn transform_exported_client_things<F>(
    module: &mut Module,
    get_client_id: F,
    options: ClientBoundaryOptions,
) -> Result<FxIndexSet<Atom>>
where
    F: Fn() -> Result<Atom>,
{
    let allow_server = find_allow_server_ident(module);
    let allow_server_items = take_allow_server_items(module, &allow_server)?;

    let mut export_names = collect_export_names(module);
    for item in &allow_server_items {
        export_names.shift_remove(&item.name);
    }

    let mut excluded: FxHashSet<Atom> = export_names.iter().cloned().collect();
    excluded.extend(allow_server_items.iter().map(|item| item.name.clone()));
    excluded.insert(allow_server);

    let seeds: Vec<Atom> = allow_server_items
        .iter()
        .flat_map(|item| collect_identifiers(&*item.expr))
        .collect();
    let dependencies = collect_dependencies(module, seeds, &excluded);
    tracing::trace!(?dependencies, "allow server dependencies");

    retain_dependencies(module, &dependencies);

    if !allow_server_items.is_empty() {
        let client_id = if options.dce_only {
            None
        } else {
            Some(get_client_id()?)
        };
        for AllowServerItem { name, expr } in allow_server_items {
            let init = match &client_id {
                None => *expr,
                Some(client_id) => call_expr(
                    REGISTER_CLIENT_REFERENCE,
                    vec![*expr, client_id.as_str().into(), name.as_str().into()],
                ),
            };
            module.body.push(export_const(
                Ident::new(name, DUMMY_SP, SyntaxContext::empty()),
                init,
            ));
        }
    }

    Ok(export_names)
}

/// `export const name = registerClientReference(() => { throw ... }, id, name)`
/// for every name.
pub fn client_reference_stubs(export_names: &FxIndexSet<Atom>, client_id: &str) -> Vec<ModuleItem> {
    export_names
        .iter()
        .map(|name| {
            let message = format!(
                "It is not possible to invoke a client function from the server: {client_id}#{name}"
            );
            export_named_or_default(
                name,
                call_expr(
                    REGISTER_CLIENT_REFERENCE,
                    vec![throwing_arrow(&message), client_id.into(), name.as_str().into()],
                ),
            )
        })
        .collect()
}

/// Rewrites a `"use client"` module imported from the server graph.
#[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
pub fn transform_client_module<F>(
    module: &mut Module,
    get_client_id: F,
    options: ClientBoundaryOptions,
) -> Result<()>
where
    F: Fn() -> Result<Atom>,
{
    let export_names = transform_exported_client_things(module, &get_client_id, options)?;
    module.body.insert(
        0,
        named_import(
            "registerClientReference",
            REGISTER_CLIENT_REFERENCE,
            SERVER_EDGE_RUNTIME,
        ),
    );
    if !export_names.is_empty() {
        let client_id = get_client_id()?;
        module
            .body
            .extend(client_reference_stubs(&export_names, &client_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use swc_core::common::{SourceMap, sync::Lrc};

    use super::*;
    use crate::ast::{parse_module, print_module};

    fn parse(code: &str) -> Module {
        let cm: Lrc<SourceMap> = Default::default();
        parse_module(&cm, "test.js", code, &Default::default()).unwrap()
    }

    fn print(module: Module) -> String {
        let cm: Lrc<SourceMap> = Default::default();
        print_module(&cm, module, &Default::default()).unwrap().code
    }

    fn names(set: &FxIndexSet<Atom>) -> Vec<&str> {
        set.iter().map(|name| name.as_str()).collect()
    }

    const ALLOW_SERVER_MODULE: &str = r#"
'use client';
import { unstable_allowServer as allow } from 'waku/client';
import { helper, unused } from './helper';
import Default from './default';
const a = helper(b);
const b = 1, c = 2;
function d() { return Default; }
class E {}
export const f = allow(a + d());
export function Component() { return c; }
export default function Page() {}
"#;

    #[test]
    fn test_dependencies_reach_a_fixed_point() {
        let module = parse(ALLOW_SERVER_MODULE);
        let excluded: FxHashSet<Atom> = ["f", "Component", "allow"]
            .into_iter()
            .map(Atom::from)
            .collect();
        let first = collect_dependencies(&module, [atom!("a"), atom!("d")], &excluded);
        assert_eq!(names(&first), vec!["a", "d", "helper", "b", "Default"]);

        let second = collect_dependencies(&module, first.iter().cloned(), &excluded);
        assert_eq!(first, second);
    }

    #[test]
    fn test_allow_server_keeps_only_its_dependencies() {
        let mut module = parse(ALLOW_SERVER_MODULE);
        let export_names = transform_exported_client_things(
            &mut module,
            || Ok(atom!("/src/client.js")),
            ClientBoundaryOptions { dce_only: true },
        )
        .unwrap();
        assert_eq!(names(&export_names), vec!["Component", "default"]);

        let code = print(module);
        assert!(code.contains("import { helper } from './helper'"));
        assert!(code.contains("import Default from './default'"));
        assert!(!code.contains("unused"));
        assert!(!code.contains("waku/client"));
        assert!(code.contains("const a = helper(b)"));
        assert!(code.contains("const b = 1;"));
        assert!(!code.contains("c = 2"));
        assert!(code.contains("function d()"));
        assert!(!code.contains("class E"));
        assert!(!code.contains("Component"));
        assert!(!code.contains("Page"));
        assert!(code.contains("export const f = a + d();"));
    }

    #[test]
    fn test_allow_server_is_registered_outside_dce_mode() {
        let mut module = parse(ALLOW_SERVER_MODULE);
        transform_exported_client_things(
            &mut module,
            || Ok(atom!("/src/client.js")),
            ClientBoundaryOptions::default(),
        )
        .unwrap();
        let code = print(module);
        assert!(code.contains(
            "export const f = __waku_registerClientReference(a + d(), \"/src/client.js\", \"f\");"
        ));
    }

    #[test]
    fn test_allow_server_requires_one_argument() {
        for code in [
            "import { unstable_allowServer } from 'waku/client';\nexport const x = \
             unstable_allowServer();",
            "import { unstable_allowServer } from 'waku/client';\nexport const x = \
             unstable_allowServer(a, b);",
        ] {
            let mut module = parse(code);
            let err = transform_exported_client_things(
                &mut module,
                || Ok(atom!("id")),
                ClientBoundaryOptions::default(),
            )
            .unwrap_err();
            assert_eq!(err.to_string(), "allowServer should have exactly one argument");
        }
    }

    #[test]
    fn test_client_id_is_not_needed_without_exports() {
        let mut module = parse("'use client';\nconsole.log('side effect');");
        transform_client_module(
            &mut module,
            || bail!("client id should not be requested"),
            ClientBoundaryOptions::default(),
        )
        .unwrap();
        assert_eq!(module.body.len(), 1);
    }
}
