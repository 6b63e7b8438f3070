use swc_core::{
    atoms::{Atom, atom},
    ecma::ast::*,
};

use crate::FxIndexSet;

/// Name a module exports its default binding under.
pub const DEFAULT_EXPORT: &str = "default";

pub(crate) fn export_name_atom(name: &ModuleExportName) -> Atom {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.clone(),
        ModuleExportName::Str(s) => s.value.to_string_lossy().into_owned().into(),
    }
}

/// Collects the names exported by `module`, in declaration order.
///
/// Default exports, whether declarations or expressions, are reported as
/// [`DEFAULT_EXPORT`]. Re-exported specifiers contribute their exported alias
/// when one is given.
pub fn collect_export_names(module: &Module) -> FxIndexSet<Atom> {
    let mut names = FxIndexSet::default();
    for item in &module.body {
        let ModuleItem::ModuleDecl(decl) = item else {
            continue;
        };
        match decl {
            ModuleDecl::ExportDecl(ExportDecl { decl, .. }) => match decl {
                Decl::Fn(f) => {
                    names.insert(f.ident.sym.clone());
                }
                Decl::Class(c) => {
                    names.insert(c.ident.sym.clone());
                }
                Decl::Var(var) => {
                    for d in &var.decls {
                        if let Pat::Ident(ident) = &d.name {
                            names.insert(ident.id.sym.clone());
                        }
                    }
                }
                _ => {}
            },
            ModuleDecl::ExportNamed(NamedExport { specifiers, .. }) => {
                for specifier in specifiers {
                    match specifier {
                        ExportSpecifier::Named(ExportNamedSpecifier { orig, exported, .. }) => {
                            names.insert(export_name_atom(exported.as_ref().unwrap_or(orig)));
                        }
                        ExportSpecifier::Namespace(ExportNamespaceSpecifier { name, .. }) => {
                            names.insert(export_name_atom(name));
                        }
                        ExportSpecifier::Default(ExportDefaultSpecifier { exported }) => {
                            names.insert(exported.sym.clone());
                        }
                    }
                }
            }
            ModuleDecl::ExportDefaultDecl(..) | ModuleDecl::ExportDefaultExpr(..) => {
                names.insert(atom!("default"));
            }
            _ => {}
        }
    }
    names
}
