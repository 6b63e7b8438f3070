//! Parsing, printing and node-building helpers shared by the transforms.

use anyhow::{Result, bail};
use swc_core::{
    atoms::{Atom, Wtf8Atom},
    common::{
        DUMMY_SP, FileName, SourceMap, SyntaxContext, comments::SingleThreadedComments,
        input::StringInput, sync::Lrc,
    },
    ecma::{
        ast::*,
        codegen::{self, Emitter, text_writer::JsWriter},
        parser::{EsSyntax, Parser, Syntax, TsSyntax, lexer::Lexer},
        utils::{ExprFactory, quote_ident},
        visit::{Visit, VisitWith, noop_visit_type},
    },
    quote,
};

use crate::FxIndexSet;

pub const USE_CLIENT: &str = "use client";
pub const USE_SERVER: &str = "use server";

/// Printed output of a transformed module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
}

fn syntax_for(file_name: &str) -> Syntax {
    let path = file_name.split('?').next().unwrap_or(file_name);
    if path.ends_with(".ts") || path.ends_with(".mts") || path.ends_with(".cts") {
        Syntax::Typescript(TsSyntax {
            decorators: true,
            ..Default::default()
        })
    } else if path.ends_with(".tsx") {
        Syntax::Typescript(TsSyntax {
            tsx: true,
            decorators: true,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            jsx: true,
            import_attributes: true,
            ..Default::default()
        })
    }
}

/// Parses `source` as an ES module. The syntax (JS/JSX or TS/TSX) is picked
/// from the extension of `file_name`.
pub fn parse_module(
    cm: &Lrc<SourceMap>,
    file_name: &str,
    source: &str,
    comments: &SingleThreadedComments,
) -> Result<Module> {
    let fm = cm.new_source_file(
        FileName::Custom(file_name.to_string()).into(),
        source.to_string(),
    );
    let lexer = Lexer::new(
        syntax_for(file_name),
        EsVersion::latest(),
        StringInput::from(&*fm),
        Some(comments),
    );
    let mut parser = Parser::new_from(lexer);
    let span = tracing::trace_span!("swc_parse").entered();
    let result = parser.parse_module();
    drop(span);

    let mut messages: Vec<String> = parser
        .take_errors()
        .into_iter()
        .map(|e| e.kind().msg().into_owned())
        .collect();
    match result {
        Ok(module) if messages.is_empty() => Ok(module),
        Ok(_) => bail!("Failed to parse {file_name}: {}", messages.join(", ")),
        Err(e) => {
            messages.push(e.kind().msg().into_owned());
            bail!("Failed to parse {file_name}: {}", messages.join(", "))
        }
    }
}

pub fn print_module(
    cm: &Lrc<SourceMap>,
    module: Module,
    comments: &SingleThreadedComments,
) -> Result<TransformOutput> {
    let program = Program::Module(module);
    let mut output = vec![];
    {
        let span = tracing::trace_span!("swc_codegen").entered();
        let mut emitter = Emitter {
            cfg: codegen::Config::default(),
            cm: cm.clone(),
            wr: Box::new(JsWriter::new(cm.clone(), "\n", &mut output, None)),
            comments: Some(comments),
        };
        emitter.emit_program(&program)?;
        drop(span);
    }
    Ok(TransformOutput {
        code: String::from_utf8(output)?,
    })
}

/// Returns the string value of `stmt` if it is a bare string-literal
/// expression statement.
pub fn directive_value(stmt: &Stmt) -> Option<&Wtf8Atom> {
    match stmt {
        Stmt::Expr(ExprStmt { expr, .. }) => match &**expr {
            Expr::Lit(Lit::Str(Str { value, .. })) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

pub fn is_directive(stmt: &Stmt, directive: &str) -> bool {
    directive_value(stmt).is_some_and(|value| value == directive)
}

/// Checks the leading run of string-literal statements of a function body for
/// `"use server"`.
pub fn has_use_server_directive(body: Option<&BlockStmt>) -> bool {
    let Some(body) = body else {
        return false;
    };
    for stmt in &body.stmts {
        match directive_value(stmt) {
            Some(value) if value == USE_SERVER => return true,
            Some(_) => {}
            None => break,
        }
    }
    false
}

pub fn strip_use_server_directives(body: &mut BlockStmt) {
    body.stmts.retain(|stmt| !is_directive(stmt, USE_SERVER));
}

/// Finds the module-level directive. Bundlers may inject imports ahead of the
/// directive, so imports are skipped while scanning the leading run.
pub fn module_directive(module: &Module) -> Option<(usize, &'static str)> {
    for (index, item) in module.body.iter().enumerate() {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(..)) => {}
            ModuleItem::Stmt(stmt) => match directive_value(stmt) {
                Some(value) if value == USE_CLIENT => return Some((index, USE_CLIENT)),
                Some(value) if value == USE_SERVER => return Some((index, USE_SERVER)),
                Some(_) => {}
                None => break,
            },
            _ => break,
        }
    }
    None
}

/// Index right after the leading run of imports and directives. Any other
/// expression statement ends the run.
pub fn find_last_import_index(body: &[ModuleItem]) -> usize {
    body.iter()
        .position(|item| match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(..)) => false,
            ModuleItem::Stmt(stmt) => directive_value(stmt).is_none(),
            _ => true,
        })
        .unwrap_or(body.len())
}

pub fn ident(sym: &str) -> Ident {
    Ident::new(sym.into(), DUMMY_SP, SyntaxContext::empty())
}

pub fn call_expr(callee: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        callee: ident(callee).as_callee(),
        args: args.into_iter().map(|arg| arg.as_arg()).collect(),
        ..Default::default()
    })
}

/// `target.bind(null, ...bound)`
pub fn bind_null(target: &str, bound: &[Atom]) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        callee: Expr::Member(MemberExpr {
            span: DUMMY_SP,
            obj: Box::new(ident(target).into()),
            prop: MemberProp::Ident(quote_ident!("bind")),
        })
        .as_callee(),
        args: std::iter::once(Expr::Lit(Lit::Null(Null { span: DUMMY_SP })).as_arg())
            .chain(bound.iter().map(|name| ident(name).as_arg()))
            .collect(),
        ..Default::default()
    })
}

pub fn const_decl(name: Ident, init: Expr) -> VarDecl {
    VarDecl {
        span: DUMMY_SP,
        kind: VarDeclKind::Const,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(name.into()),
            init: Some(Box::new(init)),
            definite: false,
        }],
        ..Default::default()
    }
}

/// `export const name = init;`
pub fn export_const(name: Ident, init: Expr) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
        span: DUMMY_SP,
        decl: const_decl(name, init).into(),
    }))
}

/// `export default expr;`
pub fn export_default(expr: Expr) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr {
        span: DUMMY_SP,
        expr: Box::new(expr),
    }))
}

/// `export const name = init;`, or `export default init;` for the `default`
/// export name.
pub fn export_named_or_default(name: &Atom, init: Expr) -> ModuleItem {
    if name == "default" {
        export_default(init)
    } else {
        export_const(Ident::new(name.clone(), DUMMY_SP, SyntaxContext::empty()), init)
    }
}

pub fn expr_stmt(expr: Expr) -> ModuleItem {
    ModuleItem::Stmt(Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    }))
}

/// `() => { throw new Error(message); }`
pub fn throwing_arrow(message: &str) -> Expr {
    quote!(
        "() => { throw new Error($message); }" as Expr,
        message: Expr = message.into(),
    )
}

/// `import { imported as local } from 'source';`
pub fn named_import(imported: &str, local: &str, source: &str) -> ModuleItem {
    let mut item = if imported == local {
        quote!(
            "import { $local } from 'dummy'" as ModuleItem,
            local = ident(local),
        )
    } else {
        quote!(
            "import { $imported as $local } from 'dummy'" as ModuleItem,
            imported = ident(imported),
            local = ident(local),
        )
    };
    // the import source cannot be parametrized in `quote!()`, so patch it manually
    if let ModuleItem::ModuleDecl(ModuleDecl::Import(decl)) = &mut item {
        *decl.src = source.into();
    }
    item
}

/// Collects every identifier referenced or bound inside a node. Member
/// properties and object keys are `IdentName`s and are never collected.
#[derive(Default)]
pub struct IdentCollector {
    pub idents: FxIndexSet<Atom>,
}

impl Visit for IdentCollector {
    noop_visit_type!();

    fn visit_ident(&mut self, ident: &Ident) {
        self.idents.insert(ident.sym.clone());
    }
}

pub fn collect_identifiers<N>(node: &N) -> FxIndexSet<Atom>
where
    N: VisitWith<IdentCollector>,
{
    let mut collector = IdentCollector::default();
    node.visit_with(&mut collector);
    collector.idents
}

fn collect_idents_in_array_pat(elems: &[Option<Pat>], idents: &mut FxIndexSet<Atom>) {
    for elem in elems.iter().flatten() {
        collect_idents_in_pat(elem, idents);
    }
}

fn collect_idents_in_object_pat(props: &[ObjectPatProp], idents: &mut FxIndexSet<Atom>) {
    for prop in props {
        match prop {
            ObjectPatProp::KeyValue(KeyValuePatProp { value, .. }) => {
                // For { foo: bar }, only 'bar' is a local binding.
                collect_idents_in_pat(value, idents);
            }
            ObjectPatProp::Assign(AssignPatProp { key, .. }) => {
                idents.insert(key.id.sym.clone());
            }
            ObjectPatProp::Rest(RestPat { arg, .. }) => {
                collect_idents_in_pat(arg, idents);
            }
        }
    }
}

pub fn collect_idents_in_pat(pat: &Pat, idents: &mut FxIndexSet<Atom>) {
    match pat {
        Pat::Ident(ident) => {
            idents.insert(ident.id.sym.clone());
        }
        Pat::Array(array) => {
            collect_idents_in_array_pat(&array.elems, idents);
        }
        Pat::Object(object) => {
            collect_idents_in_object_pat(&object.props, idents);
        }
        Pat::Assign(AssignPat { left, .. }) => {
            collect_idents_in_pat(left, idents);
        }
        Pat::Rest(RestPat { arg, .. }) => {
            collect_idents_in_pat(arg, idents);
        }
        Pat::Expr(..) | Pat::Invalid(..) => {}
    }
}

fn collect_local_names<'a>(
    params: impl IntoIterator<Item = &'a Pat>,
    body: Option<&BlockStmt>,
) -> FxIndexSet<Atom> {
    let mut names = FxIndexSet::default();
    for param in params {
        collect_idents_in_pat(param, &mut names);
    }
    for stmt in body.map(|body| body.stmts.as_slice()).unwrap_or_default() {
        if let Stmt::Decl(Decl::Var(var)) = stmt {
            for decl in &var.decls {
                collect_idents_in_pat(&decl.name, &mut names);
            }
        }
    }
    names
}

/// Names bound directly by a function: its parameters and the variables
/// declared at the top level of its body.
pub fn collect_local_names_in_function(function: &Function) -> FxIndexSet<Atom> {
    collect_local_names(
        function.params.iter().map(|param| &param.pat),
        function.body.as_ref(),
    )
}

pub fn collect_local_names_in_arrow(arrow: &ArrowExpr) -> FxIndexSet<Atom> {
    let body = match &*arrow.body {
        BlockStmtOrExpr::BlockStmt(block) => Some(block),
        BlockStmtOrExpr::Expr(..) => None,
    };
    collect_local_names(arrow.params.iter(), body)
}
