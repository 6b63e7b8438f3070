//! Client-graph side of `"use server"` modules. The module body never reaches
//! the browser; each export is replaced by a stub that calls back into the
//! server.

use anyhow::Result;
use swc_core::{
    atoms::Atom,
    common::{DUMMY_SP, SourceMap, sync::Lrc},
    ecma::ast::*,
    quote,
};

use super::{CLIENT_RUNTIME, WAKU_MINIMAL_CLIENT};
use crate::{
    ast::{
        TransformOutput, USE_SERVER, export_named_or_default, module_directive, named_import,
        parse_module, print_module, throwing_arrow,
    },
    exports::collect_export_names,
};

pub const SSR_ERROR_MESSAGE: &str = "You cannot call server functions during SSR";

fn is_use_server_module(module: &Module) -> bool {
    matches!(module_directive(module), Some((_, USE_SERVER)))
}

fn new_module(body: Vec<ModuleItem>) -> Module {
    Module {
        span: DUMMY_SP,
        body,
        shebang: None,
    }
}

/// Replaces a `"use server"` module by `createServerReference("<id>#<name>",
/// callServerRsc)` stubs, one per export.
pub fn server_reference_stubs<F>(module: &Module, get_server_id: F) -> Result<Option<Module>>
where
    F: Fn() -> Result<Atom>,
{
    if !is_use_server_module(module) {
        return Ok(None);
    }
    let mut body = vec![
        named_import("createServerReference", "createServerReference", CLIENT_RUNTIME),
        named_import("unstable_callServerRsc", "callServerRsc", WAKU_MINIMAL_CLIENT),
    ];
    for name in collect_export_names(module) {
        let reference_id = format!("{}#{name}", get_server_id()?);
        body.push(export_named_or_default(
            &name,
            quote!(
                "createServerReference($id, callServerRsc)" as Expr,
                id: Expr = reference_id.as_str().into(),
            ),
        ));
    }
    Ok(Some(new_module(body)))
}

/// Replaces a `"use server"` module by functions that throw when called
/// during server-side rendering.
pub fn ssr_stubs(module: &Module) -> Option<Module> {
    if !is_use_server_module(module) {
        return None;
    }
    let body = collect_export_names(module)
        .iter()
        .map(|name| export_named_or_default(name, throwing_arrow(SSR_ERROR_MESSAGE)))
        .collect();
    Some(new_module(body))
}

/// Transform for modules loaded by the browser. Returns `None` when the
/// module is not a `"use server"` module.
#[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(file_name = %file_name))]
pub fn transform_client<F>(
    code: &str,
    file_name: &str,
    get_server_id: F,
) -> Result<Option<TransformOutput>>
where
    F: Fn() -> Result<Atom>,
{
    if !code.contains(USE_SERVER) {
        return Ok(None);
    }
    let cm: Lrc<SourceMap> = Default::default();
    let module = parse_module(&cm, file_name, code, &Default::default())?;
    match server_reference_stubs(&module, get_server_id)? {
        Some(stubs) => print_module(&cm, stubs, &Default::default()).map(Some),
        None => Ok(None),
    }
}

/// Transform for modules loaded by the client graph while server-side
/// rendering.
#[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(file_name = %file_name))]
pub fn transform_client_for_ssr(code: &str, file_name: &str) -> Result<Option<TransformOutput>> {
    if !code.contains(USE_SERVER) {
        return Ok(None);
    }
    let cm: Lrc<SourceMap> = Default::default();
    let module = parse_module(&cm, file_name, code, &Default::default())?;
    match ssr_stubs(&module) {
        Some(stubs) => print_module(&cm, stubs, &Default::default()).map(Some),
        None => Ok(None),
    }
}
