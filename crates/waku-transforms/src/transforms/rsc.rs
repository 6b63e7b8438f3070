//! Server-graph entry point of the boundary transform.

use anyhow::Result;
use serde::Deserialize;
use swc_core::{
    atoms::Atom,
    common::{DUMMY_SP, SourceMap, errors::HANDLER, sync::Lrc},
    ecma::{
        ast::*,
        visit::{VisitMut, visit_mut_pass},
    },
};

use super::{
    REGISTER_SERVER_REFERENCE, SERVER_EDGE_RUNTIME,
    client_boundary::{ClientBoundaryOptions, transform_client_module},
    inline_server_functions::transform_inline_server_functions,
    server_functions::transform_exported_server_functions,
};
use crate::ast::{
    TransformOutput, USE_CLIENT, USE_SERVER, find_last_import_index, module_directive,
    named_import, parse_module, print_module,
};

/// Rewrites a module for the server graph.
///
/// * `"use client"` modules keep only what `unstable_allowServer` values
///   need and export client reference stubs.
/// * `"use server"` modules have the directive removed and every exported
///   function registered as a server reference.
/// * Inline `"use server"` closures are hoisted in any other module.
///
/// Returns whether the module changed.
pub fn transform_server_module<C, S>(
    module: &mut Module,
    get_client_id: C,
    get_server_id: S,
    options: ClientBoundaryOptions,
) -> Result<bool>
where
    C: Fn() -> Result<Atom>,
    S: Fn() -> Result<Atom>,
{
    let mut has_use_server = false;
    match module_directive(module) {
        Some((_, USE_CLIENT)) => {
            transform_client_module(module, get_client_id, options)?;
            return Ok(true);
        }
        Some((index, _)) => {
            module.body.remove(index);
            has_use_server = true;
        }
        None => {}
    }

    let mut transformed =
        has_use_server && transform_exported_server_functions(module, &get_server_id)?;
    transformed = transform_inline_server_functions(module, &get_server_id)? || transformed;
    if transformed {
        let index = find_last_import_index(&module.body);
        module.body.insert(
            index,
            named_import(
                "registerServerReference",
                REGISTER_SERVER_REFERENCE,
                SERVER_EDGE_RUNTIME,
            ),
        );
    }
    Ok(transformed)
}

/// Parses, transforms and prints a module for the server graph. Returns
/// `None` when the module needs no rewrite.
#[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(file_name = %file_name))]
pub fn transform_server<C, S>(
    code: &str,
    file_name: &str,
    get_client_id: C,
    get_server_id: S,
    options: ClientBoundaryOptions,
) -> Result<Option<TransformOutput>>
where
    C: Fn() -> Result<Atom>,
    S: Fn() -> Result<Atom>,
{
    if !code.contains(USE_CLIENT) && !code.contains(USE_SERVER) {
        return Ok(None);
    }
    let cm: Lrc<SourceMap> = Default::default();
    let comments = Default::default();
    let mut module = parse_module(&cm, file_name, code, &comments)?;
    if !transform_server_module(&mut module, get_client_id, get_server_id, options)? {
        return Ok(None);
    }
    print_module(&cm, module, &comments).map(Some)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    pub client_id: String,
    pub server_id: String,
    #[serde(default)]
    pub dce_only: bool,
}

struct RscServer {
    config: Config,
}

impl VisitMut for RscServer {
    fn visit_mut_module(&mut self, module: &mut Module) {
        let result = transform_server_module(
            module,
            || Ok(self.config.client_id.as_str().into()),
            || Ok(self.config.server_id.as_str().into()),
            ClientBoundaryOptions {
                dce_only: self.config.dce_only,
            },
        );
        if let Err(err) = result {
            HANDLER.with(|handler| handler.struct_span_err(DUMMY_SP, &err.to_string()).emit());
        }
    }
}

/// The server-graph transform as a pass over an already parsed program, with
/// fixed module ids.
pub fn rsc_server(config: Config) -> impl Pass {
    visit_mut_pass(RscServer { config })
}
