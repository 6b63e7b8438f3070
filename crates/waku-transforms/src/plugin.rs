//! The transform as seen by the bundler: per-file `transform` and
//! `resolve_id` hooks, and the mapping from module ids to the stable ids
//! references are registered under.

use anyhow::{Result, bail};
use parking_lot::Mutex;
use serde::Deserialize;
use swc_core::atoms::Atom;

use crate::{
    FxIndexMap,
    ast::TransformOutput,
    transforms::{
        client_boundary::ClientBoundaryOptions,
        rsc::transform_server,
        server_references::{transform_client, transform_client_for_ssr},
    },
};

/// Extensions of the modules the transform looks at.
pub const EXTENSIONS: &[&str] = &[".js", ".ts", ".tsx", ".jsx", ".mjs", ".cjs"];

/// Build inputs as the bundler configuration spells them. Only the keyed form
/// maps entry names to module ids.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum EntryFiles {
    Map(FxIndexMap<String, String>),
    List(Vec<String>),
    Single(String),
}

impl Default for EntryFiles {
    fn default() -> Self {
        EntryFiles::Map(Default::default())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// Whether this instance runs in the client (browser) module graph.
    pub is_client: bool,
    pub is_build: bool,
    #[serde(default)]
    pub client_entry_files: Option<EntryFiles>,
    #[serde(default)]
    pub server_entry_files: Option<EntryFiles>,
    /// Record resolved ids on the server dev graph. See
    /// [`RscTransformPlugin::resolved_map`].
    #[serde(default)]
    pub track_resolved: bool,
    /// Emit `unstable_allowServer` values without registering them.
    #[serde(default)]
    pub dce_only: bool,
}

fn entry_map(
    files: Option<EntryFiles>,
    name: &str,
    required: bool,
) -> Result<FxIndexMap<String, String>> {
    match files {
        Some(EntryFiles::Map(map)) => Ok(map),
        Some(EntryFiles::List(..)) | Some(EntryFiles::Single(..)) => {
            bail!("{name}: string/array input is unsupported")
        }
        None if required => bail!("{name} is required for builds"),
        None => Ok(Default::default()),
    }
}

/// Resolves a specifier the way the bundler would. Returns `None` when the
/// specifier cannot be resolved.
pub trait Resolver {
    fn resolve(&self, id: &str, importer: Option<&str>) -> Result<Option<String>>;
}

impl<F> Resolver for F
where
    F: Fn(&str, Option<&str>) -> Result<Option<String>>,
{
    fn resolve(&self, id: &str, importer: Option<&str>) -> Result<Option<String>> {
        (self)(id, importer)
    }
}

pub struct RscTransformPlugin {
    is_client: bool,
    is_build: bool,
    dce_only: bool,
    client_entry_files: FxIndexMap<String, String>,
    server_entry_files: FxIndexMap<String, String>,
    resolved_map: Option<Mutex<FxIndexMap<String, String>>>,
}

fn strip_query(id: &str) -> &str {
    id.split('?').next().unwrap_or(id)
}

fn extname(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rfind('.') {
        Some(0) | None => "",
        Some(index) => &file[index..],
    }
}

/// Joins and normalizes `/`-separated path segments. `.` segments are dropped
/// and `..` removes the previous segment.
pub fn join_path(paths: &[&str]) -> String {
    let absolute = paths.first().is_some_and(|first| first.starts_with('/'));
    let mut segments: Vec<&str> = vec![];
    for segment in paths.iter().flat_map(|path| path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            segment => segments.push(segment),
        }
    }
    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

impl RscTransformPlugin {
    pub fn new(config: Config) -> Result<Self> {
        let client_entry_files = entry_map(
            config.client_entry_files,
            "clientEntryFiles",
            config.is_build && !config.is_client,
        )?;
        let server_entry_files =
            entry_map(config.server_entry_files, "serverEntryFiles", config.is_build)?;
        let resolved_map = (!config.is_client && !config.is_build && config.track_resolved)
            .then(Default::default);
        Ok(Self {
            is_client: config.is_client,
            is_build: config.is_build,
            dce_only: config.dce_only,
            client_entry_files,
            server_entry_files,
            resolved_map,
        })
    }

    fn lookup_entry(files: &FxIndexMap<String, String>, id: &str) -> Option<Atom> {
        files
            .iter()
            .find(|(_, file)| *file == id)
            .map(|(key, _)| key.as_str().into())
    }

    /// The id a `"use client"` module is registered under.
    pub fn get_client_id(&self, id: &str) -> Result<Atom> {
        if self.is_client {
            bail!("getClientId is only for server");
        }
        if !self.is_build {
            return Ok(strip_query(id).into());
        }
        match Self::lookup_entry(&self.client_entry_files, id) {
            Some(client_id) => Ok(client_id),
            None => bail!("client id not found: {id}"),
        }
    }

    /// The id a `"use server"` module is registered under.
    pub fn get_server_id(&self, id: &str) -> Result<Atom> {
        if !self.is_build {
            return Ok(strip_query(id).into());
        }
        match Self::lookup_entry(&self.server_entry_files, id) {
            Some(server_id) => Ok(server_id),
            None => bail!("server id not found: {id}"),
        }
    }

    /// Returns `None` when the module is left as is.
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self, code))]
    pub fn transform(&self, code: &str, id: &str, ssr: bool) -> Result<Option<TransformOutput>> {
        // dependency optimization appends a query string to ids in dev
        let path = if self.is_build { id } else { strip_query(id) };
        if !EXTENSIONS.contains(&extname(path)) {
            return Ok(None);
        }
        let output = if self.is_client {
            if ssr {
                transform_client_for_ssr(code, id)?
            } else {
                transform_client(code, id, || self.get_server_id(id))?
            }
        } else if !ssr {
            None
        } else {
            transform_server(
                code,
                id,
                || self.get_client_id(id),
                || self.get_server_id(id),
                ClientBoundaryOptions {
                    dce_only: self.dce_only,
                },
            )?
        };
        if output.is_some() {
            tracing::debug!(id, "rewrote module");
        }
        Ok(output)
    }

    /// Unwraps dev-server id prefixes and, on the server dev graph, records
    /// which source specifier each resolved id came from.
    pub fn resolve_id<R>(
        &self,
        resolver: &R,
        id: &str,
        importer: Option<&str>,
    ) -> Result<Option<String>>
    where
        R: Resolver + ?Sized,
    {
        if self.is_build {
            return Ok(None);
        }
        if let Some(rest) = id.strip_prefix("/@id/") {
            return resolver.resolve(rest, importer);
        }
        if id.starts_with("/@fs/") {
            return resolver.resolve(&id["/@fs".len()..], importer);
        }
        if let Some(resolved_map) = &self.resolved_map {
            let resolved = resolver.resolve(id, importer)?;
            let src_id = match importer {
                Some(importer) if id.starts_with("./") || id.starts_with("../") => {
                    join_path(&[strip_query(importer), "..", id])
                }
                _ => id.to_string(),
            };
            if let Some(resolved) = resolved {
                let dst_id = strip_query(&resolved);
                if dst_id != src_id {
                    resolved_map
                        .lock()
                        .entry(dst_id.to_string())
                        .or_insert(src_id);
                }
            }
        }
        Ok(None)
    }

    /// Resolved id to the specifier it was first imported with.
    pub fn resolved_map(&self) -> Option<FxIndexMap<String, String>> {
        self.resolved_map.as_ref().map(|map| map.lock().clone())
    }
}
