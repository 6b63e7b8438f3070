pub mod client_boundary;
pub mod inline_server_functions;
pub mod rsc;
pub mod server_functions;
pub mod server_references;

pub const REGISTER_CLIENT_REFERENCE: &str = "__waku_registerClientReference";
pub const REGISTER_SERVER_REFERENCE: &str = "__waku_registerServerReference";

/// Runtime that provides the reference registration primitives in the server
/// graph.
pub const SERVER_EDGE_RUNTIME: &str = "react-server-dom-webpack/server.edge";
pub const CLIENT_RUNTIME: &str = "react-server-dom-webpack/client";
pub const WAKU_MINIMAL_CLIENT: &str = "waku/minimal/client";
