//! Tool registry, schema validation, capability enforcement, and the
//! sandboxed runner that dispatches a resolved tool body.

mod body;
mod capability;
mod definition;
mod net;
mod registry;
mod runner;
mod schema;

pub use body::{ToolBody, ToolContext};
pub use capability::{satisfies, write_path_allowed, Capability};
pub use definition::ToolDefinition;
pub use net::NetworkFetchTool;
pub use registry::ToolRegistry;
pub use runner::ToolRunner;
pub use schema::{render_tool_catalog, validate as validate_schema, validate_schema_shape};
