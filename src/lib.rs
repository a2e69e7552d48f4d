pub mod error;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod rewrite;
pub mod service;
pub mod store;
pub mod valves;

pub use error::{DuplicateError, LoadError, LoadErrorKind, NotFoundError, ValidationError};
pub use loader::{parse_frontmatter, FunctionKind, ModuleHandle, ModuleLoader};
pub use registry::FunctionRegistry;
pub use rewrite::ImportRewriter;
pub use service::{FunctionForm, FunctionService};
pub use store::{FunctionMeta, FunctionRecord, FunctionStore, FunctionUpdate, MemoryStore};
pub use valves::{ValveManager, ValveSchema};
