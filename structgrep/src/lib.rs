pub mod config;
pub mod errors;
pub mod operations;
pub mod render;
pub mod results;
pub mod search;
pub mod template;
pub mod version;

pub use config::GrepConfig;
pub use errors::{GrepError, GrepResult};
pub use operations::{Operation, OperationCatalog, OperationInfo};
pub use render::{ColorFormat, DisplayMode, Highlighter, RenderOptions};
pub use results::{FieldMatch, SearchOutput};
pub use search::{search, EngineSettings, SearchSpec};
pub use version::SpatchVersion;
