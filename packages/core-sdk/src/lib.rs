pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod organizer;
pub mod prompts;
pub mod server;
pub mod telemetry;
pub mod workspace;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::error::{OrganizeError, OrganizeResult};
    pub use crate::llm::{self, HttpTransport, Provider, Transport};
    pub use crate::models::{self, ChatMessage, ProviderKind, Settings};
    pub use crate::organizer::{Organized, Organizer, RunGate, Workspace};
    pub use crate::prompts;
    pub use crate::server;
    pub use crate::telemetry;
    pub use crate::workspace::FileWorkspace;
}
