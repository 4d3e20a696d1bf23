pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod formatter;
pub mod render;
pub mod state;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use client::ApiClient;
pub use config::{Config, Mode};
pub use controller::{AppState, Phase, PendingSend, SendOutcome, SendRejected, SessionController};
pub use error::{ChatError, PersistenceError, ValidationError};
pub use formatter::{format_message, CodeBlock, FormattedMessage};
pub use render::html::{export_html, export_text, HtmlView};
pub use render::{RenderPipeline, View};
pub use state::{filter_models, ModelInfo, Role, SessionRef, SessionSummary, Turn, User};
pub use store::{ConversationStore, FileStorage, MemoryStorage, Storage};
pub use transport::{Backend, ChatRequest, ChatResponse, RetryPolicy};
