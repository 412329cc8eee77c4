pub mod api;
pub mod areas;
pub mod beacon;
pub mod command;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod engine;
pub mod feedback;
pub mod hub;
pub mod locator;
pub mod lock;
pub mod logging;
pub mod room_cache;
pub mod supervisor;
pub mod voice;
pub mod window;

pub use config::Config;
pub use config::Diagnostic;
pub use config::format_diagnostics;
pub use engine::Engine;
pub use engine::EngineHandle;
pub use engine::Snapshot;
pub use engine::Trigger;
