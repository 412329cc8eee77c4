mod engine;
mod message;
mod snapshot;
mod status;

pub use engine::AppContext;
pub use engine::Engine;
pub use engine::EngineHandle;
pub use message::Trigger;
pub use message::WorkerMessage;
pub use snapshot::DeviceView;
pub use snapshot::RoomView;
pub use snapshot::Snapshot;
pub use status::Status;
