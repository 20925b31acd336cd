// interrupt controller (中断控制器)
pub mod controller;

// human command types (人工指令)
pub mod command;

// command ingestion and resume service
pub mod service;

// checkpoint store implementations
pub mod store;

// expiry processor (过期处理器)
pub mod expiry;

// checkpoint notification
pub mod notify;

// HTTP surface
pub mod api;

pub use command::{CommandRequest, HitlCommand, ResumeResult};
pub use controller::{InterruptController, InterruptPolicy};
pub use expiry::{ExpiryCallback, ExpiryProcessor, SweepStats};
pub use notify::{CheckpointNotifier, WebhookNotifier};
pub use service::HitlService;
pub use store::InMemoryCheckpointStore;
