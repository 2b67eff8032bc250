pub mod error;
pub mod network;
pub mod selector;
pub mod service;
pub mod spreader;
pub mod updater;
pub mod worker;

pub use error::AttentionError;
pub use network::{HebbianEdge, HebbianNetwork, HebbianNode, ImportanceType};
pub use selector::{EvenThreadCount, RequestSelector};
pub use service::{AttentionBroker, AttentionConfig, AttentionService, GLOBAL_CONTEXT};
pub use spreader::{HandleCount, SpreaderParams, TokenSpreader};
pub use updater::ExactCountUpdater;
pub use worker::{AttentionRequest, WorkerPool};
