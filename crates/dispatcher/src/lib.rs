//! # Dispatcher
//!
//! 事件分发管线。
//!
//! 负责：
//! - 接收 `Dispatch` 并按同意状态入队
//! - 每个 destination 一个投递循环，互不阻塞
//! - 屏障、加载规则、字段映射与转换链

pub mod barriers;
pub mod destinations;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod mappings;
pub mod metrics;
pub mod queue;
pub mod transform;

pub use barriers::{
    BarrierContext, BarrierCoordinator, BarrierFactory, BarrierManager, BatchingBarrier,
    BatchingBarrierFactory,
};
pub use contracts::{Destination, Dispatch};
pub use destinations::LogDestination;
pub use dispatcher::{DispatchManager, DispatchManagerBuilder};
pub use error::DispatcherError;
pub use handle::DestinationHandle;
pub use mappings::MappingsEngine;
pub use metrics::{DestinationMetrics, MetricsSnapshot};
pub use queue::{InMemoryQueueRepository, QueueManager, QueueMetrics};
pub use transform::TransformerCoordinator;
