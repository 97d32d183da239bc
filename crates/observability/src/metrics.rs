//! 投递管道指标收集模块
//!
//! 基于 `metrics` 宏记录 track、队列、屏障与投递相关指标。
//! 未安装 recorder 时所有调用都是空操作。

use contracts::{BarrierState, TrackStatus};
use metrics::{counter, gauge, histogram};

/// 记录 track 结果
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_track_result;
///
/// let result = manager.track(dispatch, None).await?;
/// record_track_result(result.status);
/// ```
pub fn record_track_result(status: TrackStatus) {
    counter!(
        "dispatch_pipeline_track_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一次批量投递
pub fn record_batch_delivered(destination_id: &str, size: usize) {
    counter!(
        "dispatch_pipeline_batches_total",
        "destination" => destination_id.to_string()
    )
    .increment(1);

    counter!(
        "dispatch_pipeline_dispatches_delivered_total",
        "destination" => destination_id.to_string()
    )
    .increment(size as u64);

    histogram!(
        "dispatch_pipeline_batch_size",
        "destination" => destination_id.to_string()
    )
    .record(size as f64);
}

/// 记录从队列删除的事件
///
/// `reason`: `delivered` / `rejected` / `transform_dropped` / `purged`
pub fn record_dispatches_deleted(destination_id: &str, count: usize, reason: &str) {
    if count == 0 {
        return;
    }
    counter!(
        "dispatch_pipeline_dispatches_deleted_total",
        "destination" => destination_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// 记录待投递队列深度
pub fn record_pending_dispatches(destination_id: &str, count: usize) {
    gauge!(
        "dispatch_pipeline_pending_dispatches",
        "destination" => destination_id.to_string()
    )
    .set(count as f64);
}

/// 记录屏障合并状态 (open = 1, closed = 0)
pub fn record_barrier_state(destination_id: &str, state: BarrierState) {
    let value = match state {
        BarrierState::Open => 1.0,
        BarrierState::Closed => 0.0,
    };
    gauge!(
        "dispatch_pipeline_barrier_open",
        "destination" => destination_id.to_string()
    )
    .set(value);
}
