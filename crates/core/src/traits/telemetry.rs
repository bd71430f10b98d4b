use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::GpuTelemetry;

/// 加速器遥测源，由节点按固定周期轮询
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self) -> FleetResult<GpuTelemetry>;

    fn name(&self) -> &str;
}
