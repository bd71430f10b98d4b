use tracing::debug;

use fleet_core::{NodeId, NodeStatus, ResourceVector, TaskRequirements};

use crate::registry::NodeSnapshot;

/// 节点选择策略
///
/// 从快照中筛出满足任务需求的节点，并按优先级排序返回。
/// 调度器按顺序在节点锁内重新校验并预留，排在前面的节点失败时尝试下一个。
pub trait NodeSelectionStrategy: Send + Sync {
    fn rank_candidates(
        &self,
        requirements: &TaskRequirements,
        nodes: &[NodeSnapshot],
    ) -> Vec<NodeId>;

    fn name(&self) -> &str;
}

/// 节点是否可以接收该任务：在线、静态能力满足、当前余量足够
pub fn is_eligible(node: &NodeSnapshot, requirements: &TaskRequirements) -> bool {
    node.record.status == NodeStatus::Active
        && node.record.capability.satisfies(requirements)
        && requirements.as_resources().fits_within(&node.headroom())
}

/// 最佳适配：分配后剩余算力最小的节点优先，相同时节点ID小者优先
pub struct BestFitStrategy;

impl BestFitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BestFitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for BestFitStrategy {
    fn rank_candidates(
        &self,
        requirements: &TaskRequirements,
        nodes: &[NodeSnapshot],
    ) -> Vec<NodeId> {
        let request: ResourceVector = requirements.as_resources();
        let mut candidates: Vec<(u64, NodeId)> = nodes
            .iter()
            .filter(|node| is_eligible(node, requirements))
            .map(|node| {
                let leftover = node.headroom().compute - request.compute;
                (leftover, node.record.id)
            })
            .collect();

        if candidates.is_empty() {
            debug!(
                accelerator = %requirements.accelerator_type,
                compute = requirements.compute_power_units,
                memory = requirements.memory_bytes,
                "没有满足需求的可用节点"
            );
            return Vec::new();
        }

        candidates.sort_unstable();

        debug!(
            "最佳适配策略选择节点: {} (剩余算力: {}, 候选数: {})",
            candidates[0].1,
            candidates[0].0,
            candidates.len()
        );

        candidates.into_iter().map(|(_, id)| id).collect()
    }

    fn name(&self) -> &str {
        "BestFit"
    }
}
