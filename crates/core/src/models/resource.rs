use serde::{Deserialize, Serialize};

/// 三个维度的资源量：算力单位、显存字节、存储字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    pub compute: u64,
    pub memory: u64,
    pub storage: u64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        compute: 0,
        memory: 0,
        storage: 0,
    };

    pub fn new(compute: u64, memory: u64, storage: u64) -> Self {
        Self {
            compute,
            memory,
            storage,
        }
    }

    pub fn gpu(compute: u64, memory: u64) -> Self {
        Self::new(compute, memory, 0)
    }

    pub fn storage_only(storage: u64) -> Self {
        Self::new(0, 0, storage)
    }

    /// 每个维度都不超过 `other`
    pub fn fits_within(&self, other: &ResourceVector) -> bool {
        self.compute <= other.compute && self.memory <= other.memory && self.storage <= other.storage
    }

    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            compute: self.compute.saturating_sub(other.compute),
            memory: self.memory.saturating_sub(other.memory),
            storage: self.storage.saturating_sub(other.storage),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// 一次释放操作的结果；`over_released` 非零表示请求释放的量超过了已用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseOutcome {
    pub over_released: ResourceVector,
}

impl ReleaseOutcome {
    pub fn is_consistent(&self) -> bool {
        self.over_released.is_zero()
    }
}

/// 资源账本
///
/// 维护容量总量与已用量。预留是全有或全无的：任意维度余量不足时不做任何修改。
/// 释放在零处截断，超额释放通过返回值暴露给调用方记录，而不是静默吞掉。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLedger {
    total: ResourceVector,
    used: ResourceVector,
}

impl ResourceLedger {
    pub fn new(total: ResourceVector) -> Self {
        Self {
            total,
            used: ResourceVector::ZERO,
        }
    }

    pub fn total(&self) -> ResourceVector {
        self.total
    }

    pub fn used(&self) -> ResourceVector {
        self.used
    }

    /// 余量 = total - used
    pub fn headroom(&self) -> ResourceVector {
        self.total.saturating_sub(&self.used)
    }

    pub fn can_reserve(&self, request: &ResourceVector) -> bool {
        request.fits_within(&self.headroom())
    }

    pub fn try_reserve(&mut self, request: &ResourceVector) -> bool {
        if !self.can_reserve(request) {
            return false;
        }
        self.used.compute += request.compute;
        self.used.memory += request.memory;
        self.used.storage += request.storage;
        true
    }

    pub fn release(&mut self, request: &ResourceVector) -> ReleaseOutcome {
        let over_released = request.saturating_sub(&self.used);
        self.used = self.used.saturating_sub(request);
        ReleaseOutcome { over_released }
    }

    pub fn is_within_capacity(&self) -> bool {
        self.used.fits_within(&self.total)
    }
}
