// SPDX-License-Identifier: PMPL-1.0-or-later
//! Access gating of membership results.
//!
//! Authorization is decided elsewhere; the engine only asks, per device,
//! whether the caller may see it.

use std::collections::BTreeSet;

use crate::group::DeviceId;

pub trait AccessGate: Send + Sync {
    fn can_view(&self, device: DeviceId) -> bool;
}

/// Sees every device.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn can_view(&self, _device: DeviceId) -> bool {
        true
    }
}

/// Sees only the listed devices.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    devices: BTreeSet<DeviceId>,
}

impl AllowList {
    pub fn new(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }
}

impl AccessGate for AllowList {
    fn can_view(&self, device: DeviceId) -> bool {
        self.devices.contains(&device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gates() {
        assert!(AllowAll.can_view(DeviceId(99)));
        let list = AllowList::new([DeviceId(1), DeviceId(3)]);
        assert!(list.can_view(DeviceId(3)));
        assert!(!list.can_view(DeviceId(2)));
    }
}
