/// Key/value parameter list, as shipped over the wire during session setup.
///
/// A pair represents the key and value of one compressor parameter. Values
/// are parsed by the owning scheme's [`crate::compressor::ParamBlock`].
pub type KwargList = Vec<(String, String)>;

/// Device a tensor's storage lives on.
///
/// bitgrad defines its own device enum so it remains a standalone library
/// usable by any tensor runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceKind {
    /// Host (CPU) memory.
    Host = 0,
    /// Accelerator (GPU) memory.
    Accel = 1,
}

impl DeviceKind {
    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DeviceKind::Host => "host",
            DeviceKind::Accel => "accel",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Priority levels for tasks submitted to the execution engine.
///
/// The engine may run higher-priority tasks first when their dependency
/// sets allow it. Gradients for layers close to the output are typically
/// submitted at higher priority so communication can start while the
/// backward pass is still producing earlier layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Highest priority: gradients blocking the next optimizer step.
    Critical = 0,
    /// Medium priority: ordinary per-layer compression traffic.
    Normal = 1,
    /// Lowest priority: background re-packs, diagnostics.
    Bulk = 2,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => f.write_str("critical"),
            Priority::Normal => f.write_str("normal"),
            Priority::Bulk => f.write_str("bulk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_display() {
        assert_eq!(DeviceKind::Host.to_string(), "host");
        assert_eq!(DeviceKind::Accel.to_string(), "accel");
    }

    #[test]
    fn test_device_kind_distinct() {
        assert_ne!(DeviceKind::Host, DeviceKind::Accel);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::Normal);
        assert!(Priority::Normal < Priority::Bulk);
    }

    #[test]
    fn test_priority_repr() {
        assert_eq!(Priority::Critical as u8, 0);
        assert_eq!(Priority::Normal as u8, 1);
        assert_eq!(Priority::Bulk as u8, 2);
    }
}
