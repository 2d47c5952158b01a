//! Extension configuration.

/// Codes the outer server assigned to the extension at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionConfig {
    /// Major opcode routing requests to the extension
    pub major_opcode: u8,
    /// First event code; CounterNotify is `event_base`, AlarmNotify `event_base + 1`
    pub event_base: u8,
    /// Extension error code for unknown counters and fences
    pub error_base: u8,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self { major_opcode: 130, event_base: 95, error_base: 154 }
    }
}
