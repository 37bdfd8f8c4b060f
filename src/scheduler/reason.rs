use std::fmt;

/// Why a heartbeat attempt was started. Forced reasons bypass rate limiting
/// and join an in-flight send instead of skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Manual,
    Init,
    WatchdogRecovery,
    BgLocation,
    Booster,
    ForegroundLoop,
}

impl TriggerReason {
    pub fn is_forced(self) -> bool {
        matches!(
            self,
            TriggerReason::Manual | TriggerReason::Init | TriggerReason::WatchdogRecovery
        )
    }

    /// Tag sent as the heartbeat's `source` field.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::Manual => "manual",
            TriggerReason::Init => "init",
            TriggerReason::WatchdogRecovery => "watchdog-recovery",
            TriggerReason::BgLocation => "bg-location",
            TriggerReason::Booster => "booster",
            TriggerReason::ForegroundLoop => "fg-loop",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
