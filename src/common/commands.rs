/// Lifecycle signals the host environment sends to the backup scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Page became hidden; snapshot current state.
    Hidden,
    /// Page is unloading; snapshot current state.
    Unload,
    /// Window regained focus; reload from storage in case another tab wrote.
    Focus,
}

impl LifecycleEvent {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "hide" | "hidden" => Some(Self::Hidden),
            "unload" | "beforeunload" => Some(Self::Unload),
            "focus" => Some(Self::Focus),
            _ => None,
        }
    }
}
