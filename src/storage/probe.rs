use super::backend::KeyValueStore;

pub const PROBE_KEY: &str = "__msgboard_storage_test__";

/// Write-then-delete round trip of a throwaway key.
///
/// Any failure (quota, disabled storage, sandboxing) reports the durable tier as
/// unusable. Never fails itself.
pub fn is_available<B: KeyValueStore + ?Sized>(backend: &mut B) -> bool {
    if let Err(err) = backend.set_item(PROBE_KEY, PROBE_KEY) {
        log::warn!("Durable storage unusable, running memory-only: {err}");
        return false;
    }
    if let Err(err) = backend.remove_item(PROBE_KEY) {
        log::warn!("Durable storage could not delete probe key: {err}");
        return false;
    }
    true
}
