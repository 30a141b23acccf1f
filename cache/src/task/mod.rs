//! Background work of the cache: the maintenance pass that feeds the
//! eviction policy, the janitor thread that schedules it, and the notifier
//! thread that delivers eviction callbacks.

pub(crate) mod janitor;
pub(crate) mod notifier;
