pub mod expiry;
pub mod notifier;
