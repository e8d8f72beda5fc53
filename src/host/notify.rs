//! Fire-and-forget notification sink.

/// Receives pipeline outcome notifications. Implementations must not block.
pub trait Notifier: Send + Sync {
    /// Deliver a notification; failures are the sink's own business
    fn notify(&self, title: &str, body: &str);
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        log::info!("{}: {}", title, body);
    }
}
