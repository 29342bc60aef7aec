//! User-facing notification sink
//!
//! The gateway and the session core report outcomes through this trait
//! instead of printing directly, so a UI can render them however it likes.

/// Receiver for success/error messages meant for the user.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Prints notifications to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("Error: {}", message);
    }
}

#[cfg(test)]
pub use recording::{Notification, RecordingNotifier};
