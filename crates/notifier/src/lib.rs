//! Notification Dispatcher
//!
//! Fans one alert out to every configured channel concurrently. Each
//! send is isolated behind its own timeout; one slow or broken channel
//! never stalls the others, and every attempt lands in a bounded
//! dispatch history.

mod channels;
mod dispatcher;
mod settings;

pub use channels::{Channel, DispatchError};
pub use dispatcher::{DispatchRecord, NotificationDispatcher};
pub use settings::{
    ChatSettings, DesktopSettings, EmailSettings, NotificationSettings, WebhookSettings,
};
