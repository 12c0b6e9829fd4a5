//! Test doubles for the remote client and the messaging sender.
//!
//! ```rust,ignore
//! use seedsync_core::testing::{MockNotifier, MockRemoteClient};
//!
//! let client = Arc::new(MockRemoteClient::new());
//! let notifier = Arc::new(MockNotifier::new());
//!
//! // Drive a submitted torrent to completion.
//! client.set_progress("c9e15763f722f23e98a29decdfae341b98d53056", 1.0);
//! ```

mod mock_notifier;
mod mock_remote_client;

pub use mock_notifier::{MockNotifier, NotifierMode};
pub use mock_remote_client::MockRemoteClient;
