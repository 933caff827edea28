//! Proxy module
//!
//! Handles request forwarding to the upstream completion provider.

pub mod headers;
pub mod logging;
pub mod nim;
pub mod provider;

pub use logging::RequestContext;
pub use nim::NimProvider;
pub use provider::{ByteStream, CompletionProvider};
