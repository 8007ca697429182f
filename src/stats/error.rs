//! Errors raised while interpreting tracer descriptors.

/// Returned when a socket descriptor does not have the `ip:port->ip:port` shape.
///
/// Partially formed descriptors are common in the tracer output (e.g. a socket
/// that was closed before it got connected), so callers usually log this at a
/// low severity and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseConnectionError {
    #[error("`{0}` has wrong format")]
    WrongFormat(String),
}
