//! czfrp-core: Shared protocol library for the czfrp reverse tunnel.
//!
//! Provides the line-delimited control framing spoken on the FRP port,
//! identifier/token generation, the bidirectional byte pump, and the
//! shared error type.

pub mod error;
pub mod frame;
pub mod pump;
pub mod token;

// Re-export commonly used items at crate root.
pub use error::{FrpError, FrpResult};
pub use frame::{read_line_bounded, Frame, MAX_LINE_LEN};
pub use pump::{pump, splice, COPY_BUF_SIZE};
pub use token::{new_token, new_tunnel_id};
