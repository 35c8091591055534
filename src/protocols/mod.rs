//! Sample routes.
//!
//! Small handlers used by the bundled binary and handy for smoke tests:
//! - `ping`: replies `pong` on the unbuffered path (kind 0)
//! - `echo`: sends the payload back on the buffered path (kind 1)

pub mod echo;
pub mod ping;

pub use echo::EchoRouter;
pub use ping::PingRouter;
