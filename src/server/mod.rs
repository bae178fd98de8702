//! Request-serving engine.
//!
//! `listener` accepts connections and spawns a task per connection,
//! `router` matches the path against the handler table and drives the
//! chosen handler through the resumable contract in `handler`.

pub mod handler;
pub mod listener;
pub mod router;

pub use handler::{Continuation, Handler, Progress, Step};
pub use router::RouteTable;
