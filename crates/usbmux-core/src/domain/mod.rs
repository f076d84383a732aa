//! Domain entities: device identity and the attached-device registry.
//!
//! Nothing in here touches sockets or the async runtime.  The registry is
//! written by the listener task and read by everything else, so it is shared
//! behind a lock with a single-writer handle.

pub mod device;
pub mod registry;
