//! Room membership state and fan-out.

pub mod broadcast;
pub mod connection;
pub mod presence;
pub mod registry;
pub mod state;

pub use broadcast::RoomBroadcaster;
pub use connection::ConnectionHandle;
pub use state::RelayState;
