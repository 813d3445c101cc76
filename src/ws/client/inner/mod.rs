mod driver;
mod gateway;
mod heartbeat;
mod protocol;
mod state;

pub(crate) use driver::{error, Driver, DriverChannels};
pub(crate) use state::StateCell;

pub use driver::RunError;
pub use gateway::ConnectGatewayError;
pub use state::ConnectionState;
