pub mod coordinator;
pub mod persist;
pub mod protocol;
pub mod server;
pub mod test_work;

pub use coordinator::{StratumCoordinator, SubmitOutcome};
pub use protocol::{JobNotification, StratumError, StratumRequest, StratumResponse};
pub use server::StratumServer;
pub use test_work::TestWorkSource;
