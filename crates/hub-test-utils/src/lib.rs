// Shared test utilities for the realtime hub suite: a real Hub bound to
// a random port, a mock WebSocket client, and an in-process stand-in for
// the cluster broker, used by `realtime-hub`'s integration tests and
// available to downstream consumers of the crate.

pub mod mock_broker;
pub mod test_client;
pub mod test_server;

pub use mock_broker::MockBroker;
pub use test_client::TestClient;
pub use test_server::TestHubServer;
