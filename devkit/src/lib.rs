/*!
# Atelier DevKit - Doublures et harness pour le kernel atelier

Permet de tester le kernel sans broker ni réseau :
- Broker télémétrie simulé (sessions pilotées par le test)
- Réseau HTTP simulé pour le cache résilient
- Messages télémétrie au format fil
- Harness de bout en bout
*/

pub mod messages;
pub mod mock_fetcher;
pub mod mock_transport;
pub mod test_utils;

pub use messages::TelemetryMessageBuilder;
pub use mock_fetcher::MockFetcher;
pub use mock_transport::{MockBroker, MockTransport};
pub use test_utils::TestHarness;
