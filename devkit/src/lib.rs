/*!
# Growbox DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant les tests d'un noeud growbox sans broker ni matériel :
- Stub MQTT (`MqttLink`) qui enregistre publications et abonnements
- HAL espion avec lectures scriptées
- Horloge manuelle pour les fenêtres horaires
- Harness qui assemble un `GrowNode` complet
*/

pub mod clock;
pub mod hal_spy;
pub mod mqtt_stub;
pub mod test_utils;

pub use clock::ManualClock;
pub use hal_spy::{HalCall, Readings, SpyHal, SpyHandle};
pub use mqtt_stub::{GrowboxMessageBuilder, MockMqttClient};
pub use test_utils::TestHarness;
