pub mod entities;
pub mod seaorm;
pub mod settings;
pub mod store;

pub use seaorm::SeaOrmStore;
pub use settings::GatewaySettings;
pub use store::{
    AssociationRow, ChatLogMetrics, ChatLogRow, HealthCheckLogRow, ModelRow, NewAssociation,
    NewChatLog, NewHealthCheckLog, ProviderRow, SettingRow, Store, StoreError, StoreResult,
};
