pub mod associations;
pub mod chat_ios;
pub mod chat_logs;
pub mod health_check_logs;
pub mod models;
pub mod providers;
pub mod settings;

pub use associations::Entity as Associations;
pub use chat_ios::Entity as ChatIos;
pub use chat_logs::Entity as ChatLogs;
pub use health_check_logs::Entity as HealthCheckLogs;
pub use models::Entity as Models;
pub use providers::Entity as Providers;
pub use settings::Entity as Settings;
