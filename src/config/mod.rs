mod settings;

pub use settings::{
    ApiConfig, MessageConfig, OtelConfig, SchedulerConfig, ServerConfig, Settings, SmsSyncConfig,
    TransportsConfig,
};
