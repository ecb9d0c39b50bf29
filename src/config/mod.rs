mod settings;

pub use settings::{
    ConnectivityConfig, DeliveryConfig, EndpointConfig, LogConfig, MockConfig, Settings,
    StorageConfig,
};
