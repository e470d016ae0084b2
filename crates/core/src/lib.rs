pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod orders;
pub mod rate_limit;
pub mod retry;
pub mod traits;

pub use config::{
    AppConfig, BrokerConfig, BufferConfig, DetectorConfig, EntryOrderType, LifecycleConfig,
    PersistenceConfig, RetryConfig, RiskConfig, SelectorConfig, SizingConfig, TriggerSource,
    UnderlyingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{BrokerError, DataError};
pub use events::{Bar, BreakoutSignal, Pivot, PivotRole, SwingStructure};
pub use orders::{
    OptionContract, OptionType, OrderKind, OrderRecord, OrderSide, OrderSpec, OrderStatus,
};
pub use rate_limit::RateLimitedBroker;
pub use retry::RetryPolicy;
pub use traits::{BrokerGateway, MarketDataFeed, PersistenceSink, TracingSink};
