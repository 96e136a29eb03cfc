// 数据模型模块

pub mod config;
pub mod gpu;
pub mod settings;
pub mod target;

pub use config::{Config, ConfigError};
pub use gpu::{initial_snapshot, merge_round, DeviceRecord, HostStatus, Snapshot};
pub use settings::AppSettings;
pub use target::Target;
