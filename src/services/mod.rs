// 服务模块
// - storage: 配置文件加载与命令行覆盖
// - logging: 日志初始化（轮转文件 / 丢弃）
// - telemetry: nvidia-smi XML 解析
// - poller: 并发轮询

pub mod logging;
pub mod poller;
pub mod storage;
pub mod telemetry;

pub use poller::PollingEngine;
