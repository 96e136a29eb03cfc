// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod, KeepaliveConfig)
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现
// - client: SSH 客户端核心（直连 / 经跳板机转发）
// - session: SSH 会话管理 (SshSession, ExecChannel, RemoteSession)
// - tunnel: 跳板机隧道与目标连接生命周期 (TunnelManager)

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod session;
pub mod tunnel;

// 公开导出
pub use error::SshError;
pub use session::RemoteSession;
pub use tunnel::{ConnectionState, TunnelManager};
