// 终端显示模块
// - table: 表格行与列宽计算
// - renderer: 基于 ratatui 的绘制

pub mod renderer;
pub mod table;

pub use renderer::TableDisplay;
