// GPU 状态表格模型
// 从快照计算列宽与行数据，列宽只增不减以避免布局抖动

use crate::models::{HostStatus, Snapshot};

/// 数值列的占位符
pub const PLACEHOLDER: &str = "—";

/// 单列最大宽度，超长内容由渲染时截断
pub const MAX_COLUMN_WIDTH: u16 = 120;

/// 表头
pub const HEADERS: [&str; 6] = ["Hostname", "Status/Model", "Free", "Procs", "GPU %", "Memory"];

/// 各列最小宽度
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnWidths {
    pub hostname: u16,
    pub model: u16,
    pub free: u16,
    pub procs: u16,
    pub utilization: u16,
    pub memory: u16,
}

impl Default for ColumnWidths {
    fn default() -> Self {
        Self {
            hostname: 20,
            model: 30,
            free: 5,
            procs: 5,
            utilization: 6,
            memory: 15,
        }
    }
}

impl ColumnWidths {
    pub fn as_array(&self) -> [u16; 6] {
        [
            self.hostname,
            self.model,
            self.free,
            self.procs,
            self.utilization,
            self.memory,
        ]
    }

    fn slots(&mut self) -> [&mut u16; 6] {
        [
            &mut self.hostname,
            &mut self.model,
            &mut self.free,
            &mut self.procs,
            &mut self.utilization,
            &mut self.memory,
        ]
    }

    /// 用一行的内容扩展列宽；占位符不参与计算
    fn grow(&mut self, cells: &[String; 6]) {
        for (slot, value) in self.slots().into_iter().zip(cells) {
            if value == PLACEHOLDER {
                continue;
            }
            let len = u16::try_from(value.chars().count())
                .unwrap_or(u16::MAX)
                .min(MAX_COLUMN_WIDTH);
            *slot = (*slot).max(len);
        }
    }

    /// 表格内容总宽度（含列间距与边框）
    pub fn total_width(&self, column_spacing: u16) -> u16 {
        self.as_array()
            .iter()
            .fold(0u16, |acc, w| acc.saturating_add(*w))
            .saturating_add(column_spacing.saturating_mul(5))
            .saturating_add(2)
    }
}

/// 表格中的一行
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRow {
    pub cells: [String; 6],
    /// 是否为状态行（非设备数据）
    pub is_status: bool,
}

/// 一次渲染所需的全部数据
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableView {
    pub widths: ColumnWidths,
    pub rows: Vec<TableRow>,
}

/// GPU 表格
#[derive(Debug, Default)]
pub struct GpuTable {
    widths: ColumnWidths,
}

impl GpuTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据快照重建表格
    ///
    /// 快照按主机名有序，行顺序因此确定；多 GPU 主机只在第一行显示主机名。
    pub fn update(&mut self, snapshot: &Snapshot) -> TableView {
        let rows: Vec<TableRow> = snapshot
            .iter()
            .flat_map(|(host, status)| host_rows(host, status))
            .collect();

        for row in &rows {
            // 分组行的空主机名不影响宽度
            self.widths.grow(&row.cells);
        }
        for host in snapshot.keys() {
            self.widths.grow(&[
                host.clone(),
                PLACEHOLDER.to_string(),
                PLACEHOLDER.to_string(),
                PLACEHOLDER.to_string(),
                PLACEHOLDER.to_string(),
                PLACEHOLDER.to_string(),
            ]);
        }

        TableView {
            widths: self.widths,
            rows,
        }
    }
}

fn host_rows(host: &str, status: &HostStatus) -> Vec<TableRow> {
    match status {
        HostStatus::Devices(devices) if !devices.is_empty() => devices
            .iter()
            .enumerate()
            .map(|(i, device)| TableRow {
                cells: [
                    if i == 0 { host.to_string() } else { String::new() },
                    device.model.clone(),
                    device.free_label(),
                    device.process_count.to_string(),
                    device.utilization_label(),
                    device.memory_label(),
                ],
                is_status: false,
            })
            .collect(),
        other => {
            let label = other.label().unwrap_or_else(|| "No GPU data".to_string());
            vec![TableRow {
                cells: [
                    host.to_string(),
                    label,
                    PLACEHOLDER.to_string(),
                    PLACEHOLDER.to_string(),
                    PLACEHOLDER.to_string(),
                    PLACEHOLDER.to_string(),
                ],
                is_status: true,
            }]
        }
    }
}
