// GPU 监控数据模型

use std::collections::BTreeMap;

/// 单张 GPU 的一次采样结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRecord {
    /// 型号（product_name）
    pub model: String,
    /// 匹配过滤规则的进程数
    pub process_count: u32,
    /// GPU 使用率（去掉 `%` 后缀）
    pub utilization_percent: String,
    /// 已用显存（MiB，去掉单位）
    pub used_memory_mib: String,
    /// 总显存（MiB，去掉单位）
    pub total_memory_mib: String,
}

impl DeviceRecord {
    /// 没有进程即视为空闲
    pub fn is_free(&self) -> bool {
        self.process_count == 0
    }

    pub fn free_label(&self) -> String {
        if self.is_free() { "True" } else { "False" }.to_string()
    }

    pub fn utilization_label(&self) -> String {
        format!("{} %", self.utilization_percent)
    }

    pub fn memory_label(&self) -> String {
        format!("{} / {} MiB", self.used_memory_mib, self.total_memory_mib)
    }
}

/// 单台主机在快照中的状态
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostStatus {
    /// 正在建立连接
    Pending,
    /// 已连接，尚未完成首次采样
    Connected,
    /// 失败（连接、超时、命令或解析错误）
    Failed(String),
    /// 采样成功
    Devices(Vec<DeviceRecord>),
}

impl HostStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// 非设备状态的文字描述；设备列表返回 None
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Pending => Some("Connecting".to_string()),
            Self::Connected => Some("Connected".to_string()),
            Self::Failed(reason) => Some(reason.clone()),
            Self::Devices(_) => None,
        }
    }
}

/// 主机名 -> 状态 的快照（按主机名有序）
pub type Snapshot = BTreeMap<String, HostStatus>;

/// 以 Pending 状态初始化快照
pub fn initial_snapshot<I, S>(hosts: I) -> Snapshot
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    hosts
        .into_iter()
        .map(|h| (h.into(), HostStatus::Pending))
        .collect()
}

/// 合并一轮结果；只更新快照中已存在的主机
pub fn merge_round(snapshot: &mut Snapshot, results: BTreeMap<String, HostStatus>) {
    for (host, status) in results {
        if let Some(slot) = snapshot.get_mut(&host) {
            *slot = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(procs: u32) -> DeviceRecord {
        DeviceRecord {
            model: "Tesla T4".to_string(),
            process_count: procs,
            utilization_percent: "42".to_string(),
            used_memory_mib: "100".to_string(),
            total_memory_mib: "16000".to_string(),
        }
    }

    #[test]
    fn test_record_labels() {
        assert_eq!(record(0).free_label(), "True");
        assert_eq!(record(2).free_label(), "False");
        assert_eq!(record(0).utilization_label(), "42 %");
        assert_eq!(record(0).memory_label(), "100 / 16000 MiB");
    }

    #[test]
    fn test_merge_never_changes_key_set() {
        let mut snapshot = initial_snapshot(["gpu01", "gpu02"]);
        let mut results = BTreeMap::new();
        results.insert("gpu01".to_string(), HostStatus::failed("Timeout"));
        results.insert("stranger".to_string(), HostStatus::Connected);
        merge_round(&mut snapshot, results);

        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(keys, vec!["gpu01", "gpu02"]);
        assert_eq!(snapshot["gpu01"], HostStatus::failed("Timeout"));
        assert_eq!(snapshot["gpu02"], HostStatus::Pending);
    }

    #[test]
    fn test_status_label() {
        assert_eq!(HostStatus::Pending.label().as_deref(), Some("Connecting"));
        assert_eq!(HostStatus::Devices(vec![record(0)]).label(), None);
    }
}
