// GPU 遥测解析
// 将 `nvidia-smi -q -x` 的 XML 输出解析为 DeviceRecord 列表

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;
use tracing::{error, trace};

use crate::models::DeviceRecord;

/// 在每台目标主机上执行的查询命令
pub const GPU_QUERY_COMMAND: &str = "nvidia-smi -q -x";

/// 解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    /// XML 结构错误
    #[error("XML parse error: {0}")]
    Xml(String),

    /// 某张 GPU 缺少必需字段
    #[error("Error parsing GPU info: GPU {index} is missing <{field}>")]
    MissingField { index: usize, field: String },

    /// 输出中没有任何 GPU
    #[error("Parse error: no GPU devices reported")]
    NoDevices,
}

/// 轻量 XML 元素树
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// 按路径查找第一个匹配的后代元素
    fn find(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |node, name| {
            node.children.iter().find(|c| c.name == *name)
        })
    }

    /// 非空文本
    fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// 解析单台主机的查询输出
///
/// 只要有一张 GPU 解析失败，整台主机的结果就是一个错误。
pub fn parse(host: &str, raw: &str, process_filter: &Regex) -> Result<Vec<DeviceRecord>, TelemetryError> {
    let root = parse_tree(raw).map_err(|e| {
        error!("[Telemetry] XML parse error for {}: {}", host, e);
        e
    })?;

    let mut devices = Vec::new();
    let mut first_error = None;

    for (index, gpu) in root.children_named("gpu").enumerate() {
        match parse_device(index, gpu, process_filter) {
            Ok(device) => devices.push(device),
            Err(e) => {
                error!("[Telemetry] Error parsing GPU info for {}: {}", host, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if devices.is_empty() {
        return Err(TelemetryError::NoDevices);
    }

    trace!("[Telemetry] {} reported {} GPUs", host, devices.len());
    Ok(devices)
}

fn parse_device(
    index: usize,
    gpu: &Element,
    process_filter: &Regex,
) -> Result<DeviceRecord, TelemetryError> {
    let required = |path: &[&str]| -> Result<String, TelemetryError> {
        gpu.find(path)
            .and_then(Element::text)
            .map(str::to_string)
            .ok_or_else(|| TelemetryError::MissingField {
                index,
                field: path.join("/"),
            })
    };

    let model = required(&["product_name"])?;

    let process_count = gpu
        .find(&["processes"])
        .map(|processes| {
            processes
                .children_named("process_info")
                .filter_map(|p| p.find(&["process_name"]).and_then(Element::text))
                .filter(|name| process_filter.is_match(name))
                .count() as u32
        })
        .unwrap_or(0);

    let utilization = required(&["utilization", "gpu_util"])?;
    let used = required(&["fb_memory_usage", "used"])?;
    let total = required(&["fb_memory_usage", "total"])?;

    Ok(DeviceRecord {
        model,
        process_count,
        utilization_percent: strip_unit(&utilization, "%"),
        used_memory_mib: strip_unit(&used, "MiB"),
        total_memory_mib: strip_unit(&total, "MiB"),
    })
}

/// 去掉数值后的单位（`42 %` -> `42`）
fn strip_unit(value: &str, unit: &str) -> String {
    value
        .trim()
        .strip_suffix(unit)
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// 构建元素树；结构错误（标签不匹配、未闭合、多个根）直接返回错误
fn parse_tree(raw: &str) -> Result<Element, TelemetryError> {
    let content = raw.trim_start_matches('\u{feff}');
    let mut reader = Reader::from_str(content);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    // 闭合的元素挂到父节点，或成为根节点
    fn attach(
        stack: &mut [Element],
        root: &mut Option<Element>,
        element: Element,
    ) -> Result<(), TelemetryError> {
        match stack.last_mut() {
            Some(parent) => {
                parent.children.push(element);
                Ok(())
            }
            None if root.is_none() => {
                *root = Some(element);
                Ok(())
            }
            None => Err(TelemetryError::Xml(format!(
                "unexpected second root element <{}>",
                element.name
            ))),
        }
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(TelemetryError::Xml(
                        "unexpected content after root element".to_string(),
                    ));
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(Element::new(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                attach(&mut stack, &mut root, Element::new(name))?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    TelemetryError::Xml("closing tag without opening tag".to_string())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(&e).to_string();
                push_text(&mut stack, &text)?;
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).to_string();
                push_text(&mut stack, &text)?;
            }
            Ok(Event::GeneralRef(e)) => {
                let resolved = match e.resolve_char_ref() {
                    Ok(Some(c)) => c.to_string(),
                    Ok(None) => {
                        let name = String::from_utf8_lossy(&e).to_string();
                        resolve_predefined_entity(&name)
                            .ok_or_else(|| {
                                TelemetryError::Xml(format!("undefined entity &{};", name))
                            })?
                            .to_string()
                    }
                    Err(err) => return Err(TelemetryError::Xml(err.to_string())),
                };
                push_text(&mut stack, &resolved)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TelemetryError::Xml(format!(
                    "{} (at byte {})",
                    e,
                    reader.error_position()
                )))
            }
            // Decl, PI, Comment, DocType
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(TelemetryError::Xml(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| TelemetryError::Xml("no element found".to_string()))
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), TelemetryError> {
    match stack.last_mut() {
        Some(current) => {
            current.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(TelemetryError::Xml(
            "text outside of root element".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_all() -> Regex {
        Regex::new(".*").unwrap()
    }

    fn gpu_xml(model: &str, util: &str, used: &str, total: &str, procs: &[&str]) -> String {
        let processes: String = procs
            .iter()
            .map(|name| {
                format!(
                    "<process_info><pid>1</pid><type>C</type><process_name>{}</process_name>\
                     <used_memory>10 MiB</used_memory></process_info>",
                    name
                )
            })
            .collect();
        format!(
            r#"<gpu id="00000000:01:00.0">
    <product_name>{model}</product_name>
    <fb_memory_usage>
        <total>{total}</total>
        <reserved>250 MiB</reserved>
        <used>{used}</used>
        <free>15000 MiB</free>
    </fb_memory_usage>
    <utilization>
        <gpu_util>{util}</gpu_util>
        <memory_util>0 %</memory_util>
    </utilization>
    <processes>{processes}</processes>
</gpu>"#
        )
    }

    fn document(gpus: &[String]) -> String {
        format!(
            "<?xml version=\"1.0\" ?>\n<!DOCTYPE nvidia_smi_log SYSTEM \"nvsmi_device_v12.dtd\">\n\
             <nvidia_smi_log>\n<driver_version>535.104</driver_version>\n{}\n</nvidia_smi_log>\n",
            gpus.join("\n")
        )
    }

    #[test]
    fn test_parse_single_gpu_with_filter() {
        let xml = document(&[gpu_xml("Tesla", "42 %", "100 MiB", "16000 MiB", &["p1", "p2"])]);
        let filter = Regex::new("p1").unwrap();
        let devices = parse("gpu01", &xml, &filter).unwrap();
        assert_eq!(
            devices,
            vec![DeviceRecord {
                model: "Tesla".to_string(),
                process_count: 1,
                utilization_percent: "42".to_string(),
                used_memory_mib: "100".to_string(),
                total_memory_mib: "16000".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_multiple_gpus_keeps_order() {
        let xml = document(&[
            gpu_xml("NVIDIA A100", "0 %", "0 MiB", "40960 MiB", &[]),
            gpu_xml("NVIDIA A30", "97 %", "20000 MiB", "24576 MiB", &["python", "python"]),
        ]);
        let devices = parse("gpu01", &xml, &match_all()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].model, "NVIDIA A100");
        assert!(devices[0].is_free());
        assert_eq!(devices[1].process_count, 2);
        assert_eq!(devices[1].utilization_percent, "97");
    }

    #[test]
    fn test_empty_processes_element() {
        let xml = "<nvidia_smi_log><gpu><product_name>T4</product_name><processes/>\
                   <utilization><gpu_util>5 %</gpu_util></utilization>\
                   <fb_memory_usage><used>1 MiB</used><total>15360 MiB</total></fb_memory_usage>\
                   </gpu></nvidia_smi_log>";
        let devices = parse("gpu01", xml, &match_all()).unwrap();
        assert_eq!(devices[0].process_count, 0);
        assert_eq!(devices[0].total_memory_mib, "15360");
    }

    #[test]
    fn test_missing_field_fails_whole_host() {
        let good = gpu_xml("Tesla", "42 %", "100 MiB", "16000 MiB", &[]);
        let bad = gpu_xml("Tesla", "42 %", "100 MiB", "16000 MiB", &[])
            .replace("<product_name>Tesla</product_name>", "");
        let xml = document(&[good, bad]);
        let err = parse("gpu01", &xml, &match_all()).unwrap_err();
        assert_eq!(
            err,
            TelemetryError::MissingField {
                index: 1,
                field: "product_name".to_string()
            }
        );
        assert!(err.to_string().starts_with("Error parsing GPU info"));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse("gpu01", "<nvidia_smi_log><gpu></nvidia_smi_log>", &match_all()).unwrap_err();
        assert!(matches!(err, TelemetryError::Xml(_)));

        let err = parse("gpu01", "<nvidia_smi_log><gpu>", &match_all()).unwrap_err();
        assert!(matches!(err, TelemetryError::Xml(_)));

        let err = parse("gpu01", "", &match_all()).unwrap_err();
        assert!(matches!(err, TelemetryError::Xml(_)));

        let err = parse("gpu01", "NVIDIA-SMI has failed", &match_all()).unwrap_err();
        assert!(matches!(err, TelemetryError::Xml(_)));
    }

    #[test]
    fn test_no_gpus() {
        let err = parse("gpu01", &document(&[]), &match_all()).unwrap_err();
        assert_eq!(err, TelemetryError::NoDevices);
    }

    #[test]
    fn test_entities_in_text() {
        let xml = "<nvidia_smi_log><gpu><product_name>A &amp; B&#33;</product_name>\
                   <utilization><gpu_util>1 %</gpu_util></utilization>\
                   <fb_memory_usage><used>1 MiB</used><total>2 MiB</total></fb_memory_usage>\
                   </gpu></nvidia_smi_log>";
        let devices = parse("gpu01", xml, &match_all()).unwrap();
        assert_eq!(devices[0].model, "A & B!");
    }

    #[test]
    fn test_hex_reference_and_unknown_entity() {
        let xml = "<nvidia_smi_log><gpu><product_name>&lt;T4&#x3E;</product_name>\
                   <utilization><gpu_util>1 %</gpu_util></utilization>\
                   <fb_memory_usage><used>1 MiB</used><total>2 MiB</total></fb_memory_usage>\
                   </gpu></nvidia_smi_log>";
        let devices = parse("gpu01", xml, &match_all()).unwrap();
        assert_eq!(devices[0].model, "<T4>");

        let broken = xml.replace("&lt;", "&nbsp;");
        match parse("gpu01", &broken, &match_all()) {
            Err(TelemetryError::Xml(reason)) => assert!(reason.contains("nbsp")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_strip_unit() {
        assert_eq!(strip_unit("42 %", "%"), "42");
        assert_eq!(strip_unit("42%", "%"), "42");
        assert_eq!(strip_unit("100 MiB", "MiB"), "100");
        assert_eq!(strip_unit("N/A", "MiB"), "N/A");
    }
}
