// 日志初始化
// 表格直接绘制在终端上，因此日志不能写到 stdout/stderr

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::models::settings::DebugSettings;

const DEFAULT_FILTER: &str = "debug,russh=warn";

/// 按大小轮转的日志文件
///
/// 当前文件写满 `max_size` 字节后依次改名为 `<file>.1 … <file>.N`，
/// 最旧的备份被覆盖。`backup_count` 为 0 时只截断当前文件。
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    backup_count: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// 创建日志文件（已存在时截断）
    pub fn create(path: impl Into<PathBuf>, max_size: u64, backup_count: u32) -> io::Result<Self> {
        let path = path.into();
        let file = open_truncated(&path)?;
        Ok(Self {
            path,
            max_size,
            backup_count,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backup_count > 0 {
            for index in (1..self.backup_count).rev() {
                let source = self.backup_path(index);
                if source.exists() {
                    fs::rename(&source, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }
        self.file = open_truncated(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.max_size > 0 && self.written > 0 && self.written + incoming > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_truncated(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

/// 按调试设置打开日志文件（目录不存在时创建）
pub fn open_log_file(settings: &DebugSettings) -> Result<RotatingFile> {
    let dir = Path::new(&settings.log_dir);
    fs::create_dir_all(dir)
        .with_context(|| format!("无法创建日志目录 {}", dir.display()))?;
    let path = dir.join(&settings.log_file);
    RotatingFile::create(&path, settings.log_max_size, settings.log_backup_count)
        .with_context(|| format!("无法打开日志文件 {}", path.display()))
}

/// 初始化全局日志
///
/// 可以通过 RUST_LOG 环境变量覆盖默认过滤规则
pub fn setup_logging(settings: &DebugSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let mut log_path = None;
    let result = if settings.enabled {
        let file = open_log_file(settings)?;
        log_path = Some(file.path().to_path_buf());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("无法初始化日志: {}", e))?;
    if let Some(path) = log_path {
        tracing::info!("[Logging] Debug logging to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_rotation_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        let mut file = RotatingFile::create(&path, 100, 2).unwrap();

        for line in ["a", "b", "c", "d"] {
            let text = format!("{}\n", line.repeat(59));
            file.write_all(text.as_bytes()).unwrap();
        }
        file.flush().unwrap();

        assert!(read(&path).starts_with('d'));
        assert!(read(&dir.path().join("monitor.log.1")).starts_with('c'));
        assert!(read(&dir.path().join("monitor.log.2")).starts_with('b'));
        assert!(!dir.path().join("monitor.log.3").exists());
    }

    #[test]
    fn test_zero_backups_only_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.log");
        let mut file = RotatingFile::create(&path, 10, 0).unwrap();

        file.write_all(b"first line\n").unwrap();
        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&path), "second\n");
        assert!(!dir.path().join("monitor.log.1").exists());
    }

    #[test]
    fn test_open_log_file_creates_dir_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DebugSettings {
            enabled: true,
            log_dir: dir.path().join("nested").to_string_lossy().into_owned(),
            log_file: "gpu.log".to_string(),
            ..Default::default()
        };
        let expected = dir.path().join("nested").join("gpu.log");
        fs::create_dir_all(expected.parent().unwrap()).unwrap();
        fs::write(&expected, "stale contents").unwrap();

        let file = open_log_file(&settings).unwrap();
        assert_eq!(file.path(), expected.as_path());
        assert_eq!(read(&expected), "");
    }
}
