//! 日志系统模块职责：
//! 1. 初始化 stderr + 文件双通道 tracing 日志（stdout 只留给命令输出）。
//! 2. 将运行日志按天落在 `logs/raw` 目录。

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// 默认日志根目录（相对当前工作目录）。
const DEFAULT_LOG_DIR: &str = "logs";
/// 日志原始文件目录名。
const RAW_DIR_NAME: &str = "raw";
/// 日志根目录环境变量。
const LOG_DIR_ENV: &str = "IOTAUTH_LOG_DIR";
/// 文件日志级别环境变量（独立于 `RUST_LOG`）。
const FILE_LOG_LEVEL_ENV: &str = "IOTAUTH_FILE_LOG_LEVEL";
/// 控制台默认日志过滤。
const DEFAULT_CONSOLE_FILTER: &str = "info";

/// 日志运行时守卫，防止 non-blocking writer 提前析构。
pub(crate) struct LogRuntime {
    _console_guard: WorkerGuard,
    _file_guard: WorkerGuard,
}

/// 初始化 agent 日志系统。
pub(crate) fn init(service_name: &str) -> Result<LogRuntime> {
    let raw_dir = resolve_log_root().join(RAW_DIR_NAME);
    fs::create_dir_all(&raw_dir)
        .with_context(|| format!("create raw log dir: {}", raw_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&raw_dir, format!("{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(console_writer)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(resolve_console_env_filter());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(resolve_file_level_filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogRuntime {
        _console_guard: console_guard,
        _file_guard: file_guard,
    })
}

/// 解析控制台日志过滤规则：优先 `RUST_LOG`，回退默认级别。
fn resolve_console_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER))
}

/// 解析文件日志级别；默认保留 `debug`，便于回放 token 生成记录。
fn resolve_file_level_filter() -> LevelFilter {
    parse_level_filter(std::env::var(FILE_LOG_LEVEL_ENV).ok().as_deref())
}

fn parse_level_filter(raw: Option<&str>) -> LevelFilter {
    raw.and_then(|value| value.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::DEBUG)
}

/// 将环境变量中的日志路径解析成绝对路径。
fn resolve_log_root() -> PathBuf {
    let raw = std::env::var(LOG_DIR_ENV).unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => PathBuf::from(DEFAULT_LOG_DIR),
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::parse_level_filter;

    #[test]
    fn file_level_defaults_to_debug() {
        assert_eq!(parse_level_filter(None), LevelFilter::DEBUG);
        assert_eq!(parse_level_filter(Some("verbose")), LevelFilter::DEBUG);
        assert_eq!(parse_level_filter(Some(" warn ")), LevelFilter::WARN);
    }
}
