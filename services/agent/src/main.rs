//! Agent 二进制入口：解析命令、初始化日志、执行设备鉴权命令。

use tracing::error;

mod cli;
mod config;
mod logging;

/// 启动 agent 命令。
fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let command = match cli::parse(&args)? {
        cli::CliDispatch::Run(command) => command,
        cli::CliDispatch::Exit => return Ok(()),
    };

    let _log_runtime = logging::init("agent")?;
    cli::execute(command).inspect_err(|err| error!("command failed: {err:#}"))
}
