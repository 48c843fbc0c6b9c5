//! agent CLI 分发：`token`、`provision`、`clear`、`inspect`、`configure`、`doctor`、`version`。

use std::collections::HashMap;

use anyhow::{Context, anyhow};
use serde_json::json;
use tracing::warn;

mod credentials;
mod inspect;

use crate::config::{
    AgentConfig, AgentPersistedConfig, agent_config_file_path, load_agent_persisted_config,
    save_agent_persisted_config, validate_device_id, validate_hub_host, validate_ttl,
};

/// CLI 分发结果。
pub(crate) enum CliDispatch {
    /// 需要执行的命令（执行前初始化日志）。
    Run(Command),
    /// 命令已处理完成，主程序应直接退出。
    Exit,
}

/// 输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// 已解析的子命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// 生成并打印 token。
    Token { ttl_sec: Option<u64> },
    /// 写入设备密钥。
    Provision { key: Option<String> },
    /// 清除设备密钥。
    Clear,
    /// 解析并展示 token。
    Inspect {
        token: String,
        format: OutputFormat,
        verify: bool,
    },
    /// 持久化 hub/device/ttl。
    Configure {
        hub_host: String,
        device_id: String,
        ttl_sec: Option<u64>,
    },
    /// 打印诊断信息。
    Doctor { format: OutputFormat },
}

/// 解析 agent CLI；帮助与版本在此直接处理。
pub(crate) fn parse(args: &[String]) -> anyhow::Result<CliDispatch> {
    if args.is_empty() {
        return Ok(CliDispatch::Run(Command::Token { ttl_sec: None }));
    }

    let cmd = args[0].trim();
    if matches!(cmd, "-h" | "--help" | "help") {
        print_root_help();
        return Ok(CliDispatch::Exit);
    }
    let rest = &args[1..];

    let command = match cmd {
        "token" => {
            let (flags, positionals) = split_flags(rest, &["--ttl"], &[])?;
            expect_no_positionals(&positionals, "iotauth-agent token [--ttl <sec>]")?;
            Command::Token {
                ttl_sec: flags.get("--ttl").map(|raw| validate_ttl(raw)).transpose()?,
            }
        }
        "provision" => {
            let (_, positionals) = split_flags(rest, &[], &[])?;
            if positionals.len() > 1 {
                return Err(anyhow!("usage: iotauth-agent provision [<base64-key>]"));
            }
            Command::Provision {
                key: positionals.first().cloned(),
            }
        }
        "clear" => {
            let (_, positionals) = split_flags(rest, &[], &[])?;
            expect_no_positionals(&positionals, "iotauth-agent clear")?;
            Command::Clear
        }
        "inspect" => {
            let (flags, positionals) = split_flags(rest, &["--format"], &["--verify"])?;
            // token 中含空格，允许未加引号时按空格拼回。
            if positionals.is_empty() {
                return Err(anyhow!(
                    "usage: iotauth-agent inspect <token> [--format text|json] [--verify]"
                ));
            }
            Command::Inspect {
                token: positionals.join(" "),
                format: parse_format(flags.get("--format").map(String::as_str))?,
                verify: flags.contains_key("--verify"),
            }
        }
        "configure" => {
            let (flags, positionals) = split_flags(rest, &["--hub", "--device", "--ttl"], &[])?;
            expect_no_positionals(
                &positionals,
                "iotauth-agent configure --hub <host> --device <id> [--ttl <sec>]",
            )?;
            let hub = flags
                .get("--hub")
                .context("missing argument: --hub <host>")?;
            let device = flags
                .get("--device")
                .context("missing argument: --device <id>")?;
            Command::Configure {
                hub_host: validate_hub_host(hub)?,
                device_id: validate_device_id(device)?,
                ttl_sec: flags.get("--ttl").map(|raw| validate_ttl(raw)).transpose()?,
            }
        }
        "doctor" => {
            let (flags, positionals) = split_flags(rest, &["--format"], &[])?;
            expect_no_positionals(&positionals, "iotauth-agent doctor [--format text|json]")?;
            Command::Doctor {
                format: parse_format(flags.get("--format").map(String::as_str))?,
            }
        }
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(CliDispatch::Exit);
        }
        other => {
            return Err(anyhow!(
                "unknown command: {other}; run `iotauth-agent --help` for usage"
            ));
        }
    };
    Ok(CliDispatch::Run(command))
}

/// 执行子命令。
pub(crate) fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Token { ttl_sec } => credentials::execute_token(ttl_sec),
        Command::Provision { key } => credentials::execute_provision(key),
        Command::Clear => credentials::execute_clear(),
        Command::Inspect {
            token,
            format,
            verify,
        } => inspect::execute(&token, format, verify),
        Command::Configure {
            hub_host,
            device_id,
            ttl_sec,
        } => run_configure(hub_host, device_id, ttl_sec),
        Command::Doctor { format } => run_doctor(format),
    }
}

/// 写入持久化配置，保留未覆盖的字段。
fn run_configure(hub_host: String, device_id: String, ttl_sec: Option<u64>) -> anyhow::Result<()> {
    // 旧文件损坏时直接覆盖。
    let mut persisted = load_agent_persisted_config().unwrap_or_else(|err| {
        warn!("existing agent config unreadable, rewriting: {err:#}");
        AgentPersistedConfig::default()
    });
    persisted.hub_host = Some(hub_host);
    persisted.device_id = Some(device_id);
    if ttl_sec.is_some() {
        persisted.ttl_sec = ttl_sec;
    }
    let path = save_agent_persisted_config(&persisted)?;
    println!("config saved: {}", path.display());
    Ok(())
}

/// 打印诊断信息；凭证不可用时返回错误以产生非零退出码。
fn run_doctor(format: OutputFormat) -> anyhow::Result<()> {
    let cfg = AgentConfig::from_env()?;
    let report = credentials::diagnose(&cfg);
    let config_path = agent_config_file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_default();

    match format {
        OutputFormat::Text => {
            println!("config-path: {config_path}");
            println!("hub-host: {}", cfg.hub_host.as_deref().unwrap_or("-"));
            println!("device-id: {}", cfg.device_id.as_deref().unwrap_or("-"));
            println!("ttl-sec: {}", cfg.ttl_sec);
            println!("store-path: {}", cfg.store_path.display());
            println!("credential: {}", report.credential);
            println!("clock: {}", report.clock_status.as_str());
            println!("now: {} ({})", report.now, inspect::format_unix(report.now));
        }
        OutputFormat::Json => {
            let payload = json!({
                "configPath": config_path,
                "hubHost": cfg.hub_host,
                "deviceId": cfg.device_id,
                "ttlSec": cfg.ttl_sec,
                "storePath": cfg.store_path.display().to_string(),
                "credential": report.credential,
                "clock": report.clock_status,
                "now": report.now,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("encode doctor json failed")?
            );
        }
    }

    if !report.ready {
        return Err(anyhow!("device is not ready to generate tokens"));
    }
    Ok(())
}

/// 解析 `--format`。
fn parse_format(raw: Option<&str>) -> anyhow::Result<OutputFormat> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("text") => Ok(OutputFormat::Text),
        Some("json") => Ok(OutputFormat::Json),
        Some(other) => Err(anyhow!("unsupported format: {other}, expected text|json")),
    }
}

/// 拆分 `--flag value` 与开关参数，其余作为位置参数返回。
fn split_flags(
    args: &[String],
    value_flags: &[&str],
    switch_flags: &[&str],
) -> anyhow::Result<(HashMap<String, String>, Vec<String>)> {
    let mut flags = HashMap::new();
    let mut positionals = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let name = arg.as_str();
        if value_flags.contains(&name) {
            let value = iter
                .next()
                .with_context(|| format!("missing value for {name}"))?;
            flags.insert(name.to_string(), value.clone());
        } else if switch_flags.contains(&name) {
            flags.insert(name.to_string(), String::new());
        } else if name.starts_with("--") {
            return Err(anyhow!("unknown flag: {name}"));
        } else {
            positionals.push(arg.clone());
        }
    }
    Ok((flags, positionals))
}

fn expect_no_positionals(positionals: &[String], usage: &str) -> anyhow::Result<()> {
    if positionals.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("usage: {usage}"))
    }
}

/// 打印根命令帮助。
fn print_root_help() {
    println!("iotauth-agent usage:");
    println!("  iotauth-agent token [--ttl <sec>]");
    println!("  iotauth-agent provision [<base64-key>]   (or IOT_DEVICE_KEY)");
    println!("  iotauth-agent clear");
    println!("  iotauth-agent inspect <token> [--format text|json] [--verify]");
    println!("  iotauth-agent configure --hub <host> --device <id> [--ttl <sec>]");
    println!("  iotauth-agent doctor [--format text|json]");
    println!("  iotauth-agent version");
}

#[cfg(test)]
mod tests {
    use super::{CliDispatch, Command, OutputFormat, parse};

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    fn parse_command(raw: &[&str]) -> Command {
        match parse(&args(raw)).expect("parse") {
            CliDispatch::Run(command) => command,
            CliDispatch::Exit => panic!("expected runnable command for {raw:?}"),
        }
    }

    #[test]
    fn empty_args_generate_token_with_configured_ttl() {
        assert_eq!(parse_command(&[]), Command::Token { ttl_sec: None });
    }

    #[test]
    fn token_accepts_ttl_flag() {
        assert_eq!(
            parse_command(&["token", "--ttl", "600"]),
            Command::Token { ttl_sec: Some(600) }
        );
        assert!(parse(&args(&["token", "--ttl", "0"])).is_err());
        assert!(parse(&args(&["token", "--ttl"])).is_err());
        assert!(parse(&args(&["token", "extra"])).is_err());
    }

    #[test]
    fn inspect_rejoins_unquoted_token() {
        let command = parse_command(&[
            "inspect",
            "SharedAccessSignature",
            "sr=h/devices/d&sig=abc&se=1",
            "--format",
            "json",
            "--verify",
        ]);
        assert_eq!(
            command,
            Command::Inspect {
                token: "SharedAccessSignature sr=h/devices/d&sig=abc&se=1".to_string(),
                format: OutputFormat::Json,
                verify: true,
            }
        );
    }

    #[test]
    fn configure_validates_inputs() {
        assert_eq!(
            parse_command(&["configure", "--hub", "MyHub.azure-devices.net", "--device", "dev1"]),
            Command::Configure {
                hub_host: "myhub.azure-devices.net".to_string(),
                device_id: "dev1".to_string(),
                ttl_sec: None,
            }
        );
        assert!(parse(&args(&["configure", "--hub", "h/x", "--device", "dev1"])).is_err());
        assert!(parse(&args(&["configure", "--device", "dev1"])).is_err());
    }

    #[test]
    fn unknown_command_and_flag_are_rejected() {
        assert!(parse(&args(&["rotate"])).is_err());
        assert!(parse(&args(&["doctor", "--verbose"])).is_err());
        assert!(parse(&args(&["doctor", "--format", "yaml"])).is_err());
    }

    #[test]
    fn help_and_version_exit_immediately() {
        assert!(matches!(
            parse(&args(&["--help"])).expect("help"),
            CliDispatch::Exit
        ));
        assert!(matches!(
            parse(&args(&["version"])).expect("version"),
            CliDispatch::Exit
        ));
    }
}
