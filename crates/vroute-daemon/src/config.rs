//! Daemon configuration and command line flags
//!
//! The YAML file lives at `<support_dir>/config.yaml` unless `--config` names
//! another one. Flags override file values.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use vroute_core::audio::{DeviceId, RouterConfig};
use vroute_ipc::IpcConfig;

/// Default interval at which the gain sync worker polls the server (ms)
pub const DEFAULT_GAIN_POLL_MS: u64 = 50;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub router: RouterConfig,

    pub ipc: IpcConfig,

    /// Physical output to route to, as `"Name"` or `"[Host] Name"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_device: Option<String>,

    /// Process whose registered volume drives the router's own gain stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_pid: Option<u32>,

    pub gain_poll_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            ipc: IpcConfig::default(),
            sink_device: None,
            gain_pid: None,
            gain_poll_ms: DEFAULT_GAIN_POLL_MS,
        }
    }
}

/// Parsed command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub sink: Option<String>,
    pub source: Option<String>,
    pub config: Option<PathBuf>,
    pub gain_pid: Option<u32>,
    pub no_router: bool,
    pub write_config: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
Usage: vroute [OPTIONS]

Options:
  --sink <NAME>       Physical output device (\"Name\" or \"[Host] Name\")
  --source <NAME>     Virtual input device (default: system default input)
  --config <PATH>     Config file (default: <data dir>/vroute/config.yaml)
  --gain-pid <PID>    Drive the router gain from this process's volume
  --no-router         Run the volume server only
  --write-config      Write the effective config to the config path and exit
  -h, --help          Show this help

Environment:
  VROUTE_SOCKET       Override the volume server socket path
  RUST_LOG            Log filter (default: info)";

impl Args {
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .with_context(|| format!("{} needs a value", flag))
            };
            match arg.as_str() {
                "--sink" => parsed.sink = Some(value("--sink")?),
                "--source" => parsed.source = Some(value("--source")?),
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--gain-pid" => {
                    let pid = value("--gain-pid")?;
                    parsed.gain_pid = Some(
                        pid.parse()
                            .with_context(|| format!("invalid pid {:?}", pid))?,
                    );
                }
                "--no-router" => parsed.no_router = true,
                "--write-config" => parsed.write_config = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument {:?}\n\n{}", other, USAGE),
            }
        }
        Ok(parsed)
    }

    /// Apply flag overrides on top of file values
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(sink) = &self.sink {
            config.sink_device = Some(sink.clone());
        }
        if let Some(source) = &self.source {
            config.router.source_device = Some(DeviceId::parse(source));
        }
        if let Some(pid) = self.gain_pid {
            config.gain_pid = Some(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let parsed = args(&["--sink", "[ALSA] hw:1,0", "--no-router", "--gain-pid", "1234"]).unwrap();
        assert_eq!(parsed.sink.as_deref(), Some("[ALSA] hw:1,0"));
        assert!(parsed.no_router);
        assert_eq!(parsed.gain_pid, Some(1234));
        assert!(!parsed.help);
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--sink"]).is_err());
        assert!(args(&["--gain-pid", "abc"]).is_err());
        assert!(args(&["--bogus"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut config: DaemonConfig =
            serde_yaml::from_str("sink_device: Speakers\nrouter:\n  channels: 1\n").unwrap();
        assert_eq!(config.gain_poll_ms, DEFAULT_GAIN_POLL_MS);

        args(&["--sink", "Headphones", "--source", "[CoreAudio] BlackHole 2ch"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.sink_device.as_deref(), Some("Headphones"));
        assert_eq!(
            config.router.source_device,
            Some(DeviceId::with_host("BlackHole 2ch", "CoreAudio"))
        );
        assert_eq!(config.router.channels, 1);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = DaemonConfig {
            sink_device: Some("[Mock] sink-A".to_string()),
            gain_pid: Some(42),
            ..Default::default()
        };

        vroute_core::config::save_config(&config, &path).unwrap();
        let loaded: DaemonConfig = vroute_core::config::load_config_strict(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
