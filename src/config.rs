#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_GATEWAY_PORT: u16 = 8090;
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
pub const DEFAULT_ASSETS_ROOT: &str = "assets";
pub const DEFAULT_LOGS_ROOT: &str = "logs";
pub const DEFAULT_INDEX_PATH: &str = "index.html";
pub const DEFAULT_INNERTUBE_BASE_URL: &str = "https://www.youtube.com/youtubei/v1";
pub const DEFAULT_INNERTUBE_CLIENT_NAME: &str = "TVHTML5";
pub const DEFAULT_INNERTUBE_CLIENT_VERSION: &str = "7.20250219.14.00";
pub const DEFAULT_TELEMETRY_BASE_URL: &str = "https://www.youtube-nocookie.com";
pub const DEFAULT_VIDEO_INFO_URL: &str = "https://www.youtube.com/get_video_info";

/// Where the gateway reads from and which upstream it talks to.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub assets_root: PathBuf,
    pub logs_root: PathBuf,
    pub index_path: PathBuf,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub innertube_base_url: String,
    pub client_name: String,
    pub client_version: String,
    pub telemetry_base_url: String,
    pub video_info_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            innertube_base_url: DEFAULT_INNERTUBE_BASE_URL.to_string(),
            client_name: DEFAULT_INNERTUBE_CLIENT_NAME.to_string(),
            client_version: DEFAULT_INNERTUBE_CLIENT_VERSION.to_string(),
            telemetry_base_url: DEFAULT_TELEMETRY_BASE_URL.to_string(),
            video_info_url: DEFAULT_VIDEO_INFO_URL.to_string(),
        }
    }
}

/// Values passed on the command line. They win over both the process
/// environment and the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub assets_root: Option<PathBuf>,
    pub logs_root: Option<PathBuf>,
    pub index_path: Option<PathBuf>,
    pub gateway_port: Option<u16>,
    pub gateway_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_config(&file_vars, env_var_string, overrides))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let assets_root = overrides
        .assets_root
        .or_else(|| lookup("ASSETS_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_ROOT));
    let logs_root = overrides
        .logs_root
        .or_else(|| lookup("LOGS_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGS_ROOT));
    let index_path = overrides
        .index_path
        .or_else(|| lookup("INDEX_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_PATH));
    let gateway_port = overrides
        .gateway_port
        .or_else(|| lookup("GATEWAY_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_GATEWAY_PORT);
    let gateway_host = overrides
        .gateway_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("GATEWAY_HOST"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GATEWAY_HOST.to_string());

    let defaults = UpstreamConfig::default();
    let upstream = UpstreamConfig {
        innertube_base_url: lookup("INNERTUBE_BASE_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.innertube_base_url),
        client_name: lookup("INNERTUBE_CLIENT_NAME").unwrap_or(defaults.client_name),
        client_version: lookup("INNERTUBE_CLIENT_VERSION").unwrap_or(defaults.client_version),
        telemetry_base_url: lookup("TELEMETRY_BASE_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.telemetry_base_url),
        video_info_url: lookup("VIDEO_INFO_URL").unwrap_or(defaults.video_info_url),
    };

    RuntimeConfig {
        assets_root,
        logs_root,
        index_path,
        gateway_host,
        gateway_port,
        upstream,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn runtime_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let runtime = build_runtime_config(&HashMap::new(), |_| None, RuntimeOverrides::default());
        assert_eq!(runtime.assets_root, PathBuf::from(DEFAULT_ASSETS_ROOT));
        assert_eq!(runtime.logs_root, PathBuf::from(DEFAULT_LOGS_ROOT));
        assert_eq!(runtime.index_path, PathBuf::from(DEFAULT_INDEX_PATH));
        assert_eq!(runtime.gateway_port, DEFAULT_GATEWAY_PORT);
        assert_eq!(runtime.gateway_host, DEFAULT_GATEWAY_HOST);
        assert_eq!(runtime.upstream, UpstreamConfig::default());
    }

    #[test]
    fn env_file_sets_roots_and_port() {
        let runtime = runtime_from(
            "ASSETS_ROOT=\"/srv/assets\"\nLOGS_ROOT=\"/srv/logs\"\nGATEWAY_PORT=\"4242\"\n",
        );
        assert_eq!(runtime.assets_root, PathBuf::from("/srv/assets"));
        assert_eq!(runtime.logs_root, PathBuf::from("/srv/logs"));
        assert_eq!(runtime.gateway_port, 4242);
    }

    #[test]
    fn env_file_sets_upstream_and_trims_trailing_slash() {
        let runtime = runtime_from(
            "INNERTUBE_BASE_URL=\"http://127.0.0.1:9000/youtubei/v1/\"\nINNERTUBE_CLIENT_VERSION=\"5.20150715\"\n",
        );
        assert_eq!(
            runtime.upstream.innertube_base_url,
            "http://127.0.0.1:9000/youtubei/v1"
        );
        assert_eq!(runtime.upstream.client_version, "5.20150715");
        assert_eq!(runtime.upstream.client_name, DEFAULT_INNERTUBE_CLIENT_NAME);
    }

    #[test]
    fn process_env_wins_over_file() {
        let vars = read_env_file(make_config("ASSETS_ROOT=\"/file\"\n").path()).unwrap();
        let runtime = build_runtime_config(
            &vars,
            |key| {
                if key == "ASSETS_ROOT" {
                    Some("/env".to_string())
                } else {
                    None
                }
            },
            RuntimeOverrides::default(),
        );
        assert_eq!(runtime.assets_root, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("ASSETS_ROOT".to_string(), "/file-assets".to_string());
        vars.insert("LOGS_ROOT".to_string(), "/file-logs".to_string());
        vars.insert("GATEWAY_HOST".to_string(), "file-host".to_string());
        vars.insert("GATEWAY_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            assets_root: Some(PathBuf::from("/override-assets")),
            gateway_port: Some(9000),
            gateway_host: Some("override-host".into()),
            ..RuntimeOverrides::default()
        };

        let runtime = build_runtime_config(
            &vars,
            |key| {
                if key == "LOGS_ROOT" {
                    Some("/env-logs".to_string())
                } else if key == "GATEWAY_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        );

        assert_eq!(runtime.assets_root, PathBuf::from("/override-assets"));
        assert_eq!(runtime.logs_root, PathBuf::from("/env-logs"));
        assert_eq!(runtime.gateway_port, 9000);
        assert_eq!(runtime.gateway_host, "override-host");
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let runtime = build_runtime_config(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                gateway_host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(runtime.gateway_host, DEFAULT_GATEWAY_HOST);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let runtime = runtime_from("GATEWAY_PORT=\"nope\"\n");
        assert_eq!(runtime.gateway_port, DEFAULT_GATEWAY_PORT);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export ASSETS_ROOT="/assets"
            LOGS_ROOT='/logs'
            GATEWAY_HOST =  "0.0.0.0"
            GATEWAY_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("ASSETS_ROOT").unwrap(), "/assets");
        assert_eq!(vars.get("LOGS_ROOT").unwrap(), "/logs");
        assert_eq!(vars.get("GATEWAY_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("GATEWAY_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_runtime_config_reads_explicit_env_path() {
        let cfg = make_config("INDEX_PATH=\"/srv/www/index.html\"\n");
        let runtime = resolve_runtime_config(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(runtime.index_path, PathBuf::from("/srv/www/index.html"));
    }
}
