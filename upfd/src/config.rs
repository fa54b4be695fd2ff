use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/upfd/upfd.conf";
pub const ENV_CONFIG_PATH: &str = "UPFD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid session entry `{0}`: expected ueIp,dlTeid,ulTeid,gnbIp,gnbPort,dnIp,qosPriority,qosDscp")]
    InvalidSession(String),
    #[error("`{0}` must be non-zero")]
    ZeroValue(&'static str),
    #[error("at least one session entry is required")]
    NoSessions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub ue_ip: Ipv4Addr,
    pub dl_teid: u32,
    pub ul_teid: u32,
    pub gnb_ip: Ipv4Addr,
    pub gnb_port: u16,
    pub dn_ip: Ipv4Addr,
    pub qos_priority: u8,
    pub qos_dscp: u8,
}

/// UPF configuration: local endpoint, queue/worker sizing and the
/// static session table.
#[derive(Debug, Clone)]
pub struct UpfConfig {
    pub local_ip: Ipv4Addr,
    pub num_queues: usize,
    pub num_workers: usize,
    pub log_level: String,
    pub sessions: Vec<SessionConfig>,
}

impl Default for UpfConfig {
    fn default() -> Self {
        Self {
            local_ip: Ipv4Addr::new(192, 168, 1, 50),
            num_queues: 4,
            num_workers: 8,
            log_level: "info".to_string(),
            sessions: default_sessions(),
        }
    }
}

/// The reference deployment's four static UE sessions.
fn default_sessions() -> Vec<SessionConfig> {
    let teids: [(u32, u32); 4] = [
        (0x1234_5678, 0x8765_4321),
        (0x1111_1111, 0x2222_2222),
        (0x3333_3333, 0x4444_4444),
        (0x5555_5555, 0x6666_6666),
    ];
    teids
        .iter()
        .enumerate()
        .map(|(i, &(dl, ul))| SessionConfig {
            ue_ip: Ipv4Addr::new(10, 0, 0, 2 + i as u8),
            dl_teid: dl,
            ul_teid: ul,
            gnb_ip: Ipv4Addr::new(192, 168, 1, 100 + i as u8),
            gnb_port: 2152,
            dn_ip: Ipv4Addr::new(8, 8, 8, 8),
            qos_priority: if i % 2 == 0 { 5 } else { 7 },
            qos_dscp: if i % 2 == 0 { 0x20 } else { 0x28 },
        })
        .collect()
}

impl UpfConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                log::warn!("[upfd] config file {} not found, using defaults", path.display());
                let cfg = Self::default();
                cfg.validate()?;
                return Ok(cfg);
            }
        };
        let cfg = Self::parse(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Flat `key=value` format; `session=` may repeat, and the first
    /// occurrence replaces the built-in session table.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let mut sessions_from_file = false;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "upfLocalIp" => cfg.local_ip = parse_ip(key, value)?,
                "numQueues" => cfg.num_queues = parse_num(key, value)?,
                "numWorkers" => cfg.num_workers = parse_num(key, value)?,
                "logLevel" => cfg.log_level = value.to_string(),
                "session" => {
                    if !sessions_from_file {
                        cfg.sessions.clear();
                        sessions_from_file = true;
                    }
                    cfg.sessions.push(parse_session(value)?);
                }
                _ => log::debug!("[upfd] ignoring unknown config key `{key}`"),
            }
        }
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_queues == 0 {
            return Err(ConfigError::ZeroValue("numQueues"));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroValue("numWorkers"));
        }
        if self.sessions.is_empty() {
            return Err(ConfigError::NoSessions);
        }
        Ok(())
    }
}

fn parse_ip(key: &str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// TEIDs and DSCP values read naturally in hex; accept both forms.
fn parse_u32_flexible(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn parse_session(value: &str) -> Result<SessionConfig, ConfigError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 8 {
        return Err(ConfigError::InvalidSession(value.to_string()));
    }
    let invalid = || ConfigError::InvalidSession(value.to_string());
    Ok(SessionConfig {
        ue_ip: parts[0].parse().map_err(|_| invalid())?,
        dl_teid: parse_u32_flexible(parts[1]).ok_or_else(invalid)?,
        ul_teid: parse_u32_flexible(parts[2]).ok_or_else(invalid)?,
        gnb_ip: parts[3].parse().map_err(|_| invalid())?,
        gnb_port: parts[4].parse().map_err(|_| invalid())?,
        dn_ip: parts[5].parse().map_err(|_| invalid())?,
        qos_priority: parse_u32_flexible(parts[6])
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(invalid)?,
        qos_dscp: parse_u32_flexible(parts[7])
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(invalid)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_carry_four_sessions() {
        let cfg = UpfConfig::default();
        assert_eq!(cfg.sessions.len(), 4);
        assert_eq!(cfg.sessions[0].ue_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(cfg.sessions[0].dl_teid, 0x1234_5678);
        assert_eq!(cfg.sessions[0].ul_teid, 0x8765_4321);
        assert_eq!(cfg.sessions[3].gnb_ip, Ipv4Addr::new(192, 168, 1, 103));
        assert_eq!(cfg.num_queues, 4);
        assert_eq!(cfg.num_workers, 8);
    }

    #[test]
    fn session_entries_replace_defaults() {
        let contents = "\
upfLocalIp = 10.10.0.1
numQueues = 2
numWorkers = 4
session = 10.0.0.9, 0xaa, 0xbb, 192.168.1.200, 2152, 8.8.4.4, 5, 0x20
";
        let cfg = UpfConfig::parse(contents).unwrap();
        assert_eq!(cfg.local_ip, Ipv4Addr::new(10, 10, 0, 1));
        assert_eq!(cfg.num_queues, 2);
        assert_eq!(cfg.sessions.len(), 1);
        assert_eq!(cfg.sessions[0].dl_teid, 0xaa);
        assert_eq!(cfg.sessions[0].gnb_ip, Ipv4Addr::new(192, 168, 1, 200));
    }

    #[test]
    fn malformed_session_is_fatal() {
        let err = UpfConfig::parse("session = 10.0.0.9, 0xaa\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSession(_)));
    }

    #[test]
    fn zero_queues_rejected() {
        let cfg = UpfConfig::parse("numQueues = 0\n").unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroValue("numQueues"))));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "numWorkers = 16").unwrap();
        let cfg = UpfConfig::load(file.path()).unwrap();
        assert_eq!(cfg.num_workers, 16);
        assert_eq!(cfg.sessions.len(), 4);
    }
}
