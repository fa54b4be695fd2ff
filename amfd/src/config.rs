use std::fs;
use std::path::Path;

use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/amfd/amfd.conf";
pub const ENV_CONFIG_PATH: &str = "AMFD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },
    #[error("`{0}` must be non-zero")]
    ZeroValue(&'static str),
    #[error("at least one supported slice is required")]
    NoSlices,
}

/// Runtime configuration of the AMF daemon.
///
/// Loaded from a flat `key=value` file; every key has a default matching
/// the reference deployment so a missing file yields a working instance.
#[derive(Debug, Clone)]
pub struct AmfConfig {
    // Identity
    pub amf_instance_id: String,
    pub amf_name: String,
    pub amf_region_id: String,
    pub amf_set_id: String,
    pub amf_pointer: String,

    // Network scope
    pub plmn_id: String,
    pub tai_list: Vec<String>,
    pub plmn_list: Vec<String>,

    // Endpoints
    pub sbi_bind_address: String,
    pub sbi_port: u16,
    pub n1n2_bind_address: String,
    pub n2_port: u16,

    // Security
    pub amf_key: String,
    pub supported_algorithms: Vec<String>,
    pub authentication_timeout: u64,

    // Slicing
    pub supported_slices: Vec<String>,

    // Capacity
    pub max_ue_connections: usize,
    pub load_balance_threshold: u32,

    // 3GPP timers (seconds)
    pub t3510_timer: u64,
    pub t3511_timer: u64,
    pub t3513_timer: u64,
    pub t3560_timer: u64,

    // NRF
    pub nrf_uri: String,
    pub nf_heartbeat_interval: u64,

    // Logging
    pub log_level: String,
    pub log_file: String,

    // Routing behavior: strict mode answers unknown SBI routes with 404
    // instead of the forgiving namf-comm fallback.
    pub sbi_strict_routing: bool,

    // Deregistered contexts idle longer than this are swept (seconds).
    pub ue_inactivity_threshold: u64,
}

impl Default for AmfConfig {
    fn default() -> Self {
        Self {
            amf_instance_id: "amf-001".to_string(),
            amf_name: "AMF-Beijing-001".to_string(),
            amf_region_id: "01".to_string(),
            amf_set_id: "001".to_string(),
            amf_pointer: "01".to_string(),
            plmn_id: "46001".to_string(),
            tai_list: vec![
                "46001-001".to_string(),
                "46001-002".to_string(),
                "46001-003".to_string(),
            ],
            plmn_list: vec!["46001".to_string(), "46000".to_string()],
            sbi_bind_address: "0.0.0.0".to_string(),
            sbi_port: 8080,
            n1n2_bind_address: "0.0.0.0".to_string(),
            n2_port: 38412,
            amf_key: "0123456789abcdef0123456789abcdef".to_string(),
            supported_algorithms: vec![
                "5G-EA0".to_string(),
                "5G-EA1".to_string(),
                "5G-EA2".to_string(),
                "5G-IA1".to_string(),
                "5G-IA2".to_string(),
            ],
            authentication_timeout: 30,
            supported_slices: vec![
                "SST:1,SD:000001".to_string(),
                "SST:2,SD:000002".to_string(),
                "SST:3,SD:000003".to_string(),
            ],
            max_ue_connections: 10_000,
            load_balance_threshold: 80,
            t3510_timer: 15,
            t3511_timer: 10,
            t3513_timer: 6,
            t3560_timer: 6,
            nrf_uri: "http://nrf.5gc.mnc001.mcc460.3gppnetwork.org:8080".to_string(),
            nf_heartbeat_interval: 30,
            log_level: "info".to_string(),
            log_file: "/var/log/amfd/amfd.log".to_string(),
            sbi_strict_routing: false,
            ue_inactivity_threshold: 3600,
        }
    }
}

impl AmfConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. A file that exists but contains malformed
    /// values is a hard error: the daemon must not come up half-configured.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                log::warn!("[amfd] config file {} not found, using defaults", path.display());
                let cfg = Self::default();
                cfg.validate()?;
                return Ok(cfg);
            }
        };
        let cfg = Self::parse(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse the flat `key=value` format. Lines starting with `#` and
    /// blank lines are skipped; unknown keys are ignored so config files
    /// can be shared across daemon versions.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
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
                "amfInstanceId" => cfg.amf_instance_id = value.to_string(),
                "amfName" => cfg.amf_name = value.to_string(),
                "amfRegionId" => cfg.amf_region_id = value.to_string(),
                "amfSetId" => cfg.amf_set_id = value.to_string(),
                "amfPointer" => cfg.amf_pointer = value.to_string(),
                "plmnId" => cfg.plmn_id = value.to_string(),
                "taiList" => cfg.tai_list = parse_list(value),
                "plmnList" => cfg.plmn_list = parse_list(value),
                "sbiBindAddress" => cfg.sbi_bind_address = value.to_string(),
                "sbiPort" => cfg.sbi_port = parse_num(key, value)?,
                "n1n2BindAddress" => cfg.n1n2_bind_address = value.to_string(),
                "n2Port" => cfg.n2_port = parse_num(key, value)?,
                "amfKey" => cfg.amf_key = value.to_string(),
                "supportedAlgorithms" => cfg.supported_algorithms = parse_list(value),
                "authenticationTimeout" => cfg.authentication_timeout = parse_num(key, value)?,
                "supportedSlices" => cfg.supported_slices = parse_slice_list(value),
                "maxUeConnections" => cfg.max_ue_connections = parse_num(key, value)?,
                "loadBalanceThreshold" => cfg.load_balance_threshold = parse_num(key, value)?,
                "t3510Timer" => cfg.t3510_timer = parse_num(key, value)?,
                "t3511Timer" => cfg.t3511_timer = parse_num(key, value)?,
                "t3513Timer" => cfg.t3513_timer = parse_num(key, value)?,
                "t3560Timer" => cfg.t3560_timer = parse_num(key, value)?,
                "nrfUri" => cfg.nrf_uri = value.to_string(),
                "nfHeartbeatInterval" => cfg.nf_heartbeat_interval = parse_num(key, value)?,
                "logLevel" => cfg.log_level = value.to_string(),
                "logFile" => cfg.log_file = value.to_string(),
                "sbiStrictRouting" => cfg.sbi_strict_routing = parse_bool(key, value)?,
                "ueInactivityThreshold" => cfg.ue_inactivity_threshold = parse_num(key, value)?,
                _ => log::debug!("[amfd] ignoring unknown config key `{key}`"),
            }
        }
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sbi_port == 0 {
            return Err(ConfigError::ZeroValue("sbiPort"));
        }
        if self.n2_port == 0 {
            return Err(ConfigError::ZeroValue("n2Port"));
        }
        if self.max_ue_connections == 0 {
            return Err(ConfigError::ZeroValue("maxUeConnections"));
        }
        if self.supported_slices.is_empty() {
            return Err(ConfigError::NoSlices);
        }
        Ok(())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Slice lists are themselves comma-bearing (`SST:1,SD:000001`), so the
/// entry separator is `;` here.
fn parse_slice_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
