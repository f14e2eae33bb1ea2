//! Configuration management for the node.
//!
//! Every option can be set from an `INFODB_*` environment variable or by
//! name through [`Config::set_parameter`]. Names are matched without regard
//! to case, so `purgeTimeout` and `purgetimeout` are the same option.

use infodb_engine::{clock::MICROS_PER_SEC, EnumDefinitions, StoreConfig};
use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Option names and the environment variables that set them.
const PARAMETERS: &[(&str, &str)] = &[
    ("sendRecvAddress", "INFODB_SEND_RECV_ADDRESS"),
    ("sendRecvPort", "INFODB_SEND_RECV_PORT"),
    ("sendRecvIfAddress", "INFODB_SEND_RECV_IF_ADDRESS"),
    ("useDuplicateSender", "INFODB_USE_DUPLICATE_SENDER"),
    ("duplicateSendAddress", "INFODB_DUPLICATE_SEND_ADDRESS"),
    ("duplicateSendPort", "INFODB_DUPLICATE_SEND_PORT"),
    ("duplicateSendIfAddress", "INFODB_DUPLICATE_SEND_IF_ADDRESS"),
    ("requestRecvPort", "INFODB_REQUEST_RECV_PORT"),
    ("requestRecvIfAddress", "INFODB_REQUEST_RECV_IF_ADDRESS"),
    ("purgeTimeout", "INFODB_PURGE_TIMEOUT"),
    ("fullUpdatePeriod", "INFODB_FULL_UPDATE_PERIOD"),
    ("loadFromBackup", "INFODB_LOAD_FROM_BACKUP"),
    ("saveToBackup", "INFODB_SAVE_TO_BACKUP"),
    ("backupFilename", "INFODB_BACKUP_FILENAME"),
    ("backupPeriod", "INFODB_BACKUP_PERIOD"),
    ("saveRecords", "INFODB_SAVE_RECORDS"),
    ("recordSentMessages", "INFODB_RECORD_SENT_MESSAGES"),
    ("recordBaseFilename", "INFODB_RECORD_BASE_FILENAME"),
    ("state", "INFODB_STATE"),
    ("checkState", "INFODB_CHECK_STATE"),
    ("nodeUuid", "INFODB_NODE_UUID"),
    ("enumDefinitions", "INFODB_ENUM_DEFINITIONS"),
    ("fastTickMs", "INFODB_FAST_TICK_MS"),
    ("statusPeriodMs", "INFODB_STATUS_PERIOD_MS"),
    ("pullTimeout", "INFODB_PULL_TIMEOUT"),
    ("autoPull", "INFODB_AUTO_PULL"),
];

/// Node configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Multicast group for update, status and snapshot messages
    pub send_recv_address: Ipv4Addr,
    pub send_recv_port: u16,
    /// Local interface used to join the group and send to it
    pub send_recv_if_address: Ipv4Addr,
    /// Also send every message to the duplicate destination
    pub use_duplicate_sender: bool,
    pub duplicate_send_address: Ipv4Addr,
    pub duplicate_send_port: u16,
    pub duplicate_send_if_address: Ipv4Addr,
    /// TCP port serving full-sync pulls (0 picks a free port)
    pub request_recv_port: u16,
    pub request_recv_if_address: Ipv4Addr,
    /// Time a deleted item is kept before being purged
    pub purge_timeout: Duration,
    /// Period between full snapshots of owned items
    pub full_update_period: Duration,
    pub load_from_backup: bool,
    pub save_to_backup: bool,
    pub backup_filename: PathBuf,
    /// Period between automatic backups (zero disables them)
    pub backup_period: Duration,
    /// Record received messages
    pub save_records: bool,
    /// Also record sent messages
    pub record_sent_messages: bool,
    pub record_base_filename: PathBuf,
    /// State string stamped on items this node creates
    pub state: String,
    pub check_state: bool,
    /// Fixed uuid for the node's self-item (random if unset)
    pub node_uuid: Option<Uuid>,
    pub enum_definitions: EnumDefinitions,
    /// Cadence of update flushing and peer bookkeeping
    pub fast_tick: Duration,
    /// Cadence of status messages, purging and backup checks
    pub status_period: Duration,
    /// Deadline for a whole full-sync pull
    pub pull_timeout: Duration,
    /// Pull from every newly seen peer
    pub auto_pull: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_recv_address: Ipv4Addr::new(239, 192, 43, 80),
            send_recv_port: 4382,
            send_recv_if_address: Ipv4Addr::UNSPECIFIED,
            use_duplicate_sender: false,
            duplicate_send_address: Ipv4Addr::new(239, 192, 43, 81),
            duplicate_send_port: 4382,
            duplicate_send_if_address: Ipv4Addr::UNSPECIFIED,
            request_recv_port: 4383,
            request_recv_if_address: Ipv4Addr::UNSPECIFIED,
            purge_timeout: Duration::from_secs(60),
            full_update_period: Duration::from_secs(30),
            load_from_backup: false,
            save_to_backup: false,
            backup_filename: PathBuf::from("infodb_backup.json"),
            backup_period: Duration::ZERO,
            save_records: false,
            record_sent_messages: false,
            record_base_filename: PathBuf::from("infodb"),
            state: String::new(),
            check_state: false,
            node_uuid: None,
            enum_definitions: EnumDefinitions::new(),
            fast_tick: Duration::from_millis(100),
            status_period: Duration::from_millis(2000),
            pull_timeout: Duration::from_secs(5),
            auto_pull: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (name, var) in PARAMETERS {
            if let Ok(value) = env::var(var) {
                config.set_parameter(name, &value)?;
            }
        }
        Ok(config)
    }

    /// Set an option by name.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let key = canonical(name)?;
        let invalid = || ConfigError::InvalidValue {
            name: key.to_string(),
            value: value.to_string(),
        };
        let value = value.trim();

        match key {
            "sendRecvAddress" => self.send_recv_address = value.parse().map_err(|_| invalid())?,
            "sendRecvPort" => self.send_recv_port = value.parse().map_err(|_| invalid())?,
            "sendRecvIfAddress" => self.send_recv_if_address = value.parse().map_err(|_| invalid())?,
            "useDuplicateSender" => self.use_duplicate_sender = parse_bool(value).ok_or_else(invalid)?,
            "duplicateSendAddress" => {
                self.duplicate_send_address = value.parse().map_err(|_| invalid())?
            }
            "duplicateSendPort" => self.duplicate_send_port = value.parse().map_err(|_| invalid())?,
            "duplicateSendIfAddress" => {
                self.duplicate_send_if_address = value.parse().map_err(|_| invalid())?
            }
            "requestRecvPort" => self.request_recv_port = value.parse().map_err(|_| invalid())?,
            "requestRecvIfAddress" => {
                self.request_recv_if_address = value.parse().map_err(|_| invalid())?
            }
            "purgeTimeout" => self.purge_timeout = parse_secs(value).ok_or_else(invalid)?,
            "fullUpdatePeriod" => {
                let period = parse_secs(value).ok_or_else(invalid)?;
                if period.is_zero() {
                    return Err(invalid());
                }
                self.full_update_period = period;
            }
            "loadFromBackup" => self.load_from_backup = parse_bool(value).ok_or_else(invalid)?,
            "saveToBackup" => self.save_to_backup = parse_bool(value).ok_or_else(invalid)?,
            "backupFilename" => self.backup_filename = PathBuf::from(value),
            "backupPeriod" => self.backup_period = parse_secs(value).ok_or_else(invalid)?,
            "saveRecords" => self.save_records = parse_bool(value).ok_or_else(invalid)?,
            "recordSentMessages" => self.record_sent_messages = parse_bool(value).ok_or_else(invalid)?,
            "recordBaseFilename" => self.record_base_filename = PathBuf::from(value),
            "state" => self.state = value.to_string(),
            "checkState" => self.check_state = parse_bool(value).ok_or_else(invalid)?,
            "nodeUuid" => {
                self.node_uuid = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| invalid())?)
                }
            }
            "enumDefinitions" => self.enum_definitions = value.parse().map_err(|_| invalid())?,
            "fastTickMs" => self.fast_tick = parse_millis(value).ok_or_else(invalid)?,
            "statusPeriodMs" => self.status_period = parse_millis(value).ok_or_else(invalid)?,
            "pullTimeout" => self.pull_timeout = parse_secs(value).ok_or_else(invalid)?,
            "autoPull" => self.auto_pull = parse_bool(value).ok_or_else(invalid)?,
            _ => return Err(ConfigError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    /// Get an option's current value by name, formatted so that it parses
    /// back with [`Config::set_parameter`].
    pub fn get_parameter(&self, name: &str) -> Result<String, ConfigError> {
        let key = canonical(name)?;
        let flag = |b: bool| (if b { "1" } else { "0" }).to_string();

        let value = match key {
            "sendRecvAddress" => self.send_recv_address.to_string(),
            "sendRecvPort" => self.send_recv_port.to_string(),
            "sendRecvIfAddress" => self.send_recv_if_address.to_string(),
            "useDuplicateSender" => flag(self.use_duplicate_sender),
            "duplicateSendAddress" => self.duplicate_send_address.to_string(),
            "duplicateSendPort" => self.duplicate_send_port.to_string(),
            "duplicateSendIfAddress" => self.duplicate_send_if_address.to_string(),
            "requestRecvPort" => self.request_recv_port.to_string(),
            "requestRecvIfAddress" => self.request_recv_if_address.to_string(),
            "purgeTimeout" => self.purge_timeout.as_secs().to_string(),
            "fullUpdatePeriod" => self.full_update_period.as_secs().to_string(),
            "loadFromBackup" => flag(self.load_from_backup),
            "saveToBackup" => flag(self.save_to_backup),
            "backupFilename" => self.backup_filename.display().to_string(),
            "backupPeriod" => self.backup_period.as_secs().to_string(),
            "saveRecords" => flag(self.save_records),
            "recordSentMessages" => flag(self.record_sent_messages),
            "recordBaseFilename" => self.record_base_filename.display().to_string(),
            "state" => self.state.clone(),
            "checkState" => flag(self.check_state),
            "nodeUuid" => self.node_uuid.map(|u| u.to_string()).unwrap_or_default(),
            "enumDefinitions" => self.enum_definitions.to_string(),
            "fastTickMs" => self.fast_tick.as_millis().to_string(),
            "statusPeriodMs" => self.status_period.as_millis().to_string(),
            "pullTimeout" => self.pull_timeout.as_secs().to_string(),
            "autoPull" => flag(self.auto_pull),
            _ => return Err(ConfigError::UnknownParameter(name.to_string())),
        };
        Ok(value)
    }

    /// Settings handed to the item store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            node_state: self.state.clone(),
            check_state: self.check_state,
            purge_timeout: duration_micros(self.purge_timeout),
        }
    }
}

/// Convert a duration to engine timestamp units.
pub fn duration_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(MICROS_PER_SEC)
        .saturating_add(u64::from(duration.subsec_micros()))
}

fn canonical(name: &str) -> Result<&'static str, ConfigError> {
    PARAMETERS
        .iter()
        .map(|(param, _)| *param)
        .find(|param| param.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_secs)
}

fn parse_millis(value: &str) -> Option<Duration> {
    value
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.purge_timeout, Duration::from_secs(60));
        assert!(config.send_recv_address.is_multicast());
        assert!(!config.check_state);
    }

    #[test]
    fn set_and_get_parameters() {
        let mut config = Config::default();
        config.set_parameter("purgeTimeout", "15").unwrap();
        config.set_parameter("CHECKSTATE", "yes").unwrap();
        config.set_parameter("state", "primary").unwrap();
        config.set_parameter("sendRecvAddress", "239.1.2.3").unwrap();

        assert_eq!(config.purge_timeout, Duration::from_secs(15));
        assert!(config.check_state);
        assert_eq!(config.get_parameter("checkState").unwrap(), "1");
        assert_eq!(config.get_parameter("sendrecvaddress").unwrap(), "239.1.2.3");

        let store = config.store_config();
        assert_eq!(store.node_state, "primary");
        assert_eq!(store.purge_timeout, 15 * MICROS_PER_SEC);
    }

    #[test]
    fn huge_purge_timeout_saturates() {
        let mut config = Config::default();
        config.set_parameter("purgeTimeout", &u64::MAX.to_string()).unwrap();
        assert_eq!(config.store_config().purge_timeout, u64::MAX);

        assert_eq!(duration_micros(Duration::MAX), u64::MAX);
        assert_eq!(duration_micros(Duration::from_millis(1500)), 1_500_000);
    }

    #[test]
    fn every_parameter_round_trips() {
        let mut config = Config::default();
        config.node_uuid = Some(Uuid::new_v4());
        config.enum_definitions = "mode:1=A,2=C".parse().unwrap();

        for (name, _) in PARAMETERS {
            let value = config.get_parameter(name).unwrap();
            let mut copy = Config::default();
            copy.set_parameter(name, &value).unwrap();
            assert_eq!(copy.get_parameter(name).unwrap(), value, "parameter {name}");
        }
    }

    #[test]
    fn unknown_parameter() {
        let mut config = Config::default();
        assert!(matches!(
            config.set_parameter("bogus", "1"),
            Err(ConfigError::UnknownParameter(_))
        ));
        assert!(matches!(
            config.get_parameter("bogus"),
            Err(ConfigError::UnknownParameter(_))
        ));
    }

    #[test]
    fn invalid_values() {
        let mut config = Config::default();
        for (name, value) in [
            ("sendRecvPort", "70000"),
            ("checkState", "maybe"),
            ("sendRecvAddress", "not-an-ip"),
            ("fullUpdatePeriod", "0"),
            ("fastTickMs", "0"),
            ("enumDefinitions", "missing-colon"),
        ] {
            assert!(
                matches!(
                    config.set_parameter(name, value),
                    Err(ConfigError::InvalidValue { .. })
                ),
                "{name}={value}"
            );
        }
    }
}
