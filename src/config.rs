//! Configuration subset recognized by the core (spec §6), parsed with
//! `serde` + `toml`.

use serde::Deserialize;

/// Initial role a daemon boots into (spec §6 `PERSONALITY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Personality {
    Master,
    Shadow,
    #[serde(rename = "ha-cluster-managed")]
    HaClusterManaged,
}

fn default_personality() -> Personality {
    Personality::Master
}

fn default_back_logs() -> u32 {
    50
}

fn default_back_meta_keep_previous() -> u32 {
    3
}

fn default_master_port() -> u16 {
    9419
}

fn default_master_timeout() -> u32 {
    60
}

fn default_reconnection_delay() -> u32 {
    1
}

fn default_meta_download_freq_hours() -> u32 {
    24
}

fn default_save_request_min_period() -> u32 {
    10
}

fn default_load_factor_penalty() -> f64 {
    0.0
}

fn default_hdd_test_freq() -> u32 {
    10
}

fn default_hdd_leave_space() -> String {
    "4GiB".to_owned()
}

/// Raw, as-parsed configuration. Fields mirror the names in spec §6.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct RawConfig {
    pub personality: Personality,
    pub back_logs: u32,
    pub back_meta_keep_previous: u32,
    pub master_host: Option<String>,
    pub master_port: u16,
    pub master_timeout: u32,
    pub master_reconnection_delay: u32,
    pub meta_download_freq: u32,
    pub metadata_save_request_min_period: u32,
    pub matoml_listen_host: Option<String>,
    pub matoml_listen_port: u16,
    pub matocs_listen_host: Option<String>,
    pub matocs_listen_port: u16,
    pub matots_listen_host: Option<String>,
    pub matots_listen_port: u16,
    pub load_factor_penalty: f64,
    pub create_new_chunks_in_moosefs_format: bool,
    pub hdd_test_freq: u32,
    pub hdd_leave_space_default: String,
    pub hdd_advise_no_cache: bool,
    pub perform_fsync: bool,
    pub working_user: Option<String>,
    pub working_group: Option<String>,
    pub file_umask: Option<String>,
    pub nice_level: Option<i32>,
    pub lock_memory: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            personality: default_personality(),
            back_logs: default_back_logs(),
            back_meta_keep_previous: default_back_meta_keep_previous(),
            master_host: None,
            master_port: default_master_port(),
            master_timeout: default_master_timeout(),
            master_reconnection_delay: default_reconnection_delay(),
            meta_download_freq: default_meta_download_freq_hours(),
            metadata_save_request_min_period: default_save_request_min_period(),
            matoml_listen_host: None,
            matoml_listen_port: 9419,
            matocs_listen_host: None,
            matocs_listen_port: 9420,
            matots_listen_host: None,
            matots_listen_port: 9421,
            load_factor_penalty: default_load_factor_penalty(),
            create_new_chunks_in_moosefs_format: false,
            hdd_test_freq: default_hdd_test_freq(),
            hdd_leave_space_default: default_hdd_leave_space(),
            hdd_advise_no_cache: false,
            perform_fsync: true,
            working_user: None,
            working_group: None,
            file_umask: None,
            nice_level: None,
            lock_memory: false,
        }
    }
}

/// Validated, clamped configuration actually used by the core. Built from
/// [`RawConfig`] by [`Config::from_raw`], which enforces every documented
/// range in spec §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub personality: Personality,
    pub back_logs: u32,
    pub back_meta_keep_previous: u32,
    pub master_host: Option<String>,
    pub master_port: u16,
    pub master_timeout: u32,
    pub master_reconnection_delay: u32,
    pub meta_download_freq_hours: u32,
    pub metadata_save_request_min_period: u32,
    pub load_factor_penalty: f64,
    pub create_new_chunks_in_moosefs_format: bool,
    pub hdd_test_freq: u32,
    pub hdd_leave_space_default: u64,
    pub hdd_advise_no_cache: bool,
    pub perform_fsync: bool,
    pub nice_level: Option<i32>,
    pub lock_memory: bool,
}

impl Config {
    /// Parses a TOML configuration file's contents.
    pub fn parse(text: &str) -> Result<Self, crate::error::Status> {
        let raw: RawConfig = toml::from_str(text).map_err(|_| crate::error::Status::Invalid)?;
        Self::from_raw(raw)
    }

    /// Builds a validated [`Config`] from a [`RawConfig`], clamping every
    /// range-bound field to the limits documented in spec §6.
    pub fn from_raw(raw: RawConfig) -> Result<Self, crate::error::Status> {
        let hdd_leave_space_default =
            parse_size(&raw.hdd_leave_space_default).ok_or(crate::error::Status::Invalid)?;

        Ok(Self {
            personality: raw.personality,
            back_logs: raw.back_logs.clamp(5, 10_000),
            back_meta_keep_previous: raw.back_meta_keep_previous.clamp(0, 99),
            master_host: raw.master_host,
            master_port: raw.master_port,
            master_timeout: raw.master_timeout.clamp(10, 65_535),
            master_reconnection_delay: raw.master_reconnection_delay.max(1),
            meta_download_freq_hours: raw.meta_download_freq,
            metadata_save_request_min_period: raw.metadata_save_request_min_period,
            load_factor_penalty: raw.load_factor_penalty.clamp(0.0, 0.5),
            create_new_chunks_in_moosefs_format: raw.create_new_chunks_in_moosefs_format,
            hdd_test_freq: raw.hdd_test_freq,
            hdd_leave_space_default,
            hdd_advise_no_cache: raw.hdd_advise_no_cache,
            perform_fsync: raw.perform_fsync,
            nice_level: raw.nice_level,
            lock_memory: raw.lock_memory,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default()).expect("default raw config always parses")
    }
}

/// Parses a human-readable size with a binary or decimal suffix
/// (`4GiB`, `1000M`, `512k`), as `HDD_LEAVE_SPACE_DEFAULT` accepts.
///
/// Grounded in `common/human_readable_format.cc`.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split_at = text.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, suffix) = text.split_at(split_at);
    let value: f64 = number.parse().ok()?;

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "k" | "K" => 1_000,
        "KiB" => 1 << 10,
        "M" | "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "G" | "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        "T" | "TB" => 1_000_000_000_000,
        "TiB" => 1u64 << 40,
        _ => return None,
    };

    Some((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_size_suffixes() {
        assert_eq!(parse_size("4GiB"), Some(4 * (1 << 30)));
        assert_eq!(parse_size("1000M"), Some(1_000_000_000));
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("bogus"), None);
    }

    #[test]
    fn clamps_documented_ranges() {
        let mut raw = RawConfig::default();
        raw.back_logs = 1;
        raw.back_meta_keep_previous = 500;
        raw.master_timeout = 1;
        raw.load_factor_penalty = 10.0;
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.back_logs, 5);
        assert_eq!(cfg.back_meta_keep_previous, 99);
        assert_eq!(cfg.master_timeout, 10);
        assert_eq!(cfg.load_factor_penalty, 0.5);
    }

    #[test]
    fn default_config_has_master_personality() {
        let cfg = Config::default();
        assert_eq!(cfg.personality, Personality::Master);
    }
}
