//! Configuration management for the capod service.
//!
//! Settings live in a single TOML file; missing keys fall back to defaults so
//! old files keep loading after new options are added.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use bluer::Address;
use serde::{Deserialize, Serialize};

use crate::error::{CapodError, Result};

/// When the scanner runs.
#[derive(
   Debug,
   Clone,
   Copy,
   Default,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MonitorMode {
   /// Only on request over D-Bus.
   Manual,
   /// While an Apple audio accessory is connected.
   #[default]
   Automatic,
   /// From startup until shutdown.
   Always,
}

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   #[serde(default)]
   pub monitor_mode: MonitorMode,

   /// Publish every nearby device instead of only the main device.
   #[serde(default)]
   pub show_all_devices: bool,

   /// Pinned main device.
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub main_device_address: Option<String>,

   #[serde(default = "default_popup_on_case_open")]
   pub popup_on_case_open: bool,

   #[serde(default = "default_device_timeout")]
   pub device_timeout_sec: u64,

   #[serde(default = "default_automatic_poll_interval")]
   pub automatic_poll_interval_sec: u64,
}

const fn default_popup_on_case_open() -> bool {
   true
}

const fn default_device_timeout() -> u64 {
   20
}

const fn default_automatic_poll_interval() -> u64 {
   10
}

impl Default for Config {
   fn default() -> Self {
      Self {
         monitor_mode: MonitorMode::default(),
         show_all_devices: false,
         main_device_address: None,
         popup_on_case_open: default_popup_on_case_open(),
         device_timeout_sec: default_device_timeout(),
         automatic_poll_interval_sec: default_automatic_poll_interval(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;
      Ok(())
   }

   pub fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(capodd_home) = env::var("CAPODD_HOME") {
         PathBuf::from(capodd_home)
      } else if let Some(config_dir) = dirs::config_dir() {
         config_dir
      } else {
         return Err(CapodError::ConfigDirNotFound);
      };

      Ok(config_dir.join("capodd").join("config.toml"))
   }

   /// Parsed main device pin. Blank means no pin.
   pub fn main_device(&self) -> Result<Option<Address>> {
      match self.main_device_address.as_deref().map(str::trim) {
         None | Some("") => Ok(None),
         Some(address) => address
            .parse()
            .map(Some)
            .map_err(|_| CapodError::InvalidAddress(address.to_string())),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults_from_empty_file() {
      let config: Config = toml::from_str("").unwrap();
      assert_eq!(config, Config::default());
      assert_eq!(config.monitor_mode, MonitorMode::Automatic);
      assert!(!config.show_all_devices);
      assert!(config.popup_on_case_open);
      assert_eq!(config.device_timeout_sec, 20);
      assert_eq!(config.main_device().unwrap(), None);
   }

   #[test]
   fn test_monitor_mode_names() {
      let config: Config = toml::from_str("monitor_mode = \"ALWAYS\"").unwrap();
      assert_eq!(config.monitor_mode, MonitorMode::Always);
      assert_eq!(MonitorMode::Manual.to_string(), "MANUAL");
      assert_eq!("automatic".parse::<MonitorMode>().unwrap(), MonitorMode::Automatic);
      assert!(toml::from_str::<Config>("monitor_mode = \"SOMETIMES\"").is_err());
   }

   #[test]
   fn test_main_device_pin() {
      let mut config = Config {
         main_device_address: Some("AA:BB:CC:DD:EE:FF".into()),
         ..Config::default()
      };
      assert_eq!(
         config.main_device().unwrap(),
         Some(Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
      );

      config.main_device_address = Some("  ".into());
      assert_eq!(config.main_device().unwrap(), None);

      config.main_device_address = Some("not-an-address".into());
      assert!(matches!(config.main_device(), Err(CapodError::InvalidAddress(a)) if a == "not-an-address"));
   }

   #[test]
   fn test_load_creates_default_file() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("capodd").join("config.toml");

      let config = Config::load_from(&path).unwrap();
      assert_eq!(config, Config::default());
      assert!(path.exists());
   }

   #[test]
   fn test_save_and_reload() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      let config = Config {
         monitor_mode: MonitorMode::Manual,
         show_all_devices: true,
         main_device_address: Some("11:22:33:44:55:66".into()),
         ..Config::default()
      };

      config.save_to(&path).unwrap();
      let contents = fs::read_to_string(&path).unwrap();
      assert!(contents.contains("monitor_mode = \"MANUAL\""));
      assert_eq!(Config::load_from(&path).unwrap(), config);
   }
}
