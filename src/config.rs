//! Runtime configuration (spec.md §6 "Configurable runtime options").

use crate::wire::AttributeGroup;
use std::time::Duration;

/// Fault-injection mode (spec.md §4.5 "Fault injection", §9 REDESIGN
/// FLAGS: "enum, not boolean+string").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultInjection {
    #[default]
    Off,
    ServerError,
    ClientError,
    Aborted,
    UnsupportedFormat,
}

impl FaultInjection {
    pub fn from_str_opt(s: &str) -> Option<FaultInjection> {
        match s {
            "off" => Some(FaultInjection::Off),
            "server-error" => Some(FaultInjection::ServerError),
            "client-error" => Some(FaultInjection::ClientError),
            "aborted" => Some(FaultInjection::Aborted),
            "unsupported-format" => Some(FaultInjection::UnsupportedFormat),
            _ => None,
        }
    }
}

/// The printer identity and capability set advertised over DNS-SD and
/// `Get-Printer-Attributes` (spec.md §6).
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ServiceConfig {
    #[builder(default = r#""Virtual Printer".to_string()"#)]
    pub printer_name: String,
    /// Must be in `1024..=65535` (spec.md §6). Validated by
    /// [`ServiceConfigBuilder::build`] via [`ServiceConfig::validate`].
    #[builder(default = "8631")]
    pub port: u16,
    #[builder(default, setter(strip_option))]
    pub custom_printer_attributes: Option<AttributeGroup>,
    #[builder(default)]
    pub fault_injection: FaultInjection,
    #[builder(default = r#"std::env::temp_dir().join("virtual-printer-jobs")"#)]
    pub job_store_dir: std::path::PathBuf,
    #[builder(default = "Duration::from_secs(2)")]
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1024..=65535).contains(&self.port) {
            return Err(format!("port {} is out of range 1024-65535", self.port));
        }
        Ok(())
    }
}
