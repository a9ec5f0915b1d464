use std::sync::Arc;

use virtual_printer::config::{FaultInjection, ServiceConfigBuilder};
use virtual_printer::service::Service;

fn env_override(config: &mut virtual_printer::config::ServiceConfig) {
    if let Ok(name) = std::env::var("PRINTER_NAME") {
        config.printer_name = name;
    }
    if let Ok(port) = std::env::var("PRINTER_PORT") {
        if let Ok(port) = port.parse() {
            config.port = port;
        } else {
            log::warn!("ignoring non-numeric PRINTER_PORT={:?}", port);
        }
    }
    if let Ok(mode) = std::env::var("PRINTER_FAULT_INJECTION") {
        match FaultInjection::from_str_opt(&mode) {
            Some(fault) => config.fault_injection = fault,
            None => log::warn!("ignoring unknown PRINTER_FAULT_INJECTION={:?}", mode),
        }
    }
    if let Ok(dir) = std::env::var("PRINTER_JOB_DIR") {
        config.job_store_dir = dir.into();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config = ServiceConfigBuilder::default().build()?;
    env_override(&mut config);
    config.validate().map_err(anyhow::Error::msg)?;

    let service = Arc::new(Service::new(config)?);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    log::info!("received shutdown signal");
    service.stop().await?;
    Ok(())
}
