//! `fleetwatch run` -- the long-running telemetry service.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fleetwatch_core::{
    AlertEngine, AlertEvent, AlertPipeline, CoreError, MemoryAlertStore, NotificationDispatcher,
    TelemetryService, ThresholdTable,
};
use fleetwatch_transport::TransportClient;

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = super::load_config(global)?;
    if let Some(host) = args.host {
        cfg.broker.host = host;
    }
    if let Some(port) = args.port {
        cfg.broker.port = port;
    }

    let transport = fleetwatch_config::transport_config(&cfg)?;
    let service_config = fleetwatch_config::service_config(&cfg)?;
    let rules = fleetwatch_config::threshold_rules(&cfg)?;
    let notifications = fleetwatch_config::notification_config(&cfg);

    let devices = fleetwatch_config::devices(&cfg);
    if devices.is_empty() {
        warn!("no devices configured; telemetry from unknown devices is ignored");
    }

    let engine = Arc::new(AlertEngine::new(Arc::new(ThresholdTable::new(rules))));
    let store = Arc::new(MemoryAlertStore::with_devices(devices));
    let notifier = Arc::new(NotificationDispatcher::new(notifications).map_err(CoreError::from)?);
    let pipeline = Arc::new(AlertPipeline::new(engine, store, notifier));

    let service = TelemetryService::new(service_config, TransportClient::new(transport), pipeline);
    let mut events = service.events();
    service.start().await?;
    info!("processing telemetry; press Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                break;
            }

            event = events.recv() => match event {
                Ok(event) => print_event(&event, global)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "alert output lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.shutdown().await;
    Ok(())
}

fn print_event(event: &AlertEvent, global: &GlobalOpts) -> Result<(), CliError> {
    let line = match global.output {
        OutputFormat::Table => format!(
            "{} {:<9} {:<8} {}/{} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind,
            event.severity,
            event.device_id,
            event.sensor_type,
            event.message,
        ),
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
    };
    output::print_output(&line, global.quiet);
    Ok(())
}
