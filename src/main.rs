use std::io::Read;
use std::process::ExitCode;

use tracing::{error, info};

use coachcal::config::EngineConfig;
use coachcal::engine::{Created, Engine};
use coachcal::model::EventForm;
use coachcal::observability;

fn read_form() -> Result<EventForm, Box<dyn std::error::Error>> {
    let raw = match std::env::args().nth(1) {
        Some(path) if path != "-" => std::fs::read_to_string(path)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_tracing(&EngineConfig::log_filter());

    let config = EngineConfig::from_env();
    if let Err(e) = observability::init(config.metrics_port) {
        error!("metrics exporter: {e}");
        return ExitCode::FAILURE;
    }

    let form = match read_form() {
        Ok(form) => form,
        Err(e) => {
            error!("could not read event form: {e}");
            return ExitCode::from(2);
        }
    };

    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine setup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let created = match engine.create(&form).await {
        Ok(created) => created,
        Err(e) => {
            error!("create failed: {e}");
            return if e.is_input_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            };
        }
    };
    match &created {
        Created::Single(event) => {
            println!("created {} [{}, {})", event.id, event.span.start, event.span.end);
        }
        Created::Rejected(_, reason) => {
            println!("rejected: {}", observability::reject_label(reason));
        }
        Created::Series(series) => {
            println!(
                "series {}: {} created, {} rejected",
                series.root_id,
                series.events.len(),
                series.rejected.len()
            );
            for r in &series.rejected {
                println!("  {} {}", r.occurrence.date, observability::reject_label(&r.reason));
            }
        }
        Created::Remote(receipt) => {
            println!("offloaded: {} created remotely", receipt.created_count);
        }
    }
    info!(state = ?created.state(), "done");
    ExitCode::SUCCESS
}
