//! Shotline Backend CLI
//!
//! `shotline-backend <db_path> <project_id> [log_dir]`
//!
//! Opens (and migrates) the database and prints the project's shots with
//! their entries as JSON.

use std::path::PathBuf;
use std::rc::Rc;

use shotline::{EngineConfig, LogSink, Orchestrator};
use shotline_backend::SqliteStore;

async fn run(db_path: PathBuf, project_id: &str) -> Result<String, String> {
    let store = Rc::new(SqliteStore::open(&db_path).await?);
    let engine = Orchestrator::new(store.clone(), store, Rc::new(LogSink), EngineConfig::default())
        .map_err(|e| e.to_string())?;

    let shots = engine.list_shots(project_id, None).await.map_err(|e| e.to_string())?;
    let _ = rolling_logger::info(&format!("Listed {} shots of {}", shots.len(), project_id));
    serde_json::to_string_pretty(&shots).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        let program = args.first().map(String::as_str).unwrap_or("shotline-backend");
        eprintln!("usage: {} <db_path> <project_id> [log_dir]", program);
        std::process::exit(2);
    }

    let log_dir = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("shotline"));
    if let Err(e) = rolling_logger::init_logger(&log_dir, "Shotline") {
        eprintln!("Failed to init logger: {}", e);
    }

    match run(PathBuf::from(&args[1]), &args[2]).await {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let _ = rolling_logger::error(&format!("Listing failed: {}", e));
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
