//! exchange-reconcile - batch repair of the exchange-program entity store

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use exchange_reconcile::{
    config::{Args, Command},
    logging,
    passes::{
        self, ApprovalConsistency, ChangeQueueConsistency, ComprehensiveMigration, DuplicateProfiles,
        DuplicateUsers, OrphanProfiles, Pass, ReferenceCheck,
    },
    EntityStore, EntityType, HttpStore, MemoryStore, Reconciler, RunSummary, Snapshot,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("{}", e);
        eprintln!("{}", e);
        return ExitCode::from(1);
    }

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    if let Command::ExportSnapshot { path } = &args.command {
        let store = HttpStore::new(args.http_store_config())?;
        return export_snapshot(&store, path).await.map(|_| 0);
    }

    // Snapshot mode keeps a concrete handle for write-back
    let (store, memory): (Arc<dyn EntityStore>, Option<Arc<MemoryStore>>) = match &args.snapshot {
        Some(path) => {
            let snapshot = Snapshot::load(path)
                .await
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            info!(path = %path.display(), entities = snapshot.total(), "Loaded snapshot");
            let memory = Arc::new(MemoryStore::from_snapshot(snapshot));
            let shared: Arc<dyn EntityStore> = memory.clone();
            (shared, Some(memory))
        }
        None => {
            info!(api_url = %args.store.api_url, "Using live store");
            let shared: Arc<dyn EntityStore> = Arc::new(HttpStore::new(args.http_store_config())?);
            (shared, None)
        }
    };

    let reconciler = Reconciler::new(store, args.executor_config(), args.sample_limit);
    let settings = args.pass_settings();
    let selected: Vec<Box<dyn Pass>> = match &args.command {
        Command::DuplicateUsers { .. } => vec![Box::new(DuplicateUsers::new(&settings))],
        Command::DuplicateProfiles => vec![Box::new(DuplicateProfiles::new(&settings))],
        Command::OrphanProfiles => vec![Box::new(OrphanProfiles)],
        Command::CheckReferences => vec![Box::new(ReferenceCheck)],
        Command::FixApprovals => vec![Box::new(ApprovalConsistency::new(&settings))],
        Command::FixChangeQueue => vec![Box::new(ChangeQueueConsistency::new(&settings))],
        Command::MigrateComprehensive => vec![Box::new(ComprehensiveMigration)],
        Command::All => passes::all_passes(&settings),
        Command::ExportSnapshot { .. } => Vec::new(),
    };

    let summary: RunSummary = reconciler.run_all(&selected).await;
    print!("{}", summary);

    if let (Some(memory), Some(path)) = (memory, &args.snapshot) {
        if args.write_back && !args.dry_run {
            memory
                .snapshot()
                .await
                .save(path)
                .await
                .with_context(|| format!("writing snapshot {}", path.display()))?;
            info!(path = %path.display(), "Snapshot written back");
        }
    }

    Ok(summary.exit_code())
}

async fn export_snapshot(store: &dyn EntityStore, path: &std::path::Path) -> anyhow::Result<()> {
    let mut snapshot = Snapshot::default();
    for entity_type in EntityType::ALL {
        let entities = store.query(entity_type, None).await?;
        info!(entity_type = %entity_type, count = entities.len(), "Exported collection");
        snapshot.entities.insert(entity_type, entities);
    }
    snapshot
        .save(path)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    println!("exported {} entities to {}", snapshot.total(), path.display());
    Ok(())
}
