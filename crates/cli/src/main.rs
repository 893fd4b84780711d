use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::json;
use steward_core::{DeleteOutcome, FieldPath, FlatModel, LocalId, ObjectStore};
use steward_ops::{ControllerConfig, ReadOutcome, ResourceController, ResourceData, UpdateOutcome};
use steward_persist::{SqliteStore, StateRecord, StateStore};
use steward_schema::{metadata, ResourceKind};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stewardctl", version, about = "Reconcile declared resources against a cluster")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Resource kind, e.g. "priority_class" or "config_map"
    #[arg(long = "kind", global = true, default_value = "priority_class")]
    kind: String,

    /// Object store backend
    #[arg(long = "backend", value_enum, global = true, env = "STEWARD_BACKEND", default_value_t = Backend::Kube)]
    backend: Backend,

    /// State database path (default: ~/.steward/state.db)
    #[arg(long = "db", global = true, env = "STEWARD_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend { Kube, Memory }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the resource described by a YAML/JSON file
    Apply {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Show the patch `apply` would send, without changing anything
    Plan {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Read a resource by id ("name" or "namespace/name")
    Read { id: String },
    /// Delete a resource by id; a missing resource is not an error
    Delete { id: String },
    /// Print whether a resource exists
    Exists { id: String },
    /// Adopt an existing resource into local state
    Import { id: String },
    /// List built-in kinds
    Kinds {
        /// Also check which kinds the cluster serves
        #[arg(long = "served", action = ArgAction::SetTrue)]
        served: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("STEWARD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STEWARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STEWARD_METRICS_ADDR; expected host:port");
        }
    }
}

type Controller = ResourceController<Arc<dyn ObjectStore>>;

async fn open_store(backend: Backend, kind: &dyn ResourceKind) -> Result<Arc<dyn ObjectStore>> {
    match backend {
        Backend::Kube => {
            let store = steward_kubehub::KubeStore::connect(&kind.schema().gvk_key())
                .await
                .with_context(|| format!("connecting to cluster for {}", kind.schema().gvk_key()))?;
            Ok(Arc::new(store))
        }
        Backend::Memory => {
            let mut store = steward_store::MemoryStore::new();
            if kind.omits_generate_name_on_read() {
                store = store.omit_on_read(FieldPath::from_keys(&["metadata", "generateName"]));
            }
            Ok(Arc::new(store))
        }
    }
}

fn open_db(path: Option<&str>) -> Result<SqliteStore> {
    match path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(),
    }
}

/// Identity of a configured resource across runs: its id when the name is
/// fixed, otherwise the generate-name prefix.
fn state_key(model: &FlatModel) -> Result<String> {
    let ns = model.get_str(metadata::NAMESPACE)?;
    if let Some(name) = model.get_str(metadata::NAME)?.filter(|n| !n.is_empty()) {
        return Ok(LocalId::new(ns, name).to_string());
    }
    let prefix = model.get_str(metadata::GENERATE_NAME)?.unwrap_or_default();
    Ok(match ns {
        Some(ns) => format!("{ns}/{prefix}*"),
        None => format!("{prefix}*"),
    })
}

fn record(kind: &dyn ResourceKind, key: &str, data: &ResourceData) -> Result<StateRecord> {
    Ok(StateRecord {
        kind: kind.name().to_string(),
        key: key.to_string(),
        id: data.id.clone(),
        rv: data.model.get_str(metadata::RESOURCE_VERSION)?.unwrap_or_default().to_string(),
        ts: steward_persist::now_ts(),
        model: data.model.clone(),
    })
}

fn print_model(output: Output, action: &str, data: &ResourceData) -> Result<()> {
    let id = data.id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".to_string());
    match output {
        Output::Human => {
            println!("{action} {id}");
            for (k, v) in data.model.iter() {
                println!("  {:<32} {}", k, v.render());
            }
        }
        Output::Json => {
            let out = json!({"action": action, "id": id, "model": data.model.to_json()});
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

/// Prior state for `desired`: the persisted snapshot, refreshed from the
/// store. `None` when there is nothing to update in place.
async fn current_state(ctl: &Controller, db: &SqliteStore, key: &str) -> Result<Option<ResourceData>> {
    let Some(rec) = db.latest(ctl.kind().name(), key)? else { return Ok(None) };
    let Some(id) = rec.id else { return Ok(None) };
    let mut data = ResourceData { id: Some(id.clone()), model: rec.model };
    match ctl.read(&mut data).await? {
        ReadOutcome::Refreshed => Ok(Some(data)),
        ReadOutcome::NotFound => {
            warn!(%id, "recorded resource no longer exists; it will be created again");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    if let Commands::Kinds { served } = cli.command {
        return list_kinds(cli.output, served).await;
    }

    let kind = steward_schema::kind_by_name(&cli.kind).ok_or_else(|| {
        let names: Vec<_> = steward_schema::all_kinds().iter().map(|k| k.name()).collect();
        anyhow!("unknown kind {:?}; known kinds: {}", cli.kind, names.join(", "))
    })?;
    let store = open_store(cli.backend, kind.as_ref()).await?;
    let ctl: Controller = ResourceController::new(Arc::clone(&kind), store, ControllerConfig::from_env());
    let db = open_db(cli.db.as_deref())?;

    match cli.command {
        Commands::Apply { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let desired = steward_schema::load_yaml(kind.schema(), &text)?;
            let key = state_key(&desired)?;
            info!(kind = kind.name(), %key, "apply invoked");
            let (action, data) = match current_state(&ctl, &db, &key).await? {
                Some(mut data) => match ctl.update(&mut data, desired).await? {
                    UpdateOutcome::Unchanged => ("unchanged", data),
                    UpdateOutcome::Patched(s) => {
                        info!(adds = s.adds, updates = s.updates, removes = s.removes, "applied patch");
                        ("updated", data)
                    }
                },
                None => {
                    let mut data = ResourceData::new(desired);
                    // a create that timed out still left an object behind; remember it
                    if let Err(e) = ctl.create(&mut data).await {
                        if data.id.is_some() {
                            db.put_state(&record(kind.as_ref(), &key, &data)?)?;
                        }
                        return Err(e.into());
                    }
                    ("created", data)
                }
            };
            db.put_state(&record(kind.as_ref(), &key, &data)?)?;
            print_model(cli.output, action, &data)?;
        }
        Commands::Plan { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let desired = steward_schema::load_yaml(kind.schema(), &text)?;
            let key = state_key(&desired)?;
            let draft = kind.expand(&desired)?;
            match current_state(&ctl, &db, &key).await? {
                None => match cli.output {
                    Output::Human => println!("+ create {key}\n{}", serde_yaml::to_string(draft.as_json())?),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&json!({"create": draft.as_json()}))?),
                },
                Some(data) => {
                    let id = data.id.clone().ok_or_else(|| anyhow!("recorded state has no id"))?;
                    let live = ctl.store().get(&id).await?;
                    let doc = steward_apply::build_patch_against(kind.schema(), &data.model, &desired, live.as_ref())?;
                    let summary = doc.summary();
                    let drift = live.as_ref().map(|live| steward_apply::drift_summary(&draft, live));
                    match cli.output {
                        Output::Human => {
                            if doc.is_empty() {
                                println!("= {id} is up to date");
                            }
                            for op in doc.iter() {
                                let value = op.value.as_ref().map(|v| format!(" {v}")).unwrap_or_default();
                                println!("~ {} {}{}", op.op.as_str(), op.path, value);
                            }
                            println!(
                                "plan: {} to add, {} to change, {} to remove",
                                summary.adds, summary.updates, summary.removes
                            );
                            if let Some(d) = drift {
                                println!("live drift: +{} ~{} -{}", d.adds, d.updates, d.removes);
                            }
                        }
                        Output::Json => {
                            let out = json!({"id": id.to_string(), "patch": doc.to_json(), "summary": summary, "drift": drift});
                            println!("{}", serde_json::to_string_pretty(&out)?);
                        }
                    }
                }
            }
        }
        Commands::Read { id } => {
            let id = LocalId::from_str(&id)?;
            let key = id.to_string();
            let prior = db.latest(kind.name(), &key)?.map(|r| r.model).unwrap_or_default();
            let mut data = ResourceData { id: Some(id.clone()), model: prior };
            match ctl.read(&mut data).await? {
                ReadOutcome::Refreshed => {
                    db.put_state(&record(kind.as_ref(), &key, &data)?)?;
                    print_model(cli.output, "read", &data)?;
                }
                ReadOutcome::NotFound => {
                    db.remove(kind.name(), &key)?;
                    return Err(anyhow!("{} {} not found", kind.schema().kind, id));
                }
            }
        }
        Commands::Delete { id } => {
            let id = LocalId::from_str(&id)?;
            let mut data = ResourceData { id: Some(id.clone()), model: FlatModel::new() };
            let outcome = ctl.delete(&mut data).await?;
            db.remove(kind.name(), &id.to_string())?;
            let action = match outcome {
                DeleteOutcome::Deleted => "deleted",
                DeleteOutcome::NotFound => "already absent",
            };
            match cli.output {
                Output::Human => println!("{action} {id}"),
                Output::Json => println!("{}", json!({"action": action, "id": id.to_string()})),
            }
        }
        Commands::Exists { id } => {
            let id = LocalId::from_str(&id)?;
            let data = ResourceData { id: Some(id.clone()), model: FlatModel::new() };
            let exists = ctl.exists(&data).await?;
            match cli.output {
                Output::Human => println!("{exists}"),
                Output::Json => println!("{}", json!({"id": id.to_string(), "exists": exists})),
            }
        }
        Commands::Import { id } => {
            let id = LocalId::from_str(&id)?;
            let data = ctl.import(id.clone()).await?;
            db.put_state(&record(kind.as_ref(), &id.to_string(), &data)?)?;
            print_model(cli.output, "imported", &data)?;
        }
        Commands::Kinds { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn list_kinds(output: Output, served: bool) -> Result<()> {
    let kinds = steward_schema::all_kinds();
    let served_keys: Option<Vec<String>> = if served {
        let client = kube::Client::try_default().await.context("connecting to cluster")?;
        let resources = steward_kubehub::discover(client).await?;
        Some(resources.iter().map(|r| r.gvk_key()).collect())
    } else {
        None
    };
    let is_served = |k: &Arc<dyn ResourceKind>| served_keys.as_ref().map(|keys| keys.contains(&k.schema().gvk_key()));
    match output {
        Output::Human => {
            for k in &kinds {
                let scope = if k.schema().namespaced() { "namespaced" } else { "cluster" };
                let mark = match is_served(k) {
                    Some(true) => " • served",
                    Some(false) => " • not served",
                    None => "",
                };
                println!("{} • {} • {}{}", k.name(), k.schema().gvk_key(), scope, mark);
                for f in k.schema().fields().iter().filter(|f| !f.computed) {
                    println!("    {:<32} {}", f.key, f.ty.name());
                }
            }
        }
        Output::Json => {
            let rows: Vec<_> = kinds
                .iter()
                .map(|k| json!({"name": k.name(), "gvk": k.schema().gvk_key(), "schema": k.schema(), "served": is_served(k)}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
