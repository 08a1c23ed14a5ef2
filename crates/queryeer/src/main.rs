mod output;
mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use queryeer_core::{
    AppConfigStore, CacheEvent, Catalog, ConnectionProfile, ConnectionRegistry, DbDriver, DbKind,
    ProfileStore, QueryExecutor, QuerySession, Workbench, master_password_store,
};
use queryeer_driver_sqlite::SqliteDriver;
use tokio::sync::broadcast::error::RecvError;

use crate::output::ConsoleWriter;
use crate::prompt::{TerminalPrompt, read_secret};

const MASTER_PASSWORD_ENV: &str = "QUERYEER_MASTER_PASSWORD";

const USAGE: &str = "\
Usage: queryeer <command> [args]

Commands:
  list                                      List connection profiles
  add <name> <kind> <endpoint> [--user U] [--database D]
                                            Add a connection profile
  remove <name>                             Remove a connection profile
  set-password <name>                       Encrypt and store a profile password
  init-crypto                               Store a master password in the keyring
  catalog <name> [--database D] [--reload]  Print the objects of a database
  run <name> [--database D] (--file PATH | QUERY)
                                            Execute a query script

Kinds: sqlite, postgres, mysql, sqlserver, elasticsearch";

enum Command {
    List,
    Add {
        name: String,
        kind: DbKind,
        endpoint: String,
        user: Option<String>,
        database: Option<String>,
    },
    Remove {
        name: String,
    },
    SetPassword {
        name: String,
    },
    InitCrypto,
    Catalog {
        name: String,
        database: Option<String>,
        reload: bool,
    },
    Run {
        name: String,
        database: Option<String>,
        query: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let command = parse_args();

    let config_store = AppConfigStore::new()
        .unwrap_or_else(|e| fatal(&format!("Cannot locate config directory: {e}")));
    let mut config = config_store
        .load()
        .unwrap_or_else(|e| fatal(&format!("Failed to load config: {e}")));
    let (salt, changed) = config
        .ensure_crypto_salt()
        .unwrap_or_else(|e| fatal(&e.to_string()));
    if changed && let Err(e) = config_store.save(&config) {
        log::warn!("Failed to save config: {}", e);
    }

    let profile_store = ProfileStore::new()
        .unwrap_or_else(|e| fatal(&format!("Cannot locate profile directory: {e}")));
    let registry = ConnectionRegistry::load(profile_store);

    let mut drivers: HashMap<DbKind, Arc<dyn DbDriver>> = HashMap::new();
    drivers.insert(DbKind::Sqlite, Arc::new(SqliteDriver::new()));

    let bench = Workbench::new(config, registry, drivers, Arc::new(TerminalPrompt))
        .unwrap_or_else(|e| fatal(&format!("Failed to start: {e}")));

    let needs_master = matches!(command, Command::SetPassword { .. });
    unlock(&bench, &salt, needs_master);

    match command {
        Command::List => list(&bench),
        Command::Add {
            name,
            kind,
            endpoint,
            user,
            database,
        } => {
            let mut profile = ConnectionProfile::new(name, kind, endpoint);
            if let Some(user) = user {
                profile = profile.with_basic_auth(user);
            }
            if let Some(database) = database {
                profile = profile.with_default_database(database);
            }

            let name = profile.name.clone();
            bench
                .registry_mut()
                .add(profile)
                .unwrap_or_else(|e| fatal(&e.to_string()));
            println!("Added '{}'", name);
        }
        Command::Remove { name } => {
            let mut registry = bench.registry_mut();
            let id = registry
                .find_by_name(&name)
                .map(|p| p.id)
                .unwrap_or_else(|| fatal(&format!("No connection named '{name}'")));
            registry
                .remove(id)
                .unwrap_or_else(|e| fatal(&e.to_string()));
            println!("Removed '{}'", name);
        }
        Command::SetPassword { name } => {
            let password = read_secret("Password", true)
                .unwrap_or_else(|| fatal("No password entered"));
            bench
                .set_password(&name, &password)
                .unwrap_or_else(|e| fatal(&e.to_string()));
            println!("Password stored for '{}'", name);
        }
        Command::Catalog {
            name,
            database,
            reload,
        } => {
            let session = open(&bench, &name, database.as_deref());
            let database = session
                .database()
                .unwrap_or_else(|| fatal("Connection has no current database"));
            let catalog = load_catalog(&bench, &session, &database, reload);
            print_catalog(&catalog);
        }
        Command::Run {
            name,
            database,
            query,
        } => {
            let session = open(&bench, &name, database.as_deref());
            let mut writer = ConsoleWriter::default();
            match QueryExecutor::execute_with_reauth(&session, &query, &mut writer) {
                Ok(summary) => {
                    eprintln!(
                        "{} batch(es), {} row(s), {} error(s) in {:?}",
                        summary.batches, summary.rows, summary.errors, summary.elapsed
                    );
                    if summary.errors > 0 {
                        bench.shutdown();
                        std::process::exit(2);
                    }
                }
                Err(e) => fatal(&e.to_string()),
            }
        }
        Command::InitCrypto => init_crypto(),
    }

    bench.shutdown();
}

fn unlock(bench: &Workbench, salt: &[u8], required: bool) {
    if let Ok(master) = std::env::var(MASTER_PASSWORD_ENV) {
        bench
            .unlock(&master, salt)
            .unwrap_or_else(|e| fatal(&e.to_string()));
        return;
    }

    let store = master_password_store();
    match bench.unlock_from_store(store.as_ref(), salt) {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => log::warn!("Could not read master password from keyring: {}", e),
    }

    if required {
        let master = read_secret("Master password", false)
            .unwrap_or_else(|| fatal("Master password is required"));
        bench
            .unlock(&master, salt)
            .unwrap_or_else(|e| fatal(&e.to_string()));
    }
}

fn init_crypto() {
    let store = master_password_store();
    if !store.is_persistent() {
        fatal(&format!(
            "No keyring available; export {MASTER_PASSWORD_ENV} instead"
        ));
    }

    let master = read_secret("New master password", true)
        .unwrap_or_else(|| fatal("No password entered"));
    store
        .remember(&master)
        .unwrap_or_else(|e| fatal(&e.to_string()));

    println!("Master password stored");
    println!("Passwords saved under a previous master password must be set again");
}

fn list(bench: &Workbench) {
    let registry = bench.registry();
    if registry.profiles().is_empty() {
        println!("No connections");
        return;
    }

    for profile in registry.profiles() {
        println!("{}", profile_line(profile));
    }
}

fn profile_line(profile: &ConnectionProfile) -> String {
    let mut flags = Vec::new();
    if !profile.enabled {
        flags.push("disabled");
    }
    if profile.has_stored_password() {
        flags.push("password");
    }

    format!(
        "{}\t{}\t{}\t{}",
        profile.name,
        profile.kind.display_name(),
        profile.endpoint,
        flags.join(",")
    )
}

fn open(bench: &Workbench, name: &str, database: Option<&str>) -> Arc<QuerySession> {
    let session = bench
        .open_session(name)
        .unwrap_or_else(|e| fatal(&e.to_string()));

    if !bench.resolver().prepare(&session.profile(), false) {
        fatal("No credentials provided");
    }

    if let Err(e) = session.get_connection() {
        fatal(&format!("Failed to connect: {e}"));
    }

    if let Some(database) = database
        && let Err(e) = session.set_database(database)
    {
        fatal(&format!("Failed to switch to '{database}': {e}"));
    }

    session
}

fn load_catalog(
    bench: &Workbench,
    session: &Arc<QuerySession>,
    database: &str,
    reload: bool,
) -> Arc<Catalog> {
    let key = session.catalog_key(database);
    let mut events = bench.cache().subscribe();

    if reload {
        bench.reload_catalog(session, database);
    } else if let Some(catalog) = bench.catalog(session, database) {
        return catalog;
    }

    loop {
        match events.blocking_recv() {
            Ok(CacheEvent::Loaded(loaded)) if loaded == key => {
                if let Some(catalog) = bench.cache().peek(&key) {
                    return catalog;
                }
            }
            Ok(CacheEvent::Failed { key: failed, message }) if failed == key => {
                fatal(&format!("Crawl of {key} failed: {message}"));
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => fatal("Catalog cache closed"),
        }
    }
}

fn print_catalog(catalog: &Catalog) {
    println!("Database {} ({} objects)", catalog.database, catalog.object_count());
    for schema in &catalog.schemas {
        for object in &schema.objects {
            println!("{}.{}\t{:?}", schema.name, object.name, object.kind);
            for column in &object.columns {
                let mut extra = String::new();
                if column.is_primary_key {
                    extra.push_str(" PK");
                }
                if !column.nullable {
                    extra.push_str(" NOT NULL");
                }
                println!("  {}\t{}{}", column.name, column.type_name, extra);
            }
        }
    }
}

fn parse_args() -> Command {
    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        fatal(USAGE);
    };

    let mut positional = Vec::new();
    let mut user = None;
    let mut database = None;
    let mut file = None;
    let mut reload = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--user" => {
                user = Some(args.next().unwrap_or_else(|| fatal("--user requires a value")));
            }
            "--database" => {
                database = Some(
                    args.next()
                        .unwrap_or_else(|| fatal("--database requires a value")),
                );
            }
            "--file" => {
                file = Some(args.next().unwrap_or_else(|| fatal("--file requires a path")));
            }
            "--reload" => {
                reload = true;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                fatal(&format!("Unknown argument: {other}"));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();

    match command.as_str() {
        "list" => Command::List,
        "init-crypto" => Command::InitCrypto,
        "add" => {
            let name = positional_or_fatal(&mut positional, "connection name");
            let kind = parse_kind(&positional_or_fatal(&mut positional, "kind"));
            let endpoint = positional_or_fatal(&mut positional, "endpoint");
            Command::Add {
                name,
                kind,
                endpoint,
                user,
                database,
            }
        }
        "remove" => Command::Remove {
            name: positional_or_fatal(&mut positional, "connection name"),
        },
        "set-password" => Command::SetPassword {
            name: positional_or_fatal(&mut positional, "connection name"),
        },
        "catalog" => Command::Catalog {
            name: positional_or_fatal(&mut positional, "connection name"),
            database,
            reload,
        },
        "run" => {
            let name = positional_or_fatal(&mut positional, "connection name");
            let query = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .unwrap_or_else(|e| fatal(&format!("Cannot read {path}: {e}"))),
                None => positional_or_fatal(&mut positional, "query"),
            };
            Command::Run {
                name,
                database,
                query,
            }
        }
        "-h" | "--help" => {
            println!("{USAGE}");
            std::process::exit(0);
        }
        other => fatal(&format!("Unknown command: {other}\n\n{USAGE}")),
    }
}

fn positional_or_fatal(positional: &mut impl Iterator<Item = String>, what: &str) -> String {
    positional
        .next()
        .unwrap_or_else(|| fatal(&format!("Missing {what}")))
}

fn parse_kind(value: &str) -> DbKind {
    DbKind::ALL
        .iter()
        .copied()
        .find(|kind| kind.file_stem().eq_ignore_ascii_case(value))
        .unwrap_or_else(|| fatal(&format!("Unknown kind: {value}")))
}

fn fatal(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
