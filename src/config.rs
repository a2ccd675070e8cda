use std::{
    env::{self, VarError},
    time::Duration,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, instrument, warn};

use crate::{
    url_repo::{self, url_repository_capsule},
    visit_worker::{VisitSender, run_visit_worker},
};

/// Connects to the configured storage, starts the visit worker and
/// returns the ready-to-use [`Container`] along with the worker's handle.
///
/// The worker stops once the [`Container`] and everything read from it
/// (which holds the [`VisitSender`]) have been dropped.
///
/// # Errors
/// Will return [`Err`] if the connection to the database or the schema setup fails.
///
/// # Panics
/// Panics when a configuration environment variable is missing or invalid.
#[instrument]
pub async fn init_container() -> anyhow::Result<(Container, JoinHandle<()>)> {
    info!("Initializing container");
    let container = Container::new();

    let storage_backend = container.read(storage_backend_capsule);
    info!(?storage_backend, "Selected storage backend");
    if storage_backend == StorageBackend::Postgres {
        let (db_connection_options, set_db_conn) =
            container.read((db_connection_options_capsule, db_conn_init_action));

        info!("Connecting to database");
        let db = Database::connect(db_connection_options).await?;
        url_repo::create_schema(&db).await?;
        set_db_conn(db);
    }

    let (visit_queue_capacity, set_visit_sender) =
        container.read((visit_queue_capacity_capsule, visit_sender_init_action));
    let (visit_sender, visit_receiver) = mpsc::channel(visit_queue_capacity);
    set_visit_sender(visit_sender);
    let visit_worker = tokio::spawn(run_visit_worker(
        visit_receiver,
        container.read(url_repository_capsule),
    ));

    info!("Container initialized");
    Ok((container, visit_worker))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// # Panics
/// Panics when environment variable is invalid.
#[must_use]
pub fn storage_backend_capsule(_: CapsuleHandle) -> StorageBackend {
    const ENV_VAR_NAME: &str = "STORAGE";

    match optional_env_var(ENV_VAR_NAME) {
        Some(name) => StorageBackend::parse(&name).unwrap_or_else(|| {
            panic!("{ENV_VAR_NAME} must be one of `postgres` or `memory`, got {name:?}")
        }),
        None => StorageBackend::Postgres,
    }
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const ENV_VAR_NAME: &str = "DB_URL";
    optional_env_var(ENV_VAR_NAME)
        .unwrap_or_else(|| panic!("{ENV_VAR_NAME} is not set"))
        .into()
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

fn visit_sender_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (
    Option<VisitSender>,
    impl use<> + CData + Fn(Option<VisitSender>),
) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn visit_sender_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(VisitSender) {
    let set_visit_sender = get.as_ref(visit_sender_manager).1.clone();
    move |sender| set_visit_sender(Some(sender))
}

/// # Panics
/// Panics when the [`VisitSender`] was not set via [`visit_sender_init_action`].
pub fn visit_sender_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> VisitSender {
    let visit_sender = get.as_ref(visit_sender_manager).0.clone();
    visit_sender.expect("VisitSender should've been set via visit_sender_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn visit_queue_capacity_capsule(_: CapsuleHandle) -> usize {
    const ENV_VAR_NAME: &str = "VISIT_QUEUE_CAPACITY";
    const DEFAULT_CAPACITY: usize = 1024;

    optional_env_var(ENV_VAR_NAME).map_or(DEFAULT_CAPACITY, |capacity| {
        match capacity.trim().parse::<usize>() {
            Ok(capacity) if capacity > 0 => capacity,
            _ => panic!("{ENV_VAR_NAME} must be a positive integer, got {capacity:?}"),
        }
    })
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    if let Some(addr) = optional_env_var(ENV_VAR_NAME) {
        info!(addr, "{ENV_VAR_NAME} environment variable set");
        addr
    } else {
        warn!(
            addr = DEFAULT_ADDR,
            "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
        );
        DEFAULT_ADDR.to_string()
    }
}

/// How long shutdown waits for queued visits to be applied.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn shutdown_grace_capsule(_: CapsuleHandle) -> Duration {
    const ENV_VAR_NAME: &str = "SHUTDOWN_GRACE_SECS";
    const DEFAULT_GRACE_SECS: u64 = 10;

    let secs = optional_env_var(ENV_VAR_NAME).map_or(DEFAULT_GRACE_SECS, |secs| {
        secs.trim().parse().unwrap_or_else(|_| {
            panic!("{ENV_VAR_NAME} must be a whole number of seconds, got {secs:?}")
        })
    });
    Duration::from_secs(secs)
}

/// Public base URL that aliases are appended to, without a trailing `/`.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn base_url_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "BASE_URL";
    const DEFAULT_BASE_URL: &str = "http://localhost";

    let base_url = optional_env_var(ENV_VAR_NAME).unwrap_or_else(|| {
        warn!(
            base_url = DEFAULT_BASE_URL,
            "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_BASE_URL}"
        );
        DEFAULT_BASE_URL.to_owned()
    });
    normalize_base_url(&base_url)
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_owned()
}

/// # Panics
/// Panics when environment variable is not valid unicode.
fn optional_env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!(
            StorageBackend::parse("postgres"),
            Some(StorageBackend::Postgres)
        );
        assert_eq!(
            StorageBackend::parse(" PostgreSQL "),
            Some(StorageBackend::Postgres)
        );
        assert_eq!(StorageBackend::parse("Memory"), Some(StorageBackend::Memory));
        assert_eq!(StorageBackend::parse("mongo"), None);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://sho.rt/"),
            "https://sho.rt".to_owned()
        );
        assert_eq!(
            normalize_base_url(" https://sho.rt//"),
            "https://sho.rt".to_owned()
        );
        assert_eq!(
            normalize_base_url("http://localhost:3000"),
            "http://localhost:3000".to_owned()
        );
    }
}
