use axum::extract::FromRef;

use crate::activity::ActivityEngine;
use crate::background_jobs::SchedulerHandle;
use crate::crm_store::CrmStore;
use crate::csv_import::CsvImporter;
use crate::sync_conflicts::ConflictResolver;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCrmStore = Arc<dyn CrmStore>;
pub type GuardedActivityEngine = Arc<ActivityEngine>;
pub type GuardedCsvImporter = Arc<CsvImporter>;
pub type GuardedConflictResolver = Arc<ConflictResolver>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub crm_store: GuardedCrmStore,
    pub activity: GuardedActivityEngine,
    pub csv_importer: GuardedCsvImporter,
    pub conflict_resolver: GuardedConflictResolver,
    pub scheduler_handle: OptionalSchedulerHandle,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedCrmStore {
    fn from_ref(input: &ServerState) -> Self {
        input.crm_store.clone()
    }
}

impl FromRef<ServerState> for GuardedActivityEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.activity.clone()
    }
}

impl FromRef<ServerState> for GuardedCsvImporter {
    fn from_ref(input: &ServerState) -> Self {
        input.csv_importer.clone()
    }
}

impl FromRef<ServerState> for GuardedConflictResolver {
    fn from_ref(input: &ServerState) -> Self {
        input.conflict_resolver.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
