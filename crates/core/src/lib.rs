pub mod acquisition;
pub mod activity;
pub mod arbiter;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod deadline;
pub mod feed;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod testing;

pub use acquisition::{
    AcquisitionAction, AcquisitionWorker, ActionError, ActionOutcome, AttemptLimits,
    AttemptReport, SimulatedAcquisition, SimulatedTeardown, SimulationConfig, TeardownAction,
    TeardownError, TeardownTimeoutPolicy, WorkerContext,
};
pub use activity::{
    create_activity_system, ActivityError, ActivityEvent, ActivityFilter, ActivityHandle,
    ActivityRecord, ActivityStore, ActivityWriter, MemoryActivityStore,
};
pub use arbiter::{ArbiterError, ResourceArbiter, ResourceHolder, ResourceStatus, ResourceToken};
pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    OpenAuthenticator, UNAUTHENTICATED_OPERATOR,
};
pub use broadcast::{
    CycleSnapshot, CycleTimer, DrainReport, EventBroadcaster, SnapshotReplica,
    SnapshotSubscription, StateTransition, TransitionKind,
};
pub use config::{
    config_hash, load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod,
    Config, ConfigError, FeedConfig, FeedSource, LogFormat, LoggingConfig, SanitizedConfig,
    ServerConfig, StorageBackend, StorageConfig, CONFIG_PATH_ENV,
};
pub use deadline::DeadlineSignal;
pub use feed::{
    AvailabilityFeed, AvailabilityMap, FeedError, FileAvailabilityFeed, StaticAvailabilityFeed,
};
pub use orchestrator::{
    CycleOrchestrator, CycleReport, CycleSettings, ItemEntry, OrchestratorConfig,
    OrchestratorDeps, OrchestratorError, OrchestratorStatus, TimerState,
};
pub use registry::{
    ActiveWorkerRegistry, RegistryError, WorkerInfo, WorkerPhase, WorkerRegistration,
};
pub use state::{
    FailureReason, FinalOutcome, ItemState, ItemStatus, JsonFilePersistence, MemoryPersistence,
    SqlitePersistence, StateError, StatePersistence, StateStore, Transition,
};
