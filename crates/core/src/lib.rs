pub mod auth;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod sync;
pub mod testing;
pub mod torrent_client;

pub use auth::{
    create_authenticator, AuthError, AuthRequest, Authenticator, Caller, OpenAuthenticator,
    SharedSecretAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use error::TrackerError;
pub use job::{
    AcquisitionJob, CreateJobRequest, JobError, JobFilter, JobLocks, JobStatus, JobStore,
    SqliteJobStore, Transition,
};
pub use notify::{
    create_notifier, DispatchOutcome, NotificationDispatcher, NotificationOutbox, Notifier,
    NotifyError, SqliteOutbox,
};
pub use orchestrator::{
    AcquisitionMonitor, JobService, NotificationSweep, PeriodicTask, RetentionSweep, Scheduler,
    TaskSchedule, TickOutcome,
};
pub use sync::{
    CompletionOutcome, CompletionReport, PendingItem, PendingWork, ReportLog, SqliteReportLog,
    SyncBridge,
};
pub use torrent_client::{
    create_remote_client, CallPolicy, RemoteClient, RemoteClientError, RemoteSession,
    TorrentSource,
};
