pub mod connection;
pub mod events;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use events::TracingEventSink;
pub use fixtures::{DemoSeedDataset, ExpenseSeedInfo, SeedResult, VerificationResult};
pub use service::{
    ActionReport, ApprovalService, ExpenseWorkflow, ServiceError, ServiceRepositories,
    SubmissionReport,
};
