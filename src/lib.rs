// Summary Information - Core Library
// Exposes all modules for use in the CLI, the HTTP trigger, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod summary;

// Re-export commonly used types
pub use config::{AccountProfile, Config, DatabaseConfig, MailConfig, SourceConfig};
pub use db::{
    Event, InsertOutcome, SqliteSink, TransactionSink,
    setup_database, get_or_create_account, insert_transactions,
    count_transactions, insert_event, get_events_for_entity,
};
pub use entities::Account;
pub use error::{Error, Result};
pub use notify::{Notifier, SendGridNotifier};
pub use parser::{TransactionRow, TransactionTable, parse_csv};
pub use pipeline::{InvocationResponse, RunReport, lambda_handler, run_pipeline, summarize_source};
pub use source::{S3Location, SourceDescriptor, load};
pub use summary::{MonthCounts, SummaryRecord, summarize, summarize_in_year};
