// Summary Pipeline - account → load → summarize → persist → notify
//
// Loader and aggregator failures end the run. Persistence and notification
// failures are logged and recorded in the RunReport; the run keeps going.

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::db::{SqliteSink, TransactionSink};
use crate::entities::Account;
use crate::error::Result;
use crate::notify::{Notifier, SendGridNotifier};
use crate::source::{load, SourceDescriptor};
use crate::summary::{summarize_in_year, SummaryRecord};

pub const PROCESSED_MESSAGE: &str = "Processed information";

/// Status payload returned to whatever triggered the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    pub message: String,
}

impl InvocationResponse {
    pub fn processed() -> Self {
        Self {
            message: PROCESSED_MESSAGE.to_string(),
        }
    }
}

/// Everything one run did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: SummaryRecord,
    pub rows: usize,
    pub account: Option<Account>,
    /// Rows written, None when persistence failed or was unavailable
    pub persisted: Option<usize>,
    pub notified: bool,
}

/// Run the pipeline against explicit collaborators.
///
/// `sink` and `notifier` are optional so a run can still summarize (and still
/// notify) when the store or the mail client could not be set up.
pub fn run_pipeline(
    config: &Config,
    source: &SourceDescriptor,
    mut sink: Option<&mut dyn TransactionSink>,
    notifier: Option<&dyn Notifier>,
) -> Result<RunReport> {
    info!("Getting the account...");
    let account = match sink.as_deref_mut() {
        Some(sink) => recover(
            sink.get_or_create_account(&config.mail.to_email, &config.account),
            "getting the account",
        )?,
        None => None,
    };

    let table = load(source)?;

    let display_name = account
        .as_ref()
        .map(Account::display_name)
        .unwrap_or_else(|| config.account.display_name());
    let summary = summarize_in_year(&table, &display_name, config.summary_year)?;

    let persisted = match (sink, account.as_ref()) {
        (Some(sink), Some(account)) => {
            recover(sink.persist(account.id, &table), "saving the transactions")?
        }
        _ => {
            warn!("Transactions not saved: no account available");
            None
        }
    };

    let notified = match notifier {
        Some(notifier) => recover(
            notifier.notify(&summary, &config.mail.to_email),
            "sending the summary information",
        )?
        .is_some(),
        None => {
            warn!("Summary not sent: no notifier available");
            false
        }
    };

    Ok(RunReport {
        summary,
        rows: table.len(),
        account,
        persisted,
        notified,
    })
}

/// Log and swallow persistence and notification failures; anything else ends the run.
fn recover<T>(result: Result<T>, action: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            error!("An error occurred while {}: {}", action, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Invocation entrypoint with the serverless trigger shape.
///
/// The event and context are accepted but not interpreted. The payload is the
/// same whether or not persistence and notification succeeded.
pub fn lambda_handler(
    config: &Config,
    event: Option<&serde_json::Value>,
    context: Option<&serde_json::Value>,
) -> Result<InvocationResponse> {
    debug!("Invoked with event={:?} context={:?}", event, context);

    let mut sink = match SqliteSink::open(&config.database) {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!("An error occurred while opening the database: {}", e);
            None
        }
    };

    let notifier = match SendGridNotifier::new(&config.mail) {
        Ok(notifier) => Some(notifier),
        Err(e) => {
            error!("An error occurred while creating the mail client: {}", e);
            None
        }
    };

    let report = run_pipeline(
        config,
        &config.source.descriptor(),
        sink.as_mut().map(|s| s as &mut dyn TransactionSink),
        notifier.as_ref().map(|n| n as &dyn Notifier),
    )?;

    info!(
        "Run {} finished: {} rows, persisted={:?}, notified={}",
        sink.as_ref().map_or("-", SqliteSink::run_id),
        report.rows,
        report.persisted,
        report.notified
    );

    Ok(InvocationResponse::processed())
}

/// Load and summarize only; nothing is stored or sent.
pub fn summarize_source(config: &Config) -> Result<SummaryRecord> {
    let table = load(&config.source.descriptor())?;
    summarize_in_year(&table, &config.account.display_name(), config.summary_year)
}
