use crate::domain::gateway::GatewayTransactionStatus;
use crate::error::{BillingError, Result};
use serde::Deserialize;
use std::io::Read;

/// One purchase to replay: who buys which plan, with an optional discount code, and
/// optionally how the gateway settles it.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CheckoutRecord {
    pub user: u64,
    pub plan: u64,
    #[serde(default)]
    pub discount: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub fraud: Option<String>,
}

impl CheckoutRecord {
    /// The settlement to simulate, if the record asks for one.
    pub fn settlement(&self) -> Result<Option<GatewayTransactionStatus>> {
        self.status.as_deref().map(str::parse).transpose()
    }
}

/// Reads checkout records from a CSV source.
///
/// Whitespace is trimmed and trailing optional columns may be omitted.
pub struct CheckoutReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CheckoutReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes records, one `Result` per row.
    pub fn records(self) -> impl Iterator<Item = Result<CheckoutRecord>> {
        self.reader.into_deserialize().map(|result| {
            result.map_err(|e| BillingError::InvalidArgument(format!("malformed record: {e}")))
        })
    }
}
