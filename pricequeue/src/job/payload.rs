//! Task specific job parameters.
//!
//! Each [`JobType`] has exactly one payload schema. Raw documents coming from callers are
//! validated and normalized when the job is enqueued, so a stored [`Payload`] is always well
//! formed:
//!
//! - symbols are trimmed and upper-cased,
//! - blank symbols are dropped,
//! - duplicate symbols are dropped, keeping the first occurrence,
//! - date ranges are ordered.
//!
//! ```
//! # use pricequeue::job::{JobType, Payload};
//! let payload = Payload::parse(
//!     JobType::PortfolioLoad,
//!     serde_json::json!({ "symbols": ["msft", " aapl", "", "MSFT"] }),
//! )
//! .unwrap();
//!
//! assert_eq!(payload.symbols(), ["MSFT", "AAPL"]);
//! ```
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::JobType;

/// A malformed enqueue request. Nothing is stored when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Job type is required")]
    EmptyJobType,
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),
    #[error("Unknown job status: {0}")]
    UnknownStatus(String),
    #[error("A symbol is required")]
    MissingSymbol,
    #[error("Exactly one symbol is required, got {0}")]
    ExpectedSingleSymbol(usize),
    #[error("At least one symbol is required")]
    EmptySymbolList,
    #[error("The {0} is required")]
    MissingDate(&'static str),
    #[error("Start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("Max attempts must be at least 1")]
    InvalidMaxAttempts,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// Load the price history of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLoad {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

/// Load the price history of a list of symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioLoad {
    pub symbols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

/// Load one bounded range of prices for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// The parameters of a job, one variant per [`JobType`].
///
/// Serializes as the bare inner document; the job type is stored next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    StockLoad(StockLoad),
    PortfolioLoad(PortfolioLoad),
    DataChunk(DataChunk),
}

/// Symbols may be sent as a list or as a comma separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SymbolList {
    List(Vec<String>),
    Csv(String),
}

impl SymbolList {
    fn into_vec(self) -> Vec<String> {
        match self {
            SymbolList::List(symbols) => symbols,
            SymbolList::Csv(symbols) => symbols.split(',').map(ToOwned::to_owned).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    symbols: Option<SymbolList>,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
}

impl RawPayload {
    fn symbols(self) -> (Vec<String>, Option<NaiveDate>, Option<NaiveDate>) {
        let symbols = self
            .symbol
            .into_iter()
            .chain(self.symbols.into_iter().flat_map(SymbolList::into_vec));
        (normalize_symbols(symbols), self.start_date, self.end_date)
    }
}

/// Trims, upper-cases, drops blanks and removes duplicates keeping the first occurrence.
pub fn normalize_symbols(symbols: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for symbol in symbols {
        let symbol = symbol.as_ref().trim().to_uppercase();
        if !symbol.is_empty() && !normalized.contains(&symbol) {
            normalized.push(symbol);
        }
    }
    normalized
}

fn check_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => {
            Err(ValidationError::InvalidDateRange { start, end })
        }
        _ => Ok(()),
    }
}

fn single_symbol(mut symbols: Vec<String>) -> Result<String, ValidationError> {
    match symbols.len() {
        0 => Err(ValidationError::MissingSymbol),
        1 => Ok(symbols.remove(0)),
        n => Err(ValidationError::ExpectedSingleSymbol(n)),
    }
}

impl Payload {
    /// Validates and normalizes a raw document for the given job type.
    ///
    /// `null` is accepted as an empty document so that the resulting error names the missing
    /// field rather than the shape of the input.
    pub fn parse(job_type: JobType, raw: serde_json::Value) -> Result<Self, ValidationError> {
        let raw: RawPayload = match raw {
            serde_json::Value::Null => RawPayload::default(),
            raw => serde_json::from_value(raw)
                .map_err(|err| ValidationError::MalformedPayload(err.to_string()))?,
        };
        let (symbols, start_date, end_date) = raw.symbols();
        check_range(start_date, end_date)?;

        match job_type {
            JobType::StockLoad => Ok(Payload::StockLoad(StockLoad {
                symbol: single_symbol(symbols)?,
                start_date,
                end_date,
            })),
            JobType::PortfolioLoad => {
                if symbols.is_empty() {
                    return Err(ValidationError::EmptySymbolList);
                }
                Ok(Payload::PortfolioLoad(PortfolioLoad {
                    symbols,
                    start_date,
                    end_date,
                }))
            }
            JobType::DataChunk => Ok(Payload::DataChunk(DataChunk {
                symbol: single_symbol(symbols)?,
                start_date: start_date.ok_or(ValidationError::MissingDate("start_date"))?,
                end_date: end_date.ok_or(ValidationError::MissingDate("end_date"))?,
            })),
        }
    }

    /// Re-validates a typed payload, normalizing it in the same way [`Payload::parse`] does.
    pub fn validated(self) -> Result<Self, ValidationError> {
        let job_type = self.job_type();
        let raw = self
            .to_value()
            .map_err(|err| ValidationError::MalformedPayload(err.to_string()))?;
        Self::parse(job_type, raw)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Payload::StockLoad(_) => JobType::StockLoad,
            Payload::PortfolioLoad(_) => JobType::PortfolioLoad,
            Payload::DataChunk(_) => JobType::DataChunk,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn symbols(&self) -> Vec<&str> {
        match self {
            Payload::StockLoad(StockLoad { symbol, .. })
            | Payload::DataChunk(DataChunk { symbol, .. }) => vec![symbol.as_str()],
            Payload::PortfolioLoad(PortfolioLoad { symbols, .. }) => {
                symbols.iter().map(String::as_str).collect()
            }
        }
    }
}

impl From<StockLoad> for Payload {
    fn from(value: StockLoad) -> Self {
        Payload::StockLoad(value)
    }
}

impl From<PortfolioLoad> for Payload {
    fn from(value: PortfolioLoad) -> Self {
        Payload::PortfolioLoad(value)
    }
}

impl From<DataChunk> for Payload {
    fn from(value: DataChunk) -> Self {
        Payload::DataChunk(value)
    }
}

impl StockLoad {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            start_date: None,
            end_date: None,
        }
    }

    pub fn between(self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..self
        }
    }
}

impl PortfolioLoad {
    pub fn new(symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            start_date: None,
            end_date: None,
        }
    }
}
