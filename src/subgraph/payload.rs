//! GraphQL request/response envelopes and the strict conversion from raw
//! subgraph records into [`TradingPairSnapshot`].

use crate::error::IngestError;
use crate::types::TradingPairSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const PAIR_COUNT_QUERY: &str = r#"
query PairCountAtBlock($blockNumber: Int!) {
  uniswapFactories(block: { number: $blockNumber }) {
    pairCount
  }
}
"#;

pub(crate) const PAIRS_PAGE_QUERY: &str = r#"
query PairsPage($block: Int!, $first: Int!, $lastId: String!) {
  pairs(
    block: { number: $block }
    first: $first
    where: { id_gt: $lastId }
    orderBy: id
    orderDirection: asc
  ) {
    id
    token0 { symbol }
    token1 { symbol }
    reserve0
    reserve1
    reserveUSD
    volumeToken0
    volumeToken1
    volumeUSD
    txCount
    createdAtTimestamp
  }
}
"#;

#[derive(Debug, Serialize)]
pub(crate) struct GraphQlRequest {
    pub query: &'static str,
    pub variables: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PairCountData {
    pub uniswap_factories: Vec<FactoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FactoryEntry {
    pub pair_count: Scalar,
}

/// Records stay as raw JSON here so a single malformed entry is reported
/// against its own id instead of failing the whole envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct PairsData {
    pub pairs: Vec<Value>,
}

/// BigInt/BigDecimal values come back as JSON strings; plain `Int` fields
/// come back as numbers. Accept both and parse later.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Scalar::Text(text) => text.trim().to_owned(),
            Scalar::Number(number) => number.to_string(),
        }
    }

    pub(crate) fn to_u64(&self) -> Option<u64> {
        self.as_text().parse::<u64>().ok()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawToken {
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPair {
    pub id: String,
    pub token0: RawToken,
    pub token1: RawToken,
    pub reserve0: Scalar,
    pub reserve1: Scalar,
    #[serde(rename = "reserveUSD")]
    pub reserve_usd: Scalar,
    pub volume_token0: Scalar,
    pub volume_token1: Scalar,
    #[serde(rename = "volumeUSD")]
    pub volume_usd: Scalar,
    pub tx_count: Scalar,
    pub created_at_timestamp: Scalar,
}

impl RawPair {
    /// Strictly decodes one record of a pairs page. Missing, null or
    /// wrong-typed fields are rejected like unparseable values.
    pub(crate) fn decode(value: Value) -> Result<TradingPairSnapshot, IngestError> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_owned();
        let raw: RawPair =
            serde_json::from_value(value).map_err(|err| invalid(&id, "record", err.to_string()))?;
        raw.into_snapshot()
    }

    pub(crate) fn into_snapshot(self) -> Result<TradingPairSnapshot, IngestError> {
        let id = self.id;
        let reserve0 = decimal(&id, "reserve0", &self.reserve0)?;
        let reserve1 = decimal(&id, "reserve1", &self.reserve1)?;
        let reserve_usd = decimal(&id, "reserveUSD", &self.reserve_usd)?;
        let volume_token0 = decimal(&id, "volumeToken0", &self.volume_token0)?;
        let volume_token1 = decimal(&id, "volumeToken1", &self.volume_token1)?;
        let volume_usd = decimal(&id, "volumeUSD", &self.volume_usd)?;
        let tx_count = integer(&id, "txCount", &self.tx_count)?;
        let created_at_timestamp = integer(&id, "createdAtTimestamp", &self.created_at_timestamp)?;

        Ok(TradingPairSnapshot {
            id,
            token0_symbol: self.token0.symbol,
            token1_symbol: self.token1.symbol,
            reserve0,
            reserve1,
            reserve_usd,
            volume_token0,
            volume_token1,
            volume_usd,
            tx_count,
            created_at_timestamp,
        })
    }
}

fn decimal(id: &str, field: &'static str, value: &Scalar) -> Result<f64, IngestError> {
    let text = value.as_text();
    match text.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(invalid(id, field, text)),
    }
}

/// Integers must also fit SQLite's signed 64-bit storage class.
fn integer(id: &str, field: &'static str, value: &Scalar) -> Result<u64, IngestError> {
    let text = value.as_text();
    match text.parse::<u64>() {
        Ok(parsed) if i64::try_from(parsed).is_ok() => Ok(parsed),
        _ => Err(invalid(id, field, text)),
    }
}

fn invalid(id: &str, field: &'static str, value: String) -> IngestError {
    IngestError::InvalidRecord {
        id: id.to_owned(),
        field,
        value,
    }
}
