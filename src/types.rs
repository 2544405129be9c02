/// State of a single trading pair at the target height.
///
/// `id` is the pair's chain address and the primary key of the destination
/// table. It is stored exactly as the upstream reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingPairSnapshot {
    pub id: String,
    pub token0_symbol: String,
    pub token1_symbol: String,
    pub reserve0: f64,
    pub reserve1: f64,
    pub reserve_usd: f64,
    pub volume_token0: f64,
    pub volume_token1: f64,
    pub volume_usd: f64,
    pub tx_count: u64,
    pub created_at_timestamp: u64,
}

#[cfg(test)]
impl TradingPairSnapshot {
    /// Zeroed numeric fields.
    pub(crate) fn bare(
        id: impl Into<String>,
        token0_symbol: impl Into<String>,
        token1_symbol: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            token0_symbol: token0_symbol.into(),
            token1_symbol: token1_symbol.into(),
            reserve0: 0.0,
            reserve1: 0.0,
            reserve_usd: 0.0,
            volume_token0: 0.0,
            volume_token1: 0.0,
            volume_usd: 0.0,
            tx_count: 0,
            created_at_timestamp: 0,
        }
    }
}
