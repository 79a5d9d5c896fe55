//! Binance response types

use serde::Deserialize;

/// `GET /api/v3/exchangeInfo` (only the fields used here)
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeInfo {
    pub symbols: Vec<ExchangeSymbol>,
}

/// One listed symbol
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeSymbol {
    pub symbol: String,
    /// `TRADING`, `BREAK`, `HALT`, ...
    pub status: String,
}

impl ExchangeSymbol {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

impl ExchangeInfo {
    /// Symbols open for trading, sorted
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .symbols
            .iter()
            .filter(|s| s.is_trading())
            .map(|s| s.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }
}

/// Error body returned with non-success statuses
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

impl BinanceApiError {
    /// `-1121 Invalid symbol.`
    pub const INVALID_SYMBOL: i64 = -1121;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exchange_info() {
        let json = r#"{
            "timezone": "UTC",
            "serverTime": 1565246363776,
            "symbols": [
                {"symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH"},
                {"symbol": "BNBBTC", "status": "BREAK", "baseAsset": "BNB"},
                {"symbol": "ADABTC", "status": "TRADING", "baseAsset": "ADA"}
            ]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.symbols.len(), 3);
        assert_eq!(info.tradable_symbols(), vec!["ADABTC", "ETHBTC"]);
    }

    #[test]
    fn test_parse_api_error() {
        let err: BinanceApiError =
            serde_json::from_str(r#"{"code":-1121,"msg":"Invalid symbol."}"#).unwrap();
        assert_eq!(err.code, BinanceApiError::INVALID_SYMBOL);
        assert_eq!(err.msg, "Invalid symbol.");
    }
}
