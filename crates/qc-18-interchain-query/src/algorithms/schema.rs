//! # Response Schemas
//!
//! Shape checks for responses of well-known query paths. Paths without a
//! registered schema are treated as opaque bytes.

use serde::{Deserialize, Serialize};

use crate::domain::InterchainQueryError;

/// Bank: all balances of an address.
pub const ALL_BALANCES_PATH: &str = "/cosmos.bank.v1beta1.Query/AllBalances";

/// Bank: balance of one denom.
pub const BALANCE_PATH: &str = "/cosmos.bank.v1beta1.Query/Balance";

/// A single coin amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination.
    pub denom: String,
    /// Decimal amount.
    pub amount: String,
}

/// Pagination returned by list queries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse {
    /// Key of the next page, if any.
    #[serde(default)]
    pub next_key: Option<String>,
    /// Total count, decimal.
    #[serde(default)]
    pub total: String,
}

/// Response of `AllBalances`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllBalancesResponse {
    /// Balances of the address.
    pub balances: Vec<Coin>,
    /// Pagination.
    pub pagination: PageResponse,
}

/// Response of `Balance`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Balance for the requested denom.
    pub balance: Coin,
}

/// Decoded response of a known path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedResponse {
    /// `AllBalances`.
    AllBalances(AllBalancesResponse),
    /// `Balance`.
    Balance(BalanceResponse),
    /// No schema registered.
    Opaque,
}

fn mismatch(path: &str, reason: impl ToString) -> InterchainQueryError {
    InterchainQueryError::SchemaMismatch {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn check_amount(path: &str, coin: &Coin) -> Result<(), InterchainQueryError> {
    if coin.denom.is_empty() {
        return Err(mismatch(path, "empty denom"));
    }
    if coin.amount.is_empty() || !coin.amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(mismatch(
            path,
            format!("non-decimal amount {:?} for {}", coin.amount, coin.denom),
        ));
    }
    Ok(())
}

/// Decode and shape-check a response for its query path.
pub fn decode_response(path: &str, data: &[u8]) -> Result<DecodedResponse, InterchainQueryError> {
    match path {
        ALL_BALANCES_PATH => {
            let response: AllBalancesResponse =
                serde_json::from_slice(data).map_err(|e| mismatch(path, e))?;
            for coin in &response.balances {
                check_amount(path, coin)?;
            }
            Ok(DecodedResponse::AllBalances(response))
        }
        BALANCE_PATH => {
            let response: BalanceResponse =
                serde_json::from_slice(data).map_err(|e| mismatch(path, e))?;
            check_amount(path, &response.balance)?;
            Ok(DecodedResponse::Balance(response))
        }
        _ => Ok(DecodedResponse::Opaque),
    }
}
