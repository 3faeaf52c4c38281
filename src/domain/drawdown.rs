//! Drawdown evaluation shared by the bot and the server policy engine

use rust_decimal::Decimal;

/// Reason code carried by records when a drawdown block is in force
pub const DD_REASON_CODE: &str = "DD_LIMIT";

/// Drawdown from peak in percent, never negative. Unrounded.
pub fn drawdown_pct(balance: Decimal, peak: Decimal) -> Decimal {
    if peak <= Decimal::ZERO || balance >= peak {
        return Decimal::ZERO;
    }
    (peak - balance) / peak * Decimal::ONE_HUNDRED
}

/// Returns a block reason when drawdown has reached `limit_pct`
pub fn evaluate(balance: Decimal, peak: Decimal, limit_pct: Option<Decimal>) -> Option<String> {
    let limit = limit_pct?;
    let dd = drawdown_pct(balance, peak);
    // Compare at full precision; rounding is for the message only
    if dd >= limit {
        Some(format!(
            "{}: drawdown {}% >= {}%",
            DD_REASON_CODE,
            dd.round_dp(2),
            limit
        ))
    } else {
        None
    }
}
