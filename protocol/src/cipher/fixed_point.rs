//! Fixed-point arithmetic on `u128` without a 256-bit intermediate.
//!
//! `a * b / d` is computed as `(a / d) * b + (a % d) * b / d`. The first
//! term is exact, and since `a % d < d` the second product stays small for
//! every divisor the engine uses (`PRICE_SCALE`, `BPS_DENOMINATOR`). Any
//! step that would overflow returns `None` instead of wrapping.

use crate::cipher::RatioGate;
use crate::config::{AMOUNT_SCALE, BPS_DENOMINATOR, PRICE_SCALE};

/// `⌊a·b/d⌋`, or `None` on overflow or `d == 0`.
pub fn mul_div_floor(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    let q = a / d;
    let r = a % d;
    let high = q.checked_mul(b)?;
    let low = r.checked_mul(b)? / d;
    high.checked_add(low)
}

/// `⌈a·b/d⌉`, or `None` on overflow or `d == 0`.
pub fn mul_div_ceil(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    let q = a / d;
    let r = a % d;
    let high = q.checked_mul(b)?;
    let rb = r.checked_mul(b)?;
    let low = rb / d + u128::from(rb % d != 0);
    high.checked_add(low)
}

/// Stablecoin value of `amount` collateral at `price`.
pub fn collateral_value(amount: u128, price: u128) -> Option<u128> {
    mul_div_floor(amount, price, PRICE_SCALE)
}

/// Evaluate `value · 10⁴ ⋈ debt · ratio_bps` exactly.
///
/// `AtLeast` holds iff `value ≥ ⌈debt·r/10⁴⌉`; `Above` holds iff
/// `value > ⌊debt·r/10⁴⌋`, and always when `debt == 0`. When the right-hand
/// side overflows `u128` no value can reach it, so the gate fails.
pub fn ratio_holds(value: u128, debt: u128, ratio_bps: u32, gate: RatioGate) -> bool {
    let ratio = u128::from(ratio_bps);
    match gate {
        RatioGate::AtLeast => match mul_div_ceil(debt, ratio, BPS_DENOMINATOR) {
            Some(required) => value >= required,
            None => false,
        },
        RatioGate::Above => {
            if debt == 0 {
                return true;
            }
            match mul_div_floor(debt, ratio, BPS_DENOMINATOR) {
                Some(floor) => value > floor,
                None => false,
            }
        }
    }
}

/// `whole` units scaled to 18 decimals.
pub fn units(whole: u128) -> Option<u128> {
    whole.checked_mul(AMOUNT_SCALE)
}

/// `whole` stablecoin-per-unit as an 8-decimal price.
pub fn price_units(whole: u128) -> Option<u128> {
    whole.checked_mul(PRICE_SCALE)
}

/// Render an 18-decimal amount as a decimal string, trailing zeros trimmed.
pub fn format_amount(amount: u128) -> String {
    let whole = amount / AMOUNT_SCALE;
    let frac = amount % AMOUNT_SCALE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:018}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Parse a decimal string like `"1.5"` into an 18-decimal amount.
pub fn parse_amount(text: &str) -> Option<u128> {
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 18 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<18}").parse().ok()?
    };
    units(whole)?.checked_add(frac_value)
}
