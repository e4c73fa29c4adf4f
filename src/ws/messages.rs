//! Upstream wire-frame parsing: demuxes raw JSON text frames into typed
//! `UpstreamEvent`s at the parser boundary (spec.md §9 "Dynamic payloads from
//! the wire"). Parse failures are demoted to `MalformedEvent` and counted —
//! no state mutation, no error propagated upward.
//!
//! Grounded on `ws/messages.rs`'s `parse_ws_frame`/`ParsedFrame` shape and
//! its static `PARSE_FAILURES` counter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::types::{CreationPayload, RawTrade, TradeSide, UpstreamEvent};

/// Total frames that failed to parse into a known event shape, process-wide.
pub static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "txType")]
    tx_type: Option<String>,
    mint: Option<String>,
    name: Option<String>,
    symbol: Option<String>,
    #[serde(rename = "marketCapSol")]
    market_cap_sol: Option<f64>,
    #[serde(rename = "vTokensInBondingCurve")]
    v_tokens_in_bonding_curve: Option<f64>,
    #[serde(rename = "vSolInBondingCurve")]
    v_sol_in_bonding_curve: Option<f64>,
    #[serde(rename = "bondingCurveKey")]
    bonding_curve_key: Option<String>,
    #[serde(rename = "traderPublicKey")]
    trader_public_key: Option<String>,
    #[serde(rename = "solAmount")]
    sol_amount: Option<f64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Parses one upstream text frame. Returns `None` on any malformed shape —
/// missing `txType`, missing required numeric fields, or invalid JSON — and
/// increments `PARSE_FAILURES`. Never panics on untrusted input.
pub fn parse_frame(text: &str) -> Option<UpstreamEvent> {
    let raw: RawFrame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => {
            PARSE_FAILURES.fetch_add(1, Ordering::Relaxed);
            return None;
        }
    };

    let result = match raw.tx_type.as_deref() {
        Some("create") => {
            let mint = raw.mint?;
            let name = raw.name.unwrap_or_default();
            let symbol = raw.symbol.unwrap_or_default();
            Some(UpstreamEvent::Create(CreationPayload {
                mint,
                name,
                symbol,
                market_cap_sol: raw.market_cap_sol,
                v_tokens_in_bonding_curve: raw.v_tokens_in_bonding_curve,
                v_sol_in_bonding_curve: raw.v_sol_in_bonding_curve,
                bonding_curve_key: raw.bonding_curve_key,
                trader_public_key: raw.trader_public_key,
                extra: raw.extra,
            }))
        }
        Some("buy") | Some("sell") => {
            let side = if raw.tx_type.as_deref() == Some("buy") {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            };
            Some(UpstreamEvent::Trade(RawTrade {
                mint: raw.mint?,
                side,
                sol_amount: raw.sol_amount?,
                v_sol_in_bonding_curve: raw.v_sol_in_bonding_curve?,
                v_tokens_in_bonding_curve: raw.v_tokens_in_bonding_curve?,
                trader_public_key: raw.trader_public_key?,
            }))
        }
        _ => None,
    };

    if result.is_none() {
        PARSE_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_frame() {
        let text = r#"{"txType":"create","mint":"M1","name":"Moon","symbol":"MOON","vSolInBondingCurve":30.0,"vTokensInBondingCurve":1000000.0,"traderPublicKey":"creator1"}"#;
        match parse_frame(text) {
            Some(UpstreamEvent::Create(c)) => {
                assert_eq!(c.mint, "M1");
                assert_eq!(c.name, "Moon");
            }
            _ => panic!("expected Create"),
        }
    }

    #[test]
    fn parses_buy_frame() {
        let text = r#"{"txType":"buy","mint":"M1","solAmount":0.25,"vSolInBondingCurve":30.0,"vTokensInBondingCurve":1000000.0,"traderPublicKey":"wallet1"}"#;
        match parse_frame(text) {
            Some(UpstreamEvent::Trade(t)) => {
                assert_eq!(t.side, TradeSide::Buy);
                assert!((t.sol_amount - 0.25).abs() < 1e-9);
            }
            _ => panic!("expected Trade"),
        }
    }

    #[test]
    fn parses_sell_frame() {
        let text = r#"{"txType":"sell","mint":"M1","solAmount":0.4,"vSolInBondingCurve":29.0,"vTokensInBondingCurve":1010000.0,"traderPublicKey":"wallet2"}"#;
        match parse_frame(text) {
            Some(UpstreamEvent::Trade(t)) => assert_eq!(t.side, TradeSide::Sell),
            _ => panic!("expected Trade"),
        }
    }

    #[test]
    fn missing_numeric_field_is_malformed() {
        let before = PARSE_FAILURES.load(Ordering::Relaxed);
        let text = r#"{"txType":"buy","mint":"M1","traderPublicKey":"wallet1"}"#;
        assert!(parse_frame(text).is_none());
        assert_eq!(PARSE_FAILURES.load(Ordering::Relaxed), before + 1);
    }

    #[test]
    fn invalid_json_is_malformed() {
        let before = PARSE_FAILURES.load(Ordering::Relaxed);
        assert!(parse_frame("not json").is_none());
        assert_eq!(PARSE_FAILURES.load(Ordering::Relaxed), before + 1);
    }

    #[test]
    fn unknown_tx_type_is_malformed() {
        assert!(parse_frame(r#"{"txType":"unknown"}"#).is_none());
    }
}
