//! Row-level derived columns.
//!
//! Pure per-row arithmetic over a snapshot: weighted mid-prices per level,
//! spreads, and volume scalars. Division by zero is not an error; it yields
//! NaN, which the rest of the pipeline treats as a missing value.

use crate::snapshot::{SnapshotRow, SnapshotTable, BOOK_LEVELS};

/// A snapshot extended with its derived columns.
///
/// The log-return columns and `time_group` are filled by the bucketizer; until
/// then they hold NaN and 0 respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    pub timestamp_ms: i64,
    pub security_id: String,
    pub bid_price: [f64; BOOK_LEVELS],
    pub offer_price: [f64; BOOK_LEVELS],
    pub wap: [f64; BOOK_LEVELS],
    pub wap_balance: f64,
    pub price_spread: f64,
    pub bid_spread: f64,
    pub offer_spread: f64,
    pub total_volume: f64,
    pub volume_imbalance: f64,
    pub time_group: i64,
    pub log_return: [f64; BOOK_LEVELS],
    pub log_return_offer: [f64; BOOK_LEVELS],
    pub log_return_bid: [f64; BOOK_LEVELS],
}

/// Weighted mid-price, each side weighted by the opposing quantity.
#[inline]
pub fn wap(bid_price: f64, offer_price: f64, bid_qty: f64, offer_qty: f64) -> f64 {
    (bid_price * offer_qty + offer_price * bid_qty) / (bid_qty + offer_qty)
}

pub fn derive_row(row: &SnapshotRow) -> DerivedRow {
    let mut bid_price = [0.0; BOOK_LEVELS];
    let mut offer_price = [0.0; BOOK_LEVELS];
    let mut waps = [0.0; BOOK_LEVELS];
    for (i, level) in row.levels.iter().enumerate() {
        bid_price[i] = level.bid_price;
        offer_price[i] = level.offer_price;
        waps[i] = wap(level.bid_price, level.offer_price, level.bid_qty, level.offer_qty);
    }

    let best = &row.levels[0];
    let next = &row.levels[1];
    let mid = (best.offer_price + best.bid_price) / 2.0;
    let offer_total = row.offer_qty_total();
    let bid_total = row.bid_qty_total();

    DerivedRow {
        timestamp_ms: row.timestamp_ms,
        security_id: row.security_id.clone(),
        bid_price,
        offer_price,
        wap: waps,
        wap_balance: (waps[0] - waps[1]).abs(),
        price_spread: (best.offer_price - best.bid_price) / mid,
        bid_spread: best.bid_price - next.bid_price,
        offer_spread: best.offer_price - next.offer_price,
        total_volume: offer_total + bid_total,
        volume_imbalance: (offer_total - bid_total).abs(),
        time_group: 0,
        log_return: [f64::NAN; BOOK_LEVELS],
        log_return_offer: [f64::NAN; BOOK_LEVELS],
        log_return_bid: [f64::NAN; BOOK_LEVELS],
    }
}

/// Derive every row of the table, preserving order.
pub fn derive_table(table: &SnapshotTable) -> Vec<DerivedRow> {
    table.rows().iter().map(derive_row).collect()
}
