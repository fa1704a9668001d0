//! Fixed-width time buckets and within-bucket log returns.
//!
//! Buckets are anchored to the Unix epoch: a row at `t` belongs to the bucket
//! starting at `t - t mod width`. For widths that divide a day this is the same
//! as midnight-aligned buckets, so 10-minute buckets start on wall-clock
//! boundaries such as 09:30:00 and 09:40:00.

use crate::derive::DerivedRow;
use crate::snapshot::BOOK_LEVELS;

/// Start of the bucket containing `timestamp_ms`. Intervals are right-open.
#[inline]
pub fn bucket_start(timestamp_ms: i64, width_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(width_ms)
}

/// `ln(current) - ln(previous)`, or NaN when the result is not finite.
#[inline]
pub fn log_return(previous: f64, current: f64) -> f64 {
    let value = current.ln() - previous.ln();
    if value.is_finite() {
        value
    } else {
        f64::NAN
    }
}

/// Assign `time_group` to every row and fill the log-return columns.
///
/// Rows must belong to a single security and be ordered by timestamp. Each
/// return is taken against the preceding row of the same bucket; the first
/// row of a bucket keeps NaN returns.
pub fn bucketize(rows: &mut [DerivedRow], width_ms: i64) {
    for idx in 0..rows.len() {
        let group = bucket_start(rows[idx].timestamp_ms, width_ms);
        let (before, after) = rows.split_at_mut(idx);
        let current = &mut after[0];
        current.time_group = group;

        match before.last().filter(|previous| previous.time_group == group) {
            Some(previous) => {
                for i in 0..BOOK_LEVELS {
                    current.log_return[i] = log_return(previous.wap[i], current.wap[i]);
                    current.log_return_offer[i] =
                        log_return(previous.offer_price[i], current.offer_price[i]);
                    current.log_return_bid[i] =
                        log_return(previous.bid_price[i], current.bid_price[i]);
                }
            }
            None => {
                current.log_return = [f64::NAN; BOOK_LEVELS];
                current.log_return_offer = [f64::NAN; BOOK_LEVELS];
                current.log_return_bid = [f64::NAN; BOOK_LEVELS];
            }
        }
    }
}
