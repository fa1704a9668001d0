//! Raw order-book snapshot rows.

/// Number of book levels carried by every snapshot (0 = best).
pub const BOOK_LEVELS: usize = 10;

/// One price level of a snapshot, both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BookLevel {
    pub bid_price: f64,
    pub bid_qty: f64,
    pub offer_price: f64,
    pub offer_qty: f64,
}

impl BookLevel {
    pub fn new(bid_price: f64, bid_qty: f64, offer_price: f64, offer_qty: f64) -> Self {
        Self {
            bid_price,
            bid_qty,
            offer_price,
            offer_qty,
        }
    }
}

/// One observation of a security's book at an instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    /// Milliseconds since the Unix epoch, exchange-local wall clock.
    pub timestamp_ms: i64,
    pub security_id: String,
    pub levels: [BookLevel; BOOK_LEVELS],
}

impl SnapshotRow {
    pub fn new(
        timestamp_ms: i64,
        security_id: impl Into<String>,
        levels: [BookLevel; BOOK_LEVELS],
    ) -> Self {
        Self {
            timestamp_ms,
            security_id: security_id.into(),
            levels,
        }
    }

    pub fn offer_qty_total(&self) -> f64 {
        self.levels.iter().map(|l| l.offer_qty).sum()
    }

    pub fn bid_qty_total(&self) -> f64 {
        self.levels.iter().map(|l| l.bid_qty).sum()
    }
}

/// An immutable, materialized set of snapshot rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotTable {
    rows: Vec<SnapshotRow>,
}

impl SnapshotTable {
    pub fn new(rows: Vec<SnapshotRow>) -> Self {
        Self { rows }
    }

    /// Build a table ordered by (security, timestamp). The sort is stable, so
    /// rows sharing a timestamp keep their source order.
    pub fn sorted(mut rows: Vec<SnapshotRow>) -> Self {
        rows.sort_by(|a, b| {
            a.security_id
                .cmp(&b.security_id)
                .then(a.timestamp_ms.cmp(&b.timestamp_ms))
        });
        Self { rows }
    }

    pub fn rows(&self) -> &[SnapshotRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: i64, sec: &str) -> SnapshotRow {
        SnapshotRow::new(ts, sec, [BookLevel::new(1.0, 2.0, 3.0, 4.0); BOOK_LEVELS])
    }

    #[test]
    fn sorted_orders_by_security_then_time() {
        let table = SnapshotTable::sorted(vec![row(3, "B"), row(2, "A"), row(1, "B")]);
        let keys: Vec<(&str, i64)> = table
            .rows()
            .iter()
            .map(|r| (r.security_id.as_str(), r.timestamp_ms))
            .collect();
        assert_eq!(keys, vec![("A", 2), ("B", 1), ("B", 3)]);
    }

    #[test]
    fn side_totals_cover_all_levels() {
        let r = row(0, "A");
        assert_eq!(r.bid_qty_total(), 20.0);
        assert_eq!(r.offer_qty_total(), 40.0);
    }
}
