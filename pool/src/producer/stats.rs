use crate::workers::Worker;

/// One-step simple moving average: `prev` stands in for the previous
/// `window - 1` samples.
pub fn sma(sample: f64, prev: f64, window: u32) -> f64 {
    let n = f64::from(window.max(1));
    (prev * (n - 1.0) + sample) / n
}

/// Share counts per payout address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareSnapshot {
    /// Unique, in first-seen order.
    pub addresses: Vec<String>,
    pub shares: Vec<u64>,
    pub total_shares: u64,
}

impl ShareSnapshot {
    pub fn from_workers(workers: &[Worker]) -> Self {
        let mut snap = Self::default();
        for worker in workers {
            snap.total_shares += worker.shares;
            match snap.addresses.iter().position(|a| *a == worker.address) {
                Some(i) => snap.shares[i] += worker.shares,
                None => {
                    snap.addresses.push(worker.address.clone());
                    snap.shares.push(worker.shares);
                }
            }
        }
        snap
    }

    /// Portion of `pool_hashrate` attributed to `shares`; zero for an empty round.
    pub fn hashrate_of(&self, shares: u64, pool_hashrate: f64) -> f64 {
        if self.total_shares == 0 {
            return 0.0;
        }
        pool_hashrate * (shares as f64 / self.total_shares as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, address: &str, shares: u64) -> Worker {
        Worker {
            id: id.into(),
            address: address.into(),
            name: format!("x_{id}"),
            ip: "ip".into(),
            shares,
            hashrate: 0.0,
            tick: 0,
        }
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(20.0, 0.0, 20), 1.0);
        assert_eq!(sma(10.0, 10.0, 20), 10.0);
        assert_eq!(sma(7.0, 3.0, 1), 7.0);
    }

    #[test]
    fn test_snapshot_merges_addresses_in_order() {
        let ws = vec![
            worker("1", "b", 5),
            worker("2", "a", 3),
            worker("3", "b", 2),
        ];
        let snap = ShareSnapshot::from_workers(&ws);
        assert_eq!(snap.addresses, vec!["b", "a"]);
        assert_eq!(snap.shares, vec![7, 3]);
        assert_eq!(snap.total_shares, 10);
        assert_eq!(snap.hashrate_of(5, 100.0), 50.0);
    }

    #[test]
    fn test_empty_round_has_no_hashrate() {
        let snap = ShareSnapshot::from_workers(&[worker("1", "a", 0)]);
        assert_eq!(snap.total_shares, 0);
        assert_eq!(snap.hashrate_of(0, 100.0), 0.0);
    }
}
