//! Multi-party payment channels: balances, fee model, feasibility, and
//! atomic settlement.

use indexmap::IndexMap;

use crate::error::ConfigError;
use crate::participant::ParticipantId;

/// Flat intake each member earns per transaction crossing the channel.
pub const PER_TX_PER_MEMBER: i64 = 40;
/// Bonus added to the fee paid by the payment's true origin.
pub const SENDER_BONUS: i64 = 10_000;
/// Per-member component of the funds-time-value term.
pub const AVAILABILITY_PER_MEMBER: i64 = 10;
/// Divisor for the balance-derived time-value term.
pub const INV_INTEREST_PER_TX_TIME_UNIT: i64 = 12_000_000;
/// Weight applied to the change in balance standard deviation.
pub const DEVIATION_PENALTY: f64 = 1e-5;

/// A k-member (k >= 2) payment channel with a shared funding pool and
/// per-member balances. `members` and `funding_amount` are fixed at
/// construction; only `balances` changes, via [`HyperChannel::perform_payment`].
#[derive(Clone, Debug)]
pub struct HyperChannel {
    members: Vec<ParticipantId>,
    balances: IndexMap<ParticipantId, i64>,
    funding_amount: i64,
}

/// The fee decomposition for one proposed payment at one channel: per-member
/// balance deltas (sum to zero), the quoted sender fee, and the resulting
/// balance vector if applied. Returned by [`HyperChannel::quote`]; `None`
/// from that method means the payment is infeasible at this channel.
#[derive(Clone, Debug)]
pub struct FeeQuote {
    pub fee: i64,
    pub deltas: IndexMap<ParticipantId, i64>,
    pub post_balances: IndexMap<ParticipantId, i64>,
}

impl HyperChannel {
    /// Construct a channel from a member list and matching deposit vector.
    /// Fails if member/deposit lengths differ, fewer than 2 members are
    /// given, members are not distinct, or any deposit is negative.
    pub fn new(
        members: Vec<ParticipantId>,
        deposits: Vec<i64>,
    ) -> Result<Self, ConfigError> {
        if members.len() != deposits.len() {
            return Err(ConfigError::MismatchedMembers {
                members: members.len(),
                deposits: deposits.len(),
            });
        }
        if members.len() < 2 {
            return Err(ConfigError::TooFewMembers(members.len()));
        }
        let mut seen = IndexMap::with_capacity(members.len());
        for &m in &members {
            if seen.insert(m, ()).is_some() {
                return Err(ConfigError::DuplicateMember);
            }
        }
        if let Some(&d) = deposits.iter().find(|&&d| d < 0) {
            return Err(ConfigError::NegativeDeposit(d));
        }

        let funding_amount = deposits.iter().sum();
        let mut balances = IndexMap::with_capacity(members.len());
        for (&m, &d) in members.iter().zip(deposits.iter()) {
            balances.insert(m, d);
        }

        Ok(Self { members, balances, funding_amount })
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    pub fn funding_amount(&self) -> i64 {
        self.funding_amount
    }

    pub fn is_member(&self, p: ParticipantId) -> bool {
        self.balances.contains_key(&p)
    }

    /// Panics if `p` is not a member; accessing a non-member is API misuse.
    pub fn balance_of(&self, p: ParticipantId) -> i64 {
        *self
            .balances
            .get(&p)
            .unwrap_or_else(|| panic!("{p:?} is not a member of this channel"))
    }

    /// Snapshot copy of the current balances, in member insertion order.
    pub fn balances(&self) -> IndexMap<ParticipantId, i64> {
        self.balances.clone()
    }

    /// Bytes an on-chain unilateral close of this channel would occupy.
    /// Reporting-only; does not affect simulation semantics.
    pub fn min_on_chain_bytes(&self) -> u64 {
        10 + 180 + self.members.len() as u64 * (73 + 34)
    }

    fn population_stddev<I: Iterator<Item = i64>>(values: I) -> f64 {
        let values: Vec<f64> = values.map(|v| v as f64).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }

    /// Compute the fee decomposition for a proposed payment at hop index
    /// `n` (0 = last channel before the payee), without mutating state.
    /// Returns `None` if the payment would leave a member's balance
    /// negative.
    pub fn quote(
        &self,
        origin: ParticipantId,
        destination: ParticipantId,
        amount: i64,
        hop_index: usize,
    ) -> Option<FeeQuote> {
        assert!(self.is_member(origin), "{origin:?} is not a member");
        assert!(self.is_member(destination), "{destination:?} is not a member");
        assert_ne!(origin, destination, "origin and destination must differ");
        assert!(amount >= 0, "payment amount must be non-negative");

        let sigma_before =
            Self::population_stddev(self.balances.values().copied());

        let mut after = self.balances.clone();
        *after.get_mut(&origin).unwrap() -= amount;
        *after.get_mut(&destination).unwrap() += amount;
        let sigma_after = Self::population_stddev(after.values().copied());

        let imbalance =
            ((sigma_after - sigma_before) * DEVIATION_PENALTY).round() as i64;

        let n = self.members.len() as i64;
        let time_factor = 1 + 2 * hop_index as i64;
        let mut deltas: IndexMap<ParticipantId, i64> =
            IndexMap::with_capacity(self.members.len());
        for &m in &self.members {
            let balance = self.balances[&m];
            let time_value = time_factor
                * (balance / INV_INTEREST_PER_TX_TIME_UNIT
                    + AVAILABILITY_PER_MEMBER);
            let delta = PER_TX_PER_MEMBER + time_value + imbalance / n;
            deltas.insert(m, delta);
        }
        let s: i64 = deltas.values().sum();
        let origin_provisional = deltas[&origin];
        deltas.insert(origin, origin_provisional - s);

        let fee = std::cmp::max(0, -deltas[&origin] + SENDER_BONUS);

        let mut post_balances = self.balances.clone();
        for &m in &self.members {
            *post_balances.get_mut(&m).unwrap() += deltas[&m];
        }
        *post_balances.get_mut(&origin).unwrap() -= amount;
        *post_balances.get_mut(&destination).unwrap() += amount;

        if post_balances.values().any(|&b| b < 0) {
            return None;
        }

        Some(FeeQuote { fee, deltas, post_balances })
    }

    /// The fee the origin would pay to cross this channel, or `None` if
    /// infeasible. A thin wrapper over [`Self::quote`] for callers (route
    /// search) that don't need the full balance delta.
    pub fn fee_for(
        &self,
        origin: ParticipantId,
        destination: ParticipantId,
        amount: i64,
        hop_index: usize,
    ) -> Option<i64> {
        self.quote(origin, destination, amount, hop_index).map(|q| q.fee)
    }

    /// Apply a payment: replace `balances` with the post-fee-and-transfer
    /// vector and credit `fee_ledger` with each member's delta (plus the
    /// sender bonus for `origin`). Returns `false`, leaving state
    /// unchanged, if the channel is infeasible for this payment.
    pub fn perform_payment(
        &mut self,
        origin: ParticipantId,
        destination: ParticipantId,
        amount: i64,
        hop_index: usize,
        fee_ledger: &mut IndexMap<ParticipantId, i64>,
    ) -> bool {
        match self.quote(origin, destination, amount, hop_index) {
            None => false,
            Some(quote) => {
                self.balances = quote.post_balances;
                for (&m, &delta) in quote.deltas.iter() {
                    *fee_ledger.entry(m).or_insert(0) += delta;
                }
                *fee_ledger.entry(origin).or_insert(0) += SENDER_BONUS;

                debug_assert_eq!(
                    self.balances.values().sum::<i64>(),
                    self.funding_amount,
                    "channel balance sum drifted from funding amount"
                );
                debug_assert!(
                    self.balances.values().all(|&b| b >= 0),
                    "channel balance went negative"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ParticipantPool;

    fn two_party(funding_a: i64, funding_b: i64) -> (ParticipantId, ParticipantId, HyperChannel) {
        let mut pool = ParticipantPool::new();
        let a = pool.create();
        let b = pool.create();
        let channel = HyperChannel::new(vec![a, b], vec![funding_a, funding_b]).unwrap();
        (a, b, channel)
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut pool = ParticipantPool::new();
        let a = pool.create();
        let err = HyperChannel::new(vec![a], vec![1, 2]).unwrap_err();
        assert_eq!(err, ConfigError::MismatchedMembers { members: 1, deposits: 2 });
    }

    #[test]
    fn rejects_too_few_members() {
        let mut pool = ParticipantPool::new();
        let a = pool.create();
        let err = HyperChannel::new(vec![a], vec![5]).unwrap_err();
        assert_eq!(err, ConfigError::TooFewMembers(1));
    }

    #[test]
    fn rejects_negative_deposit() {
        let mut pool = ParticipantPool::new();
        let a = pool.create();
        let b = pool.create();
        let err = HyperChannel::new(vec![a, b], vec![-1, 5]).unwrap_err();
        assert_eq!(err, ConfigError::NegativeDeposit(-1));
    }

    #[test]
    fn rejects_duplicate_members() {
        let mut pool = ParticipantPool::new();
        let a = pool.create();
        let err = HyperChannel::new(vec![a, a], vec![5, 5]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateMember);
    }

    #[test]
    fn conservation_of_funds_across_payments() {
        let (a, b, mut channel) = two_party(70_000_000, 30_000_000);
        let mut ledger = IndexMap::new();
        for _ in 0..20 {
            let ok = channel.perform_payment(a, b, 1_000_000, 0, &mut ledger);
            assert!(ok);
            assert_eq!(
                channel.balances().values().sum::<i64>(),
                channel.funding_amount()
            );
        }
    }

    #[test]
    fn infeasible_payment_leaves_state_unchanged() {
        let (a, b, mut channel) = two_party(100, 30_000_000);
        let before = channel.balances();
        let mut ledger = IndexMap::new();
        let ok = channel.perform_payment(a, b, 1_000_000_000, 0, &mut ledger);
        assert!(!ok);
        assert_eq!(channel.balances(), before);
        assert!(ledger.is_empty());
    }

    #[test]
    fn fee_is_never_negative() {
        let (a, b, channel) = two_party(70_000_000, 30_000_000);
        let quote = channel.quote(a, b, 1_000_000, 0).unwrap();
        assert!(quote.fee >= 0);
    }

    #[test]
    #[should_panic]
    fn same_origin_and_destination_panics() {
        let (a, _b, channel) = two_party(70_000_000, 30_000_000);
        let _ = channel.quote(a, a, 1, 0);
    }

    #[test]
    fn min_on_chain_bytes_matches_formula() {
        let (_, _, channel) = two_party(1, 1);
        assert_eq!(channel.min_on_chain_bytes(), 10 + 180 + 2 * (73 + 34));
    }
}
