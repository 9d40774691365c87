//! Owns participants and channels for one network (classic or hyper);
//! implements cheapest-route search and multi-hop settlement.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::channel::HyperChannel;
use crate::participant::ParticipantId;

/// Index of a channel within a [`HyperNetwork`], stable for the network's
/// lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

/// A finite ordered path of channels from payment origin to destination.
/// `hops.len() == channels.len() + 1`; `channels[i]` connects `hops[i]` and
/// `hops[i + 1]`; no channel repeats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRoute {
    pub hops: Vec<ParticipantId>,
    pub channels: Vec<ChannelId>,
}

/// Result of [`HyperNetwork::perform_payment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The payment settled; the sender paid `fee` on top of the amount
    /// (before any of the downstream channels' own fees, which are
    /// already netted into the amounts forwarded hop to hop).
    Settled { fee: i64 },
    /// No feasible route existed; network state is unchanged.
    Unroutable,
}

impl PaymentOutcome {
    pub fn fee(self) -> Option<i64> {
        match self {
            PaymentOutcome::Settled { fee } => Some(fee),
            PaymentOutcome::Unroutable => None,
        }
    }

    pub fn is_settled(self) -> bool {
        matches!(self, PaymentOutcome::Settled { .. })
    }
}

/// Human-readable, non-parseable aggregate statistics. Field names are
/// stable within this crate, but callers should not rely on them; use
/// [`std::fmt::Display`] for the canonical text form.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkStats {
    pub channel_count: usize,
    pub total_memberships: usize,
    pub diameter: f64,
    pub channels_per_member: f64,
    pub memberships_per_member: f64,
    pub on_chain_byte_total: u64,
    pub mean_wealth: f64,
    pub min_wealth: i64,
    pub mean_receipt_capacity: f64,
    pub min_receipt_capacity: i64,
    pub multi_member_proportion: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "channels: {}", self.channel_count)?;
        writeln!(f, "total memberships: {}", self.total_memberships)?;
        writeln!(f, "diameter (2-section): {}", self.diameter)?;
        writeln!(f, "channels per member: {:.4}", self.channels_per_member)?;
        writeln!(f, "memberships per member: {:.4}", self.memberships_per_member)?;
        writeln!(f, "on-chain bytes (sum): {}", self.on_chain_byte_total)?;
        writeln!(f, "wealth: mean {:.2}, min {}", self.mean_wealth, self.min_wealth)?;
        writeln!(
            f,
            "max receipt capacity: mean {:.2}, min {}",
            self.mean_receipt_capacity, self.min_receipt_capacity
        )?;
        write!(
            f,
            "proportion of channels with >2 members: {:.4}",
            self.multi_member_proportion
        )
    }
}

/// Owns a set of participants and channels; the subset of a classic/hyper
/// pair's shared participant pool that belongs to *this* network.
#[derive(Clone, Debug, Default)]
pub struct HyperNetwork {
    participants: IndexSet<ParticipantId>,
    channels: Vec<HyperChannel>,
    /// Per-participant ordered list of channels they belong to, in this
    /// network. A participant's memberships in different networks are
    /// tracked independently, here, not on the participant itself.
    member_channels: IndexMap<ParticipantId, Vec<ChannelId>>,
    fee_intake: IndexMap<ParticipantId, i64>,
}

impl HyperNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-adding an already-registered participant is a no-op.
    pub fn add_member(&mut self, p: ParticipantId) {
        if self.participants.insert(p) {
            self.member_channels.entry(p).or_default();
        }
    }

    /// Appends `channel` and returns its id. Every member of `channel`
    /// must already be registered via [`Self::add_member`]; violating
    /// that is API misuse and panics.
    pub fn add_channel(&mut self, channel: HyperChannel) -> ChannelId {
        for &m in channel.members() {
            assert!(
                self.participants.contains(&m),
                "{m:?} is a channel member but was never added to this network"
            );
        }
        let id = ChannelId(self.channels.len());
        for &m in channel.members() {
            self.member_channels.entry(m).or_default().push(id);
        }
        self.channels.push(channel);
        id
    }

    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.participants.iter().copied()
    }

    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }

    pub fn channel(&self, id: ChannelId) -> &HyperChannel {
        &self.channels[id.0]
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &HyperChannel)> {
        self.channels.iter().enumerate().map(|(i, c)| (ChannelId(i), c))
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Channels `p` belongs to in this network, in the order they were
    /// added. Panics if `p` was never registered here.
    pub fn channels_of(&self, p: ParticipantId) -> &[ChannelId] {
        self.member_channels
            .get(&p)
            .unwrap_or_else(|| panic!("{p:?} is not a member of this network"))
    }

    /// Sum of `p`'s balance across every channel it belongs to, in this
    /// network.
    pub fn wealth_of(&self, p: ParticipantId) -> i64 {
        self.channels_of(p)
            .iter()
            .map(|&id| self.channel(id).balance_of(p))
            .sum()
    }

    /// Sum, over channels `p` belongs to, of the headroom before `p`'s
    /// balance in that channel would reach the channel's full funding
    /// amount, i.e. the most `p` could receive in one shot per channel.
    pub fn receipt_capacity_of(&self, p: ParticipantId) -> i64 {
        self.channels_of(p)
            .iter()
            .map(|&id| {
                let c = self.channel(id);
                c.funding_amount() - c.balance_of(p)
            })
            .sum()
    }

    pub fn fee_intakes(&self) -> &IndexMap<ParticipantId, i64> {
        &self.fee_intake
    }

    /// Backwards modified-Dijkstra cheapest-route search from `destination`
    /// toward `origin`. Ties are broken by the monotonic sequence counter
    /// each heap entry carries; each edge's weight depends on the
    /// cumulative downstream amount and hop index at the time it is
    /// relaxed, and may reject the edge outright as infeasible.
    pub fn cheapest_route(
        &self,
        origin: ParticipantId,
        destination: ParticipantId,
        amount: i64,
    ) -> Option<PaymentRoute> {
        assert!(self.participants.contains(&origin), "{origin:?} not in network");
        assert!(self.participants.contains(&destination), "{destination:?} not in network");
        assert_ne!(origin, destination, "origin and destination must differ");

        let mut dist: IndexMap<ParticipantId, i64> = IndexMap::new();
        let mut predecessor: IndexMap<ParticipantId, ParticipantId> = IndexMap::new();
        let mut channel_stack: IndexMap<ParticipantId, Vec<ChannelId>> = IndexMap::new();
        let mut settled: IndexSet<ParticipantId> = IndexSet::new();
        let mut heap: BinaryHeap<Reverse<(i64, u64, ParticipantId)>> = BinaryHeap::new();
        let mut seq: u64 = 0;

        dist.insert(destination, 0);
        predecessor.insert(destination, destination);
        channel_stack.insert(destination, Vec::new());
        heap.push(Reverse((0, seq, destination)));
        seq += 1;

        while let Some(Reverse((d_u, _, u))) = heap.pop() {
            if settled.contains(&u) {
                continue;
            }
            // Stale heap entry: a better distance for `u` was already found.
            if dist.get(&u).copied() != Some(d_u) {
                continue;
            }
            settled.insert(u);

            if u == origin {
                break;
            }

            let stack_u = channel_stack.get(&u).cloned().unwrap_or_default();
            for &edge_id in self.channels_of(u) {
                if stack_u.contains(&edge_id) {
                    continue;
                }
                let edge = self.channel(edge_id);
                for &v in edge.members() {
                    if v == u || settled.contains(&v) {
                        continue;
                    }
                    let hop_index = stack_u.len();
                    let candidate_amount = amount + d_u;
                    let Some(fee) = edge.fee_for(v, u, candidate_amount, hop_index) else {
                        continue;
                    };
                    let d_v = d_u + fee;
                    let improves = match dist.get(&v) {
                        Some(&best) => d_v < best,
                        None => true,
                    };
                    if improves {
                        dist.insert(v, d_v);
                        predecessor.insert(v, u);
                        let mut stack_v = Vec::with_capacity(stack_u.len() + 1);
                        stack_v.push(edge_id);
                        stack_v.extend_from_slice(&stack_u);
                        channel_stack.insert(v, stack_v);
                        heap.push(Reverse((d_v, seq, v)));
                        seq += 1;
                    }
                }
            }
        }

        if !settled.contains(&origin) {
            return None;
        }

        let channels = channel_stack.get(&origin).cloned().unwrap_or_default();
        let mut hops = vec![origin];
        let mut cur = origin;
        while cur != destination {
            cur = predecessor[&cur];
            hops.push(cur);
        }

        Some(PaymentRoute { hops, channels })
    }

    /// Route and settle a payment of `amount` from `origin` to
    /// `destination`, crediting fees to [`Self::fee_intakes`] along the
    /// way. Returns [`PaymentOutcome::Unroutable`] (no mutation) if no
    /// feasible route exists.
    pub fn perform_payment(
        &mut self,
        origin: ParticipantId,
        destination: ParticipantId,
        amount: i64,
    ) -> PaymentOutcome {
        let Some(route) = self.cheapest_route(origin, destination, amount) else {
            debug!(?origin, ?destination, amount, "payment unroutable");
            return PaymentOutcome::Unroutable;
        };

        let hop_count = route.channels.len();
        // route.channels / route.hops are ordered origin -> destination, but
        // fee accounting and settlement both walk payee -> sender, and
        // `fee_for`'s hop index is 0 at the channel nearest the payee, so
        // array index `k` (0 = nearest origin) maps to
        // `hop_index = hop_count - 1 - k`.
        let mut amounts = vec![0i64; hop_count];
        let mut fees = vec![0i64; hop_count];
        let mut downstream = amount;
        for k in (0..hop_count).rev() {
            let hop_index = hop_count - 1 - k;
            let channel = self.channel(route.channels[k]);
            let fee = channel
                .fee_for(route.hops[k], route.hops[k + 1], downstream, hop_index)
                .expect("route search only admits feasible edges");
            amounts[k] = downstream;
            fees[k] = fee;
            downstream += fee;
        }

        let total_fee = fees.iter().sum();

        for k in (0..hop_count).rev() {
            let hop_index = hop_count - 1 - k;
            let settle_amount = amounts[k] - fees[k];
            let channel = &mut self.channels[route.channels[k].0];
            let ok = channel.perform_payment(
                route.hops[k],
                route.hops[k + 1],
                settle_amount,
                hop_index,
                &mut self.fee_intake,
            );
            assert!(
                ok,
                "channel became infeasible at settlement after being admitted by route search"
            );
        }

        PaymentOutcome::Settled { fee: total_fee }
    }

    /// Unweighted diameter of the 2-section (clique expansion): the
    /// largest finite eccentricity, or `f64::INFINITY` if disconnected.
    pub fn diameter(&self) -> f64 {
        if self.participants.len() <= 1 {
            return 0.0;
        }

        let mut adjacency: IndexMap<ParticipantId, IndexSet<ParticipantId>> =
            IndexMap::new();
        for p in self.participants.iter().copied() {
            adjacency.insert(p, IndexSet::new());
        }
        for (_, channel) in self.channels() {
            for (i, &a) in channel.members().iter().enumerate() {
                for &b in &channel.members()[i + 1..] {
                    adjacency.get_mut(&a).unwrap().insert(b);
                    adjacency.get_mut(&b).unwrap().insert(a);
                }
            }
        }

        let mut max_finite: f64 = 0.0;
        for source in self.participants.iter().copied() {
            let mut dist: IndexMap<ParticipantId, usize> = IndexMap::new();
            dist.insert(source, 0);
            let mut queue = VecDeque::new();
            queue.push_back(source);
            while let Some(u) = queue.pop_front() {
                let d_u = dist[&u];
                for &v in adjacency.get(&u).into_iter().flatten() {
                    if !dist.contains_key(&v) {
                        dist.insert(v, d_u + 1);
                        queue.push_back(v);
                    }
                }
            }
            if dist.len() < self.participants.len() {
                return f64::INFINITY;
            }
            if let Some(&ecc) = dist.values().max() {
                max_finite = max_finite.max(ecc as f64);
            }
        }
        max_finite
    }

    pub fn stats(&self) -> NetworkStats {
        let channel_count = self.channels.len();
        let total_memberships: usize =
            self.channels.iter().map(|c| c.num_members()).sum();
        let num_participants = self.participants.len().max(1);

        let on_chain_byte_total: u64 =
            self.channels.iter().map(|c| c.min_on_chain_bytes()).sum();

        let wealths: Vec<i64> =
            self.participants.iter().map(|&p| self.wealth_of(p)).collect();
        let receipt_caps: Vec<i64> = self
            .participants
            .iter()
            .map(|&p| self.receipt_capacity_of(p))
            .collect();

        let mean_wealth = if wealths.is_empty() {
            0.0
        } else {
            wealths.iter().sum::<i64>() as f64 / wealths.len() as f64
        };
        let min_wealth = wealths.iter().copied().min().unwrap_or(0);
        let mean_receipt_capacity = if receipt_caps.is_empty() {
            0.0
        } else {
            receipt_caps.iter().sum::<i64>() as f64 / receipt_caps.len() as f64
        };
        let min_receipt_capacity = receipt_caps.iter().copied().min().unwrap_or(0);

        let multi_member = self.channels.iter().filter(|c| c.num_members() > 2).count();
        let multi_member_proportion = if channel_count == 0 {
            0.0
        } else {
            multi_member as f64 / channel_count as f64
        };

        NetworkStats {
            channel_count,
            total_memberships,
            diameter: self.diameter(),
            channels_per_member: channel_count as f64 / num_participants as f64,
            memberships_per_member: total_memberships as f64 / num_participants as f64,
            on_chain_byte_total,
            mean_wealth,
            min_wealth,
            mean_receipt_capacity,
            min_receipt_capacity,
            multi_member_proportion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ParticipantPool;

    fn build_single_channel_network() -> (HyperNetwork, Vec<ParticipantId>, ChannelId) {
        let mut pool = ParticipantPool::new();
        let members: Vec<_> = pool.create_many(10);
        let mut net = HyperNetwork::new();
        for &m in &members {
            net.add_member(m);
        }
        let c1 = HyperChannel::new(
            vec![members[0], members[1]],
            vec![70_000_000, 30_000_000],
        )
        .unwrap();
        let id = net.add_channel(c1);
        (net, members, id)
    }

    #[test]
    fn trivial_route() {
        let (net, m, c1) = build_single_channel_network();
        let route = net.cheapest_route(m[0], m[1], 10_000_000).unwrap();
        assert_eq!(route.hops, vec![m[0], m[1]]);
        assert_eq!(route.channels, vec![c1]);
    }

    #[test]
    fn disconnected_returns_none() {
        let (net, m, _c1) = build_single_channel_network();
        assert!(net.cheapest_route(m[0], m[4], 10_000_000).is_none());
    }

    #[test]
    fn multi_hop_hyper_route() {
        let mut pool = ParticipantPool::new();
        let m: Vec<_> = pool.create_many(10);
        let mut net = HyperNetwork::new();
        for &p in &m {
            net.add_member(p);
        }

        let h2 = net.add_channel(
            HyperChannel::new(
                vec![m[9], m[1], m[0]],
                vec![70_000_000, 30_000_000, 11_000_000],
            )
            .unwrap(),
        );
        let h4 = net.add_channel(
            HyperChannel::new(
                vec![m[2], m[3], m[4]],
                vec![220_000_000, 80_000_000, 110_000_000],
            )
            .unwrap(),
        );
        let h5 = net.add_channel(
            HyperChannel::new(
                vec![m[7], m[6], m[2], m[5]],
                vec![380_000_000, 370_000_000, 130_000_000, 120_000_000],
            )
            .unwrap(),
        );
        let h3 = net.add_channel(
            HyperChannel::new(
                vec![m[1], m[3], m[4]],
                vec![90_000_000, 30_000_000, 60_000_000],
            )
            .unwrap(),
        );
        let h1 = net.add_channel(
            HyperChannel::new(vec![m[0], m[8]], vec![70_000_000, 30_000_000]).unwrap(),
        );

        let route = net.cheapest_route(m[8], m[6], 10_000_000).unwrap();
        assert_eq!(route.channels, vec![h1, h2, h3, h4, h5]);
        assert_eq!(route.hops[0], m[8]);
        assert_eq!(route.hops[1], m[0]);
        assert_eq!(route.hops[2], m[1]);
        assert!(route.hops[3] == m[3] || route.hops[3] == m[4]);
        assert_eq!(route.hops[4], m[2]);
        assert_eq!(route.hops[5], m[6]);
    }

    #[test]
    fn successful_payment_preserves_all_channel_sums() {
        let (mut net, m, _c1) = build_single_channel_network();
        let outcome = net.perform_payment(m[0], m[1], 1_000_000);
        assert!(outcome.is_settled());
        for (_, channel) in net.channels() {
            assert_eq!(
                channel.balances().values().sum::<i64>(),
                channel.funding_amount()
            );
        }
    }

    #[test]
    fn unroutable_payment_reports_sentinel_and_does_not_mutate() {
        let (mut net, m, _c1) = build_single_channel_network();
        let before: Vec<_> = net.channels().map(|(_, c)| c.balances()).collect();
        let outcome = net.perform_payment(m[0], m[4], 1_000_000);
        assert_eq!(outcome, PaymentOutcome::Unroutable);
        let after: Vec<_> = net.channels().map(|(_, c)| c.balances()).collect();
        assert_eq!(before, after);
    }
}
