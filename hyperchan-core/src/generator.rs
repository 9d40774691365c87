//! Seed-driven synthesis of a classic (two-party) network and its
//! equivalent-wealth hyper (multi-party) derivative.

use std::collections::VecDeque;

use hyperchan_rng::Rng;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::channel::HyperChannel;
use crate::error::ConfigError;
use crate::network::{ChannelId, HyperNetwork};
use crate::participant::{ParticipantId, ParticipantPool};

/// Parameters for [`NetworkPairBuilder`].
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkPairParams {
    pub funding_contribution_min: i64,
    pub funding_contribution_max: i64,
    pub num_members: usize,
    pub num_classic_channels: usize,
    pub max_hyper_channel_size: usize,
    pub hpc_avoidance_min_connectivity: usize,
    pub hpc_parsimony: bool,
}

impl Default for NetworkPairParams {
    fn default() -> Self {
        let num_members = 1000;
        Self {
            funding_contribution_min: 10_000_000,
            funding_contribution_max: 10_000_000_000,
            num_members,
            num_classic_channels: (1.2 * num_members as f64).floor() as usize,
            max_hyper_channel_size: 30,
            hpc_avoidance_min_connectivity: 5,
            hpc_parsimony: false,
        }
    }
}

/// Consuming builder for a [`NetworkPair`]. Each setter takes and returns
/// `self`, so once [`Self::generate`] consumes the builder, mutating
/// options further is not merely a runtime error, it's impossible; the
/// builder no longer exists.
#[derive(Clone, Debug)]
pub struct NetworkPairBuilder {
    params: NetworkPairParams,
    seed: u64,
}

impl NetworkPairBuilder {
    pub fn new(seed: u64) -> Self {
        Self { params: NetworkPairParams::default(), seed }
    }

    pub fn funding_contribution_min(mut self, v: i64) -> Self {
        self.params.funding_contribution_min = v;
        self
    }

    pub fn funding_contribution_max(mut self, v: i64) -> Self {
        self.params.funding_contribution_max = v;
        self
    }

    pub fn num_members(mut self, v: usize) -> Self {
        self.params.num_members = v;
        self
    }

    pub fn num_classic_channels(mut self, v: usize) -> Self {
        self.params.num_classic_channels = v;
        self
    }

    pub fn max_hyper_channel_size(mut self, v: usize) -> Self {
        self.params.max_hyper_channel_size = v;
        self
    }

    pub fn hpc_avoidance_min_connectivity(mut self, v: usize) -> Self {
        self.params.hpc_avoidance_min_connectivity = v;
        self
    }

    pub fn hpc_parsimony(mut self, v: bool) -> Self {
        self.params.hpc_parsimony = v;
        self
    }

    /// Lock in the configuration, producing an uninitialized pair. Call
    /// [`NetworkPair::init`] to actually run the seeded synthesis.
    pub fn generate(self) -> NetworkPair {
        NetworkPair {
            params: self.params,
            seed: self.seed,
            state: PairState::Uninitialized,
        }
    }
}

#[derive(Debug)]
enum PairState {
    Uninitialized,
    Ready { classic: HyperNetwork, hyper: HyperNetwork },
}

/// A classic network and its derived hyper network, sharing one
/// participant pool. Must be [`Self::init`]-ed before
/// [`Self::classic_network`]/[`Self::hyper_network`] are callable.
#[derive(Debug)]
pub struct NetworkPair {
    params: NetworkPairParams,
    seed: u64,
    state: PairState,
}

impl NetworkPair {
    pub fn params(&self) -> &NetworkPairParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run the seeded synthesis. Calling this twice on the same
    /// `NetworkPair` is API misuse and panics.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        assert!(
            matches!(self.state, PairState::Uninitialized),
            "NetworkPair::init called more than once"
        );

        if self.params.num_members < 2 {
            return Err(ConfigError::TooFewParticipants(self.params.num_members));
        }
        let min_required = self.params.num_members - 1;
        if self.params.num_classic_channels < min_required {
            return Err(ConfigError::TooFewClassicChannels {
                num_classic_channels: self.params.num_classic_channels,
                min_required,
            });
        }

        let mut rng = Rng::from_seed_u64(self.seed);
        let mut pool = ParticipantPool::new();
        let (participants, classic) =
            generate_classic(&self.params, &mut rng, &mut pool)?;
        let hyper = generate_hyper(&classic, &participants, &self.params);

        info!(
            participants = participants.len(),
            classic_channels = classic.num_channels(),
            hyper_channels = hyper.num_channels(),
            seed = self.seed,
            "generated network pair"
        );

        self.state = PairState::Ready { classic, hyper };
        Ok(())
    }

    pub fn classic_network(&self) -> &HyperNetwork {
        match &self.state {
            PairState::Ready { classic, .. } => classic,
            PairState::Uninitialized => {
                panic!("NetworkPair::classic_network called before init()")
            }
        }
    }

    pub fn hyper_network(&self) -> &HyperNetwork {
        match &self.state {
            PairState::Ready { hyper, .. } => hyper,
            PairState::Uninitialized => {
                panic!("NetworkPair::hyper_network called before init()")
            }
        }
    }
}

fn generate_classic(
    params: &NetworkPairParams,
    rng: &mut Rng,
    pool: &mut ParticipantPool,
) -> Result<(Vec<ParticipantId>, HyperNetwork), ConfigError> {
    let participants = pool.create_many(params.num_members);
    let mut net = HyperNetwork::new();
    for &p in &participants {
        net.add_member(p);
    }

    let sample_deposit = |rng: &mut Rng| {
        rng.next_log_uniform(
            params.funding_contribution_min,
            params.funding_contribution_max,
        )
    };

    let mut queue: VecDeque<ParticipantId> = participants.iter().copied().collect();
    let mut attachment: Vec<ParticipantId> = Vec::new();

    let a = queue.pop_front().expect("num_members >= 2 checked by caller");
    let b = queue.pop_front().expect("num_members >= 2 checked by caller");
    let channel = HyperChannel::new(vec![a, b], vec![sample_deposit(rng), sample_deposit(rng)])?;
    net.add_channel(channel);
    attachment.push(a);
    attachment.push(b);

    for _ in 1..params.num_classic_channels {
        if queue.is_empty() {
            queue.extend(participants.iter().copied());
        }
        let member = queue.pop_front().expect("just refilled if empty");

        let mut partner = attachment[rng.next_int(attachment.len())];
        while partner == member {
            partner = attachment[rng.next_int(attachment.len())];
        }

        let channel = HyperChannel::new(
            vec![member, partner],
            vec![sample_deposit(rng), sample_deposit(rng)],
        )?;
        net.add_channel(channel);
        attachment.push(member);
        attachment.push(partner);
    }

    Ok((participants, net))
}

/// An in-progress hyper-channel description during synthesis: an
/// insertion-ordered member -> balance map, merged and re-merged as Stage
/// A/B proto-channels are unified.
#[derive(Clone, Debug)]
struct ProtoChannel {
    balances: IndexMap<ParticipantId, i64>,
}

impl ProtoChannel {
    fn new(entries: impl IntoIterator<Item = (ParticipantId, i64)>) -> Self {
        let mut balances = IndexMap::new();
        for (p, b) in entries {
            *balances.entry(p).or_insert(0) += b;
        }
        Self { balances }
    }

    fn size(&self) -> usize {
        self.balances.len()
    }

    /// Fold `other` (the smaller channel, by convention) into `self`,
    /// summing balances for shared members and unioning member sets.
    fn absorb(&mut self, other: ProtoChannel) {
        for (p, b) in other.balances {
            *self.balances.entry(p).or_insert(0) += b;
        }
    }

    fn into_channel(self) -> HyperChannel {
        let members: Vec<_> = self.balances.keys().copied().collect();
        let deposits: Vec<_> = self.balances.values().copied().collect();
        HyperChannel::new(members, deposits)
            .expect("proto-channel synthesis always produces a valid channel")
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Best-fit greedy proto-channel merge pass: take the smallest remaining
/// proto-channel, merge it into the largest one it fits into, repeat;
/// stop once the current smallest can't fit anywhere.
fn unify(mut protos: Vec<ProtoChannel>, max_size: usize) -> Vec<ProtoChannel> {
    loop {
        if protos.len() <= 1 {
            break;
        }
        protos.sort_by_key(ProtoChannel::size);
        let smallest_size = protos[0].size();

        let mut target = None;
        for idx in (1..protos.len()).rev() {
            if protos[idx].size() + smallest_size <= max_size {
                target = Some(idx);
                break;
            }
        }

        match target {
            Some(idx) => {
                let smallest = protos.remove(0);
                protos[idx - 1].absorb(smallest);
            }
            None => break,
        }
    }
    protos
}

fn generate_hyper(
    classic: &HyperNetwork,
    participants: &[ParticipantId],
    params: &NetworkPairParams,
) -> HyperNetwork {
    let mut absorbed: IndexSet<ChannelId> = IndexSet::new();

    // Stage A: fuse dead-ends into their connector.
    let mut dead_end_groups: IndexMap<ParticipantId, Vec<(ParticipantId, ChannelId)>> =
        IndexMap::new();
    for (cid, channel) in classic.channels() {
        let members = channel.members();
        debug_assert_eq!(members.len(), 2, "classic channels are always two-party");
        let (x, y) = (members[0], members[1]);
        let deg_x = classic.channels_of(x).len();
        let deg_y = classic.channels_of(y).len();
        let dead_end_and_connector = match (deg_x, deg_y) {
            (1, dy) if dy > 1 => Some((x, y)),
            (dx, 1) if dx > 1 => Some((y, x)),
            _ => None,
        };
        if let Some((dead_end, connector)) = dead_end_and_connector {
            dead_end_groups.entry(connector).or_default().push((dead_end, cid));
        }
    }

    let mut proto_a = Vec::new();
    for (&connector, entries) in dead_end_groups.iter() {
        let k = entries.len();
        let capacity = (params.max_hyper_channel_size.saturating_sub(1)).max(1);
        let f = ceil_div(k, capacity).max(1);
        let ideal_size = 1 + ceil_div(k, f);
        let chunk_size = (ideal_size - 1).max(1);

        for chunk in entries.chunks(chunk_size) {
            let connector_balance: i64 = chunk
                .iter()
                .map(|&(_, cid)| classic.channel(cid).balance_of(connector))
                .sum();
            let mut entries_for_proto = vec![(connector, connector_balance)];
            for &(dead_end, cid) in chunk {
                entries_for_proto.push((dead_end, classic.channel(cid).balance_of(dead_end)));
                absorbed.insert(cid);
            }
            proto_a.push(ProtoChannel::new(entries_for_proto));
        }
    }
    debug!(connectors = dead_end_groups.len(), proto_channels = proto_a.len(), "stage A: dead-end fusion");

    let unified_a = unify(proto_a, params.max_hyper_channel_size);

    // Stage B: path contraction (skipped iff hpc_parsimony).
    let mut proto_b = Vec::new();
    if !params.hpc_parsimony {
        for (cid, channel) in classic.channels() {
            if absorbed.contains(&cid) {
                continue;
            }
            let members = channel.members();
            let (x, y) = (members[0], members[1]);
            let deg_x = classic.channels_of(x).len();
            let deg_y = classic.channels_of(y).len();
            if deg_x < params.hpc_avoidance_min_connectivity
                || deg_y < params.hpc_avoidance_min_connectivity
            {
                proto_b.push(ProtoChannel::new([
                    (x, channel.balance_of(x)),
                    (y, channel.balance_of(y)),
                ]));
                absorbed.insert(cid);
            }
        }
    }
    debug!(proto_channels = proto_b.len(), "stage B: path contraction");

    let final_unified = if params.hpc_parsimony {
        unified_a
    } else {
        let mut combined = unified_a;
        combined.extend(proto_b);
        unify(combined, params.max_hyper_channel_size)
    };

    // Stage C: carry over whatever is left untouched.
    let mut proto_c = Vec::new();
    for (cid, channel) in classic.channels() {
        if absorbed.contains(&cid) {
            continue;
        }
        let members = channel.members();
        let (x, y) = (members[0], members[1]);
        proto_c.push(ProtoChannel::new([
            (x, channel.balance_of(x)),
            (y, channel.balance_of(y)),
        ]));
    }
    debug!(proto_channels = proto_c.len(), "stage C: carry-over");

    let mut hyper = HyperNetwork::new();
    for &p in participants {
        hyper.add_member(p);
    }
    for proto in final_unified.into_iter().chain(proto_c) {
        hyper.add_channel(proto.into_channel());
    }

    if cfg!(debug_assertions) {
        for &p in participants {
            debug_assert_eq!(
                classic.wealth_of(p),
                hyper.wealth_of(p),
                "wealth diverged between classic and hyper network for {p:?}"
            );
        }
    }

    hyper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_few_classic_channels() {
        let mut pair = NetworkPairBuilder::new(0)
            .num_members(10)
            .num_classic_channels(3)
            .generate();
        let err = pair.init().unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooFewClassicChannels { num_classic_channels: 3, min_required: 9 }
        );
    }

    #[test]
    #[should_panic]
    fn accessing_before_init_panics() {
        let pair = NetworkPairBuilder::new(0).num_members(10).generate();
        let _ = pair.classic_network();
    }

    #[test]
    #[should_panic]
    fn double_init_panics() {
        let mut pair = NetworkPairBuilder::new(0).num_members(10).generate();
        pair.init().unwrap();
        pair.init().unwrap();
    }

    #[test]
    fn same_seed_produces_identical_pair() {
        let mut pair_a = NetworkPairBuilder::new(0)
            .num_members(200)
            .num_classic_channels(240)
            .generate();
        pair_a.init().unwrap();
        let mut pair_b = NetworkPairBuilder::new(0)
            .num_members(200)
            .num_classic_channels(240)
            .generate();
        pair_b.init().unwrap();

        assert_eq!(pair_a.classic_network().num_channels(), pair_b.classic_network().num_channels());
        assert_eq!(pair_a.hyper_network().num_channels(), pair_b.hyper_network().num_channels());

        for p in pair_a.classic_network().participants() {
            assert_eq!(
                pair_a.classic_network().wealth_of(p),
                pair_b.classic_network().wealth_of(p)
            );
            assert_eq!(pair_a.classic_network().wealth_of(p), pair_a.hyper_network().wealth_of(p));
        }
    }

    #[test]
    fn hyper_channels_respect_max_size() {
        let mut pair = NetworkPairBuilder::new(1)
            .num_members(150)
            .num_classic_channels(180)
            .max_hyper_channel_size(8)
            .generate();
        pair.init().unwrap();
        for (_, channel) in pair.hyper_network().channels() {
            assert!(channel.num_members() <= 8);
        }
    }

    #[test]
    fn hpc_parsimony_skips_stage_b() {
        let mut pair = NetworkPairBuilder::new(2)
            .num_members(150)
            .num_classic_channels(180)
            .hpc_parsimony(true)
            .generate();
        pair.init().unwrap();
        // Every participant's wealth is still preserved even without path
        // contraction.
        for p in pair.classic_network().participants() {
            assert_eq!(
                pair.classic_network().wealth_of(p),
                pair.hyper_network().wealth_of(p)
            );
        }
    }
}
