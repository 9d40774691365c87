//! Generates and executes a payment workload against a [`HyperNetwork`],
//! recording fees paid and routing failures.

use hyperchan_rng::Rng;
use tracing::info;

use crate::network::HyperNetwork;
use crate::participant::ParticipantId;

/// Parameters for [`WorkloadBuilder`].
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadParams {
    pub payment_size_min: i64,
    pub payment_size_max: i64,
    pub min_monthly_pay: i64,
    pub company_wealth_min: i64,
    pub num_payments: usize,
    pub monthly_pay_probability: f64,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            payment_size_min: 2_000_000,
            payment_size_max: 10_000_000_000,
            min_monthly_pay: 1_500_000_000,
            company_wealth_min: 20_000_000_000,
            num_payments: 1000,
            monthly_pay_probability: 0.02,
        }
    }
}

/// Consuming builder for a [`Workload`], mirroring
/// [`crate::generator::NetworkPairBuilder`].
#[derive(Clone, Debug)]
pub struct WorkloadBuilder {
    params: WorkloadParams,
    seed: u64,
}

impl WorkloadBuilder {
    pub fn new(seed: u64) -> Self {
        Self { params: WorkloadParams::default(), seed }
    }

    pub fn payment_size_min(mut self, v: i64) -> Self {
        self.params.payment_size_min = v;
        self
    }

    pub fn payment_size_max(mut self, v: i64) -> Self {
        self.params.payment_size_max = v;
        self
    }

    pub fn min_monthly_pay(mut self, v: i64) -> Self {
        self.params.min_monthly_pay = v;
        self
    }

    pub fn company_wealth_min(mut self, v: i64) -> Self {
        self.params.company_wealth_min = v;
        self
    }

    pub fn num_payments(mut self, v: usize) -> Self {
        self.params.num_payments = v;
        self
    }

    pub fn monthly_pay_probability(mut self, v: f64) -> Self {
        self.params.monthly_pay_probability = v;
        self
    }

    pub fn build(self) -> Workload {
        Workload {
            params: self.params,
            seed: self.seed,
            results: None,
        }
    }
}

/// Outcome of executing a generated workload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkloadResults {
    pub fees_paid: Vec<i64>,
    pub failed: usize,
}

impl WorkloadResults {
    pub fn accepted(&self) -> usize {
        self.fees_paid.len() + self.failed
    }

    pub fn total_fees(&self) -> i64 {
        self.fees_paid.iter().sum()
    }
}

/// A sequence of generated payments plus their execution results, once
/// [`Self::init`] has run.
#[derive(Clone, Debug)]
pub struct Workload {
    params: WorkloadParams,
    seed: u64,
    results: Option<WorkloadResults>,
}

impl Workload {
    pub fn params(&self) -> &WorkloadParams {
        &self.params
    }

    pub fn results(&self) -> &WorkloadResults {
        self.results
            .as_ref()
            .unwrap_or_else(|| panic!("Workload::results called before init()"))
    }

    /// Generate and execute the workload against `network`. Calling this
    /// twice on the same `Workload` is API misuse and panics.
    pub fn init(&mut self, network: &mut HyperNetwork) {
        assert!(self.results.is_none(), "Workload::init called more than once");

        let mut rng = Rng::from_seed_u64(self.seed);
        let all_participants: Vec<ParticipantId> = network.participants().collect();
        assert!(!all_participants.is_empty(), "network has no participants");

        let initial_wealth: Vec<(ParticipantId, i64)> = all_participants
            .iter()
            .map(|&p| (p, network.wealth_of(p)))
            .collect();
        let companies: Vec<ParticipantId> = initial_wealth
            .iter()
            .filter(|&&(_, w)| w >= self.params.company_wealth_min)
            .map(|&(p, _)| p)
            .collect();

        let mut shadow: std::collections::HashMap<ParticipantId, i64> =
            initial_wealth.into_iter().collect();

        let mut generated: Vec<(ParticipantId, ParticipantId, i64)> = Vec::with_capacity(self.params.num_payments);
        while generated.len() < self.params.num_payments {
            let is_monthly = rng.next_uniform_double() < self.params.monthly_pay_probability;

            let (origin_pool, amount) = if is_monthly {
                let mut amount;
                loop {
                    amount = rng.next_log_uniform(
                        self.params.payment_size_min,
                        self.params.payment_size_max,
                    );
                    if amount >= self.params.min_monthly_pay {
                        break;
                    }
                }
                let pool = if companies.is_empty() { &all_participants } else { &companies };
                (pool, amount)
            } else {
                let amount = rng.next_log_uniform(
                    self.params.payment_size_min,
                    self.params.payment_size_max,
                );
                (&all_participants, amount)
            };

            let origin = origin_pool[rng.next_int(origin_pool.len())];
            let mut destination = all_participants[rng.next_int(all_participants.len())];
            while destination == origin {
                destination = all_participants[rng.next_int(all_participants.len())];
            }

            let origin_balance = *shadow.get(&origin).unwrap_or(&0);
            if origin_balance >= amount {
                *shadow.get_mut(&origin).unwrap() -= amount;
                *shadow.entry(destination).or_insert(0) -= amount;
                generated.push((origin, destination, amount));
            }
        }

        let mut fees_paid = Vec::with_capacity(generated.len());
        let mut failed = 0usize;
        for (origin, destination, amount) in generated {
            match network.perform_payment(origin, destination, amount) {
                crate::network::PaymentOutcome::Settled { fee } => fees_paid.push(fee),
                crate::network::PaymentOutcome::Unroutable => failed += 1,
            }
        }

        info!(
            accepted = fees_paid.len() + failed,
            failed,
            companies = companies.len(),
            "workload executed"
        );

        self.results = Some(WorkloadResults { fees_paid, failed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::NetworkPairBuilder;

    #[test]
    fn workload_preserves_channel_sums() {
        let mut pair = NetworkPairBuilder::new(0)
            .num_members(150)
            .num_classic_channels(180)
            .generate();
        pair.init().unwrap();

        // classic_network()/hyper_network() only hand out shared refs; take
        // owned copies so the workload can mutate them independently.
        let mut classic = pair.classic_network().clone();
        let mut hyper = pair.hyper_network().clone();

        let mut classic_workload = WorkloadBuilder::new(0).num_payments(100).build();
        classic_workload.init(&mut classic);
        let mut hyper_workload = WorkloadBuilder::new(0).num_payments(100).build();
        hyper_workload.init(&mut hyper);

        for (_, channel) in classic.channels() {
            assert_eq!(channel.balances().values().sum::<i64>(), channel.funding_amount());
        }
        for (_, channel) in hyper.channels() {
            assert_eq!(channel.balances().values().sum::<i64>(), channel.funding_amount());
        }
    }

    #[test]
    #[should_panic]
    fn double_init_panics() {
        let mut pair = NetworkPairBuilder::new(0).num_members(50).num_classic_channels(60).generate();
        pair.init().unwrap();
        let mut classic = pair.classic_network().clone();
        let mut workload = WorkloadBuilder::new(0).num_payments(5).build();
        workload.init(&mut classic);
        workload.init(&mut classic);
    }

    #[test]
    fn results_before_init_panics_gracefully() {
        let workload = WorkloadBuilder::new(0).build();
        let result = std::panic::catch_unwind(|| workload.results());
        assert!(result.is_err());
    }
}
