//! Chain-selection algebra: consistency predicates, chain enumeration,
//! weights, fork components, and the acceptance rule.
//!
//! A *chain* is a subset of the DAG that stacks into contiguous round
//! layers, each layer fully named by the coffers of the layer above. The
//! strongly-consistent variant additionally demands that the named layer be
//! a strict majority of each naming coffer, which is what ties chain weight
//! to the production-rate quorum.
//!
//! Enumerated chains are anchored at the DAG's top round and *closed*: each
//! lower layer is exactly the set of present messages named by everything
//! above it, so a chain cannot silently drop a predecessor its tips vouch
//! for. One chain candidate exists per anchor-layer subset, which makes
//! enumeration exponential in anchor width but linear in rounds.
//!
//! Everything here is a pure function of the DAG. All sets are canonical
//! (`BTreeSet`), so results are order-independent and ties break
//! deterministically: where one representative must be chosen, it is the
//! lexicographically least chain under id order.

use std::collections::{BTreeMap, BTreeSet};

use crate::consensus::dag::{Dag, Message, MessageId};

/// A chain, identified by its message ids.
pub type Chain = BTreeSet<MessageId>;

// ── Set primitives ──────────────────────────────────────────────────────

/// Intersection of a family of sets: empty for an empty family, the sole
/// member for a singleton, the pairwise fold otherwise.
pub fn intersection<'a, I>(sets: I) -> BTreeSet<MessageId>
where
    I: IntoIterator<Item = &'a BTreeSet<MessageId>>,
{
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return BTreeSet::new();
    };
    let mut acc = first.clone();
    for set in iter {
        acc = acc.intersection(set).copied().collect();
        if acc.is_empty() {
            break;
        }
    }
    acc
}

/// Strict majority: `part` is more than half of `whole`.
pub fn strict_majority(part: usize, whole: usize) -> bool {
    2 * part > whole
}

// ── Consistency predicates ──────────────────────────────────────────────

/// A set of messages is consistent when the common core of all its coffers
/// is a strict majority of every member's coffer: every member agrees with
/// every other on most of its own declared predecessors.
///
/// The empty set is vacuously consistent.
pub fn consistent_set<'a, I>(msgs: I) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    let msgs: Vec<&Message> = msgs.into_iter().collect();
    if msgs.is_empty() {
        return true;
    }
    let core = intersection(msgs.iter().map(|m| &m.coffer));
    msgs.iter()
        .all(|m| strict_majority(core.len(), m.coffer.len()))
}

/// Group a candidate chain into contiguous round layers `L_0 ..= L_r`.
/// `None` when the set is empty or any round up to the top is unpopulated.
fn chain_layers<'a, I>(msgs: I) -> Option<Vec<Vec<&'a Message>>>
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut by_round: BTreeMap<u64, Vec<&Message>> = BTreeMap::new();
    for m in msgs {
        by_round.entry(m.round).or_default().push(m);
    }
    let top = *by_round.keys().next_back()?;
    let mut layers = Vec::with_capacity(top as usize + 1);
    for round in 0..=top {
        layers.push(by_round.remove(&round)?);
    }
    Some(layers)
}

/// Whether every message of `tip` names all of `pred` in its coffer, and
/// (for the strong variant) `pred` is a strict majority of each coffer.
/// Coffer entries outside `pred` are tolerated, named or dangling.
fn tip_extends(pred: &Chain, tip: &[&Message], strong: bool) -> bool {
    tip.iter().all(|m| {
        pred.iter().all(|id| m.coffer.contains(id))
            && (!strong || strict_majority(pred.len(), m.coffer.len()))
    })
}

fn layered_chain<'a, I>(msgs: I, strong: bool) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    let Some(layers) = chain_layers(msgs) else {
        return false;
    };
    layers.windows(2).all(|pair| {
        let pred: Chain = pair[0].iter().map(|m| m.id).collect();
        tip_extends(&pred, &pair[1], strong)
    })
}

/// A non-empty set is a consistent chain when its round layers are
/// contiguous down to round 0 and every message names the entire layer
/// below it. Any non-empty round-0 set is a consistent chain.
pub fn consistent_chain<'a, I>(msgs: I) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    layered_chain(msgs, false)
}

/// A consistent chain whose named layers are each a strict majority of
/// every naming coffer.
pub fn strongly_consistent_chain<'a, I>(msgs: I) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    layered_chain(msgs, true)
}

// ── Chain enumeration ───────────────────────────────────────────────────

fn non_empty_subsets(ids: &BTreeSet<MessageId>) -> Vec<Chain> {
    let items: Vec<MessageId> = ids.iter().copied().collect();
    if items.len() > crate::constants::ENUMERATION_WARN_WIDTH {
        tracing::warn!(
            width = items.len(),
            "enumerating subsets of a wide anchor layer; expect exponential cost"
        );
    }
    let mut out = Vec::new();
    for mask in 1u64..(1u64 << items.len()) {
        out.push(
            items
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect(),
        );
    }
    out
}

/// Close an anchor-layer choice downwards: each lower layer is exactly the
/// set of present previous-round messages named by every member of the
/// layer above, so a chain cannot drop a predecessor its tips vouch for.
/// `None` when a layer closes empty before round 0, or (strong variant)
/// when a layer is not a strict majority of every naming coffer.
fn close_chain(dag: &Dag, top_round: u64, tip: Chain, strong: bool) -> Option<Chain> {
    let mut chain = tip.clone();
    let mut layer = tip;
    for round in (1..=top_round).rev() {
        let layer_msgs: Vec<&Message> = layer.iter().filter_map(|id| dag.get(id)).collect();
        let named = intersection(layer_msgs.iter().map(|m| &m.coffer));
        let below: Chain = named
            .into_iter()
            .filter(|id| dag.get(id).is_some_and(|m| m.round + 1 == round))
            .collect();
        if below.is_empty() {
            return None;
        }
        if strong
            && layer_msgs
                .iter()
                .any(|m| !strict_majority(below.len(), m.coffer.len()))
        {
            return None;
        }
        chain.extend(below.iter().copied());
        layer = below;
    }
    Some(chain)
}

/// Enumerate the chains anchored at the DAG's maximum round: one candidate
/// per non-empty anchor-layer subset, closed downwards round by round.
fn enumerate_chains(dag: &Dag, strong: bool) -> Vec<Chain> {
    let Some(top_round) = dag.max_round() else {
        return Vec::new();
    };
    let mut out: Vec<Chain> = non_empty_subsets(&dag.round_ids(top_round))
        .into_iter()
        .filter_map(|tip| close_chain(dag, top_round, tip, strong))
        .collect();
    out.sort();
    out
}

/// All consistent chains anchored at the DAG's maximum round.
pub fn consistent_chains(dag: &Dag) -> Vec<Chain> {
    enumerate_chains(dag, false)
}

/// All strongly-consistent chains anchored at the DAG's maximum round.
pub fn strongly_consistent_chains(dag: &Dag) -> Vec<Chain> {
    enumerate_chains(dag, true)
}

// ── Weight, forks, components ───────────────────────────────────────────

/// Weight of a chain: its cardinality.
pub fn weight(chain: &Chain) -> usize {
    chain.len()
}

/// All consistent chains of maximal weight.
pub fn heaviest_consistent_chains(dag: &Dag) -> Vec<Chain> {
    let all = consistent_chains(dag);
    let max = all.iter().map(BTreeSet::len).max().unwrap_or(0);
    all.into_iter().filter(|c| c.len() == max).collect()
}

/// Deterministic representative among the heaviest consistent chains: the
/// lexicographically least under id order. `None` when the DAG has no
/// chain at all.
pub fn heaviest_consistent_chain(dag: &Dag) -> Option<Chain> {
    heaviest_consistent_chains(dag).into_iter().next()
}

fn round_layers(dag: &Dag, chain: &Chain) -> BTreeMap<u64, Chain> {
    let mut layers: BTreeMap<u64, Chain> = BTreeMap::new();
    for id in chain {
        if let Some(m) = dag.get(id) {
            layers.entry(m.round).or_default().insert(*id);
        }
    }
    layers
}

fn layers_disjoint(a: &BTreeMap<u64, Chain>, b: &BTreeMap<u64, Chain>) -> bool {
    let (Some(ra), Some(rb)) = (a.keys().next_back(), b.keys().next_back()) else {
        return false;
    };
    if ra != rb {
        return false;
    }
    (0..*ra).any(|round| match (a.get(&round), b.get(&round)) {
        (Some(x), Some(y)) => x.intersection(y).next().is_none(),
        // An unpopulated round shares nothing.
        _ => true,
    })
}

/// Two chains anchored at the same maximum round are disjoint when some
/// round strictly below the anchor has no shared message: they forked at
/// that round. Chains with different anchors are not comparable and are
/// never disjoint.
pub fn disjoint(dag: &Dag, a: &Chain, b: &Chain) -> bool {
    layers_disjoint(&round_layers(dag, a), &round_layers(dag, b))
}

/// Partition chains into maximal groups transitively linked by
/// non-disjointness. Chains that forked from each other land in different
/// groups unless a third chain bridges them.
pub fn components(dag: &Dag, chains: &[Chain]) -> Vec<Vec<Chain>> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let layered: Vec<BTreeMap<u64, Chain>> =
        chains.iter().map(|c| round_layers(dag, c)).collect();
    let mut parent: Vec<usize> = (0..chains.len()).collect();
    for i in 0..chains.len() {
        for j in (i + 1)..chains.len() {
            if !layers_disjoint(&layered[i], &layered[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                parent[ri] = rj;
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<Chain>> = BTreeMap::new();
    for (i, chain) in chains.iter().enumerate() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(chain.clone());
    }
    groups.into_values().collect()
}

/// Union of the heaviest component of the strongly-consistent chains: the
/// component whose union has the greatest cardinality, ties broken toward
/// the lexicographically least union.
pub fn heaviest_component(dag: &Dag) -> Option<Chain> {
    let chains = strongly_consistent_chains(dag);
    if chains.is_empty() {
        return None;
    }
    components(dag, &chains)
        .into_iter()
        .map(|group| group.into_iter().flatten().collect::<Chain>())
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
}

// ── Acceptance ──────────────────────────────────────────────────────────

/// Messages that never sit on the strictly lighter, non-shared side of a
/// pair of disjoint strongly-consistent chains. A message on no chain is
/// vacuously accepted.
pub fn accepted(dag: &Dag) -> BTreeSet<MessageId> {
    let chains = strongly_consistent_chains(dag);
    let layered: Vec<BTreeMap<u64, Chain>> =
        chains.iter().map(|c| round_layers(dag, c)).collect();

    let mut rejected: BTreeSet<MessageId> = BTreeSet::new();
    for (i, light) in chains.iter().enumerate() {
        for (j, heavy) in chains.iter().enumerate() {
            if light.len() < heavy.len() && layers_disjoint(&layered[i], &layered[j]) {
                rejected.extend(light.difference(heavy).copied());
            }
        }
    }
    dag.ids().difference(&rejected).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::dag::ProcessId;

    fn mid(n: u32) -> MessageId {
        MessageId::new(ProcessId(n), 0)
    }

    fn ids(ns: &[u32]) -> BTreeSet<MessageId> {
        ns.iter().map(|&n| mid(n)).collect()
    }

    fn msg(n: u32, round: u64, preds: &[u32]) -> Message {
        Message::new(mid(n), round, ids(preds))
    }

    fn dag_of(msgs: &[Message]) -> Dag {
        let mut dag = Dag::new();
        for m in msgs {
            dag.insert(m.clone()).unwrap();
        }
        dag
    }

    #[test]
    fn intersection_laws() {
        let no_sets: [&BTreeSet<MessageId>; 0] = [];
        assert_eq!(intersection(no_sets), BTreeSet::new());
        assert_eq!(intersection([&ids(&[1, 2])]), ids(&[1, 2]));
        assert_eq!(intersection([&ids(&[1, 2]), &ids(&[2, 3])]), ids(&[2]));
        assert_eq!(intersection([&ids(&[1, 2]), &ids(&[3, 4])]), BTreeSet::new());
    }

    #[test]
    fn strict_majority_boundaries() {
        assert!(strict_majority(2, 3));
        assert!(!strict_majority(2, 4));
        assert!(!strict_majority(0, 0));
        assert!(strict_majority(1, 1));
    }

    #[test]
    fn consistent_set_empty_coffers_fail() {
        // Round-0 messages have empty coffers: the core is empty and a
        // strict majority of zero is impossible.
        let msgs = [msg(1, 0, &[]), msg(2, 0, &[]), msg(3, 0, &[])];
        assert!(!consistent_set(&msgs));
        // The empty set is vacuously consistent.
        let no_msgs: [&Message; 0] = [];
        assert!(consistent_set(no_msgs));
    }

    #[test]
    fn consistent_set_majority_core() {
        let m4 = msg(4, 1, &[1, 2]);
        let m5 = msg(5, 1, &[1, 2, 3]);
        let m6 = msg(6, 1, &[1, 3]);
        assert!(consistent_set([&m4, &m5]));
        // Core shrinks to {1}, which is not a majority of m4's coffer.
        assert!(!consistent_set([&m4, &m5, &m6]));
    }

    #[test]
    fn chain_predicates_on_layers() {
        let m1 = msg(1, 0, &[]);
        let m2 = msg(2, 0, &[]);
        let m3 = msg(3, 0, &[]);
        let m4 = msg(4, 1, &[1, 2]);
        let m5 = msg(5, 1, &[1, 2, 3]);

        // Any non-empty round-0 set is a chain.
        assert!(consistent_chain([&m1, &m2, &m3]));
        assert!(strongly_consistent_chain([&m1]));

        // Both tips name the whole lower layer {m1, m2}.
        assert!(consistent_chain([&m1, &m2, &m4, &m5]));
        assert!(strongly_consistent_chain([&m1, &m2, &m4, &m5]));

        // m3 sits in the lower layer without being named by m4.
        assert!(!consistent_chain([&m1, &m2, &m3, &m4, &m5]));

        // A gap below the top disqualifies the stack.
        let m7 = msg(7, 2, &[4]);
        assert!(!consistent_chain([&m1, &m7]));
    }

    #[test]
    fn strong_variant_requires_coffer_majority() {
        // m5's coffer has three entries; a single named predecessor is a
        // valid layer but not a strict majority of the coffer.
        let m1 = msg(1, 0, &[]);
        let m5 = msg(5, 1, &[1, 2, 3]);
        assert!(consistent_chain([&m1, &m5]));
        assert!(!strongly_consistent_chain([&m1, &m5]));
    }

    #[test]
    fn enumeration_is_anchored_and_order_independent() {
        let msgs = [
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(4, 1, &[1, 2]),
        ];
        let forward = dag_of(&msgs);
        let mut reversed = Dag::new();
        for m in msgs.iter().rev() {
            reversed.insert(m.clone()).unwrap();
        }

        let chains = consistent_chains(&forward);
        assert_eq!(chains, consistent_chains(&reversed));
        // Every chain touches the top round.
        assert!(chains.iter().all(|c| c.contains(&mid(4))));
        // The closure of the only anchor message names both predecessors.
        assert_eq!(chains, vec![ids(&[1, 2, 4])]);
    }

    #[test]
    fn heaviest_chain_tie_breaks_deterministically() {
        let dag = dag_of(&[
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(3, 0, &[]),
            msg(4, 1, &[1, 2]),
            msg(5, 1, &[1, 2, 3]),
        ]);
        let heaviest = heaviest_consistent_chains(&dag);
        assert_eq!(heaviest.len(), 2);
        assert!(heaviest.contains(&ids(&[1, 2, 3, 5])));
        assert!(heaviest.contains(&ids(&[1, 2, 4, 5])));
        // Lexicographically least representative.
        assert_eq!(heaviest_consistent_chain(&dag), Some(ids(&[1, 2, 3, 5])));
    }

    #[test]
    fn disjoint_means_forked_not_nonoverlapping() {
        let dag = dag_of(&[
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(3, 1, &[1]),
            msg(4, 1, &[2]),
        ]);
        // Forked at round 0.
        assert!(disjoint(&dag, &ids(&[1, 3]), &ids(&[2, 4])));
        // Sharing the anchor round does not prevent disjointness.
        assert!(disjoint(&dag, &ids(&[1, 3, 4]), &ids(&[2, 4])));
        // Same lower layer: never disjoint.
        assert!(!disjoint(&dag, &ids(&[1, 3]), &ids(&[1, 4])));
        // Round-0 chains have no earlier round to fork at.
        let flat = dag_of(&[msg(1, 0, &[]), msg(2, 0, &[])]);
        assert!(!disjoint(&flat, &ids(&[1]), &ids(&[2])));
    }

    #[test]
    fn components_group_by_shared_history() {
        let dag = dag_of(&[
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(3, 1, &[1]),
            msg(4, 1, &[2]),
        ]);
        let chains = strongly_consistent_chains(&dag);
        // {1,3} and {2,4} fork; no chain bridges them.
        let groups = components(&dag, &chains);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn acceptance_rejects_the_light_fork() {
        let dag = dag_of(&[
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(3, 1, &[1]),
            msg(4, 1, &[1]),
            msg(5, 1, &[2]),
        ]);
        // {1,3,4} outweighs the disjoint {2,5}.
        let ok = accepted(&dag);
        assert!(ok.contains(&mid(1)));
        assert!(ok.contains(&mid(3)));
        assert!(ok.contains(&mid(4)));
        assert!(!ok.contains(&mid(2)));
        assert!(!ok.contains(&mid(5)));
    }

    #[test]
    fn heaviest_component_unions_linked_chains() {
        let dag = dag_of(&[
            msg(1, 0, &[]),
            msg(2, 0, &[]),
            msg(3, 1, &[1]),
            msg(4, 1, &[1]),
            msg(5, 1, &[2]),
        ]);
        assert_eq!(heaviest_component(&dag), Some(ids(&[1, 3, 4])));
    }
}
