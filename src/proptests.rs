use super::*;

use crate::tree::BitMapTree;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeSet;

const COUNTER_RANGE: u64 = 1200;

/// Checks the structural invariants of `t` and returns how many counters it
/// holds.
fn validate_tree(t: &BitMapTree) -> u64 {
    let block_size = t.block_size();
    if t.depth() == 0 {
        assert!(t.children().is_empty(), "leaf with children");
        return (block_size - t.bitmap().free_count()) as u64;
    }

    assert!(
        !matches!(t.children().last(), Some(None)),
        "children must not end in a placeholder"
    );
    assert!(t.children().len() <= block_size);

    let span = (block_size as u64).pow(t.depth());
    let mut total = 0u64;
    for j in 0..block_size {
        match t.children().get(j).and_then(|c| c.as_ref()) {
            None => assert!(
                !t.bitmap().is_allocated(j),
                "absent child {j} is marked full"
            ),
            Some(child) => {
                assert_eq!(child.depth() + 1, t.depth(), "child {j} depth");
                assert_eq!(child.begin(), t.begin() + j as u64 * span, "child {j} begin");
                let held = validate_tree(child);
                assert!(held > 0, "materialized child {j} is vacant");
                assert_eq!(
                    t.bitmap().is_allocated(j),
                    held == span,
                    "bit {j} must mirror child fullness"
                );
                total += held;
            }
        }
    }
    total
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 4)]
    Allocate,
    #[proptest(weight = 2)]
    AllocateAt(#[proptest(strategy = "0u64..COUNTER_RANGE")] u64),
    #[proptest(weight = 3)]
    Deallocate(#[proptest(strategy = "0u64..COUNTER_RANGE")] u64),
    Check(#[proptest(strategy = "0u64..COUNTER_RANGE")] u64),
}

/// Reference allocator: the set of allocated counters.
#[derive(Clone, Debug)]
struct Model {
    begin: u64,
    allocated: BTreeSet<u64>,
}

impl Model {
    fn new(begin: u64) -> Self {
        Self {
            begin,
            allocated: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> u64 {
        let next = (self.begin..)
            .find(|c| !self.allocated.contains(c))
            .unwrap();
        self.allocated.insert(next);
        next
    }

    fn allocate_at(&mut self, counter: u64) -> Result<bool> {
        if counter < self.begin {
            return Err(Error::BelowBegin {
                counter,
                begin: self.begin,
            });
        }
        Ok(self.allocated.insert(counter))
    }
}

/// Outcome of one op, comparable between implementations.
#[derive(Debug, PartialEq)]
enum Outcome {
    Allocated(u64),
    Changed(Result<bool>),
    Checked(bool),
}

impl Outcome {
    fn changed_state(&self) -> bool {
        matches!(self, Outcome::Allocated(_) | Outcome::Changed(Ok(true)))
    }
}

fn apply_model(m: &mut Model, op: &Op) -> Outcome {
    match *op {
        Op::Allocate => Outcome::Allocated(m.allocate()),
        Op::AllocateAt(c) => Outcome::Changed(m.allocate_at(c)),
        Op::Deallocate(c) => Outcome::Changed(Ok(m.allocated.remove(&c))),
        Op::Check(c) => Outcome::Checked(m.allocated.contains(&c)),
    }
}

fn apply_counter(c: &mut Counter, op: &Op) -> Outcome {
    match *op {
        Op::Allocate => Outcome::Allocated(c.allocate().unwrap()),
        Op::AllocateAt(n) => Outcome::Changed(c.allocate_at(n)),
        Op::Deallocate(n) => Outcome::Changed(Ok(c.deallocate(n))),
        Op::Check(n) => Outcome::Checked(c.check(n)),
    }
}

fn apply_immutable(c: &CounterImmutable, op: &Op) -> (Outcome, CounterImmutable) {
    match *op {
        Op::Allocate => {
            let (n, next) = c.allocate().unwrap();
            (Outcome::Allocated(n), next)
        }
        Op::AllocateAt(n) => match c.allocate_at(n) {
            Ok((changed, next)) => (Outcome::Changed(Ok(changed)), next),
            Err(e) => (Outcome::Changed(Err(e)), c.clone()),
        },
        Op::Deallocate(n) => {
            let (changed, next) = c.deallocate(n);
            (Outcome::Changed(Ok(changed)), next)
        }
        Op::Check(n) => (Outcome::Checked(c.check(n)), c.clone()),
    }
}

fn assert_matches_model(check: impl Fn(u64) -> bool, m: &Model) {
    let upper = m.allocated.last().copied().unwrap_or(0).max(COUNTER_RANGE) + 64;
    for counter in 0..upper {
        assert_eq!(
            check(counter),
            m.allocated.contains(&counter),
            "counter {counter}"
        );
    }
}

fn block_size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(32usize), Just(64usize)]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_counter_matches_model(
        begin in 0u64..50,
        block_size in block_size_strategy(),
        ops in prop::collection::vec(any::<Op>(), 0..=1500),
    ) {
        let mut c = Counter::new(begin, block_size).unwrap();
        let mut m = Model::new(begin);

        for op in &ops {
            let got = apply_counter(&mut c, op);
            let expected = apply_model(&mut m, op);
            prop_assert_eq!(got, expected, "op {:?}", op);
        }

        let held = validate_tree(c.root());
        prop_assert_eq!(held, m.allocated.len() as u64);
        assert_matches_model(|n| c.check(n), &m);
    }

    #[test]
    fn prop_transaction_matches_single_operations(
        begin in 0u64..50,
        ops in prop::collection::vec(any::<Op>(), 0..=300),
    ) {
        let base = CounterImmutable::new(begin, 32).unwrap();
        let mut stepwise = base.clone();
        let mut changed = false;
        for op in &ops {
            let (outcome, next) = apply_immutable(&stepwise, op);
            changed |= outcome.changed_state();
            stepwise = next;
        }

        let mut outcomes = Vec::new();
        let batched = base.transaction(|ct| {
            for op in &ops {
                outcomes.push(apply_counter(ct, op));
            }
        });

        prop_assert_eq!(batched.ptr_eq(&base), !changed);
        prop_assert_eq!(outcomes.iter().any(Outcome::changed_state), changed);
        for n in 0..COUNTER_RANGE + 64 {
            prop_assert_eq!(batched.check(n), stepwise.check(n), "counter {}", n);
        }
        prop_assert!((0..COUNTER_RANGE).all(|n| !base.check(n)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_versions_are_independent(
        begin in 0u64..50,
        ops in prop::collection::vec(any::<Op>(), 0..=300),
    ) {
        let mut versions = vec![(CounterImmutable::new(begin, 32).unwrap(), Model::new(begin))];

        for op in &ops {
            let (current, model) = versions.last().unwrap();
            let mut model = model.clone();
            let (got, next) = apply_immutable(current, op);
            let expected = apply_model(&mut model, op);
            prop_assert_eq!(&got, &expected, "op {:?}", op);
            prop_assert_eq!(next.ptr_eq(current), !got.changed_state());
            versions.push((next, model));
        }

        for (version, model) in &versions {
            prop_assert_eq!(validate_tree(version.root()), model.allocated.len() as u64);
            assert_matches_model(|n| version.check(n), model);
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

// Counters on leaf, node and depth boundaries for block size 32.
const BOUNDARY_COUNTERS: [u64; 6] = [0, 31, 32, 1023, 1024, 40_000];

#[test]
fn exhaustive_allocate_order_small_set() {
    for_each_permutation(&BOUNDARY_COUNTERS, |perm| {
        let mut c = Counter::default();
        for n in perm {
            assert_eq!(c.allocate_at(n), Ok(true));
            validate_tree(c.root());
        }
        assert_eq!(c.depth(), 3);
        assert_eq!(validate_tree(c.root()), BOUNDARY_COUNTERS.len() as u64);
        assert_eq!(c.allocate().unwrap(), 1);
    });
}

#[test]
fn exhaustive_deallocate_order_small_set() {
    let mut base = Counter::default();
    for n in BOUNDARY_COUNTERS {
        assert_eq!(base.allocate_at(n), Ok(true));
    }
    let published = base.snapshot();

    for_each_permutation(&BOUNDARY_COUNTERS, |perm| {
        let mut c = published.transient();
        for n in perm {
            assert!(c.deallocate(n));
            assert!(!c.deallocate(n));
            validate_tree(c.root());
        }
        assert_eq!(c.depth(), 3);
        assert!(c.root().children().is_empty());
        assert_eq!(c.allocate().unwrap(), 0);
    });

    for n in BOUNDARY_COUNTERS {
        assert!(published.check(n));
    }
    assert_eq!(validate_tree(published.root()), BOUNDARY_COUNTERS.len() as u64);
}
