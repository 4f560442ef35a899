use criterion::{Criterion, criterion_group, criterion_main};
use mloxmaker::{ModSource, RuleDraft, RuleSet};
use std::hint::black_box;

/// A chain of `len` mods where each one requires its predecessor.
fn chain(len: usize) -> RuleSet {
    let mut rule_set = RuleSet::new();
    for i in 0..len {
        rule_set
            .upsert_mod(&format!("Mod{:04}.esp", i), None, ModSource::Local)
            .unwrap();
    }
    for i in 1..len {
        rule_set
            .add_rule(RuleDraft::requires(
                format!("Mod{:04}.esp", i),
                format!("Mod{:04}.esp", i - 1),
            ))
            .unwrap();
    }
    rule_set
}

fn bench_topological_order(c: &mut Criterion) {
    let rule_set = chain(500);
    c.bench_function("topological_order_500", |b| {
        b.iter(|| black_box(rule_set.topological_order().unwrap()))
    });
}

fn bench_cycle_rejection(c: &mut Criterion) {
    let rule_set = chain(500);
    let closing = RuleDraft::requires("Mod0000.esp", "Mod0499.esp");
    c.bench_function("validate_cycle_500", |b| {
        b.iter(|| black_box(rule_set.validate(&closing).is_err()))
    });
}

criterion_group!(benches, bench_topological_order, bench_cycle_rejection);
criterion_main!(benches);
