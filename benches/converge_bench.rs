//! Convergence Benchmarks — Hot-Path Performance Validation
//!
//! Benchmarks the per-cycle hot path: ladder construction and the
//! convergence diff against a populated live order set.
//!
//! Run with: cargo bench --bench converge_bench

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bitmex_ladder_bot::domain::ladder::{
    self, DesiredOrder, LadderParams, QuoteAnchors, SizeMode,
};
use bitmex_ladder_bot::domain::market::{Order, OrderSide, Position, Ticker};
use bitmex_ladder_bot::usecases::order_manager::plan_convergence;

const TICK: f64 = 0.5;

fn params() -> LadderParams {
    LadderParams {
        order_pairs: 6,
        interval: 0.005,
        min_spread: 0.0015,
        maintain_spreads: false,
        size_mode: SizeMode::Fixed { start: 100, step: 50 },
    }
}

fn ticker() -> Ticker {
    Ticker {
        buy: 50_000.0,
        sell: 50_100.0,
        mid: 50_050.0,
    }
}

fn ladders() -> (Vec<DesiredOrder>, Vec<DesiredOrder>) {
    let p = params();
    let anchors = QuoteAnchors::from_market(&ticker(), TICK, None, None, &p);
    (
        ladder::build_side(&anchors, &p, OrderSide::Buy, TICK),
        ladder::build_side(&anchors, &p, OrderSide::Sell, TICK),
    )
}

fn live_book(buys: &[DesiredOrder], sells: &[DesiredOrder]) -> Vec<Order> {
    buys.iter()
        .chain(sells)
        .enumerate()
        .map(|(i, d)| Order {
            order_id: format!("ord-{i}"),
            cl_ord_id: Some(format!("ladder_{i}")),
            side: d.side,
            // Nudge prices so roughly half the book needs amending.
            price: if i % 2 == 0 { d.price } else { d.price * 1.02 },
            order_qty: d.qty,
            cum_qty: 0,
            leaves_qty: d.qty,
            ord_status: "New".to_string(),
        })
        .collect()
}

/// Benchmark anchor derivation plus both ladder sides.
fn bench_ladder_build(c: &mut Criterion) {
    let p = params();
    let t = ticker();

    c.bench_function("ladder_build_6_pairs", |b| {
        b.iter(|| {
            let anchors =
                QuoteAnchors::from_market(black_box(&t), black_box(TICK), None, None, &p);
            let buys = ladder::build_side(&anchors, &p, OrderSide::Buy, TICK);
            let sells = ladder::build_side(&anchors, &p, OrderSide::Sell, TICK);
            (buys, sells)
        });
    });
}

/// Benchmark the convergence diff with a half-drifted live book.
fn bench_convergence_plan(c: &mut Criterion) {
    let (buys, sells) = ladders();
    let live = live_book(&buys, &sells);
    let position = Position::flat("XBTUSD", 25.0);

    c.bench_function("converge_12_live_orders", |b| {
        b.iter(|| {
            plan_convergence(
                black_box(&live),
                black_box(&buys),
                black_box(&sells),
                &position,
                0.01,
            )
        });
    });
}

/// Benchmark the no-op case: an unchanged book must diff to nothing.
fn bench_convergence_idempotent(c: &mut Criterion) {
    let (buys, sells) = ladders();
    let live: Vec<Order> = buys
        .iter()
        .chain(&sells)
        .enumerate()
        .map(|(i, d)| Order {
            order_id: format!("ord-{i}"),
            cl_ord_id: None,
            side: d.side,
            price: d.price,
            order_qty: d.qty,
            cum_qty: 0,
            leaves_qty: d.qty,
            ord_status: "New".to_string(),
        })
        .collect();
    let position = Position::flat("XBTUSD", 25.0);

    c.bench_function("converge_unchanged_book", |b| {
        b.iter(|| {
            plan_convergence(
                black_box(&live),
                black_box(&buys),
                black_box(&sells),
                &position,
                0.01,
            )
        });
    });
}

criterion_group!(
    benches,
    bench_ladder_build,
    bench_convergence_plan,
    bench_convergence_idempotent,
);
criterion_main!(benches);
