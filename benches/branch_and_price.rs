use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oaar::lp::{
    BinaryBranchAndBound, BinaryProgram, RowSense, SearchLimits, SubproblemSolver,
};
use oaar::network::reader;
use oaar::{BranchAndPrice, BranchAndPriceConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const METRO: &str = include_str!("../data/metro.oaar");

fn bench_solve(c: &mut Criterion) {
    let network = reader::parse(METRO).unwrap();
    let mut group = c.benchmark_group("branch_and_price");
    for parallel in [false, true] {
        let name = if parallel { "metro_parallel" } else { "metro" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let config = BranchAndPriceConfig {
                    parallel_pricing: parallel,
                    ..Default::default()
                };
                let mut search = BranchAndPrice::new(network.clone(), config).unwrap();
                black_box(search.solve().unwrap())
            })
        });
    }
    group.finish();
}

fn random_knapsack(n: usize, seed: u64) -> BinaryProgram {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut program = BinaryProgram::new(n);
    let mut weights = Vec::with_capacity(n);
    for j in 0..n {
        program.objective[j] = rng.gen_range(1.0..10.0);
        weights.push((j, rng.gen_range(1.0..10.0)));
    }
    let capacity: f64 = weights.iter().map(|&(_, w)| w).sum::<f64>() / 2.0;
    program.add_row(weights, RowSense::Le, capacity);
    program
}

fn bench_k_best(c: &mut Criterion) {
    let solver = BinaryBranchAndBound::default();
    let program = random_knapsack(16, 42);
    c.bench_function("k_best_knapsack_16", |b| {
        b.iter(|| black_box(solver.solve_best(&program, 3, &SearchLimits::unlimited())))
    });
}

criterion_group!(benches, bench_solve, bench_k_best);
criterion_main!(benches);
