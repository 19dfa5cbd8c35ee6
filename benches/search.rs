use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use joust::bandit::{BanditParams, JointBandit};
use joust::eval::Rollout;
use joust::frame::Episode;
use joust::game::Game;
use joust::games::duel::{Duel, UnitDef};
use joust::search::{Budget, Output, Position, RollOptions, Search, Store};

fn bench_bandit_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandit");
    for (name, params) in [
        ("ucb", BanditParams::Ucb { c: 1.0 }),
        ("exp3", BanditParams::Exp3 { gamma: 0.1 }),
    ] {
        group.bench_function(name, |b| {
            let mut rng = SmallRng::seed_from_u64(1);
            let mut bandit = JointBandit::new(&params);
            bandit.init(9, 9);
            b.iter(|| {
                let picks = bandit.select(&mut rng, &params);
                bandit.update(black_box(picks), 0.5, 0.5);
            });
        });
    }
    group.finish();
}

fn sample_duel() -> Duel {
    let team: Vec<UnitDef> = (1..=3)
        .map(|species| UnitDef {
            species,
            moves: [1, 2, 4, 6],
        })
        .collect();
    Duel::new(&team, &team, 9)
}

fn bench_search_iterations(c: &mut Criterion) {
    c.bench_function("search/1024-rollout", |b| {
        let params = BanditParams::Ucb { c: 1.0 };
        let position = Position::new(sample_duel());
        b.iter(|| {
            let mut rng = SmallRng::seed_from_u64(2);
            let mut store: Store<Duel> = Store::new(&params, false, 1);
            let mut eval = Rollout::default();
            let mut driver = Search::new(RollOptions::default(), None);
            black_box(driver.run(
                &mut rng,
                &Budget::Iterations(1024),
                &params,
                &mut store,
                &mut eval,
                &position,
            ))
        });
    });
}

fn bench_frame_codec(c: &mut Criterion) {
    let duel = sample_duel();
    let p1 = duel.legal(joust::game::Player::P1);
    let p2 = duel.legal(joust::game::Player::P2);
    let mut output = Output::new(p1.len(), p2.len(), p1, p2);
    output.iterations = 4096;

    let mut episode = Episode::new(duel);
    for _ in 0..64 {
        episode.push(&output, 0x10, 0x10);
    }
    episode.result = joust::game::GameStatus::Win;

    c.bench_function("codec/encode-64", |b| {
        b.iter(|| {
            let mut bytes = Vec::with_capacity(episode.byte_len());
            episode.write(&mut bytes);
            black_box(bytes)
        });
    });

    let mut bytes = Vec::new();
    episode.write(&mut bytes);
    c.bench_function("codec/decode-64", |b| {
        b.iter(|| black_box(Episode::<Duel>::read(&bytes).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_bandit_select,
    bench_search_iterations,
    bench_frame_codec
);
criterion_main!(benches);
