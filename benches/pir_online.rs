use piano_ann::pir::{batch::BatchPianoPir, server::PianoServer, PianoPir};
use piano_ann::PianoParams;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn main() {
    divan::main();
}

#[derive(Debug)]
struct DbConfig {
    db_size: usize,
    entry_words: usize,
}

const ARGS: &[DbConfig] = &[
    DbConfig {
        db_size: 1usize << 16,
        entry_words: 16,
    },
    DbConfig {
        db_size: 1usize << 20,
        entry_words: 16,
    },
];

fn random_raw_db(rng: &mut ChaCha8Rng, db_size: usize, entry_words: usize) -> Vec<u64> {
    (0..db_size * entry_words).map(|_| rng.random()).collect()
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(60), skip_ext_time = true)]
fn client_query(bencher: divan::Bencher, cfg: &DbConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let raw_db = random_raw_db(&mut rng, cfg.db_size, cfg.entry_words);

    let mut pir = PianoPir::new(cfg.db_size, cfg.entry_words * 8, raw_db, 40).unwrap();
    pir.preprocessing().unwrap();

    let db_size = cfg.db_size as u64;
    bencher.bench_local(move || {
        let idx = rng.random_range(0..db_size);
        divan::black_box(pir.query(idx, true)).is_ok()
    });
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(60), skip_ext_time = true)]
fn server_respond(bencher: divan::Bencher, cfg: &DbConfig) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let raw_db = random_raw_db(&mut rng, cfg.db_size, cfg.entry_words);

    let params = PianoParams::derive(cfg.db_size, cfg.entry_words * 8, 40).unwrap();
    let chunk_mask = (params.chunk_size - 1) as u64;
    let set_size = params.set_size;
    let server = PianoServer::new(params, raw_db).unwrap();

    bencher.bench_local(move || {
        let offsets: Vec<u32> = (0..set_size).map(|_| (rng.next_u64() & chunk_mask) as u32).collect();
        divan::black_box(server.private_query(&offsets))
    });
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(120), skip_ext_time = true)]
fn batch_query(bencher: divan::Bencher, cfg: &DbConfig) {
    const BATCH_SIZE: usize = 32;

    let mut rng = ChaCha8Rng::from_os_rng();
    let raw_db = random_raw_db(&mut rng, cfg.db_size, cfg.entry_words);

    let mut pir = BatchPianoPir::new(cfg.db_size, cfg.entry_words * 8, BATCH_SIZE, raw_db, 20).unwrap();
    pir.preprocessing().unwrap();

    let db_size = cfg.db_size as u64;
    bencher.bench_local(move || {
        let batch: Vec<u64> = (0..BATCH_SIZE).map(|_| rng.random_range(0..db_size)).collect();
        divan::black_box(pir.query(&batch)).is_ok()
    });
}
