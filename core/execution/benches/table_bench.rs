use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tessera_execution::abi::{encode_with_selector, function_selector};
use tessera_execution::precompiles::utilities::table_address;
use tessera_execution::{
    addresses, init_system_tables, Address, BlockHeader, BlockScheduler, ExecutorConfig, Hash,
    Keccak256Secp256k1, MemoryLedger, Transaction, TransactionExecutor,
};
use tessera_storage::MemoryStorage;

fn mk_tx(nonce: u64, to: Address, input: Vec<u8>) -> Transaction {
    Transaction {
        hash: Hash::keccak(&nonce.to_be_bytes()),
        sender: Address::from_low_u64(0x1000 + nonce % 64),
        to: Some(to),
        input,
        gas_limit: 30_000_000,
        nonce,
    }
}

fn gen_inserts(count: usize, seed: u64) -> Vec<Transaction> {
    let suite = Keccak256Secp256k1;
    let selector = function_selector(&suite, "insert((string,string[]))");
    let table = table_address(&suite, "/tables/bench");
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let key = format!("{:08}", rng.gen_range(0..1_000_000u32));
            let row = ((key, vec![format!("v{}", i)]),);
            mk_tx(i as u64 + 1, table, encode_with_selector(selector, &row))
        })
        .collect()
}

async fn scheduler() -> BlockScheduler {
    let backend = Arc::new(MemoryStorage::new());
    init_system_tables(backend.as_ref())
        .await
        .expect("init system tables");
    let config = ExecutorConfig {
        enable_metrics: false,
        ..ExecutorConfig::default()
    };
    let executor = TransactionExecutor::new(config, backend, Arc::new(MemoryLedger::new()));
    BlockScheduler::new(Arc::new(executor))
}

fn bench_insert_block(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let create = encode_with_selector(
        function_selector(&Keccak256Secp256k1, "createTable(string,(string,string[]))"),
        &("bench".to_string(), ("id".to_string(), vec!["value".to_string()])),
    );
    let inserts = gen_inserts(256, 7);

    c.bench_function("execute_block 256 inserts", |b| {
        b.iter_batched(
            || {
                runtime.block_on(async {
                    let scheduler = scheduler().await;
                    let setup = vec![mk_tx(0, addresses::TABLE_MANAGER, create.clone())];
                    scheduler
                        .execute_block(BlockHeader::new(1, Hash::default(), 0), &setup)
                        .await
                        .expect("create table");
                    scheduler
                })
            },
            |scheduler| {
                let receipts = runtime
                    .block_on(scheduler.execute_block(
                        BlockHeader::new(2, Hash::default(), 0),
                        black_box(&inserts),
                    ))
                    .expect("insert block");
                black_box(receipts);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_selector_encoding(c: &mut Criterion) {
    let suite = Keccak256Secp256k1;
    c.bench_function("encode insert call", |b| {
        b.iter(|| {
            let selector = function_selector(&suite, "insert((string,string[]))");
            let row = (("00000042".to_string(), vec!["value".to_string()]),);
            black_box(encode_with_selector(selector, black_box(&row)))
        })
    });
}

criterion_group!(benches, bench_insert_block, bench_selector_encoding);
criterion_main!(benches);
