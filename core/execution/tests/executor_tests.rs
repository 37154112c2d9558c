// tessera/core/execution/tests/executor_tests.rs

mod common;

use common::{
    input, output, script, sender, table_at, FlakyStorage, Op, TestChain, YieldingStorage,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tessera_execution::ledger::SYSTEM_KEY_TX_GAS_LIMIT;
use tessera_execution::{
    addresses, codes, lock_key, Address, BlockHeader, BlockScheduler, ExecutionMessage,
    ExecutorConfig, ExecutorError, ExecutorState, Hash, MessageType, Transaction, TwoPCParams,
};
use tessera_storage::{StorageInterface, SYS_TABLES};

type BfsEntry = (String, String, Vec<String>);

const INSERT: &str = "insert((string,string[]))";

fn create_table_data(name: &str) -> Vec<u8> {
    input(
        "createTable(string,(string,string[]))",
        &(name.to_string(), ("id".to_string(), vec!["v".to_string()])),
    )
}

fn insert_data(key: &str, value: &str) -> Vec<u8> {
    input(INSERT, &((key.to_string(), vec![value.to_string()]),))
}

fn tx(nonce: u64, to: Address, input: Vec<u8>) -> Transaction {
    Transaction {
        hash: Hash::keccak(format!("tx{}", nonce).as_bytes()),
        sender: sender(),
        to: Some(to),
        input,
        gas_limit: 50_000_000,
        nonce,
    }
}

/// Runs `txs` one after another in block `number` and commits it.
async fn run_serially(chain: &TestChain, number: u64, txs: &[Transaction]) -> Vec<ExecutionMessage> {
    chain.open_block(number).await;
    let mut receipts = Vec::new();
    for (index, tx) in txs.iter().enumerate() {
        let root = chain
            .executor
            .transaction_message(index as i64, tx)
            .await
            .unwrap();
        receipts.push(chain.drive(root).await);
    }
    chain.commit_block(number).await;
    receipts
}

fn summary(receipts: &[ExecutionMessage]) -> Vec<(MessageType, Vec<u8>, u64)> {
    receipts
        .iter()
        .map(|r| (r.message_type, r.data.clone(), r.gas_available))
        .collect()
}

async fn row(chain: &TestChain, table: &str, key: &str) -> Option<String> {
    chain
        .backend
        .get_row(table, key)
        .await
        .unwrap()
        .map(|entry| entry.field(0).to_string())
}

/// A chain over [`YieldingStorage`] holding table `/tables/t (id, v)` and a
/// script contract that reads twenty of its own rows, then inserts `k` into
/// `/tables/t` through a sub-call.
async fn slow_writer_chain(config: ExecutorConfig) -> (TestChain, Address) {
    let chain = TestChain::with_backend(Arc::new(YieldingStorage::new()), config).await;
    chain.open_block(1).await;
    assert_eq!(chain.create_table(0, "t", "id", &["v"]).await, codes::CODE_SUCCESS);
    let mut ops: Vec<Op> = (0..20).map(|i| Op::Get { key: format!("g{}", i) }).collect();
    ops.push(Op::Call {
        to: table_at("/tables/t"),
        input: insert_data("k", "zero"),
        gas: 10_000_000,
        require_success: true,
    });
    let deployed = chain.drive(chain.deploy(1, script(&ops))).await;
    let contract = deployed.new_contract_address.unwrap();
    chain.commit_block(1).await;
    (chain, contract)
}

/// Inserts where transactions 1 and 2 race for row `k2`.
fn contended_block() -> Vec<Transaction> {
    let table = table_at("/tables/t");
    vec![
        tx(0, table, insert_data("k1", "a")),
        tx(1, table, insert_data("k2", "b")),
        tx(2, table, insert_data("k2", "c")),
        tx(3, addresses::TABLE_MANAGER, create_table_data("u")),
        tx(4, table, insert_data("k3", "d")),
    ]
}

async fn assert_contended_state(chain: &TestChain) {
    assert_eq!(row(chain, "/tables/t", "k1").await.as_deref(), Some("a"));
    assert_eq!(row(chain, "/tables/t", "k2").await.as_deref(), Some("b"));
    assert_eq!(row(chain, "/tables/t", "k3").await.as_deref(), Some("d"));
    assert!(chain.backend.open_table("/tables/u").await.unwrap().is_some());
}

#[tokio::test]
async fn test_conflicting_context_is_aborted_and_retried() {
    let chain = TestChain::new().await;
    chain.open_block(1).await;

    let first = chain
        .executor
        .execute_transaction(chain.call(0, addresses::TABLE_MANAGER, create_table_data("t")))
        .await
        .unwrap();
    assert_eq!(first.message_type, MessageType::Message);

    let second_root = chain.call(1, addresses::TABLE_MANAGER, create_table_data("t"));
    let conflict = chain
        .executor
        .execute_transaction(second_root.clone())
        .await
        .unwrap();
    assert_eq!(conflict.message_type, MessageType::KeyLock);
    assert_eq!(
        conflict.key_lock_acquired,
        Some(lock_key(SYS_TABLES, "/tables/t"))
    );
    assert!(conflict.key_locks.is_empty());
    assert_eq!(chain.executor.key_locks().holder(&lock_key(SYS_TABLES, "/tables/t")), Some(0));

    let touched = chain.executor.execute_transaction(first).await.unwrap();
    let done = chain.executor.execute_transaction(touched).await.unwrap();
    assert_eq!(output::<(i32,)>(&done), (codes::CODE_SUCCESS,));

    let retried = chain.drive(second_root).await;
    assert_eq!(output::<(i32,)>(&retried), (codes::CODE_TABLE_NAME_ALREADY_EXIST,));
    chain.commit_block(1).await;

    let info = chain.backend.open_table("/tables/t").await.unwrap().unwrap();
    assert_eq!(info.key_column, "id");
    assert_eq!(info.value_columns, vec!["v".to_string()]);
    assert_eq!(row(&chain, "/tables", "sub").await.as_deref(), Some(r#"{"t":"table"}"#));
    assert_eq!(
        row(&chain, "s_table_address", &table_at("/tables/t").to_hex()).await.as_deref(),
        Some("/tables/t")
    );
    assert!(chain.executor.key_locks().is_empty());
}

#[tokio::test]
async fn test_scheduler_settles_in_transaction_order() {
    let (parallel, contract) = slow_writer_chain(ExecutorConfig::for_testing()).await;
    let txs = vec![
        tx(0, contract, Vec::new()),
        tx(1, table_at("/tables/t"), insert_data("k", "one")),
    ];
    let scheduler = BlockScheduler::new(parallel.executor.clone());
    let receipts = scheduler
        .execute_block(BlockHeader::new(2, Hash::default(), 1_700_000_002), &txs)
        .await
        .unwrap();

    assert_eq!(receipts[0].message_type, MessageType::Finished);
    assert_eq!(output::<(i32,)>(&receipts[1]), (codes::CODE_INSERT_KEY_EXIST,));
    assert_eq!(row(&parallel, "/tables/t", "k").await.as_deref(), Some("zero"));

    let (serial, _) = slow_writer_chain(ExecutorConfig::for_testing()).await;
    let expected = run_serially(&serial, 2, &txs).await;
    assert_eq!(summary(&receipts), summary(&expected));
}

#[tokio::test]
async fn test_scheduler_retries_contended_rows() {
    let (parallel, _) = slow_writer_chain(ExecutorConfig::for_testing()).await;
    let txs = contended_block();
    let scheduler = BlockScheduler::new(parallel.executor.clone());
    let receipts = scheduler
        .execute_block(BlockHeader::new(2, Hash::default(), 1_700_000_002), &txs)
        .await
        .unwrap();

    let stats = scheduler.last_stats();
    assert!(stats.retries > 0, "{:?}", stats);
    assert!(stats.rounds > 1, "{:?}", stats);
    assert_eq!(stats.serial, 0);
    assert_eq!(output::<(i32,)>(&receipts[1]), (1,));
    assert_eq!(output::<(i32,)>(&receipts[2]), (codes::CODE_INSERT_KEY_EXIST,));
    assert_contended_state(&parallel).await;
    assert!(parallel.executor.key_locks().is_empty());

    let (serial, _) = slow_writer_chain(ExecutorConfig::for_testing()).await;
    let expected = run_serially(&serial, 2, &txs).await;
    assert_eq!(summary(&receipts), summary(&expected));
    assert_contended_state(&serial).await;
    assert_eq!(
        row(&parallel, "/tables", "sub").await,
        row(&serial, "/tables", "sub").await
    );
}

#[tokio::test]
async fn test_scheduler_falls_back_to_serial_after_round_limit() {
    let config = ExecutorConfig {
        max_scheduler_rounds: 1,
        ..ExecutorConfig::for_testing()
    };
    let (parallel, _) = slow_writer_chain(config).await;
    let txs = contended_block();
    let scheduler = BlockScheduler::new(parallel.executor.clone());
    let receipts = scheduler
        .execute_block(BlockHeader::new(2, Hash::default(), 1_700_000_002), &txs)
        .await
        .unwrap();

    let stats = scheduler.last_stats();
    assert_eq!(stats.rounds, 1);
    assert!(stats.serial > 0, "{:?}", stats);
    assert_eq!(stats.serial, stats.retries);
    assert_contended_state(&parallel).await;

    let (serial, _) = slow_writer_chain(ExecutorConfig::for_testing()).await;
    let expected = run_serially(&serial, 2, &txs).await;
    assert_eq!(summary(&receipts), summary(&expected));
}

#[tokio::test]
async fn test_scheduler_matches_serial_execution() {
    let txs: Vec<Transaction> = ["a", "b", "a", "c", "b"]
        .iter()
        .enumerate()
        .map(|(nonce, name)| Transaction {
            hash: Hash::keccak(format!("{}{}", name, nonce).as_bytes()),
            sender: sender(),
            to: Some(addresses::TABLE_MANAGER),
            input: create_table_data(name),
            gas_limit: 50_000_000,
            nonce: nonce as u64,
        })
        .collect();

    let parallel = TestChain::new().await;
    let scheduler = BlockScheduler::new(parallel.executor.clone());
    let header = BlockHeader::new(1, Hash::default(), 1_700_000_001);
    let scheduled = scheduler.execute_block(header, &txs).await.unwrap();

    let serial = TestChain::new().await;
    let expected = run_serially(&serial, 1, &txs).await;
    assert_eq!(summary(&scheduled), summary(&expected));
    for name in ["/tables/a", "/tables/b", "/tables/c"] {
        assert_eq!(
            parallel.backend.open_table(name).await.unwrap(),
            serial.backend.open_table(name).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_prepare_refuses_in_flight_contexts() {
    let chain = TestChain::new().await;
    chain.open_block(1).await;
    let outbound = chain
        .executor
        .execute_transaction(chain.call(0, addresses::TABLE_MANAGER, create_table_data("t")))
        .await
        .unwrap();
    assert_eq!(outbound.message_type, MessageType::Message);

    let params = TwoPCParams::new(1);
    assert!(matches!(
        chain.executor.prepare(&params).await,
        Err(ExecutorError::InFlightContexts(1))
    ));
    assert_eq!(chain.executor.state(), ExecutorState::Executing);

    chain.executor.rollback(&params).await.unwrap();
    assert_eq!(chain.executor.state(), ExecutorState::RolledBack);
    assert!(chain.executor.key_locks().is_empty());
    assert!(chain.backend.open_table("/tables/t").await.unwrap().is_none());
    assert!(matches!(
        chain.executor.execute_transaction(outbound).await,
        Err(ExecutorError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let storage = Arc::new(FlakyStorage::new());
    let chain = TestChain::with_backend(storage.clone(), ExecutorConfig::for_testing()).await;
    chain.open_block(1).await;
    assert_eq!(chain.create_table(0, "t", "id", &["v"]).await, codes::CODE_SUCCESS);

    let params = TwoPCParams::new(1);
    chain.executor.prepare(&params).await.unwrap();
    storage.fail_commit.store(true, Ordering::SeqCst);
    assert!(matches!(
        chain.executor.commit(&params).await,
        Err(ExecutorError::Storage(_))
    ));
    assert_eq!(chain.executor.state(), ExecutorState::RolledBack);
    assert!(chain.executor.key_locks().is_empty());
    assert!(storage.open_table("/tables/t").await.unwrap().is_none());

    storage.fail_commit.store(false, Ordering::SeqCst);
    chain.open_block(1).await;
    assert_eq!(chain.create_table(0, "t", "id", &["v"]).await, codes::CODE_SUCCESS);
    chain.commit_block(1).await;
    assert!(storage.open_table("/tables/t").await.unwrap().is_some());
}

#[tokio::test]
async fn test_ledger_cache_serves_repeat_lookups() {
    let chain = TestChain::new().await;
    chain
        .ledger
        .set_system_config(SYSTEM_KEY_TX_GAS_LIMIT, "5000000", 0);
    chain.open_block(1).await;

    let tx = Transaction {
        hash: Hash::keccak(b"gasless"),
        sender: sender(),
        to: Some(addresses::TABLE_MANAGER),
        input: create_table_data("g"),
        gas_limit: 0,
        nonce: 0,
    };
    for context_id in 0..2 {
        let message = chain
            .executor
            .transaction_message(context_id, &tx)
            .await
            .unwrap();
        assert_eq!(message.gas_available, 5_000_000);
    }
    let stats = chain.executor.ledger_cache().stats();
    assert_eq!((stats.config_misses, stats.config_hits), (1, 1));
    chain.commit_block(1).await;

    chain.open_block(2).await;
    let deployed = chain
        .drive(chain.deploy(0, script(&[Op::BlockHash { number: 1 }])))
        .await;
    let contract = deployed.new_contract_address.unwrap();
    let reply = chain.drive(chain.call(1, contract, Vec::new())).await;
    let values: Vec<String> = serde_json::from_slice(&reply.data).unwrap();
    let committed = BlockHeader::new(1, Hash::default(), 1_700_000_001).hash();
    assert_eq!(values, vec![committed.to_hex()]);
    assert!(chain.executor.ledger_cache().stats().hash_hits >= 1);
}

#[tokio::test]
async fn test_bfs_mkdir_and_list() {
    let chain = TestChain::new().await;
    chain.open_block(1).await;
    let mkdir = |path: &str| input("mkdir(string)", &(path.to_string(),));
    let list = |path: &str| input("list(string)", &(path.to_string(),));

    let reply = chain.drive(chain.call(0, addresses::BFS, mkdir("/apps/a/b"))).await;
    assert_eq!(output::<(i32,)>(&reply), (codes::CODE_SUCCESS,));
    let reply = chain.drive(chain.call(1, addresses::BFS, mkdir("/apps/a/b"))).await;
    assert_eq!(output::<(i32,)>(&reply), (codes::CODE_FILE_ALREADY_EXIST,));
    let reply = chain.drive(chain.call(2, addresses::BFS, mkdir("/data/x"))).await;
    assert_eq!(output::<(i32,)>(&reply), (codes::CODE_FILE_INVALID_PATH,));

    let reply = chain.drive(chain.call(3, addresses::BFS, list("/apps/a"))).await;
    assert_eq!(
        output::<(i32, Vec<BfsEntry>)>(&reply),
        (
            codes::CODE_SUCCESS,
            vec![("b".to_string(), "directory".to_string(), Vec::new())]
        )
    );
    let reply = chain.drive(chain.call(4, addresses::BFS, list("/apps/zz"))).await;
    assert_eq!(output::<(i32, Vec<BfsEntry>)>(&reply).0, codes::CODE_FILE_NOT_EXIST);

    // Only the table manager may create leaves.
    let touch = input(
        "touch(string,string)",
        &("/tables/forged".to_string(), "table".to_string()),
    );
    let reply = chain.drive(chain.call(5, addresses::BFS, touch)).await;
    assert_eq!(reply.message_type, MessageType::Revert);
    let reply = chain.drive(chain.call(6, addresses::BFS, list("/tables"))).await;
    assert_eq!(output::<(i32, Vec<BfsEntry>)>(&reply), (codes::CODE_SUCCESS, Vec::new()));
    chain.commit_block(1).await;

    for dir in ["/", "/apps", "/apps/a", "/apps/a/b"] {
        assert_eq!(row(&chain, dir, "type").await.as_deref(), Some("directory"), "{}", dir);
        assert_eq!(row(&chain, dir, "acl-type").await.as_deref(), Some("0"), "{}", dir);
        for key in ["acl-white", "acl-black", "extra"] {
            assert_eq!(row(&chain, dir, key).await.as_deref(), Some(""), "{} {}", dir, key);
        }
    }
}
