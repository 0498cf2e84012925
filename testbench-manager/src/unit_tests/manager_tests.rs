// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use assert_matches::assert_matches;
use testbench_base::data_types::{Checkpoint, TimeDelta};

use super::*;
use crate::{
    config::ConfigError,
    ingestion::IngestionOutcome,
    records::{EntityRecord, RequestRecord, StatusCode, TaskRecord},
    store::{AuxCollection, DocumentStore},
    test_utils::{
        score, score_with_status, signature, start_time, test_config, test_key,
        TestEnvironment, SESSION_PARAM, START_HEIGHT,
    },
};

async fn load_entity(env: &TestEnvironment, kind: EntityKind) -> EntityRecord {
    env.store
        .load_entity(kind, &test_key())
        .await
        .unwrap()
        .expect("entity should be stored")
}

fn triggered(triggers: &[crate::TaskTrigger]) -> Vec<(&str, u64)> {
    triggers
        .iter()
        .map(|trigger| (trigger.task.as_str(), trigger.quantity))
        .collect()
}

async fn document_count(env: &TestEnvironment, id: &RequestId) -> usize {
    let mut total = 0;
    for collection in AuxCollection::ALL {
        total += env.store.count(collection, id).await;
    }
    total
}

#[tokio::test]
async fn test_first_tick_creates_entity() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();

    let outcome = env
        .manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    assert!(outcome.is_new);
    assert_eq!(triggered(&outcome.triggers), [("tokenizer", 1)]);
    assert_eq!(outcome.triggers[0].workflow_id(), "signatures-tokenizer-pokt1supplier-0001");

    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert_eq!(entity.combine_tasks().len(), 3);
    assert_eq!(entity.last_seen, Checkpoint::new(START_HEIGHT, start_time()));
    assert_eq!(
        entity.last_process,
        Some(Checkpoint::new(START_HEIGHT, start_time()))
    );

    let outcome = env
        .manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    assert!(!outcome.is_new);
    assert_eq!(load_entity(&env, EntityKind::Supplier).await.combine_tasks().len(), 3);
}

#[tokio::test]
async fn test_nodes_have_no_process_checkpoint() {
    let env = TestEnvironment::new(test_config());
    env.manager
        .analyze_entity(EntityKind::Node, &test_key())
        .await
        .unwrap();
    assert_eq!(load_entity(&env, EntityKind::Node).await.last_process, None);
    assert!(env
        .store
        .load_entity(EntityKind::Supplier, &test_key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_sampling_cycle() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    let manager = &env.manager;
    manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();

    let request_id = env
        .add_request("r1", &key, ("signatures", "tokenizer"), 1, &[5])
        .await;
    env.store.insert_prompt(request_id.clone()).await;
    env.store.insert_response(request_id.clone()).await;
    env.network.set_height(BlockHeight(1_002)).await;
    env.add_result(
        &request_id,
        0,
        BlockHeight(1_002),
        vec![signature("llama-3", StatusCode::Ok)],
    )
    .await;

    let outcome = manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestionOutcome::Consumed {
            samples: 1,
            stored: 1,
            successful: 1
        }
    );
    assert_eq!(document_count(&env, &request_id).await, 0);

    let entity = load_entity(&env, EntityKind::Supplier).await;
    let tokenizer = entity.find_task("signatures", "tokenizer").unwrap();
    assert!(tokenizer.is_ok());
    assert_eq!(tokenizer.last_ok().height, BlockHeight(1_002));
    assert_eq!(entity.last_seen.height, BlockHeight(1_002));

    // The signature was just taken: only the dependent tasks are due.
    let outcome = manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    assert_eq!(triggered(&outcome.triggers), [("mmlu", 10), ("arc", 10)]);

    // One session later the signature is refreshed too.
    env.network.set_height(BlockHeight(1_006)).await;
    let outcome = manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    assert_eq!(
        triggered(&outcome.triggers),
        [("tokenizer", 1), ("mmlu", 10), ("arc", 10)]
    );
}

#[tokio::test]
async fn test_expired_samples_are_evicted_before_admission() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let request_id = env.add_request("m1", &key, ("lmeh", "mmlu"), 3, &[]).await;
    env.add_result(
        &request_id,
        0,
        START_HEIGHT,
        vec![score(0.9, 1), score(0.8, 2), score(0.7, 3)],
    )
    .await;
    env.manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert_eq!(entity.find_task("lmeh", "mmlu").unwrap().ok_samples(), 3);

    env.clock.add(TimeDelta::from_days(6));
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert!(mmlu.buffer().is_empty());
    assert_eq!(mmlu.ok_samples(), 0);
    assert!(!mmlu.is_ok());
}

#[tokio::test]
async fn test_stale_tasks_are_pruned() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let request_id = env
        .add_request("h1", &key, ("lmeh", "hellaswag"), 1, &[])
        .await;
    env.add_result(&request_id, 0, START_HEIGHT, vec![score(0.5, 1)])
        .await;
    env.manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert!(entity.find_task("lmeh", "hellaswag").is_some());

    env.clock.add(TimeDelta::from_days(33));
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert!(entity.find_task("lmeh", "hellaswag").is_none());
    // Configured tasks come back empty.
    assert_eq!(entity.combine_tasks().len(), 3);
    assert!(entity
        .combine_tasks()
        .iter()
        .all(|record| record.buffer().is_empty()));
}

#[tokio::test]
async fn test_session_length_errors() {
    let mut config = test_config();
    config.session_length_param = "blocks_in_session".to_owned();
    let env = TestEnvironment::new(config);
    assert_matches!(
        env.manager.analyze_entity(EntityKind::Supplier, &test_key()).await,
        Err(ManagerError::Network(NetworkError::MissingParam(key))) if key == "blocks_in_session"
    );

    let env = TestEnvironment::new(test_config());
    env.network.set_param(SESSION_PARAM, "four").await;
    assert_matches!(
        env.manager.block_data().await,
        Err(ManagerError::Network(NetworkError::MalformedParam { value, .. })) if value == "four"
    );
    assert!(env
        .store
        .load_entity(EntityKind::Supplier, &test_key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_empty_buffer_limits_are_config_errors() {
    let mut config = test_config();
    config.limits.numerical.buffer_capacity = 0;
    let env = TestEnvironment::new(config);
    assert_matches!(
        env.manager.analyze_entity(EntityKind::Supplier, &test_key()).await,
        Err(ManagerError::Config(ConfigError::InvalidLimits(name, _))) if name == "lmeh/mmlu"
    );
    assert!(env
        .store
        .load_entity(EntityKind::Supplier, &test_key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_dropped_request_is_discarded() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    let request_id = env.add_request("d1", &key, ("lmeh", "mmlu"), 2, &[1, 2]).await;
    env.store
        .insert_request(RequestRecord {
            drop: true,
            ..env.store.load_request(&request_id).await.unwrap().unwrap()
        })
        .await;
    env.add_result(&request_id, 0, START_HEIGHT, vec![score(0.5, 1)])
        .await;

    let outcome = env
        .manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    assert_eq!(outcome, IngestionOutcome::Dropped);
    assert_eq!(document_count(&env, &request_id).await, 0);
    // The requester is not touched, not even created.
    assert!(env
        .store
        .load_entity(EntityKind::Supplier, &key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missing_documents() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    let unknown = RequestId::new("unknown");
    assert_matches!(
        env.manager.process_result(EntityKind::Supplier, &unknown).await,
        Err(ManagerError::RequestNotFound(id)) if id == unknown
    );

    let request_id = env.add_request("r1", &key, ("lmeh", "mmlu"), 1, &[]).await;
    assert_matches!(
        env.manager.process_result(EntityKind::Supplier, &request_id).await,
        Err(ManagerError::EntityNotFound { kind: EntityKind::Supplier, .. })
    );

    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    assert_matches!(
        env.manager.process_result(EntityKind::Supplier, &request_id).await,
        Err(ManagerError::ResultNotFound(id)) if id == request_id
    );
    assert_eq!(env.store.count(AuxCollection::Requests, &request_id).await, 1);
}

#[tokio::test]
async fn test_failed_evaluation_is_consumed() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();

    let failed = env.add_request("f1", &key, ("lmeh", "mmlu"), 1, &[4]).await;
    env.add_result(&failed, 3, BlockHeight(1_001), vec![score(0.5, 4)])
        .await;
    let empty = env.add_request("e1", &key, ("lmeh", "mmlu"), 1, &[]).await;
    env.add_result(&empty, 0, BlockHeight(1_001), Vec::new())
        .await;

    for (request_id, samples) in [(&failed, 1), (&empty, 0)] {
        let outcome = env
            .manager
            .process_result(EntityKind::Supplier, request_id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestionOutcome::Consumed {
                samples,
                stored: 0,
                successful: 0
            }
        );
        assert_eq!(document_count(&env, request_id).await, 0);
    }

    let entity = load_entity(&env, EntityKind::Supplier).await;
    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert!(mmlu.buffer().is_empty());
    assert_eq!(mmlu.last_seen(), Checkpoint::new(BlockHeight(0), start_time()));
    assert_eq!(mmlu.last_ok(), Checkpoint::default());
}

#[tokio::test]
async fn test_sample_statuses() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();

    let mixed = env.add_request("m1", &key, ("lmeh", "arc"), 3, &[]).await;
    env.add_result(
        &mixed,
        0,
        BlockHeight(1_001),
        vec![
            score(0.8, 1),
            score_with_status(0.0, 2, StatusCode::Evaluation),
            score_with_status(0.0, 3, StatusCode::PocketRpc),
        ],
    )
    .await;
    let outcome = env
        .manager
        .process_result(EntityKind::Supplier, &mixed)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestionOutcome::Consumed {
            samples: 3,
            stored: 2,
            successful: 1
        }
    );
    let entity = load_entity(&env, EntityKind::Supplier).await;
    let arc = entity.find_task("lmeh", "arc").unwrap();
    // Infrastructure failures are not stored.
    assert_eq!(arc.buffer().len(), 2);
    assert_matches!(arc, TaskRecord::Numerical(record) if record.stats.error_rate == 0.5);
    assert_eq!(arc.last_ok().height, BlockHeight(1_001));

    let punished = env.add_request("p1", &key, ("lmeh", "mmlu"), 1, &[]).await;
    env.add_result(
        &punished,
        0,
        BlockHeight(1_003),
        vec![score_with_status(0.0, 1, StatusCode::Supplier)],
    )
    .await;
    env.manager
        .process_result(EntityKind::Supplier, &punished)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert_eq!(mmlu.last_seen().height, BlockHeight(1_003));
    assert_eq!(mmlu.last_ok(), Checkpoint::default());
    assert_eq!(entity.last_seen.height, BlockHeight(1_001));
}

#[tokio::test]
async fn test_last_seen_is_monotonic() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();

    for (id, task, height) in [("r1", "mmlu", 1_010), ("r2", "arc", 1_005), ("r3", "mmlu", 1_003)] {
        let request_id = env.add_request(id, &key, ("lmeh", task), 1, &[]).await;
        env.add_result(&request_id, 0, BlockHeight(height), vec![score(0.5, 1)])
            .await;
        env.manager
            .process_result(EntityKind::Supplier, &request_id)
            .await
            .unwrap();
    }

    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert_eq!(entity.last_seen.height, BlockHeight(1_010));
    let last_ok = |task| entity.find_task("lmeh", task).unwrap().last_ok().height;
    assert_eq!(last_ok("mmlu"), BlockHeight(1_010));
    assert_eq!(last_ok("arc"), BlockHeight(1_005));
    assert_eq!(entity.find_task("lmeh", "mmlu").unwrap().ok_samples(), 2);

    // An older result of another framework does not lower the entity checkpoint, neither
    // when it is ingested nor on the next tick.
    let request_id = env
        .add_request("s1", &key, ("signatures", "tokenizer"), 1, &[])
        .await;
    env.add_result(
        &request_id,
        0,
        BlockHeight(1_002),
        vec![signature("llama-3", StatusCode::Ok)],
    )
    .await;
    env.manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    let tokenizer = entity.find_task("signatures", "tokenizer").unwrap();
    assert_eq!(tokenizer.last_ok().height, BlockHeight(1_002));
    assert_eq!(entity.last_seen.height, BlockHeight(1_010));

    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert_eq!(entity.last_seen.height, BlockHeight(1_010));
}

#[tokio::test]
async fn test_type_mismatch_keeps_request() {
    let env = TestEnvironment::new(test_config());
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let request_id = env
        .add_request("t1", &key, ("signatures", "tokenizer"), 1, &[])
        .await;
    env.add_result(&request_id, 0, START_HEIGHT, vec![score(0.5, 1)])
        .await;

    assert_matches!(
        env.manager.process_result(EntityKind::Supplier, &request_id).await,
        Err(ManagerError::Record(RecordError::TypeMismatch { .. }))
    );
    assert_eq!(env.store.count(AuxCollection::Requests, &request_id).await, 1);
}

#[tokio::test]
async fn test_deletions_are_best_effort() {
    let env = TestEnvironment::new(test_config());
    let request_id = env
        .add_request("r1", &test_key(), ("lmeh", "mmlu"), 2, &[1, 2])
        .await;
    env.store.insert_prompt(request_id.clone()).await;
    env.store.insert_response(request_id.clone()).await;
    env.add_result(&request_id, 0, START_HEIGHT, Vec::new()).await;
    env.store.fail_deletions(AuxCollection::Prompts).await;

    assert_eq!(env.manager.discard_request_data(&request_id).await, 5);
    assert_eq!(env.store.count(AuxCollection::Prompts, &request_id).await, 1);
    assert_eq!(document_count(&env, &request_id).await, 1);
}

#[tokio::test]
async fn test_retained_request_data() {
    let mut config = test_config();
    config.develop.retain_request_data = true;
    let env = TestEnvironment::new(config);
    let key = test_key();
    env.manager
        .analyze_entity(EntityKind::Supplier, &key)
        .await
        .unwrap();
    let request_id = env.add_request("r1", &key, ("lmeh", "mmlu"), 1, &[8]).await;
    env.add_result(&request_id, 0, START_HEIGHT, vec![score(0.5, 8)])
        .await;

    env.manager
        .process_result(EntityKind::Supplier, &request_id)
        .await
        .unwrap();
    assert_eq!(document_count(&env, &request_id).await, 3);
    let entity = load_entity(&env, EntityKind::Supplier).await;
    assert_eq!(entity.find_task("lmeh", "mmlu").unwrap().buffer().len(), 1);
}
