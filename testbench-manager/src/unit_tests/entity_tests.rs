// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use assert_matches::assert_matches;
use testbench_base::data_types::BlockHeight;

use super::*;
use crate::{
    config::TaskLimits,
    records::StatusCode,
    test_utils::{score, score_with_status, signature, start_time, test_config, test_key},
};

fn entity() -> EntityRecord {
    EntityRecord::new(
        EntityKind::Supplier,
        test_key(),
        Checkpoint::new(BlockHeight(10), start_time()),
    )
}

fn days_later(days: u64) -> Timestamp {
    start_time().saturating_add(TimeDelta::from_days(days))
}

fn task_names(entity: &EntityRecord) -> Vec<(&str, &str)> {
    entity
        .combine_tasks()
        .iter()
        .map(|record| (record.framework(), record.task()))
        .collect()
}

#[test]
fn test_append_missing_tasks_follows_configuration() {
    let config = test_config();
    let mut entity = entity();
    assert_eq!(entity.append_missing_tasks(&config, start_time()).unwrap(), 3);
    assert_eq!(
        task_names(&entity),
        [("signatures", "tokenizer"), ("lmeh", "mmlu"), ("lmeh", "arc")]
    );
    assert_eq!(entity.signature_tasks().count(), 1);
    assert_eq!(entity.numerical_tasks().count(), 2);

    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert_eq!(mmlu.buffer().capacity(), 50);
    assert!(mmlu.buffer().is_empty());
    assert_eq!(mmlu.last_seen(), Checkpoint::new(BlockHeight(0), start_time()));
    let tokenizer = entity.find_task("signatures", "tokenizer").unwrap();
    assert_eq!(tokenizer.buffer().capacity(), 5);

    // A second pass has nothing to add.
    assert_eq!(entity.append_missing_tasks(&config, start_time()).unwrap(), 0);
    assert_eq!(entity.combine_tasks().len(), 3);
}

#[test]
fn test_append_task_uses_limit_overrides() {
    let mut config = test_config();
    let limits = TaskLimits {
        buffer_capacity: 20,
        ..TaskLimits::NUMERICAL
    };
    config
        .frameworks
        .get_mut("lmeh")
        .unwrap()
        .task_limits
        .insert("mmlu".to_owned(), limits);

    let mut entity = entity();
    entity.append_missing_tasks(&config, start_time()).unwrap();
    let capacity = |task| entity.find_task("lmeh", task).unwrap().buffer().capacity();
    assert_eq!(capacity("mmlu"), 20);
    assert_eq!(capacity("arc"), 50);
}

#[test]
fn test_append_task_rejects_empty_buffers() {
    let mut config = test_config();
    let limits = TaskLimits {
        buffer_capacity: 0,
        ..TaskLimits::NUMERICAL
    };
    config
        .frameworks
        .get_mut("lmeh")
        .unwrap()
        .task_limits
        .insert("arc".to_owned(), limits);

    let mut entity = entity();
    assert_matches!(
        entity.append_missing_tasks(&config, start_time()),
        Err(ConfigError::InvalidLimits(name, _)) if name == "lmeh/arc"
    );
    assert_eq!(
        task_names(&entity),
        [("signatures", "tokenizer"), ("lmeh", "mmlu")]
    );
}

#[test]
fn test_append_task_rejects_unconfigured_tasks() {
    let mut config = test_config();
    config.frameworks.insert(
        "helm".to_owned(),
        serde_json::from_value(serde_json::json!({
            "task_types": { "summarization": "numerical" }
        }))
        .unwrap(),
    );
    let mut entity = entity();

    assert_matches!(
        entity.append_task("bigbench", "qa", &config, start_time()),
        Err(ConfigError::UnknownFramework(framework)) if framework == "bigbench"
    );
    assert_matches!(
        entity.append_task("helm", "qa", &config, start_time()),
        Err(ConfigError::MissingEntry { table: "task_types", task, .. }) if task == "qa"
    );
    entity
        .append_task("helm", "summarization", &config, start_time())
        .unwrap();
    assert_eq!(task_names(&entity), [("helm", "summarization")]);
}

#[test]
fn test_find_or_append_task_reuses_existing_record() {
    let config = test_config();
    let mut entity = entity();
    entity
        .find_or_append_task("lmeh", "mmlu", &config, start_time())
        .unwrap()
        .insert_sample(start_time(), score(0.5, 1))
        .unwrap();

    let record = entity
        .find_or_append_task("lmeh", "mmlu", &config, start_time())
        .unwrap();
    assert_eq!(record.buffer().len(), 1);
    assert_eq!(entity.combine_tasks().len(), 1);

    // Tasks outside the evaluation plan can still be created from the "any" entries.
    entity
        .find_or_append_task("lmeh", "hellaswag", &config, start_time())
        .unwrap();
    assert_eq!(entity.combine_tasks().len(), 2);
}

#[test]
fn test_prune_stale_tasks_keeps_order() {
    let config = test_config();
    let mut entity = entity();
    entity.append_missing_tasks(&config, start_time()).unwrap();
    for task in [("signatures", "tokenizer"), ("lmeh", "arc")] {
        entity.find_task_mut(task.0, task.1).unwrap().data_mut().last_seen =
            Checkpoint::new(BlockHeight(20), days_later(10));
    }

    // Exactly `max_age` old is still fresh.
    assert_eq!(entity.prune_stale_tasks(TimeDelta::from_days(32), days_later(32)), 0);
    assert_eq!(entity.prune_stale_tasks(TimeDelta::from_days(32), days_later(33)), 1);
    assert_eq!(
        task_names(&entity),
        [("signatures", "tokenizer"), ("lmeh", "arc")]
    );
    assert_eq!(entity.prune_stale_tasks(TimeDelta::from_days(32), days_later(43)), 2);
    assert!(entity.combine_tasks().is_empty());
}

#[test]
fn test_cycle_tasks_evicts_and_recomputes() {
    let config = test_config();
    let mut entity = entity();
    entity.append_missing_tasks(&config, start_time()).unwrap();
    let mmlu = entity.find_task_mut("lmeh", "mmlu").unwrap();
    mmlu.insert_sample(start_time(), score(0.2, 1)).unwrap();
    mmlu.insert_sample(days_later(2), score(0.4, 2)).unwrap();
    mmlu.recompute();
    assert_eq!(mmlu.ok_samples(), 2);

    entity.cycle_tasks(&config, days_later(6));
    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert_eq!(mmlu.buffer().len(), 1);
    assert_eq!(mmlu.ok_samples(), 1);

    entity.cycle_tasks(&config, days_later(8));
    let mmlu = entity.find_task("lmeh", "mmlu").unwrap();
    assert!(mmlu.buffer().is_empty());
    assert_eq!(mmlu.ok_samples(), 0);
    assert!(!mmlu.is_ok());
}

#[test]
fn test_merge_last_seen_never_moves_backward() {
    let config = test_config();
    let mut entity = entity();
    entity.append_missing_tasks(&config, start_time()).unwrap();
    assert_eq!(entity.merge_last_seen().height, BlockHeight(10));

    entity
        .find_task_mut("lmeh", "mmlu")
        .unwrap()
        .data_mut()
        .last_ok = Checkpoint::new(BlockHeight(25), days_later(1));
    entity
        .find_task_mut("signatures", "tokenizer")
        .unwrap()
        .data_mut()
        .last_ok = Checkpoint::new(BlockHeight(15), days_later(2));
    assert_eq!(
        entity.merge_last_seen(),
        Checkpoint::new(BlockHeight(25), days_later(1))
    );

    entity
        .find_task_mut("lmeh", "mmlu")
        .unwrap()
        .data_mut()
        .last_ok = Checkpoint::new(BlockHeight(12), days_later(3));
    assert_eq!(entity.merge_last_seen().height, BlockHeight(25));
}

#[test]
fn test_entity_document_layout() {
    let config = test_config();
    let mut entity = entity();
    entity.append_missing_tasks(&config, start_time()).unwrap();
    entity
        .find_task_mut("signatures", "tokenizer")
        .unwrap()
        .insert_sample(start_time(), signature("llama", StatusCode::Ok))
        .unwrap();
    let mmlu = entity.find_task_mut("lmeh", "mmlu").unwrap();
    for sample in [
        score(0.7, 1),
        score_with_status(0.0, 2, StatusCode::Supplier),
        score_with_status(0.0, 3, StatusCode::Evaluation),
        score_with_status(0.0, 4, StatusCode::Supplier),
    ] {
        mmlu.insert_sample(start_time(), sample).unwrap();
    }
    mmlu.recompute();

    let document = serde_json::to_value(&entity).unwrap();
    assert_eq!(document["address"], "pokt1supplier");
    assert_eq!(document["service"], "0001");
    assert_eq!(document["kind"], "supplier");
    assert_eq!(document["tasks"][0]["type"], "signature");
    assert_eq!(document["tasks"][1]["type"], "numerical");
    assert_eq!(
        document["tasks"][1]["stats"]["error_codes"],
        serde_json::json!([[2, 2], [11, 1]])
    );
    assert!(document.get("last_process").is_none());

    let decoded: EntityRecord = serde_json::from_value(document).unwrap();
    decoded.check().unwrap();
    assert_eq!(decoded, entity);
    let encoded = serde_json::to_string(&entity).unwrap();
    assert_eq!(serde_json::from_str::<EntityRecord>(&encoded).unwrap(), entity);
}
