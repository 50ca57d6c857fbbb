mod common;

use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use questloom::cascade::{
    CampaignObjective, CascadeEngine, ChildKind, ChildObjective, CompletionEvent,
    InMemoryObjectiveStore, ObjectiveStatus, ObjectiveStore, QualityTier, QuestObjective,
    quest_percentage,
};

fn child(id: &str, quest: &str, required: bool) -> ChildObjective {
    ChildObjective {
        id: id.to_string(),
        quest_objective_id: quest.to_string(),
        kind: ChildKind::Discovery,
        required,
        weight: 1.0,
        status: ObjectiveStatus::NotStarted,
        rubric_score: None,
        quality: None,
    }
}

fn quest(id: &str) -> QuestObjective {
    QuestObjective {
        id: id.to_string(),
        campaign_objective_id: "co1".to_string(),
        status: ObjectiveStatus::NotStarted,
        percentage: 0.0,
    }
}

fn seeded_store() -> Arc<InMemoryObjectiveStore> {
    let store = Arc::new(InMemoryObjectiveStore::new());
    store.seed(
        CampaignObjective {
            id: "co1".to_string(),
            campaign_id: "camp-1".to_string(),
            status: ObjectiveStatus::NotStarted,
            percentage: 0.0,
            unlocks: vec!["act-two".to_string()],
        },
        vec![quest("q1"), quest("q2")],
        vec![
            child("c1", "q1", true),
            child("c2", "q1", true),
            child("c3", "q2", true),
        ],
    );
    store
}

fn completion(child_id: &str, rubric: Option<f64>) -> CompletionEvent {
    CompletionEvent {
        campaign_id: "camp-1".to_string(),
        user_id: "u1".to_string(),
        child_objective_id: child_id.to_string(),
        kind: ChildKind::Discovery,
        rubric_score: rubric,
    }
}

/// Rubric-scored completion cascades child -> quest -> campaign, with the
/// milestone firing only when the campaign objective itself completes.
#[tokio::test]
async fn cascade_rolls_up_and_fires_milestone() {
    let store = seeded_store();
    let emitter = CollectingEmitter::new();
    let engine = CascadeEngine::new(store.clone(), Arc::new(emitter.clone()));

    let outcome = engine.handle(completion("c1", Some(3.5))).await.unwrap();
    assert!(outcome.child_changed && outcome.quest_changed);
    assert!(!outcome.campaign_changed && !outcome.milestone_reached);

    let c1 = store.load_child("c1").await.unwrap().unwrap();
    assert_eq!(c1.quality, Some(QualityTier::Excellent));
    assert_eq!(c1.rubric_score, Some(3.5));
    let q1 = store.load_quest("q1").await.unwrap().unwrap();
    assert!((q1.percentage - 50.0).abs() < f64::EPSILON);
    assert_eq!(q1.status, ObjectiveStatus::InProgress);

    // Second child completes the quest; campaign moves to 50%.
    let outcome = engine.handle(completion("c2", Some(1.2))).await.unwrap();
    assert!(outcome.quest_changed && outcome.campaign_changed);
    assert!(!outcome.milestone_reached);
    let c2 = store.load_child("c2").await.unwrap().unwrap();
    assert_eq!(c2.quality, Some(QualityTier::Minimal));
    let q1 = store.load_quest("q1").await.unwrap().unwrap();
    assert_eq!(q1.status, ObjectiveStatus::Completed);
    let co = store.load_campaign_objective("co1").await.unwrap().unwrap();
    assert!((co.percentage - 50.0).abs() < f64::EPSILON);

    // Last quest completes the campaign; milestone carries the unlocks.
    let outcome = engine.handle(completion("c3", None)).await.unwrap();
    assert!(outcome.milestone_reached);
    let co = store.load_campaign_objective("co1").await.unwrap().unwrap();
    assert_eq!(co.status, ObjectiveStatus::Completed);

    let milestone = emitter
        .events()
        .into_iter()
        .find(|e| e.label == "milestone_reached")
        .unwrap();
    assert_eq!(milestone.payload["unlocks"][0], "act-two");
    assert_eq!(milestone.topic(), "user:u1:objectives");
}

/// Duplicate delivery changes nothing and emits nothing.
#[tokio::test]
async fn duplicate_completions_are_noops() {
    let store = seeded_store();
    let emitter = CollectingEmitter::new();
    let engine = CascadeEngine::new(store.clone(), Arc::new(emitter.clone()));

    engine.handle(completion("c1", Some(2.5))).await.unwrap();
    let quest_before = store.load_quest("q1").await.unwrap().unwrap();
    let events_before = emitter.events().len();

    let outcome = engine.handle(completion("c1", Some(2.5))).await.unwrap();
    assert!(outcome.is_noop());
    assert_eq!(emitter.events().len(), events_before);
    assert_eq!(store.load_quest("q1").await.unwrap().unwrap(), quest_before);
}

/// A better rubric score on replay upgrades quality without re-cascading
/// progress that already happened.
#[tokio::test]
async fn rubric_improvement_upgrades_quality_only() {
    let store = seeded_store();
    let emitter = CollectingEmitter::new();
    let engine = CascadeEngine::new(store.clone(), Arc::new(emitter.clone()));

    engine.handle(completion("c1", Some(1.5))).await.unwrap();
    let quest_before = store.load_quest("q1").await.unwrap().unwrap();

    let outcome = engine.handle(completion("c1", Some(3.2))).await.unwrap();
    assert!(outcome.child_changed);
    assert!(!outcome.quest_changed);
    let c1 = store.load_child("c1").await.unwrap().unwrap();
    assert_eq!(c1.quality, Some(QualityTier::Excellent));
    assert_eq!(store.load_quest("q1").await.unwrap().unwrap(), quest_before);

    // A worse score never downgrades.
    engine.handle(completion("c1", Some(1.0))).await.unwrap();
    let c1 = store.load_child("c1").await.unwrap().unwrap();
    assert_eq!(c1.rubric_score, Some(3.2));
}

#[tokio::test]
async fn unknown_child_is_an_error() {
    let store = seeded_store();
    let engine = CascadeEngine::new(store, Arc::new(CollectingEmitter::new()));
    let err = engine.handle(completion("c-404", None)).await.unwrap_err();
    assert!(matches!(
        err,
        questloom::cascade::CascadeError::UnknownChild { .. }
    ));
}

fn arb_children() -> impl Strategy<Value = Vec<ChildObjective>> {
    prop::collection::vec(any::<(bool, bool)>(), 0..12).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (required, completed))| {
                let mut c = child(&format!("c{i}"), "q", required);
                if completed {
                    c.status = ObjectiveStatus::Completed;
                }
                c.weight = 1.0 + (i % 3) as f64;
                c
            })
            .collect()
    })
}

proptest! {
    /// Percentages stay inside 0..=100 for any hierarchy shape.
    #[test]
    fn quest_percentage_is_bounded(children in arb_children()) {
        let pct = quest_percentage(&children);
        prop_assert!((0.0..=100.0).contains(&pct));
    }

    /// Completing one more child never lowers the quest percentage.
    #[test]
    fn completing_a_child_is_monotonic(children in arb_children(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!children.is_empty());
        let before = quest_percentage(&children);
        let mut after = children.clone();
        let i = pick.index(after.len());
        after[i].status = ObjectiveStatus::Completed;
        prop_assert!(quest_percentage(&after) >= before - 1e-9);
    }

    /// Tier classification is total and ordered over the rubric scale.
    #[test]
    fn rubric_classification_is_total(score in 0.0f64..10.0) {
        let tier = QualityTier::from_score(score);
        if score >= 3.0 {
            prop_assert_eq!(tier, QualityTier::Excellent);
        } else if (2.0..3.0).contains(&score) {
            prop_assert_eq!(tier, QualityTier::Good);
        } else if (1.0..2.0).contains(&score) {
            prop_assert_eq!(tier, QualityTier::Minimal);
        }
    }
}
