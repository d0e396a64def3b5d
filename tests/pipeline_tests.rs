/// Pipeline integration tests: end-to-end skeleton and refinement runs
/// against scripted model output.

use chronicle_engine::core::coherence::NoteKind;
use chronicle_engine::core::config::GeneratorConfig;
use chronicle_engine::core::generator::{GenerationError, ScriptedGenerator};
use chronicle_engine::core::pipeline::{ChronicleEngine, PipelineError, PipelineStage};
use chronicle_engine::schema::entity::EntityId;
use chronicle_engine::schema::event::EventId;
use chronicle_engine::schema::params::{
    EventDensity, GenerationParameters, NarrativeFocus, TimeSpan,
};
use std::path::Path;

fn fixture(name: &str) -> String {
    std::fs::read_to_string(Path::new("tests/fixtures").join(name)).unwrap()
}

fn rome_params() -> GenerationParameters {
    GenerationParameters::new("ancient_rome")
        .with_time_span(TimeSpan::Brief)
        .with_event_density(EventDensity::Sparse)
        .with_narrative_focus(NarrativeFocus::Political)
        .with_multi_stage(true)
}

#[test]
fn ancient_rome_two_stage_run() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome.txt"));

    let result = engine.run(rome_params(), &generator).unwrap();
    let state = &result.final_state;

    assert_eq!(generator.call_count(), 2);
    assert_eq!(state.entity_count(), 3);
    assert_eq!(state.event_count(), 2);
    let seq: Vec<u64> = state.events().iter().map(|e| e.sequence_index).collect();
    assert_eq!(seq, vec![0, 1]);

    // The stage-2 event names Marcus, who resolves to the stage-1 entity.
    let marcus = state.entity_by_name("Marcus the Trader").unwrap();
    assert_eq!(marcus.id, EntityId(0));
    assert_eq!(marcus.first_mentioned_stage, 1);
    assert!(state.events()[1].involves(marcus.id));
    assert_eq!(state.events()[1].stage, 2);

    let ostia = state.entity_by_name("ostia").unwrap();
    assert_eq!(ostia.first_mentioned_stage, 2);
    assert!(marcus
        .relations
        .iter()
        .any(|r| r.kind == "located_in" && r.target == ostia.id));

    assert_eq!(result.notes_of(NoteKind::Causality).count(), 0);
    assert!(result.coherence_notes.is_empty(), "{:?}", result.coherence_notes);
    assert_eq!(
        result.stages,
        vec![
            PipelineStage::Init,
            PipelineStage::Stage1Prompted,
            PipelineStage::Stage1Parsed,
            PipelineStage::Stage2Prompted,
            PipelineStage::Stage2Parsed,
            PipelineStage::CoherenceChecked,
            PipelineStage::Done,
        ]
    );
}

#[test]
fn refinement_prompt_carries_stage1_state() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome.txt"));
    engine.run(rome_params(), &generator).unwrap();

    let calls = generator.calls();
    let refinement = &calls[1].prompt;
    assert!(refinement.contains("Marcus the Trader [#0]"));
    assert!(refinement.contains("Livia Drusilla [#1]"));
    assert!(refinement.contains("E2: Marcus corners the grain market"));
    assert!(refinement.contains("richest"));
    assert!(!calls[0].prompt.contains("[#0]"));
}

#[test]
fn remention_in_stage2_merges_into_stage1_entity() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome_remention.txt"));
    let result = engine.run(rome_params(), &generator).unwrap();
    let state = &result.final_state;

    assert_eq!(state.entity_count(), 2);
    let livia = state.entity_by_name("livia drusilla").unwrap();
    assert_eq!(livia.id, EntityId(1));
    assert_eq!(livia.display_name, "Livia Drusilla");
    // First-stated attribute wins; new keys are added.
    assert_eq!(livia.attribute("role"), Some("priestess of Ceres"));
    assert_eq!(livia.attribute("city"), Some("Capua"));

    let curse = &state.events()[1];
    assert!(curse.causal_predecessors.contains(&EventId(2)));
    assert_eq!(result.notes_of(NoteKind::Causality).count(), 0);
}

#[test]
fn single_stage_run_never_refines() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome.txt"));

    let result = engine
        .run(rome_params().with_multi_stage(false), &generator)
        .unwrap();

    assert!(result.stage2_text.is_empty());
    assert_eq!(generator.call_count(), 1);
    assert_eq!(generator.remaining(), 1);
    assert_eq!(result.final_state.entity_count(), 2);
    assert!(!result.stages.contains(&PipelineStage::Stage2Prompted));
    assert!(!result.stages.contains(&PipelineStage::Stage2Parsed));
    assert_eq!(result.final_text(), result.stage1_text);
}

#[test]
fn stage1_prompt_is_reproducible() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let first = ScriptedGenerator::new().respond(&fixture("stage1_rome.txt"));
    let second = ScriptedGenerator::new().respond(&fixture("stage1_rome.txt"));

    let a = engine.run(rome_params().with_multi_stage(false), &first).unwrap();
    let b = engine.run(rome_params().with_multi_stage(false), &second).unwrap();

    assert_eq!(first.calls()[0].prompt, second.calls()[0].prompt);
    assert_eq!(a.stage1_text, b.stage1_text);
}

#[test]
fn custom_details_reach_the_prompt() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new().respond(&fixture("stage1_rome.txt"));
    let params = rome_params()
        .with_multi_stage(false)
        .with_custom_details("A   grain merchant   who becomes consul");
    engine.run(params, &generator).unwrap();
    assert!(generator.calls()[0]
        .prompt
        .contains("A grain merchant who becomes consul"));
}

#[test]
fn stage2_failure_after_retry_fails_the_run() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .fail(GenerationError::Timeout)
        .fail(GenerationError::Quota("rate limited".to_string()));

    let err = engine.run(rome_params(), &generator).unwrap_err();
    match err {
        PipelineError::GenerationUnavailable {
            stage,
            attempts,
            last,
        } => {
            assert_eq!(stage, 2);
            assert_eq!(attempts, 2);
            assert_eq!(last, GenerationError::Quota("rate limited".to_string()));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(generator.call_count(), 3);
    // Both stage-2 attempts used the identical prompt.
    let calls = generator.calls();
    assert_eq!(calls[1].prompt, calls[2].prompt);
}

#[test]
fn config_file_controls_limits_and_retries() {
    let engine = ChronicleEngine::builder()
        .config_path("tests/fixtures/test_config.ron")
        .build()
        .unwrap();
    assert_eq!(engine.config().retry_limit, 0);

    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome.txt"));
    let result = engine.run(rome_params(), &generator).unwrap();

    let calls = generator.calls();
    assert_eq!(calls[0].max_tokens, 800);
    assert_eq!(calls[1].max_tokens, 900);
    assert_eq!(calls[0].temperature, 0.4);
    assert!(calls[1].temperature < 0.4);
    // digest_entities = 2 keeps only the two most recent stage-1 entities,
    // digest_events = 1 and a 200-char source quote.
    assert!(calls[1].prompt.contains("[...]"));
    assert!(result.meets_word_target(engine.config()));

    let failing = ScriptedGenerator::new().fail(GenerationError::Timeout);
    assert!(matches!(
        engine.run(rome_params(), &failing),
        Err(PipelineError::GenerationUnavailable { attempts: 1, .. })
    ));
    assert_eq!(failing.call_count(), 1);
}

#[test]
fn every_reference_resolves_or_is_noted() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(
            "ENTITY: character | Cato\n\
             EVENT: e1 | Cato denounces Carthage | with=Cato; Hannibal | after=e2\n\
             EVENT: e2 | The Senate listens | with=Cato",
        )
        .respond("ENTITY: place | Carthage\nRELATION: Cato | enemy_of | Carthage");
    let result = engine.run(rome_params(), &generator).unwrap();
    let state = &result.final_state;

    for event in state.events() {
        for id in &event.participants {
            assert!(state.entity(*id).is_some());
        }
    }
    for entity in state.entities() {
        for relation in &entity.relations {
            assert!(state.entity(relation.target).is_some());
        }
    }
    // Hannibal was never declared; e1 follows the later e2.
    assert_eq!(result.notes_of(NoteKind::Ingest).count(), 1);
    assert_eq!(result.notes_of(NoteKind::Causality).count(), 1);
}

#[test]
fn dead_character_acting_later_is_noted() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(
            "ENTITY: character | Crassus\n\
             EVENT: e1 | Crassus falls at Carrhae | deaths=Crassus",
        )
        .respond("EVENT: e1 | Crassus funds a new legion | with=Crassus | after=E1");
    let result = engine.run(rome_params(), &generator).unwrap();
    let crassus = result.final_state.entity_by_name("crassus").unwrap();
    assert!(crassus.is_deceased());
    assert_eq!(result.notes_of(NoteKind::Deceased).count(), 1);
}

#[test]
fn run_result_round_trips_through_ron() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond(&fixture("stage2_rome.txt"));
    let result = engine.run(rome_params(), &generator).unwrap();

    let text = ron::to_string(&result).unwrap();
    let restored: chronicle_engine::core::pipeline::RunResult = ron::from_str(&text).unwrap();
    assert_eq!(restored.final_state.entity_count(), 3);
    assert_eq!(restored.stages, result.stages);
    assert_eq!(restored.stage2_text, result.stage2_text);
}

#[test]
fn default_config_word_target() {
    let config = GeneratorConfig::default();
    assert_eq!((config.min_words, config.max_words), (500, 1000));
}

#[test]
fn refinement_label_does_not_shadow_earlier_event() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond("ENTITY: character | Cato\nEVENT: e1 | Cato demands war | with=Cato")
        .respond("EVENT: e1 | The Senate votes for war | with=Cato | after=E1");
    let result = engine.run(rome_params(), &generator).unwrap();

    let events = result.final_state.events();
    assert_eq!(events[0].id, EventId(1));
    assert_eq!(events[1].id, EventId(2));
    assert_eq!(
        events[1].causal_predecessors,
        [EventId(1)].into_iter().collect()
    );
    assert_eq!(result.notes_of(NoteKind::Causality).count(), 0);
    assert!(result.coherence_notes.is_empty(), "{:?}", result.coherence_notes);
}

#[test]
fn revived_character_is_not_noted() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(
            "ENTITY: character | Crassus\n\
             EVENT: e1 | Crassus falls at Carrhae | deaths=Crassus",
        )
        .respond(
            "EVENT: e1 | Priests of Mithras call Crassus back | after=E1 | revived=Crassus\n\
             EVENT: e2 | Crassus funds a new legion | with=Crassus | after=e1",
        );
    let result = engine.run(rome_params(), &generator).unwrap();
    let crassus = result.final_state.entity_by_name("crassus").unwrap();
    assert!(!crassus.is_deceased());
    assert_eq!(crassus.lifecycle.len(), 2);
    assert!(result.coherence_notes.is_empty(), "{:?}", result.coherence_notes);
}

#[test]
fn relation_only_refinement_counts_as_structure() {
    let engine = ChronicleEngine::builder().build().unwrap();
    let generator = ScriptedGenerator::new()
        .respond(&fixture("stage1_rome.txt"))
        .respond("The feud deepens.\nRELATION: Livia Drusilla | ally_of | Marcus the Trader");
    let result = engine.run(rome_params(), &generator).unwrap();

    assert_eq!(result.notes_of(NoteKind::EmptyStage).count(), 0);
    let livia = result.final_state.entity_by_name("livia drusilla").unwrap();
    assert!(livia
        .relations
        .iter()
        .any(|r| r.kind == "ally_of" && r.target == EntityId(0)));
}
