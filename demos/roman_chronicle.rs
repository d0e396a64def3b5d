/// Roman Chronicle example: a two-stage run over the ancient_rome theme.
///
/// A stand-in generator plays the model: it answers the skeleton prompt with
/// a short chronology and the refinement prompt with a continuation that
/// cites the first stage's event by id.
///
/// Run with: cargo run --example roman_chronicle

use chronicle_engine::core::generator::GenerationError;
use chronicle_engine::core::pipeline::ChronicleEngine;
use chronicle_engine::schema::params::{
    EventDensity, GenerationParameters, NarrativeFocus, Persona, TimeSpan,
};

const SKELETON: &str = "\
133 BC. Tiberius Gracchus, tribune of the plebs, proposes to redistribute public land.
The Senate, led by Scipio Nasica, sees a threat to the old order.

ENTITY: character | Tiberius Gracchus | role=tribune; allegiance=the plebs
ENTITY: character | Scipio Nasica | role=senator; allegiance=the Optimates
ENTITY: place | The Capitol
RELATION: Scipio Nasica | rival_of | Tiberius Gracchus
EVENT: e1 | Tiberius passes the land law over the Senate's objections | with=Tiberius Gracchus
EVENT: e2 | Tiberius is killed on the Capitol by a senatorial mob | with=Scipio Nasica; The Capitol | after=e1 | deaths=Tiberius Gracchus
";

const REFINEMENT: &str = "\
123 BC. Ten years later his brother Gaius takes up the same cause.

ENTITY: character | Gaius Gracchus | role=tribune
RELATION: Gaius Gracchus | sibling_of | Tiberius Gracchus
EVENT: e1 | Gaius revives the land commission | with=Gaius Gracchus | after=E4
";

fn stand_in_model(prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, GenerationError> {
    println!(
        "[model] {} chars in, max_tokens={}, temperature={:.2}",
        prompt.len(),
        max_tokens,
        temperature
    );
    if prompt.contains("ESTABLISHED ENTITIES") {
        Ok(REFINEMENT.to_string())
    } else {
        Ok(SKELETON.to_string())
    }
}

fn main() {
    let engine = ChronicleEngine::builder()
        .build()
        .expect("Failed to build engine");

    let params = GenerationParameters::new("ancient_rome")
        .with_time_span(TimeSpan::Brief)
        .with_event_density(EventDensity::Sparse)
        .with_narrative_focus(NarrativeFocus::Political)
        .with_persona(Persona::AnalyticalArchivist)
        .with_custom_details("The rise and fall of the Gracchi brothers");

    let result = engine
        .run(params, &stand_in_model)
        .expect("Run failed");

    println!("\n=== Entities ===");
    for entity in result.final_state.entities() {
        let status = if entity.is_deceased() { " (deceased)" } else { "" };
        println!(
            "{} {}: {}{}",
            entity.id,
            entity.kind.label(),
            entity.display_name,
            status
        );
    }

    println!("\n=== Events ===");
    for event in result.final_state.events() {
        println!("[{}] {} {}", event.sequence_index, event.id, event.summary);
    }

    println!("\n=== Coherence Notes ===");
    if result.coherence_notes.is_empty() {
        println!("(none)");
    }
    for note in &result.coherence_notes {
        println!("- {}", note);
    }

    let trace: Vec<&str> = result.stages.iter().map(|s| s.name()).collect();
    println!("\nTrace: {}", trace.join(" -> "));
}
