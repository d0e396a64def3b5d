/// Preview: runs the pipeline for one theme against canned model output and
/// prints the prompts, the tracked state and the coherence notes.
///
/// Usage: preview --theme <id> [options]
///
/// Options:
///   --time-span <brief|moderate|epic>
///   --density <sparse|moderate|rich>
///   --focus <political|cultural|military|economic|personal>
///   --persona <smooth_storyteller|epic_chronicler|intimate_historian|analytical_archivist>
///   --custom <text>         custom details for open slots
///   --single-stage          disable the refinement pass
///   --stage1 <file>         canned stage-1 response
///   --stage2 <file>         canned stage-2 response
///   --config <file>         generator config (RON)
///   --list                  list available themes

use chronicle_engine::core::config::GeneratorConfig;
use chronicle_engine::core::generator::ScriptedGenerator;
use chronicle_engine::core::pipeline::ChronicleEngine;
use chronicle_engine::core::theme::ThemeRegistry;
use chronicle_engine::schema::params::GenerationParameters;
use chronicle_engine::schema::state::NarrativeState;
use std::process;
use std::str::FromStr;

const DEFAULT_STAGE1: &str = "\
Year 1. The founders arrive and divide the land.

ENTITY: character | The Founder | role=leader
ENTITY: place | First Settlement
RELATION: The Founder | located_in | First Settlement
EVENT: e1 | The Founder establishes the First Settlement | with=The Founder; First Settlement
";

const DEFAULT_STAGE2: &str = "\
Year 40. A rival claims the founder's legacy.

ENTITY: character | The Rival | role=challenger
RELATION: The Rival | rival_of | The Founder
EVENT: e1 | The Rival contests the succession | with=The Rival; The Founder | after=E2
";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut params: Option<GenerationParameters> = None;
    let mut stage1 = DEFAULT_STAGE1.to_string();
    let mut stage2 = DEFAULT_STAGE2.to_string();
    let mut config = GeneratorConfig::default();
    let mut rest: Vec<(String, String)> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" => {
                list_themes();
                return;
            }
            "--single-stage" => rest.push(("single".into(), String::new())),
            "--theme" if i + 1 < args.len() => {
                i += 1;
                params = Some(GenerationParameters::new(&args[i]));
            }
            "--stage1" if i + 1 < args.len() => {
                i += 1;
                stage1 = read_file(&args[i]);
            }
            "--stage2" if i + 1 < args.len() => {
                i += 1;
                stage2 = read_file(&args[i]);
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config = GeneratorConfig::load_from_ron(std::path::Path::new(&args[i]))
                    .unwrap_or_else(|e| fail(&format!("Failed to load config: {}", e)));
            }
            flag @ ("--time-span" | "--density" | "--focus" | "--persona" | "--custom")
                if i + 1 < args.len() =>
            {
                i += 1;
                rest.push((flag.to_string(), args[i].clone()));
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    let Some(mut params) = params else {
        fail("--theme is required");
    };
    for (flag, value) in rest {
        params = match flag.as_str() {
            "single" => params.with_multi_stage(false),
            "--time-span" => params.with_time_span(parse_or_exit(&value)),
            "--density" => params.with_event_density(parse_or_exit(&value)),
            "--focus" => params.with_narrative_focus(parse_or_exit(&value)),
            "--persona" => params.with_persona(parse_or_exit(&value)),
            "--custom" => params.with_custom_details(&value),
            _ => params,
        };
    }

    let engine = ChronicleEngine::builder()
        .with_config(config)
        .build()
        .unwrap_or_else(|e| fail(&format!("Failed to build engine: {}", e)));
    let generator = ScriptedGenerator::new().respond(&stage1).respond(&stage2);

    let result = engine
        .run(params, &generator)
        .unwrap_or_else(|e| fail(&format!("Run failed: {}", e)));

    for (n, call) in generator.calls().iter().enumerate() {
        println!(
            "=== Prompt {} (max_tokens={}, temperature={:.2}) ===\n",
            n + 1,
            call.max_tokens,
            call.temperature
        );
        println!("{}", call.prompt);
    }

    println!("=== State ===\n");
    print_state(&result.final_state);

    println!("\n=== Coherence Notes ===\n");
    if result.coherence_notes.is_empty() {
        println!("(none)");
    }
    for note in &result.coherence_notes {
        println!("[{:?}] {}", note.kind, note);
    }

    let trace: Vec<&str> = result.stages.iter().map(|s| s.name()).collect();
    println!("\nTrace: {}", trace.join(" -> "));
    println!(
        "Words: {} (target {}-{}, met: {})",
        result.word_count(),
        engine.config().min_words,
        engine.config().max_words,
        result.meets_word_target(engine.config())
    );
}

fn print_state(state: &NarrativeState) {
    for entity in state.entities() {
        let attrs: Vec<String> = entity
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "{} {} '{}' stage={} [{}]",
            entity.id,
            entity.kind.keyword(),
            entity.display_name,
            entity.first_mentioned_stage,
            attrs.join(", ")
        );
        for relation in &entity.relations {
            println!("    {} {}", relation.kind, relation.target);
        }
    }
    for event in state.events() {
        let after: Vec<String> = event
            .causal_predecessors
            .iter()
            .map(|id| id.to_string())
            .collect();
        println!(
            "{} seq={} stage={} \"{}\" after=[{}]",
            event.id,
            event.sequence_index,
            event.stage,
            event.summary,
            after.join(", ")
        );
    }
}

fn list_themes() {
    match ThemeRegistry::builtin() {
        Ok(registry) => {
            for domain in registry.domains() {
                println!("{:<24} {}", domain.theme_id, domain.name);
            }
        }
        Err(e) => fail(&format!("Failed to load themes: {}", e)),
    }
}

fn parse_or_exit<T: FromStr>(value: &str) -> T
where
    T::Err: std::fmt::Display,
{
    value.parse().unwrap_or_else(|e: T::Err| fail(&e.to_string()))
}

fn read_file(path: &str) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| fail(&format!("Failed to read {}: {}", path, e)))
}

fn fail(message: &str) -> ! {
    eprintln!("ERROR: {}", message);
    process::exit(1);
}

fn print_usage() {
    println!("Usage: preview --theme <id> [options]");
    println!();
    println!("Options:");
    println!("  --time-span <brief|moderate|epic>");
    println!("  --density <sparse|moderate|rich>");
    println!("  --focus <political|cultural|military|economic|personal>");
    println!("  --persona <smooth_storyteller|epic_chronicler|intimate_historian|analytical_archivist>");
    println!("  --custom <text>     custom details for open slots");
    println!("  --single-stage      disable the refinement pass");
    println!("  --stage1 <file>     canned stage-1 response");
    println!("  --stage2 <file>     canned stage-2 response");
    println!("  --config <file>     generator config (RON)");
    println!("  --list              list available themes");
}
