/// Theme Linter: checks theme vocabulary against the prompt templates.
///
/// Usage: theme_linter [--themes <file>] [--templates <file>]
///
/// Without arguments the built-in themes and templates are checked.

use chronicle_engine::core::grammar::{PromptGrammar, TemplateSegment};
use chronicle_engine::core::theme::{NameRole, ThemeDomain, ThemeRegistry, BUILTIN_THEME_COUNT};
use std::collections::BTreeSet;
use std::path::Path;
use std::process;

const ROLES: [NameRole; 4] = [NameRole::Person, NameRole::Place, NameRole::Faction, NameRole::Item];

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut themes_path = None;
    let mut templates_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--themes" if i + 1 < args.len() => {
                i += 1;
                themes_path = Some(args[i].clone());
            }
            "--templates" if i + 1 < args.len() => {
                i += 1;
                templates_path = Some(args[i].clone());
            }
            "--help" | "-h" => {
                println!("Usage: theme_linter [--themes <file>] [--templates <file>]");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let registry = match &themes_path {
        Some(path) => ThemeRegistry::load_from_ron(Path::new(path)),
        None => ThemeRegistry::builtin(),
    };
    let registry = match registry {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ERROR: Failed to load themes: {}", e);
            process::exit(1);
        }
    };

    let grammar = match &templates_path {
        Some(path) => PromptGrammar::load_from_ron(Path::new(path)),
        None => PromptGrammar::builtin(),
    };
    let grammar = match grammar {
        Ok(g) => g,
        Err(e) => {
            eprintln!("ERROR: Failed to load templates: {}", e);
            process::exit(1);
        }
    };

    println!("Loaded {} themes", registry.len());

    let (errors, warnings) = lint_themes(&registry, &grammar, themes_path.is_none());

    println!("\n=== Theme Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    process::exit(if errors.is_empty() { 0 } else { 1 });
}

/// Slots and name roles the templates actually use.
fn template_usage(grammar: &PromptGrammar) -> (BTreeSet<String>, BTreeSet<&'static str>) {
    let mut slots = BTreeSet::new();
    let mut roles = BTreeSet::new();
    for template in [grammar.stage1_template(), grammar.stage2_template()] {
        slots.extend(template.slot_names().map(str::to_string));
        for segment in &template.segments {
            if let TemplateSegment::Names(role) = segment {
                roles.insert(role.keyword());
            }
        }
    }
    (slots, roles)
}

fn lint_themes(
    registry: &ThemeRegistry,
    grammar: &PromptGrammar,
    builtin: bool,
) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let (slots, roles) = template_usage(grammar);

    if builtin && registry.len() != BUILTIN_THEME_COUNT {
        errors.push(format!(
            "Built-in registry has {} themes, expected {}",
            registry.len(),
            BUILTIN_THEME_COUNT
        ));
    }

    for domain in registry.domains() {
        lint_domain(domain, &slots, &roles, &mut errors, &mut warnings);
    }

    (errors, warnings)
}

fn lint_domain(
    domain: &ThemeDomain,
    slots: &BTreeSet<String>,
    roles: &BTreeSet<&'static str>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let id = &domain.theme_id;

    if domain.name.trim().is_empty() {
        errors.push(format!("Theme '{}' has no display name", id));
    }

    for role in ROLES {
        let pool = domain.name_pool.get(role);
        if pool.is_empty() && roles.contains(role.keyword()) {
            errors.push(format!(
                "Theme '{}' has no {} names but the templates ask for them",
                id,
                role.keyword()
            ));
        }
        let unique: BTreeSet<&String> = pool.iter().collect();
        if unique.len() != pool.len() {
            warnings.push(format!(
                "Theme '{}' lists a {} name more than once",
                id,
                role.keyword()
            ));
        }
    }

    // Slots the templates use but this theme leaves to the generic fallback.
    for slot in slots {
        match domain.candidates(slot) {
            None => warnings.push(format!(
                "Theme '{}' has no vocabulary for slot '{}' (generic fallback will be used)",
                id, slot
            )),
            Some(candidates) if candidates.len() < 2 => warnings.push(format!(
                "Theme '{}' slot '{}' has only {} candidate (minimum 2 recommended)",
                id,
                slot,
                candidates.len()
            )),
            Some(_) => {}
        }
    }

    for slot in domain.vocabulary.keys() {
        if !slots.contains(slot) {
            warnings.push(format!(
                "Theme '{}' defines slot '{}' which no template uses",
                id, slot
            ));
        }
    }

    if domain.tone_descriptors.is_empty() {
        warnings.push(format!("Theme '{}' has no tone descriptors", id));
    }
}
