/// Parser for the line-tagged model output contract (see `core::format`).
///
/// `parse_output` is pure: it never consults narrative state, so name and
/// label resolution happen later in the tracker. Anything it cannot read is
/// reported as a warning rather than an error.

use crate::core::format::{
    is_event_field, AFTER_KEY, DEATHS_KEY, ENTITY_TAG, EVENT_TAG, FIELD_SEP, ITEM_SEP,
    RELATION_TAG, REVIVED_KEY, WITH_KEY,
};
use crate::schema::entity::EntityKind;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationRecord {
    pub subject: String,
    pub kind: String,
    pub object: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventRecord {
    /// Response-local label such as `e1`, lowercased.
    pub label: Option<String>,
    pub summary: String,
    pub with: Vec<String>,
    /// Labels or run ids as written; case tells them apart.
    pub after: Vec<String>,
    pub deaths: Vec<String>,
    pub revived: Vec<String>,
}

/// Structured records found in one response, in the order they appeared.
#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    pub entities: Vec<EntityRecord>,
    pub relations: Vec<RelationRecord>,
    pub events: Vec<EventRecord>,
    pub warnings: Vec<String>,
}

impl ParsedOutput {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.events.is_empty()
    }
}

/// Parse a model response into records.
pub fn parse_output(text: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();

    for (line_no, raw) in text.lines().enumerate() {
        let line = strip_markers(raw);
        let Some((tag, body)) = line.split_once(':') else {
            continue;
        };
        let tag = tag.trim().trim_matches('*').trim().to_uppercase();
        let body = body.trim().trim_matches('*').trim();

        let result = match tag.as_str() {
            ENTITY_TAG => parse_entity(body).map(|r| out.entities.push(r)),
            RELATION_TAG => parse_relation(body).map(|r| out.relations.push(r)),
            EVENT_TAG => parse_event(body).map(|r| out.events.push(r)),
            // Untagged prose.
            _ => Ok(()),
        };

        if let Err(reason) = result {
            out.warnings
                .push(format!("line {}: {} ({})", line_no + 1, reason, raw.trim()));
        }
    }

    out
}

/// True if `line` carries one of the record tags, well-formed or not.
pub fn is_record_line(line: &str) -> bool {
    strip_markers(line)
        .split_once(':')
        .map(|(tag, _)| tag.trim().trim_matches('*').trim().to_uppercase())
        .is_some_and(|tag| matches!(tag.as_str(), ENTITY_TAG | RELATION_TAG | EVENT_TAG))
}

/// The prose part of a response: every line that is not a record.
pub fn prose_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|line| !is_record_line(line))
}

/// Drop list bullets, numbering and emphasis in front of a record.
fn strip_markers(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '*' | '•' | '>' | '#')
    });
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start_matches(|c: char| c.is_whitespace() || c == '*');
        }
    }
    line
}

fn fields(body: &str) -> Vec<&str> {
    body.split(FIELD_SEP).map(str::trim).collect()
}

fn items(value: &str) -> Vec<String> {
    value
        .split(ITEM_SEP)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_entity(body: &str) -> Result<EntityRecord, String> {
    let parts = fields(body);
    if parts.len() < 2 {
        return Err("entity needs a kind and a name".to_string());
    }
    let kind = EntityKind::from_keyword(parts[0])
        .ok_or_else(|| format!("unknown entity kind '{}'", parts[0]))?;
    let name = parts[1];
    if name.is_empty() {
        return Err("entity name is empty".to_string());
    }

    let mut attributes = Vec::new();
    for extra in &parts[2..] {
        for pair in items(extra) {
            match pair.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                    attributes.push((k.trim().to_lowercase(), v.trim().to_string()))
                }
                _ => return Err(format!("malformed attribute '{}'", pair)),
            }
        }
    }

    Ok(EntityRecord {
        kind,
        name: name.to_string(),
        attributes,
    })
}

fn parse_relation(body: &str) -> Result<RelationRecord, String> {
    let parts = fields(body);
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err("relation needs exactly: name | relation | other name".to_string());
    }
    let kind = parts[1]
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    Ok(RelationRecord {
        subject: parts[0].to_string(),
        kind,
        object: parts[2].to_string(),
    })
}

fn parse_event(body: &str) -> Result<EventRecord, String> {
    let parts = fields(body);
    let mut record = EventRecord::default();

    // `label | summary | ...` when the second field is not an event field,
    // otherwise the first field is the summary.
    let rest = if parts.len() >= 2 && !is_event_field(parts[1]) {
        if !parts[0].is_empty() {
            record.label = Some(parts[0].to_lowercase());
        }
        record.summary = parts[1].to_string();
        &parts[2..]
    } else {
        record.summary = parts[0].to_string();
        &parts[1..]
    };

    if !record.summary.chars().any(char::is_alphanumeric) || is_event_field(&record.summary) {
        return Err("event summary is missing".to_string());
    }

    for field in rest {
        if field.is_empty() {
            continue;
        }
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, found '{}'", field))?;
        let values = items(value);
        match key.trim().to_lowercase().as_str() {
            WITH_KEY => record.with.extend(values),
            AFTER_KEY => record.after.extend(
                values
                    .iter()
                    .flat_map(|v| v.split(','))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            ),
            DEATHS_KEY => record.deaths.extend(values),
            REVIVED_KEY => record.revived.extend(values),
            other => return Err(format!("unknown event field '{}'", other)),
        }
    }

    Ok(record)
}
