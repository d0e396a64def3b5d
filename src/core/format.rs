/// The line-tagged output contract the model is asked to follow.
///
/// Each structured record sits on its own line and starts with a tag:
///
/// ```text
/// ENTITY: character | Marcus the Trader | role=merchant; allegiance=Senate
/// RELATION: Marcus the Trader | ally_of | Livia Drusilla
/// EVENT: e1 | Marcus bribes the aedile | with=Marcus the Trader; Livia Drusilla | after=E2
/// EVENT: e2 | Livia dies in the riots | with=Livia Drusilla | after=e1 | deaths=Livia Drusilla
/// EVENT: e3 | The oracle returns Livia to life | after=e2 | revived=Livia Drusilla
/// ```
///
/// Tags are case-insensitive and may be preceded by list markers (`-`, `*`,
/// `1.`). Lines without a tag are prose and are ignored by the parser.
/// Event labels (`e1`) are local to one response; earlier events are cited
/// by their run id (`E2`) as shown in the refinement digest. An uppercase
/// `E<n>` reference names a run id first, so a response may reuse `e1` as a
/// label and still cite the earlier `E1`.

pub const ENTITY_TAG: &str = "ENTITY";
pub const RELATION_TAG: &str = "RELATION";
pub const EVENT_TAG: &str = "EVENT";

/// Separator between fields of a record.
pub const FIELD_SEP: char = '|';
/// Separator between items of a list-valued field.
pub const ITEM_SEP: char = ';';

/// Keys recognised on `EVENT` records after the summary.
pub const WITH_KEY: &str = "with";
pub const AFTER_KEY: &str = "after";
pub const DEATHS_KEY: &str = "deaths";
pub const REVIVED_KEY: &str = "revived";

/// True if `field` is one of the `key=value` fields above.
pub fn is_event_field(field: &str) -> bool {
    field.split_once('=').is_some_and(|(key, _)| {
        matches!(
            key.trim().to_lowercase().as_str(),
            WITH_KEY | AFTER_KEY | DEATHS_KEY | REVIVED_KEY
        )
    })
}

/// Instructions appended to every prompt so the response can be parsed.
pub const OUTPUT_INSTRUCTIONS: &str = "OUTPUT FORMAT:
Write the chronology as prose. After the prose, list its structure, one record per line:
ENTITY: <character|place|item> | <name> | <key>=<value>; <key>=<value>
RELATION: <name> | <relation, e.g. ally_of, located_in, rival_of> | <other name>
EVENT: <label such as e1> | <one-sentence summary> | with=<name>; <name> | after=<earlier label or id>; ... | deaths=<name> | revived=<name>
Write labels in lowercase (e1, e2) and cite established events by their id (E4).
List events in chronological order. Use exactly the same spelling for a name every time it appears.
Only use names you have declared with ENTITY or that were listed as established.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_mention_every_tag() {
        for tag in [ENTITY_TAG, RELATION_TAG, EVENT_TAG] {
            assert!(OUTPUT_INSTRUCTIONS.contains(&format!("{}:", tag)));
        }
        for key in [WITH_KEY, AFTER_KEY, DEATHS_KEY, REVIVED_KEY] {
            assert!(OUTPUT_INSTRUCTIONS.contains(&format!("{}=", key)));
        }
    }

    #[test]
    fn only_known_keys_are_event_fields() {
        assert!(is_event_field("with=Cato"));
        assert!(is_event_field(" After = e1"));
        assert!(is_event_field("revived=Livia"));
        assert!(!is_event_field("fortune = ruin"));
        assert!(!is_event_field("Marcus speaks"));
    }
}
