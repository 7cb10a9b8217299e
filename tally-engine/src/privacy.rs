//! The privacy filter.
//!
//! Runs after serialization and before transmission, keyed off the
//! visibility value carried inside the record itself — never off the caller.
//! A request flag (backed by the matching capability, enforced during query
//! composition) is the only thing that disables a rule.

use serde_json::{Map, Value};
use tally_model::{Kind, Visibility};

/// Which redaction rules the request has unlocked. Defaults to everything
/// redacted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactionFlags {
    pub donor_names: bool,
    pub all_comments: bool,
    pub tech_notes: bool,
}

/// Applies the kind's redaction rules to a serialized record in place.
pub fn redact(kind: Kind, fields: &mut Map<String, Value>, flags: RedactionFlags) {
    match kind {
        Kind::Donor if !flags.donor_names => donor_privacy(fields),
        Kind::Donation if !flags.all_comments => donation_privacy(fields),
        Kind::Run if !flags.tech_notes => run_privacy(fields),
        _ => {}
    }
}

fn visibility_of(fields: &Map<String, Value>, key: &str) -> Option<Visibility> {
    fields.get(key)?.as_str().and_then(Visibility::parse)
}

fn donor_privacy(fields: &mut Map<String, Value>) {
    let visibility = visibility_of(fields, "visibility").unwrap_or(Visibility::Anonymous);
    if visibility == Visibility::FirstName {
        if let Some(initial) = fields
            .get("lastname")
            .and_then(Value::as_str)
            .and_then(|s| s.chars().next())
        {
            fields.insert("lastname".into(), Value::String(format!("{initial}...")));
        }
    }
    if matches!(visibility, Visibility::Alias | Visibility::Anonymous) {
        fields.remove("lastname");
        fields.remove("firstname");
    }
    if visibility == Visibility::Anonymous {
        fields.remove("alias");
        fields.remove("alias_num");
        fields.remove("canonical_url");
    }
}

fn donation_privacy(fields: &mut Map<String, Value>) {
    let approved = fields.get("commentstate").and_then(Value::as_str) == Some("APPROVED");
    if !approved {
        fields.remove("comment");
        fields.remove("commentlanguage");
    }
    if visibility_of(fields, "donor__visibility") == Some(Visibility::Anonymous) {
        fields.remove("donor");
        fields.retain(|key, _| !key.starts_with("donor__"));
    }
}

/// Internal notes never leave through this endpoint; this rule is a hard
/// redaction unless the request unlocked it explicitly.
fn run_privacy(fields: &mut Map<String, Value>) {
    fields.remove("tech_notes");
    fields.remove("layout");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn anonymous_donor_loses_all_identity() {
        let mut fields = map(json!({
            "alias": "Foo",
            "alias_num": 1234,
            "firstname": "Jesse",
            "lastname": "Quinn",
            "visibility": "ANON",
            "canonical_url": "https://tracker.example/donor/1",
        }));
        redact(Kind::Donor, &mut fields, RedactionFlags::default());
        for key in ["alias", "alias_num", "firstname", "lastname", "canonical_url"] {
            assert!(!fields.contains_key(key), "{key} leaked");
        }
        assert!(fields.contains_key("visibility"));
    }

    #[test]
    fn first_name_visibility_truncates_lastname() {
        let mut fields = map(json!({
            "alias": "Foo",
            "firstname": "Jesse",
            "lastname": "Quinn",
            "visibility": "FIRST",
        }));
        redact(Kind::Donor, &mut fields, RedactionFlags::default());
        assert_eq!(fields["lastname"], json!("Q..."));
        assert_eq!(fields["firstname"], json!("Jesse"));
    }

    #[test]
    fn donor_names_flag_disables_rule() {
        let mut fields = map(json!({"firstname": "Jesse", "lastname": "Quinn", "visibility": "ANON"}));
        let flags = RedactionFlags {
            donor_names: true,
            ..Default::default()
        };
        redact(Kind::Donor, &mut fields, flags);
        assert_eq!(fields["firstname"], json!("Jesse"));
    }

    #[test]
    fn unapproved_comment_is_removed() {
        let mut fields = map(json!({
            "comment": "hi mom",
            "commentlanguage": "en",
            "commentstate": "PENDING",
            "donor__visibility": "ALIAS",
        }));
        redact(Kind::Donation, &mut fields, RedactionFlags::default());
        assert!(!fields.contains_key("comment"));
        assert!(!fields.contains_key("commentlanguage"));
    }

    #[test]
    fn anonymous_donor_scrubs_donation_relation() {
        let mut fields = map(json!({
            "donor": 3,
            "donor__alias": "Foo",
            "donor__alias_num": 22,
            "donor__visibility": "ANON",
            "donor__public": "(Anonymous)",
            "commentstate": "APPROVED",
            "amount": 5.0,
        }));
        redact(Kind::Donation, &mut fields, RedactionFlags::default());
        assert!(!fields.contains_key("donor"));
        assert!(fields.keys().all(|k| !k.starts_with("donor__")));
        assert_eq!(fields["amount"], json!(5.0));
    }

    #[test]
    fn run_notes_are_hard_redacted() {
        let mut fields = map(json!({"name": "Any%", "tech_notes": "secret", "layout": "4:3"}));
        redact(Kind::Run, &mut fields, RedactionFlags::default());
        assert!(!fields.contains_key("tech_notes"));
        assert!(!fields.contains_key("layout"));
        assert_eq!(fields["name"], json!("Any%"));
    }
}
