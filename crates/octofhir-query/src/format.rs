//! One-line human summaries of cached records.

use octofhir_core::{ResourceType, fhir_date};
use octofhir_storage::{ResourceRecord, resolve_path};
use serde_json::Value;

/// Renders `record` as `date | label | detail`, skipping empty parts.
pub fn summarize(record: &ResourceRecord) -> String {
    let resource = &record.resource;
    let date = record.effective_date().map(|d| fhir_date::format(&d));
    let label = record
        .concept_text()
        .map(str::to_string)
        .or_else(|| text_at(resource, "description"));

    let parts: Vec<Option<String>> = match record.resource_type {
        ResourceType::Patient => vec![
            patient_name(resource),
            text_at(resource, "gender"),
            text_at(resource, "birthDate").map(|b| format!("born {b}")),
        ],
        ResourceType::Observation => vec![date, label, observation_value(resource)],
        ResourceType::Encounter => vec![
            date,
            label.or_else(|| text_at(resource, "class.code")),
            text_at(resource, "status"),
        ],
        ResourceType::MedicationStatement => vec![date, label, text_at(resource, "status")],
        ResourceType::Condition => vec![
            date,
            label,
            concept_code(resource, "clinicalStatus"),
        ],
        ResourceType::AllergyIntolerance => vec![
            date,
            label,
            text_at(resource, "criticality").map(|c| format!("criticality {c}")),
            reactions(resource),
        ],
        ResourceType::Immunization => vec![date, label, text_at(resource, "status")],
        ResourceType::DiagnosticReport => vec![date, label, text_at(resource, "conclusion")],
        ResourceType::DocumentReference => vec![
            date,
            label,
            text_at(resource, "description"),
        ],
        ResourceType::FamilyMemberHistory => vec![date, label, family_conditions(resource)],
    };

    let mut seen = Vec::new();
    for part in parts.into_iter().flatten() {
        if !part.is_empty() && !seen.contains(&part) {
            seen.push(part);
        }
    }
    if seen.is_empty() {
        format!("{}/{}", record.resource_type, record.id)
    } else {
        seen.join(" | ")
    }
}

fn text_at(resource: &Value, path: &str) -> Option<String> {
    resolve_path(resource, path)
        .into_iter()
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
}

fn concept_label(concept: &Value) -> Option<String> {
    concept
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| {
            resolve_path(concept, "coding")
                .into_iter()
                .find_map(|c| c.get("display").or_else(|| c.get("code")).and_then(Value::as_str))
        })
        .map(str::to_string)
}

fn concept_code(resource: &Value, path: &str) -> Option<String> {
    resolve_path(resource, path)
        .into_iter()
        .next()
        .and_then(|concept| text_at(concept, "coding.code").or_else(|| concept_label(concept)))
}

fn patient_name(resource: &Value) -> Option<String> {
    let name = resolve_path(resource, "name").into_iter().next()?;
    if let Some(text) = name.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let mut parts: Vec<&str> = resolve_path(name, "given")
        .into_iter()
        .filter_map(Value::as_str)
        .collect();
    if let Some(family) = name.get("family").and_then(Value::as_str) {
        parts.push(family);
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn quantity(q: &Value) -> Option<String> {
    let value = q.get("value")?;
    let unit = q
        .get("unit")
        .or_else(|| q.get("code"))
        .and_then(Value::as_str);
    Some(match unit {
        Some(unit) => format!("{value} {unit}"),
        None => value.to_string(),
    })
}

fn observation_value(resource: &Value) -> Option<String> {
    if let Some(q) = resource.get("valueQuantity") {
        return quantity(q);
    }
    if let Some(concept) = resource.get("valueCodeableConcept") {
        return concept_label(concept);
    }
    for key in ["valueString", "valueBoolean", "valueInteger", "valueDateTime"] {
        if let Some(v) = text_at(resource, key) {
            return Some(v);
        }
    }

    // Panels such as blood pressure carry their values in components.
    let components: Vec<String> = resolve_path(resource, "component")
        .into_iter()
        .filter_map(|c| c.get("valueQuantity"))
        .filter_map(|q| q.get("value").map(Value::to_string))
        .collect();
    if components.is_empty() {
        return None;
    }
    let unit = text_at(resource, "component.valueQuantity.unit");
    let joined = components.join("/");
    Some(match unit {
        Some(unit) => format!("{joined} {unit}"),
        None => joined,
    })
}

fn reactions(resource: &Value) -> Option<String> {
    let manifestations: Vec<String> = resolve_path(resource, "reaction.manifestation")
        .into_iter()
        .filter_map(concept_label)
        .collect();
    (!manifestations.is_empty()).then(|| manifestations.join(", "))
}

fn family_conditions(resource: &Value) -> Option<String> {
    let conditions: Vec<String> = resolve_path(resource, "condition.code")
        .into_iter()
        .filter_map(concept_label)
        .collect();
    (!conditions.is_empty()).then(|| conditions.join(", "))
}
