//! Turning free text into query plans.

use std::sync::LazyLock;

use async_trait::async_trait;
use octofhir_core::{DateRange, ResourceType, parse_fhir_date};
use octofhir_storage::{CodeFilter, SortOrder};
use regex::Regex;
use time::{Date, Month};

use crate::error::QueryError;
use crate::plan::{ExecutionMode, PlanFilters, QueryPlan};

/// Converts a free-text question into a [`QueryPlan`].
///
/// Implementations may be remote or on-device models; their failures
/// surface as [`QueryError::Interpretation`].
#[async_trait]
pub trait QueryInterpreter: Send + Sync {
    async fn interpret(&self, text: &str, patient_id: &str) -> Result<QueryPlan, QueryError>;
}

const LOINC: &str = "http://loinc.org";

/// Resource types by keyword, most specific first.
///
/// Keywords match whole words or their plural; a trailing `*` marks a stem
/// that matches any word starting with it.
const TYPE_KEYWORDS: &[(&[&str], ResourceType)] = &[
    (&["family history", "family member", "relatives"], ResourceType::FamilyMemberHistory),
    (&["allerg*"], ResourceType::AllergyIntolerance),
    (&["immuniz*", "immunis*", "vaccin*", "shot"], ResourceType::Immunization),
    (&["medication", "meds", "drug", "prescription", "pill"], ResourceType::MedicationStatement),
    (&["condition", "diagnos*", "problem", "illness"], ResourceType::Condition),
    (&["report", "imaging", "panel result"], ResourceType::DiagnosticReport),
    (&["document", "note", "letter", "discharge summary"], ResourceType::DocumentReference),
    (&["encounter", "visit", "appointment", "admission", "hospital stay"], ResourceType::Encounter),
    (&["observation", "lab", "vital", "result", "measurement", "reading"], ResourceType::Observation),
    (&["patient", "demographic", "date of birth", "birthday", "gender", "my name"], ResourceType::Patient),
];

/// LOINC codes of common labs and vitals.
const LAB_CODES: &[(&[&str], &str)] = &[
    (&["hdl"], "2085-9"),
    (&["ldl"], "13457-7"),
    (&["cholesterol"], "2093-3"),
    (&["triglyceride"], "2571-8"),
    (&["a1c", "hba1c", "hemoglobin a1c"], "4548-4"),
    (&["glucose", "blood sugar"], "2345-7"),
    (&["creatinine"], "2160-0"),
    (&["blood pressure", "bp"], "85354-9"),
    (&["heart rate", "pulse"], "8867-4"),
    (&["bmi", "body mass"], "39156-5"),
    (&["weight"], "29463-7"),
    (&["height"], "8302-2"),
    (&["temperature"], "8310-5"),
];

const ORDINALS: &[(&str, usize)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
];

static NUMERIC_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})(?:st|nd|rd|th)\b").expect("Invalid ordinal regex"));

static COUNTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:last|latest|first|top|recent)\s+(\d{1,3})\b").expect("Invalid count regex")
});

static SINCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:from|since|after)\s+(\d{4}(?:-\d{2}){0,2})\b").expect("Invalid since regex")
});

static UNTIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:until|before|to|through)\s+(\d{4}(?:-\d{2}){0,2})\b")
        .expect("Invalid until regex")
});

static IN_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:in|during)\s+(\d{4})\b").expect("Invalid year regex"));

/// Deterministic keyword matcher.
///
/// Recognises resource-type keywords, common lab names (mapped to LOINC
/// codes), "latest"/"first"/"Nth" phrasing, "last N" counts, date bounds
/// such as "since 2023-01-01" or "in 2022", and "offline"/"from the server"
/// mode hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordInterpreter;

impl KeywordInterpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, text: &str) -> Result<QueryPlan, QueryError> {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return Err(QueryError::interpretation("empty question"));
        }

        let codes: Vec<&str> = LAB_CODES
            .iter()
            .filter(|(words, _)| words.iter().any(|w| contains_word(&text, w)))
            .map(|(_, code)| *code)
            .collect();

        let resource_type = TYPE_KEYWORDS
            .iter()
            .find(|(words, _)| words.iter().any(|w| matches_term(&text, w)))
            .map(|(_, rt)| *rt)
            .or_else(|| (!codes.is_empty()).then_some(ResourceType::Observation))
            .ok_or_else(|| {
                QueryError::interpretation(format!("no resource type recognised in {text:?}"))
            })?;

        let mut filters = PlanFilters::default();
        if !codes.is_empty() && resource_type == ResourceType::Observation {
            filters.code_search = Some(CodeFilter::new(codes).with_system(LOINC));
        }
        filters.date_range = date_range(&text)?;
        apply_ordering(&text, &mut filters);

        let plan = QueryPlan::new(resource_type)
            .with_filters(filters)
            .with_mode(mode_hint(&text));
        plan.validate()?;
        tracing::debug!(resource_type = %plan.resource_type, mode = %plan.mode, "Interpreted question");
        Ok(plan)
    }
}

#[async_trait]
impl QueryInterpreter for KeywordInterpreter {
    async fn interpret(&self, text: &str, _patient_id: &str) -> Result<QueryPlan, QueryError> {
        self.plan(text)
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(at, _)| {
        starts_word(text, at) && ends_word(text, at + word.len())
    })
}

fn matches_term(text: &str, term: &str) -> bool {
    match term.strip_suffix('*') {
        Some(stem) => text.match_indices(stem).any(|(at, _)| starts_word(text, at)),
        None => text.match_indices(term).any(|(at, _)| {
            let end = at + term.len();
            starts_word(text, at)
                && ["", "s", "es"]
                    .iter()
                    .any(|plural| text[end..].starts_with(plural) && ends_word(text, end + plural.len()))
        }),
    }
}

fn starts_word(text: &str, at: usize) -> bool {
    !text[..at].chars().next_back().is_some_and(char::is_alphanumeric)
}

fn ends_word(text: &str, at: usize) -> bool {
    !text[at..].chars().next().is_some_and(char::is_alphanumeric)
}

fn apply_ordering(text: &str, filters: &mut PlanFilters) {
    let newest_first = ["latest", "last", "most recent", "newest", "recent", "current"]
        .iter()
        .any(|w| contains_word(text, w));
    let oldest_first = ["earliest", "oldest"].iter().any(|w| contains_word(text, w));

    if let Some(count) = COUNTED
        .captures(text)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|n| *n > 0)
    {
        filters.limit = Some(count);
        filters.sort = Some(if contains_word(text, "first") && !newest_first {
            SortOrder::DateAscending
        } else {
            SortOrder::DateDescending
        });
        return;
    }

    let ordinal = ORDINALS
        .iter()
        .find(|(word, _)| contains_word(text, word))
        .map(|(_, n)| *n)
        .or_else(|| {
            NUMERIC_ORDINAL
                .captures(text)
                .and_then(|c| c[1].parse::<usize>().ok())
        })
        .filter(|n| *n > 0);

    match (ordinal, newest_first, oldest_first) {
        (Some(n), true, _) => {
            // "second most recent"; a bare "first" with "latest" means the newest.
            filters.sort = Some(SortOrder::DateDescending);
            filters.record_index = Some(n - 1);
        }
        (Some(n), false, _) => {
            filters.sort = Some(SortOrder::DateAscending);
            filters.record_index = Some(n - 1);
        }
        (None, true, _) => {
            filters.sort = Some(SortOrder::DateDescending);
            filters.record_index = Some(0);
        }
        (None, false, true) => {
            filters.sort = Some(SortOrder::DateAscending);
            filters.record_index = Some(0);
        }
        (None, false, false) => {}
    }
}

fn date_range(text: &str) -> Result<Option<DateRange>, QueryError> {
    let parse = |value: &str| {
        parse_fhir_date(value).map_err(|e| QueryError::interpretation(e.to_string()))
    };

    let mut range = DateRange::default();
    if let Some(c) = SINCE.captures(text) {
        range.start = Some(parse(&c[1])?);
    }
    if let Some(c) = UNTIL.captures(text) {
        range.end = Some(parse(&c[1])?);
    }
    if range.is_unbounded()
        && let Some(c) = IN_YEAR.captures(text)
        && let Ok(year) = c[1].parse::<i32>()
    {
        let start = Date::from_calendar_date(year, Month::January, 1)
            .map_err(|e| QueryError::interpretation(e.to_string()))?;
        let end = Date::from_calendar_date(year, Month::December, 31)
            .map_err(|e| QueryError::interpretation(e.to_string()))?;
        range = DateRange::new(Some(start), Some(end));
    }
    Ok((!range.is_unbounded()).then_some(range))
}

fn mode_hint(text: &str) -> ExecutionMode {
    if ["offline", "cached", "local"].iter().any(|w| contains_word(text, w)) {
        ExecutionMode::Local
    } else if ["from the server", "remote", "online", "live"]
        .iter()
        .any(|w| contains_word(text, w))
    {
        ExecutionMode::Remote
    } else {
        ExecutionMode::Either
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn plan(text: &str) -> QueryPlan {
        KeywordInterpreter::new().plan(text).unwrap()
    }

    #[test]
    fn test_latest_lab_value() {
        let plan = plan("What was my latest cholesterol?");
        assert_eq!(plan.resource_type, ResourceType::Observation);
        let codes = plan.filters.code_search.unwrap();
        assert_eq!(codes.codes, vec!["2093-3".to_string()]);
        assert_eq!(codes.system.as_deref(), Some(LOINC));
        assert_eq!(plan.filters.sort, Some(SortOrder::DateDescending));
        assert_eq!(plan.filters.record_index, Some(0));
        assert_eq!(plan.mode, ExecutionMode::Either);
    }

    #[test]
    fn test_ordinal_phrasing() {
        let p = plan("show my second most recent visit");
        assert_eq!(p.resource_type, ResourceType::Encounter);
        assert_eq!(p.filters.sort, Some(SortOrder::DateDescending));
        assert_eq!(p.filters.record_index, Some(1));

        let p = plan("my 3rd immunization");
        assert_eq!(p.resource_type, ResourceType::Immunization);
        assert_eq!(p.filters.sort, Some(SortOrder::DateAscending));
        assert_eq!(p.filters.record_index, Some(2));
    }

    #[test]
    fn test_counted_results() {
        let p = plan("last 3 glucose readings");
        assert_eq!(p.filters.limit, Some(3));
        assert_eq!(p.filters.record_index, None);
        assert_eq!(p.filters.sort, Some(SortOrder::DateDescending));
    }

    #[test]
    fn test_date_bounds() {
        let p = plan("conditions since 2021-03-01");
        assert_eq!(p.resource_type, ResourceType::Condition);
        assert_eq!(p.filters.date_range.unwrap().start, Some(date!(2021 - 03 - 01)));

        let p = plan("vaccines in 2022");
        let range = p.filters.date_range.unwrap();
        assert_eq!(range.start, Some(date!(2022 - 01 - 01)));
        assert_eq!(range.end, Some(date!(2022 - 12 - 31)));
    }

    #[test]
    fn test_mode_hints() {
        assert_eq!(plan("my allergies (offline)").mode, ExecutionMode::Local);
        assert_eq!(plan("fetch medications from the server").mode, ExecutionMode::Remote);
    }

    #[test]
    fn test_word_boundaries() {
        // "bp" must not match inside other words.
        assert!(!contains_word("subpoena", "bp"));
        assert!(contains_word("my bp today", "bp"));
    }

    #[test]
    fn test_type_keywords_match_whole_words() {
        for text in ["is anything available offline", "clean up the spill", "what does this denote"] {
            assert!(KeywordInterpreter::new().plan(text).is_err(), "{text}");
        }

        assert_eq!(plan("my labs").resource_type, ResourceType::Observation);
        assert_eq!(plan("any pills I take").resource_type, ResourceType::MedicationStatement);
        assert_eq!(plan("notes from the clinic").resource_type, ResourceType::DocumentReference);
        assert_eq!(plan("list my allergies").resource_type, ResourceType::AllergyIntolerance);
        assert_eq!(plan("when was I diagnosed").resource_type, ResourceType::Condition);

        assert!(matches_term("flu vaccination", "vaccin*"));
        assert!(!matches_term("unvaccinated", "vaccin*"));
    }

    #[test]
    fn test_unrecognised_text() {
        let err = KeywordInterpreter::new().plan("hello there").unwrap_err();
        assert!(matches!(err, QueryError::Interpretation(_)));
        assert!(KeywordInterpreter::new().plan("   ").is_err());
    }

    #[tokio::test]
    async fn test_trait_object() {
        let interpreter: Box<dyn QueryInterpreter> = Box::new(KeywordInterpreter::new());
        let plan = interpreter.interpret("family history", "p1").await.unwrap();
        assert_eq!(plan.resource_type, ResourceType::FamilyMemberHistory);
    }
}
