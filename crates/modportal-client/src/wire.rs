//! Boundary normalization. The API is inconsistent about field names, so
//! every response is read into a permissive raw shape and mapped once into the
//! canonical records of `modportal-core`. Fallback-field logic lives here and
//! nowhere else.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use modportal_core::{
    Category, CategoryRef, EngagementCounters, Leaderboard, LeaderboardEntry,
    LeaderboardPeriod, ModeratorProfile, ModeratorStats, Opportunity, OpportunityId,
    RecentPost, Tag,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::ApiError;

#[derive(Debug, Deserialize)]
struct RawOpportunity {
    id: Option<i64>,
    opportunity_id: Option<i64>,
    title: Option<String>,
    description: Option<String>,
    full_description: Option<String>,
    short_description: Option<String>,
    category_id: Option<i64>,
    category: Option<JsonValue>,
    category_name: Option<String>,
    deadline: Option<String>,
    source_url: Option<String>,
    source: Option<String>,
    expired: Option<bool>,
    is_verified: Option<bool>,
    creator_name: Option<String>,
    total_applied: Option<u64>,
    total_interested: Option<u64>,
    total_saved: Option<u64>,
    total_not_interested: Option<u64>,
    total_engagement: Option<u64>,
    engagement: Option<u64>,
    image_url: Option<String>,
    eligibility: Option<String>,
    eligibility_criteria: Option<String>,
    provider: Option<String>,
    reward: Option<String>,
    location: Option<String>,
    key_insights: Option<Vec<String>>,
    insights: Option<Vec<String>>,
    required_documents: Option<Vec<String>>,
    documents: Option<Vec<String>>,
    tags: Option<Vec<JsonValue>>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    id: i64,
    name: Option<String>,
    category_name: Option<String>,
    tags: Option<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct RawRecentPost {
    id: i64,
    title: Option<String>,
    category_name: Option<String>,
    engagement: Option<u64>,
    image_url: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    mod_id: Option<i64>,
    id: Option<i64>,
    user_id: Option<i64>,
    name: Option<String>,
    email: Option<String>,
    category_name: Option<String>,
    category: Option<JsonValue>,
    rank: Option<u32>,
    joined_at: Option<String>,
    created_at: Option<String>,
    stats: Option<ModeratorStats>,
    recent_posts: Option<Vec<RawRecentPost>>,
}

#[derive(Debug, Deserialize)]
struct RawLeaderboardEntry {
    rank: u32,
    mod_id: Option<i64>,
    id: Option<i64>,
    name: Option<String>,
    category_name: Option<String>,
    total_posts: Option<u64>,
    total_engagement: Option<u64>,
    avg_engagement: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLeaderboard {
    period: Option<String>,
    total_moderators: Option<u64>,
    current_mod_rank: Option<u32>,
    #[serde(default)]
    leaderboard: Vec<RawLeaderboardEntry>,
}

/// Access token returned by the login endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: Option<String>,
}

/// Accepts RFC 3339, naive ISO-8601 date-times (read as UTC) and bare dates.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn timestamp_field(field: &'static str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        warn!(field, value = raw, "unparsable timestamp ignored");
    }
    parsed
}

fn first_non_empty(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn category_ref(
    category_id: Option<i64>,
    category: Option<&JsonValue>,
    category_name: Option<String>,
) -> CategoryRef {
    let (embedded_id, embedded_name) = match category {
        Some(JsonValue::Number(n)) => (n.as_i64(), None),
        Some(JsonValue::String(s)) => (None, Some(s.clone())),
        Some(JsonValue::Object(obj)) => (
            obj.get("id").and_then(JsonValue::as_i64),
            obj.get("name").and_then(JsonValue::as_str).map(str::to_string),
        ),
        _ => (None, None),
    };
    CategoryRef {
        id: category_id.or(embedded_id),
        name: first_non_empty([category_name, embedded_name]),
    }
}

fn tag_from_value(value: &JsonValue) -> Option<Tag> {
    match value {
        JsonValue::Number(n) => n.as_i64().map(|id| Tag {
            id,
            name: id.to_string(),
        }),
        JsonValue::Object(obj) => {
            let id = obj
                .get("id")
                .or_else(|| obj.get("tag_id"))
                .and_then(JsonValue::as_i64)?;
            let name = obj
                .get("name")
                .or_else(|| obj.get("tag_name"))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string());
            Some(Tag { id, name })
        }
        _ => None,
    }
}

fn tags_from_values(values: Option<Vec<JsonValue>>) -> Vec<Tag> {
    values
        .unwrap_or_default()
        .iter()
        .filter_map(tag_from_value)
        .collect()
}

fn normalize_opportunity(raw: RawOpportunity) -> Option<Opportunity> {
    let id = raw.id.or(raw.opportunity_id)?;
    let category = category_ref(raw.category_id, raw.category.as_ref(), raw.category_name);
    let engagement = EngagementCounters {
        applied: raw.total_applied.unwrap_or(0),
        interested: raw.total_interested.unwrap_or(0),
        saved: raw.total_saved.unwrap_or(0),
        not_interested: raw.total_not_interested.unwrap_or(0),
        total: raw.total_engagement.or(raw.engagement).unwrap_or(0),
    };
    Some(Opportunity {
        id,
        title: raw.title.unwrap_or_default(),
        description: first_non_empty([
            raw.description,
            raw.full_description,
            raw.short_description,
        ]),
        category,
        deadline: timestamp_field("deadline", raw.deadline.as_deref()),
        source_url: first_non_empty([raw.source_url, raw.source]),
        expired: raw.expired.unwrap_or(false),
        is_verified: raw.is_verified.unwrap_or(false),
        creator_name: first_non_empty([raw.creator_name]),
        engagement,
        image_url: first_non_empty([raw.image_url]),
        eligibility: first_non_empty([raw.eligibility, raw.eligibility_criteria]),
        provider: first_non_empty([raw.provider]),
        reward: first_non_empty([raw.reward]),
        location: first_non_empty([raw.location]),
        insights: raw.key_insights.or(raw.insights).unwrap_or_default(),
        required_documents: raw.required_documents.or(raw.documents).unwrap_or_default(),
        tags: tags_from_values(raw.tags),
        created_at: timestamp_field("created_at", raw.created_at.as_deref()),
    })
}

/// Items of a list response: either a bare array or an object holding the
/// array under `key`. A missing or null array reads as empty.
fn list_items(body: JsonValue, key: &str) -> Result<Vec<JsonValue>, ApiError> {
    match body {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(mut obj) => match obj.remove(key) {
            Some(JsonValue::Array(items)) => Ok(items),
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(other) => Err(ApiError::Decode(format!(
                "expected array under `{key}`, got {other}"
            ))),
        },
        other => Err(ApiError::Decode(format!("expected list body, got {other}"))),
    }
}

fn decode_items<T: DeserializeOwned>(items: Vec<JsonValue>, entity: &'static str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(entity, error = %err, "skipping malformed record");
                None
            }
        })
        .collect()
}

fn decode<T: DeserializeOwned>(body: JsonValue) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|err| ApiError::Decode(err.to_string()))
}

pub fn opportunity_list(body: JsonValue) -> Result<Vec<Opportunity>, ApiError> {
    let items = list_items(body, "opportunities")?;
    Ok(decode_items::<RawOpportunity>(items, "opportunity")
        .into_iter()
        .filter_map(|raw| {
            let normalized = normalize_opportunity(raw);
            if normalized.is_none() {
                warn!("skipping opportunity without id");
            }
            normalized
        })
        .collect())
}

pub fn opportunity(body: JsonValue) -> Result<Opportunity, ApiError> {
    // Detail responses are sometimes wrapped as {"opportunity": {...}}.
    let body = match body {
        JsonValue::Object(mut obj) if obj.contains_key("opportunity") => obj
            .remove("opportunity")
            .unwrap_or(JsonValue::Null),
        other => other,
    };
    let raw: RawOpportunity = decode(body)?;
    normalize_opportunity(raw).ok_or_else(|| ApiError::Decode("opportunity without id".into()))
}

pub fn categories(body: JsonValue) -> Result<Vec<Category>, ApiError> {
    let items = list_items(body, "categories")?;
    Ok(decode_items::<RawCategory>(items, "category")
        .into_iter()
        .filter_map(|raw| {
            let Some(name) = first_non_empty([raw.name, raw.category_name]) else {
                warn!(id = raw.id, "skipping category without name");
                return None;
            };
            Some(Category {
                id: raw.id,
                name,
                tags: tags_from_values(raw.tags),
            })
        })
        .collect())
}

fn recent_post(raw: RawRecentPost) -> RecentPost {
    RecentPost {
        id: raw.id,
        title: raw.title.unwrap_or_default(),
        category_name: first_non_empty([raw.category_name]),
        engagement: raw.engagement.unwrap_or(0),
        image_url: first_non_empty([raw.image_url]),
        created_at: timestamp_field("created_at", raw.created_at.as_deref()),
    }
}

pub fn moderator_profile(body: JsonValue) -> Result<ModeratorProfile, ApiError> {
    let raw: RawProfile = decode(body)?;
    let mod_id = raw
        .mod_id
        .or(raw.id)
        .or(raw.user_id)
        .ok_or_else(|| ApiError::Decode("moderator profile without id".into()))?;
    let category = category_ref(None, raw.category.as_ref(), raw.category_name);
    Ok(ModeratorProfile {
        mod_id,
        name: raw.name.unwrap_or_default(),
        email: first_non_empty([raw.email]),
        category_name: category.name,
        rank: raw.rank.unwrap_or(0),
        joined_at: timestamp_field(
            "joined_at",
            raw.joined_at.as_deref().or(raw.created_at.as_deref()),
        ),
        stats: raw.stats.unwrap_or_default(),
        recent_posts: raw
            .recent_posts
            .unwrap_or_default()
            .into_iter()
            .map(recent_post)
            .collect(),
    })
}

/// Entries come back re-sorted rank-ascending whatever order the API used.
pub fn leaderboard(body: JsonValue, requested: LeaderboardPeriod) -> Result<Leaderboard, ApiError> {
    let raw: RawLeaderboard = decode(body)?;
    let period = raw
        .period
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(requested);
    let mut entries: Vec<LeaderboardEntry> = raw
        .leaderboard
        .into_iter()
        .filter_map(|e| {
            let Some(mod_id) = e.mod_id.or(e.id) else {
                warn!(rank = e.rank, "skipping leaderboard entry without moderator id");
                return None;
            };
            Some(LeaderboardEntry {
                rank: e.rank,
                mod_id,
                name: e.name.unwrap_or_default(),
                category_name: first_non_empty([e.category_name]),
                total_posts: e.total_posts.unwrap_or(0),
                total_engagement: e.total_engagement.unwrap_or(0),
                avg_engagement: e.avg_engagement.unwrap_or(0.0),
            })
        })
        .collect();
    entries.sort_by_key(|e| e.rank);
    Ok(Leaderboard {
        period,
        total_moderators: raw.total_moderators.unwrap_or(entries.len() as u64),
        current_mod_rank: raw.current_mod_rank,
        entries,
    })
}

/// Identifier of a freshly created record: `id`, `opportunity_id` or `data.id`.
pub fn created_id(body: &JsonValue) -> Option<OpportunityId> {
    body.get("id")
        .or_else(|| body.get("opportunity_id"))
        .or_else(|| body.get("data").and_then(|d| d.get("id")))
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
}

/// Human-readable message from an error body: `message`, else a string `detail`.
pub fn server_message(body: &[u8]) -> Option<String> {
    let value: JsonValue = serde_json::from_slice(body).ok()?;
    ["message", "detail"].iter().find_map(|key| {
        value
            .get(*key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn category_falls_back_across_field_names() {
        let list = opportunity_list(json!({
            "opportunities": [
                {"id": 1, "title": "a", "category_name": "Scholarship"},
                {"id": 2, "title": "b", "category": "Internship"},
                {"id": 3, "title": "c", "category": 4},
                {"id": 4, "title": "d", "category": {"id": 5, "name": "Workshop"}},
                {"id": 5, "title": "e", "category_id": 6, "category_name": "Competition"}
            ]
        }))
        .expect("list");

        let cats: Vec<_> = list.iter().map(|o| o.category.clone()).collect();
        assert_eq!(cats[0], CategoryRef { id: None, name: Some("Scholarship".into()) });
        assert_eq!(cats[1], CategoryRef { id: None, name: Some("Internship".into()) });
        assert_eq!(cats[2], CategoryRef { id: Some(4), name: None });
        assert_eq!(cats[3], CategoryRef { id: Some(5), name: Some("Workshop".into()) });
        assert_eq!(cats[4], CategoryRef { id: Some(6), name: Some("Competition".into()) });
        assert_eq!(list[2].category.display_name(), "Uncategorized");
    }

    #[test]
    fn opportunity_fallback_fields() {
        let o = opportunity(json!({
            "opportunity_id": 9,
            "title": "Fellowship",
            "short_description": "short",
            "source": "https://example.org",
            "eligibility_criteria": "Final year",
            "insights": ["Paid"],
            "documents": ["CV"],
            "engagement": 12,
            "total_saved": 3,
            "tags": [{"id": 1, "name": "STEM"}, 2, "junk"],
            "deadline": "2026-05-01"
        }))
        .expect("detail");

        assert_eq!(o.id, 9);
        assert_eq!(o.description.as_deref(), Some("short"));
        assert_eq!(o.source_url.as_deref(), Some("https://example.org"));
        assert_eq!(o.eligibility.as_deref(), Some("Final year"));
        assert_eq!(o.insights, vec!["Paid"]);
        assert_eq!(o.required_documents, vec!["CV"]);
        assert_eq!(o.engagement.total, 12);
        assert_eq!(o.engagement.saved, 3);
        assert_eq!(o.tags.len(), 2);
        assert_eq!(o.deadline, Some(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()));
        assert!(!o.expired);
    }

    #[test]
    fn wrapped_detail_and_bare_list_are_accepted() {
        let o = opportunity(json!({"opportunity": {"id": 3, "title": "x"}})).expect("wrapped");
        assert_eq!(o.id, 3);

        let list = opportunity_list(json!([{"id": 1, "title": "x"}, {"title": "no id"}]))
            .expect("bare");
        assert_eq!(list.len(), 1);

        assert!(opportunity_list(json!({"opportunities": null})).expect("null").is_empty());
        assert!(opportunity_list(json!("nope")).is_err());
    }

    #[test]
    fn timestamps_in_several_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-03-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T12:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T10:30:00.000123").map(|t| t.date_naive()), Some(expected.date_naive()));
        assert_eq!(parse_timestamp("2026-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("soon"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn categories_with_embedded_tags() {
        let cats = categories(json!([
            {"id": 1, "name": "Scholarship", "tags": [{"id": 10, "name": "STEM"}]},
            {"id": 2, "category_name": "Internship"}
        ]))
        .expect("categories");
        assert_eq!(cats[0].tags, vec![Tag { id: 10, name: "STEM".into() }]);
        assert_eq!(cats[1].name, "Internship");
        assert!(cats[1].tags.is_empty());
    }

    #[test]
    fn profile_and_leaderboard_normalization() {
        let profile = moderator_profile(json!({
            "user_id": 7,
            "name": "Ada Lovelace",
            "rank": 2,
            "created_at": "2025-01-01T00:00:00Z",
            "stats": {"total_posts": 4, "verified_posts": 3}
        }))
        .expect("profile");
        assert_eq!(profile.mod_id, 7);
        assert_eq!(profile.stats.total_posts, 4);
        assert_eq!(profile.stats.pending_posts, 0);
        assert!(profile.joined_at.is_some());
        assert!(moderator_profile(json!({"name": "nobody"})).is_err());

        let board = leaderboard(
            json!({
                "period": "this_month",
                "current_mod_rank": 2,
                "leaderboard": [
                    {"rank": 2, "mod_id": 7, "name": "Ada"},
                    {"rank": 1, "id": 8, "name": "Grace", "avg_engagement": 3.5}
                ]
            }),
            LeaderboardPeriod::AllTime,
        )
        .expect("leaderboard");
        assert_eq!(board.period, LeaderboardPeriod::ThisMonth);
        assert_eq!(board.entries[0].mod_id, 8);
        assert_eq!(board.total_moderators, 2);
    }

    #[test]
    fn records_carrying_both_field_names_are_kept() {
        let list = opportunity_list(json!({
            "opportunities": [
                {"id": 1, "opportunity_id": 1, "title": "both ids"},
                {"id": 2, "title": "plain"}
            ]
        }))
        .expect("list");
        assert_eq!(list.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 2]);

        let detail = opportunity(json!({"id": 5, "opportunity_id": 5, "title": "x"}))
            .expect("detail");
        assert_eq!(detail.id, 5);

        let cats = categories(json!([
            {"id": 1, "name": "Scholarship", "category_name": "Scholarship"},
            {"id": 2, "category_name": "Internship"},
            {"id": 3}
        ]))
        .expect("categories");
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[0].name, "Scholarship");

        let board = leaderboard(
            json!({"leaderboard": [
                {"rank": 1, "mod_id": 7, "id": 7, "name": "Ada"},
                {"rank": 2, "name": "anonymous"}
            ]}),
            LeaderboardPeriod::ThisWeek,
        )
        .expect("leaderboard");
        assert_eq!(board.entries.len(), 1);
        assert_eq!(board.entries[0].mod_id, 7);
    }

    #[test]
    fn created_id_fallbacks() {
        assert_eq!(created_id(&json!({"id": 42})), Some(42));
        assert_eq!(created_id(&json!({"opportunity_id": "43"})), Some(43));
        assert_eq!(created_id(&json!({"data": {"id": 44}})), Some(44));
        assert_eq!(created_id(&json!({"ok": true})), None);
    }

    #[test]
    fn server_message_prefers_message_then_detail() {
        assert_eq!(server_message(br#"{"message":"Title taken"}"#).as_deref(), Some("Title taken"));
        assert_eq!(server_message(br#"{"detail":"Bad deadline"}"#).as_deref(), Some("Bad deadline"));
        assert_eq!(server_message(br#"{"detail":[{"loc":["body"]}]}"#), None);
        assert_eq!(server_message(br#"{"message":"  "}"#), None);
        assert_eq!(server_message(b"<html>"), None);
    }
}
