//! Core domain model for the moderator portal: opportunities, derived status,
//! the client-side filter/sort engine and the create-form state.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "modportal-core";

/// Records fetched per list view. The backend cannot express the filter
/// combinations below, so filtering runs over this bounded page.
pub const LIST_PAGE_SIZE: u32 = 50;

/// Recent own posts shown on the dashboard.
pub const DASHBOARD_RECENT_POSTS: u32 = 5;

pub type OpportunityId = i64;
pub type CategoryId = i64;
pub type TagId = i64;
pub type ModeratorId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

/// Category with its category-scoped tag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

pub fn find_category(categories: &[Category], id: CategoryId) -> Option<&Category> {
    categories.iter().find(|c| c.id == id)
}

/// Category as carried by an opportunity record. The API returns the id, the
/// display name, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CategoryRef {
    pub id: Option<CategoryId>,
    pub name: Option<String>,
}

impl CategoryRef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Uncategorized")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngagementCounters {
    pub applied: u64,
    pub interested: u64,
    pub saved: u64,
    pub not_interested: u64,
    pub total: u64,
}

/// Canonical opportunity record, produced by the API boundary normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub title: String,
    pub description: Option<String>,
    pub category: CategoryRef,
    pub deadline: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub expired: bool,
    pub is_verified: bool,
    pub creator_name: Option<String>,
    pub engagement: EngagementCounters,
    pub image_url: Option<String>,
    pub eligibility: Option<String>,
    pub provider: Option<String>,
    pub reward: Option<String>,
    pub location: Option<String>,
    pub insights: Vec<String>,
    pub required_documents: Vec<String>,
    pub tags: Vec<Tag>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    pub fn status_at(&self, now: DateTime<Utc>) -> DerivedStatus {
        DerivedStatus::derive(self.expired, self.deadline, self.is_verified, now)
    }

    pub fn deadline_countdown(&self, now: DateTime<Utc>) -> DeadlineCountdown {
        DeadlineCountdown::compute(self, now)
    }
}

/// Render-time status label. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivedStatus {
    Live,
    Expired,
    ToBeVerified,
}

impl DerivedStatus {
    /// Expiry (flag or past deadline) dominates verification.
    pub fn derive(
        expired: bool,
        deadline: Option<DateTime<Utc>>,
        is_verified: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let past_deadline = deadline.is_some_and(|d| d < now);
        if expired || past_deadline {
            DerivedStatus::Expired
        } else if is_verified {
            DerivedStatus::Live
        } else {
            DerivedStatus::ToBeVerified
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DerivedStatus::Live => "Live",
            DerivedStatus::Expired => "Expired",
            DerivedStatus::ToBeVerified => "To be Verified",
        }
    }

    /// CSS modifier used by the templates.
    pub fn css_class(&self) -> &'static str {
        match self {
            DerivedStatus::Live => "status-live",
            DerivedStatus::Expired => "status-expired",
            DerivedStatus::ToBeVerified => "status-pending",
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Urgent,
    Soon,
    Comfortable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineCountdown {
    NoDeadline,
    Expired,
    DaysLeft { days: i64, urgency: Urgency },
}

impl DeadlineCountdown {
    pub fn compute(opportunity: &Opportunity, now: DateTime<Utc>) -> Self {
        let Some(deadline) = opportunity.deadline else {
            return DeadlineCountdown::NoDeadline;
        };
        if opportunity.status_at(now) == DerivedStatus::Expired {
            return DeadlineCountdown::Expired;
        }
        let days = (deadline - now).num_days();
        let urgency = if days <= 3 {
            Urgency::Urgent
        } else if days <= 7 {
            Urgency::Soon
        } else {
            Urgency::Comfortable
        };
        DeadlineCountdown::DaysLeft { days, urgency }
    }

    pub fn text(&self) -> String {
        match self {
            DeadlineCountdown::NoDeadline => "No deadline".to_string(),
            DeadlineCountdown::Expired => "Expired".to_string(),
            DeadlineCountdown::DaysLeft { days, .. } => {
                format!("{days} day{} left", if *days == 1 { "" } else { "s" })
            }
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            DeadlineCountdown::NoDeadline => "countdown-none",
            DeadlineCountdown::Expired => "countdown-expired",
            DeadlineCountdown::DaysLeft { urgency: Urgency::Urgent, .. } => "countdown-urgent",
            DeadlineCountdown::DaysLeft { urgency: Urgency::Soon, .. } => "countdown-soon",
            DeadlineCountdown::DaysLeft { .. } => "countdown-comfortable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModeratorStats {
    pub total_posts: u64,
    pub verified_posts: u64,
    pub pending_posts: u64,
    pub rejected_posts: u64,
    pub total_engagement: u64,
    pub avg_engagement_per_post: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPost {
    pub id: OpportunityId,
    pub title: String,
    pub category_name: Option<String>,
    pub engagement: u64,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorProfile {
    pub mod_id: ModeratorId,
    pub name: String,
    pub email: Option<String>,
    pub category_name: Option<String>,
    /// 1-based, computed server-side.
    pub rank: u32,
    pub joined_at: Option<DateTime<Utc>>,
    pub stats: ModeratorStats,
    pub recent_posts: Vec<RecentPost>,
}

impl ModeratorProfile {
    /// Up to two uppercase initials for the avatar.
    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    ThisWeek,
    ThisMonth,
    #[default]
    AllTime,
}

impl LeaderboardPeriod {
    pub const ALL: [LeaderboardPeriod; 3] = [
        LeaderboardPeriod::ThisWeek,
        LeaderboardPeriod::ThisMonth,
        LeaderboardPeriod::AllTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardPeriod::ThisWeek => "this_week",
            LeaderboardPeriod::ThisMonth => "this_month",
            LeaderboardPeriod::AllTime => "all_time",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LeaderboardPeriod::ThisWeek => "This Week",
            LeaderboardPeriod::ThisMonth => "This Month",
            LeaderboardPeriod::AllTime => "All Time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown leaderboard period: {0}")]
pub struct UnknownPeriod(pub String);

impl FromStr for LeaderboardPeriod {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "this_week" => Ok(LeaderboardPeriod::ThisWeek),
            "this_month" => Ok(LeaderboardPeriod::ThisMonth),
            "all_time" => Ok(LeaderboardPeriod::AllTime),
            other => Err(UnknownPeriod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub mod_id: ModeratorId,
    pub name: String,
    pub category_name: Option<String>,
    pub total_posts: u64,
    pub total_engagement: u64,
    pub avg_engagement: f64,
}

/// Rank-ascending leaderboard for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub period: LeaderboardPeriod,
    pub total_moderators: u64,
    pub current_mod_rank: Option<u32>,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn top_three(&self) -> &[LeaderboardEntry] {
        &self.entries[..self.entries.len().min(3)]
    }

    pub fn entry_for(&self, mod_id: ModeratorId) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.mod_id == mod_id)
    }

    /// The moderator's own entry when it is not already on the podium.
    pub fn own_entry_outside_podium(&self, mod_id: ModeratorId) -> Option<&LeaderboardEntry> {
        if self.top_three().iter().any(|e| e.mod_id == mod_id) {
            return None;
        }
        self.entry_for(mod_id)
    }
}

/// Portal routes. Navigation is expressed as values so that any layer can
/// request it and the rendering layer decides how to perform it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Opportunities,
    CreateOpportunity,
    OpportunityDetail(OpportunityId),
    GlobalOpportunities,
    GlobalOpportunityDetail(OpportunityId),
    Leaderboard,
    Profile,
    ModeratorView(ModeratorId),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Login => "/login".to_string(),
            Route::Dashboard => "/".to_string(),
            Route::Opportunities => "/opportunities".to_string(),
            Route::CreateOpportunity => "/opportunities/create".to_string(),
            Route::OpportunityDetail(id) => format!("/opportunities/{id}"),
            Route::GlobalOpportunities => "/global-opportunities".to_string(),
            Route::GlobalOpportunityDetail(id) => format!("/global-opportunities/{id}"),
            Route::Leaderboard => "/leaderboard".to_string(),
            Route::Profile => "/profile".to_string(),
            Route::ModeratorView(id) => format!("/moderator/view/{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFilter {
    Live,
    Expired,
    Pending,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Live => "live",
            StatusFilter::Expired => "expired",
            StatusFilter::Pending => "pending",
        }
    }

    pub fn matches(&self, status: DerivedStatus) -> bool {
        match self {
            StatusFilter::Live => status == DerivedStatus::Live,
            StatusFilter::Expired => status == DerivedStatus::Expired,
            StatusFilter::Pending => status == DerivedStatus::ToBeVerified,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = UnknownStatusFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" | "verified" => Ok(StatusFilter::Live),
            "expired" => Ok(StatusFilter::Expired),
            "pending" => Ok(StatusFilter::Pending),
            other => Err(UnknownStatusFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status filter: {0}")]
pub struct UnknownStatusFilter(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" | "ascend" => Ok(SortDirection::Ascending),
            "desc" | "descend" => Ok(SortDirection::Descending),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

/// Deadline comparator. A record without a deadline sorts after every record
/// with one, whichever the direction.
pub fn compare_deadlines(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
    direction: SortDirection,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match direction {
            SortDirection::Ascending => a.cmp(&b),
            SortDirection::Descending => b.cmp(&a),
        },
    }
}

pub fn sort_by_deadline(records: &mut [Opportunity], direction: SortDirection) {
    records.sort_by(|a, b| compare_deadlines(a.deadline, b.deadline, direction));
}

/// Conjunction of independent, all-optional predicates over a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpportunityFilter {
    pub search: String,
    pub category: Option<CategoryId>,
    pub status: Option<StatusFilter>,
    pub deadline: Option<NaiveDate>,
}

impl OpportunityFilter {
    pub fn is_empty(&self) -> bool {
        self.search.is_empty()
            && self.category.is_none()
            && self.status.is_none()
            && self.deadline.is_none()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn matches_search(&self, record: &Opportunity) -> bool {
        self.search.is_empty()
            || record
                .title
                .to_lowercase()
                .contains(&self.search.to_lowercase())
    }

    /// Id match when the record carries an id, else display-name match
    /// against the selected category. A record whose category cannot be
    /// resolved either way does not match a set category filter.
    pub fn matches_category(&self, record: &Opportunity, categories: &[Category]) -> bool {
        let Some(selected) = self.category else {
            return true;
        };
        if let Some(id) = record.category.id {
            return id == selected;
        }
        match (find_category(categories, selected), record.category.name.as_deref()) {
            (Some(category), Some(name)) => category.name == name,
            _ => false,
        }
    }

    pub fn matches_status(&self, record: &Opportunity, now: DateTime<Utc>) -> bool {
        match self.status {
            Some(filter) => filter.matches(record.status_at(now)),
            None => true,
        }
    }

    /// Calendar-day match in UTC. A record without a deadline never matches
    /// a set deadline filter.
    pub fn matches_deadline(&self, record: &Opportunity) -> bool {
        match (self.deadline, record.deadline) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(day), Some(deadline)) => deadline.date_naive() == day,
        }
    }

    pub fn matches(&self, record: &Opportunity, categories: &[Category], now: DateTime<Utc>) -> bool {
        self.matches_search(record)
            && self.matches_category(record, categories)
            && self.matches_status(record, now)
            && self.matches_deadline(record)
    }

    /// Filtered copy of `records`; the input is left untouched.
    pub fn apply(
        &self,
        records: &[Opportunity],
        categories: &[Category],
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        records
            .iter()
            .filter(|r| self.matches(r, categories, now))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("The {0} field is required")]
    Required(&'static str),
    #[error("The {field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("Please enter a valid URL")]
    InvalidUrl,
    #[error("Please add at least one key insight")]
    MissingInsight,
    #[error("Please select at least one tag")]
    MissingTag,
    #[error("Selected tag {0} does not belong to the selected category")]
    ForeignTag(TagId),
}

pub const TITLE_MAX_LEN: usize = 200;

/// Client-side state of the create form: static fields plus the two
/// dynamically managed string lists and the category-scoped tag selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateOpportunityForm {
    pub title: String,
    pub category_id: Option<CategoryId>,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    pub source_url: String,
    pub eligibility: String,
    pub provider: String,
    pub reward: String,
    pub location: String,
    insights: Vec<String>,
    required_documents: Vec<String>,
    selected_tags: BTreeSet<TagId>,
}

impl CreateOpportunityForm {
    pub fn insights(&self) -> &[String] {
        &self.insights
    }

    pub fn required_documents(&self) -> &[String] {
        &self.required_documents
    }

    pub fn selected_tags(&self) -> &BTreeSet<TagId> {
        &self.selected_tags
    }

    /// Selecting a category always empties the tag selection, even when the
    /// new category happens to reuse a tag id.
    pub fn select_category(&mut self, category_id: Option<CategoryId>) {
        self.category_id = category_id;
        self.selected_tags.clear();
    }

    pub fn available_tags<'a>(&self, categories: &'a [Category]) -> &'a [Tag] {
        self.category_id
            .and_then(|id| find_category(categories, id))
            .map(|c| c.tags.as_slice())
            .unwrap_or(&[])
    }

    pub fn toggle_tag(&mut self, tag_id: TagId) {
        if !self.selected_tags.remove(&tag_id) {
            self.selected_tags.insert(tag_id);
        }
    }

    pub fn is_tag_selected(&self, tag_id: TagId) -> bool {
        self.selected_tags.contains(&tag_id)
    }

    pub fn add_insight(&mut self, value: &str) -> bool {
        push_unique(&mut self.insights, value)
    }

    pub fn remove_insight(&mut self, value: &str) {
        self.insights.retain(|v| v != value);
    }

    pub fn add_document(&mut self, value: &str) -> bool {
        push_unique(&mut self.required_documents, value)
    }

    pub fn remove_document(&mut self, value: &str) {
        self.required_documents.retain(|v| v != value);
    }

    /// Validates the form and builds the create payload. The insight and tag
    /// guards run before anything touches the network.
    pub fn validate(&self, categories: &[Category]) -> Result<CreateOpportunityPayload, FormError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(FormError::Required("title"));
        }
        if title.chars().count() > TITLE_MAX_LEN {
            return Err(FormError::TooLong {
                field: "title",
                max: TITLE_MAX_LEN,
            });
        }
        let category_id = self.category_id.ok_or(FormError::Required("category"))?;
        let description = self.description.trim();
        if description.is_empty() {
            return Err(FormError::Required("description"));
        }
        let source_url = self.source_url.trim();
        if source_url.is_empty() {
            return Err(FormError::Required("source URL"));
        }
        if !looks_like_url(source_url) {
            return Err(FormError::InvalidUrl);
        }
        if self.insights.is_empty() {
            return Err(FormError::MissingInsight);
        }
        if self.selected_tags.is_empty() {
            return Err(FormError::MissingTag);
        }
        let allowed = self.available_tags(categories);
        if let Some(foreign) = self
            .selected_tags
            .iter()
            .find(|id| !allowed.iter().any(|t| t.id == **id))
        {
            return Err(FormError::ForeignTag(*foreign));
        }

        Ok(CreateOpportunityPayload {
            title: title.to_string(),
            category_id,
            description: description.to_string(),
            deadline: self
                .deadline
                .map(|d| d.and_time(NaiveTime::MIN).and_utc()),
            source_url: source_url.to_string(),
            eligibility: non_empty(&self.eligibility),
            provider: non_empty(&self.provider),
            reward: non_empty(&self.reward),
            location: non_empty(&self.location),
            key_insights: self.insights.clone(),
            required_documents: self.required_documents.clone(),
            tag_ids: self.selected_tags.iter().copied().collect(),
        })
    }
}

/// Body of the create call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOpportunityPayload {
    pub title: String,
    pub category_id: CategoryId,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub key_insights: Vec<String>,
    pub required_documents: Vec<String>,
    pub tag_ids: Vec<TagId>,
}

fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || list.iter().any(|v| v == value) {
        return false;
    }
    list.push(value.to_string());
    true
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn looks_like_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.contains(char::is_whitespace))
}
