//! Screen-level orchestration: the session context and one explicit loader or
//! action per portal view. Every network failure is converted through
//! `friendly_message` here, so rendering code only ever sees display text.

use chrono::{DateTime, Utc};
use modportal_client::{friendly_message, ApiClient, ApiError, ImageUpload};
use modportal_core::{
    Category, CreateOpportunityForm, FormError, Leaderboard, LeaderboardPeriod, ModeratorId,
    ModeratorProfile, Opportunity, OpportunityFilter, OpportunityId, Route, SortDirection,
    DASHBOARD_RECENT_POSTS, LIST_PAGE_SIZE,
};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "modportal-views";

pub const MSG_SESSION_FAILED: &str = "Failed to load user profile";
pub const MSG_MISSING_ID: &str =
    "The server did not return an id for the new opportunity. Please check the list before retrying.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewErrorKind {
    Connectivity,
    Validation,
    Unauthorized,
    NotFound,
    Server,
    Other,
}

/// Display-ready failure. Only ever built through the error translator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ViewError {
    pub message: String,
    pub kind: ViewErrorKind,
}

impl ViewError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ViewErrorKind::Validation,
        }
    }
}

impl From<ApiError> for ViewError {
    fn from(err: ApiError) -> Self {
        let kind = match &err {
            ApiError::Network(_) => ViewErrorKind::Connectivity,
            ApiError::Status { status, .. } => match status {
                400 | 422 => ViewErrorKind::Validation,
                401 | 403 => ViewErrorKind::Unauthorized,
                404 => ViewErrorKind::NotFound,
                s if *s >= 500 => ViewErrorKind::Server,
                _ => ViewErrorKind::Other,
            },
            _ => ViewErrorKind::Other,
        };
        Self {
            message: friendly_message(&err),
            kind,
        }
    }
}

/// Process-wide client state for one page load: the current moderator, fetched
/// at most once, and the logout action.
pub struct SessionContext {
    client: ApiClient,
    user: Option<ModeratorProfile>,
    error: Option<String>,
}

impl SessionContext {
    /// Without a stored token this resolves immediately with no user and no
    /// error; no request is made.
    pub async fn load(client: ApiClient) -> Self {
        let mut session = Self::new(client);
        session.refetch().await;
        session
    }

    /// Context with nothing fetched yet.
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: None,
            error: None,
        }
    }

    pub async fn refetch(&mut self) {
        match self.client.has_token().await {
            Ok(true) => {}
            Ok(false) => {
                self.user = None;
                self.error = None;
                return;
            }
            Err(err) => {
                warn!(error = %err, "token store unavailable");
                self.user = None;
                self.error = Some(friendly_message(&err));
                return;
            }
        }

        match self.client.profile().await {
            Ok(profile) => {
                self.user = Some(profile);
                self.error = None;
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch moderator profile");
                self.user = None;
                self.error = Some(if err.is_unauthorized() {
                    MSG_SESSION_FAILED.to_string()
                } else {
                    friendly_message(&err)
                });
            }
        }
    }

    pub fn user(&self) -> Option<&ModeratorProfile> {
        self.user.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Clears the token and the in-memory user, then navigates to login.
    /// Makes no network call.
    pub async fn logout(&mut self) {
        if let Err(err) = self.client.tokens().clear().await {
            warn!(error = %err, "failed to clear stored token on logout");
        }
        self.user = None;
        self.error = None;
        self.client.navigator().navigate(Route::Login);
    }
}

/// Validates the login form locally, then exchanges the credentials for a
/// token and navigates to the dashboard.
pub async fn login(client: &ApiClient, email: &str, password: &str) -> Result<(), ViewError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ViewError::validation("Please enter your email"));
    }
    if !email.contains('@') {
        return Err(ViewError::validation("Please enter a valid email"));
    }
    if password.is_empty() {
        return Err(ViewError::validation("Please enter your password"));
    }

    match client.login(email, password).await {
        Ok(_) => {
            info!("moderator logged in");
            client.navigator().navigate(Route::Dashboard);
            Ok(())
        }
        Err(err) if err.is_unauthorized() => {
            Err(ViewError::validation("Invalid email or password"))
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// The moderator's own posts; detail pages allow deletion.
    Own,
    /// Everyone's posts; read-only.
    Global,
}

impl ListScope {
    pub fn list_route(&self) -> Route {
        match self {
            ListScope::Own => Route::Opportunities,
            ListScope::Global => Route::GlobalOpportunities,
        }
    }

    pub fn detail_route(&self, id: OpportunityId) -> Route {
        match self {
            ListScope::Own => Route::OpportunityDetail(id),
            ListScope::Global => Route::GlobalOpportunityDetail(id),
        }
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, ListScope::Own)
    }
}

/// One bounded page of records plus the categories the filter bar needs.
#[derive(Debug, Clone)]
pub struct ListData {
    pub scope: ListScope,
    pub records: Vec<Opportunity>,
    pub categories: Vec<Category>,
    /// The page came back full, so filters may be missing records that the
    /// backend did not return.
    pub possibly_truncated: bool,
}

impl ListData {
    pub fn visible(
        &self,
        filter: &OpportunityFilter,
        sort: Option<SortDirection>,
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        let mut rows = filter.apply(&self.records, &self.categories, now);
        if let Some(direction) = sort {
            modportal_core::sort_by_deadline(&mut rows, direction);
        }
        rows
    }
}

/// Fetches the page and the category list concurrently. A category failure
/// only degrades the filter bar.
pub async fn load_opportunity_list(
    client: &ApiClient,
    scope: ListScope,
) -> Result<ListData, ViewError> {
    let records = async {
        match scope {
            ListScope::Own => client.my_opportunities(1, LIST_PAGE_SIZE).await,
            ListScope::Global => client.global_opportunities(1, LIST_PAGE_SIZE).await,
        }
    };
    let (records, categories) = tokio::join!(records, client.categories());

    let records = records.map_err(|err| {
        warn!(error = %err, ?scope, "failed to load opportunities");
        ViewError::from(err)
    })?;
    let categories = categories.unwrap_or_else(|err| {
        warn!(error = %err, "failed to load categories");
        Vec::new()
    });

    let possibly_truncated = records.len() >= LIST_PAGE_SIZE as usize;
    if possibly_truncated {
        warn!(?scope, limit = LIST_PAGE_SIZE, "list page is full; client-side filters see a truncated set");
    }

    Ok(ListData {
        scope,
        records,
        categories,
        possibly_truncated,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Found(Box<Opportunity>),
    NotFound,
}

/// A 404 is a view state, not an error.
pub async fn load_detail(
    client: &ApiClient,
    scope: ListScope,
    id: OpportunityId,
) -> Result<DetailState, ViewError> {
    let result = match scope {
        ListScope::Own => client.my_opportunity(id).await,
        ListScope::Global => client.global_opportunity(id).await,
    };
    match result {
        Ok(opportunity) => Ok(DetailState::Found(Box::new(opportunity))),
        Err(err) if err.is_not_found() => Ok(DetailState::NotFound),
        Err(err) => {
            warn!(error = %err, id, "failed to load opportunity");
            Err(err.into())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Nothing was sent; the user has not confirmed yet.
    ConfirmationRequired,
    /// Deleted; navigation back to the owning list was requested.
    Deleted,
    /// The record is unchanged and the delete control stays usable.
    Failed { message: String },
}

pub async fn delete_opportunity(
    client: &ApiClient,
    id: OpportunityId,
    confirmed: bool,
) -> DeleteOutcome {
    if !confirmed {
        return DeleteOutcome::ConfirmationRequired;
    }
    match client.delete_opportunity(id).await {
        Ok(()) => {
            info!(id, "opportunity deleted");
            client.navigator().navigate(ListScope::Own.list_route());
            DeleteOutcome::Deleted
        }
        Err(err) => {
            warn!(error = %err, id, "failed to delete opportunity");
            DeleteOutcome::Failed {
                message: friendly_message(&err),
            }
        }
    }
}

pub async fn load_create_form(client: &ApiClient) -> Result<Vec<Category>, ViewError> {
    client.categories().await.map_err(|err| {
        warn!(error = %err, "failed to load categories for the create form");
        ViewError::from(err)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Rejected locally; no request was made.
    #[error(transparent)]
    Invalid(#[from] FormError),
    #[error("{0}")]
    Failed(String),
    #[error("{}", MSG_MISSING_ID)]
    MissingId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: OpportunityId,
    /// Set when the record was created but the image upload failed.
    pub upload_warning: Option<String>,
}

pub const MSG_CREATED: &str = "Opportunity created successfully";

/// Two-phase create: the record first, then the optional image against the new
/// id. An upload failure leaves the record in place and comes back as a
/// warning.
pub async fn submit_create(
    client: &ApiClient,
    form: &CreateOpportunityForm,
    categories: &[Category],
    image: Option<ImageUpload>,
) -> Result<SubmitOutcome, SubmitError> {
    let payload = form.validate(categories)?;

    let id = match client.create_opportunity(&payload).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!("create call succeeded without returning an id");
            return Err(SubmitError::MissingId);
        }
        Err(err) => {
            warn!(error = %err, "failed to create opportunity");
            return Err(SubmitError::Failed(friendly_message(&err)));
        }
    };
    info!(id, "opportunity created");

    let mut upload_warning = None;
    if let Some(image) = image.filter(|i| !i.bytes.is_empty()) {
        if let Err(err) = client.upload_opportunity_image(id, image).await {
            warn!(error = %err, id, "image upload failed after create");
            upload_warning = Some(format!(
                "Opportunity created, but the image upload failed: {}",
                friendly_message(&err)
            ));
        }
    }

    client.navigator().navigate(Route::Opportunities);
    Ok(SubmitOutcome { id, upload_warning })
}

pub async fn load_leaderboard(
    client: &ApiClient,
    period: LeaderboardPeriod,
) -> Result<Leaderboard, ViewError> {
    client.leaderboard(period).await.map_err(|err| {
        warn!(error = %err, period = period.as_str(), "failed to load leaderboard");
        ViewError::from(err)
    })
}

pub async fn load_profile(client: &ApiClient) -> Result<ModeratorProfile, ViewError> {
    client.profile().await.map_err(|err| {
        warn!(error = %err, "failed to load profile");
        ViewError::from(err)
    })
}

/// Another moderator's public profile; `None` when the id is unknown.
pub async fn load_moderator(
    client: &ApiClient,
    mod_id: ModeratorId,
) -> Result<Option<ModeratorProfile>, ViewError> {
    match client.moderator(mod_id).await {
        Ok(profile) => Ok(Some(profile)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => {
            warn!(error = %err, mod_id, "failed to load moderator");
            Err(err.into())
        }
    }
}

/// Two independent slots filled concurrently; either may fail alone.
#[derive(Debug, Clone)]
pub struct DashboardData {
    pub recent_posts: Result<Vec<Opportunity>, ViewError>,
    pub leaderboard: Result<Leaderboard, ViewError>,
}

pub async fn load_dashboard(client: &ApiClient) -> DashboardData {
    let (recent_posts, leaderboard) = tokio::join!(
        client.my_opportunities(1, DASHBOARD_RECENT_POSTS),
        client.leaderboard(LeaderboardPeriod::ThisMonth),
    );
    DashboardData {
        recent_posts: recent_posts
            .map(|mut posts| {
                posts.truncate(DASHBOARD_RECENT_POSTS as usize);
                posts
            })
            .map_err(ViewError::from),
        leaderboard: leaderboard.map_err(ViewError::from),
    }
}
