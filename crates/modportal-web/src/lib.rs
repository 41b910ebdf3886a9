//! Axum + Askama moderator portal.
//!
//! Every request builds its own `ApiClient` around a cookie-seeded token
//! store and a recording navigator. After the view has run, a changed token
//! is written back as a cookie and a requested navigation becomes a 303.

use std::collections::BTreeSet;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, NaiveDate, Utc};
use modportal_client::{ApiClient, ApiConfig, ImageUpload, MemoryTokenStore, RecordingNavigator};
use modportal_core::{
    Category, CategoryId, CreateOpportunityForm, DeadlineCountdown, Leaderboard,
    LeaderboardEntry, LeaderboardPeriod, ModeratorId, ModeratorProfile, Opportunity,
    OpportunityFilter, OpportunityId, Route, SortDirection, StatusFilter, TagId, TITLE_MAX_LEN,
};
use modportal_views::{
    DeleteOutcome, DetailState, ListScope, SessionContext, SubmitError, ViewError,
    ViewErrorKind, MSG_CREATED,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "modportal-web";

pub const TOKEN_COOKIE: &str = "modportal_token";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const APP_CSS: &str = include_str!("../assets/app.css");

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub api: ApiConfig,
    pub port: u16,
    pub cookie_secure: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            port: 3000,
            cookie_secure: false,
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api: ApiConfig::from_env(),
            port: std::env::var("MODPORTAL_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            cookie_secure: std::env::var("MODPORTAL_COOKIE_SECURE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.cookie_secure),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: WebConfig,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(config: WebConfig) -> anyhow::Result<Self> {
        let http = config.api.build_http_client()?;
        Ok(Self { config, http })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/login", get(login_page_handler).post(login_submit_handler))
        .route("/logout", post(logout_handler))
        .route("/opportunities", get(own_list_handler))
        .route(
            "/opportunities/create",
            get(create_page_handler)
                .post(create_submit_handler)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/opportunities/{id}", get(own_detail_handler))
        .route(
            "/opportunities/{id}/delete",
            get(confirm_delete_handler).post(delete_handler),
        )
        .route("/global-opportunities", get(global_list_handler))
        .route("/global-opportunities/{id}", get(global_detail_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/profile", get(profile_handler))
        .route("/moderator/view/{mod_id}", get(moderator_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = WebConfig::from_env();
    let port = config.port;
    info!(api = %config.api.base_url, port, "starting moderator portal");
    let state = AppState::new(config)?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Notice and warning carried across a redirect as query parameters.
#[derive(Debug, Default)]
struct Flash {
    notice: Option<String>,
    warning: Option<String>,
}

impl Flash {
    fn notice(message: impl Into<String>) -> Self {
        Self {
            notice: Some(message.into()),
            warning: None,
        }
    }

    fn append_to(&self, path: String) -> String {
        let params: Vec<String> = [("notice", &self.notice), ("warning", &self.warning)]
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_deref()
                    .map(|v| format!("{key}={}", urlencoding::encode(v)))
            })
            .collect();
        if params.is_empty() {
            path
        } else {
            format!("{path}?{}", params.join("&"))
        }
    }
}

/// Per-request wiring between the cookie jar and the view layer.
struct RequestSession {
    client: ApiClient,
    tokens: Arc<MemoryTokenStore>,
    navigator: Arc<RecordingNavigator>,
    initial: Option<String>,
    cookie_secure: bool,
}

impl RequestSession {
    fn new(state: &AppState, jar: &CookieJar) -> Self {
        let initial = jar
            .get(TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        let tokens = Arc::new(MemoryTokenStore::new(initial.clone()));
        let navigator = Arc::new(RecordingNavigator::new());
        let client = ApiClient::with_http(
            state.http.clone(),
            &state.config.api.base_url,
            tokens.clone(),
            navigator.clone(),
        );
        Self {
            client,
            tokens,
            navigator,
            initial,
            cookie_secure: state.config.cookie_secure,
        }
    }

    fn signed_in(&self) -> bool {
        self.initial.is_some()
    }

    async fn finish(self, jar: CookieJar, flash: Flash, page: Response) -> Response {
        let current = self.tokens.snapshot().await;
        let jar = if current == self.initial {
            jar
        } else if let Some(token) = current {
            jar.add(
                Cookie::build((TOKEN_COOKIE, token))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .secure(self.cookie_secure),
            )
        } else {
            jar.remove(Cookie::build(TOKEN_COOKIE).path("/"))
        };

        match self.navigator.last() {
            Some(route) => (jar, Redirect::to(&flash.append_to(route.path()))).into_response(),
            None => (jar, page).into_response(),
        }
    }
}

fn redirect_to_login() -> Response {
    Redirect::to(&Route::Login.path()).into_response()
}

/// Shared page chrome: navigation bar, current moderator and flash messages.
struct Chrome {
    active: &'static str,
    user_name: String,
    initials: String,
    rank: String,
    session_error: String,
    notice: String,
    warning: String,
}

impl Chrome {
    fn new(session: &SessionContext, active: &'static str) -> Self {
        let user = session.user();
        Self {
            active,
            user_name: user.map(|u| u.name.clone()).unwrap_or_default(),
            initials: user.map(ModeratorProfile::initials).unwrap_or_default(),
            rank: user
                .filter(|u| u.rank > 0)
                .map(|u| format!("#{}", u.rank))
                .unwrap_or_default(),
            session_error: session.error().unwrap_or_default().to_string(),
            notice: String::new(),
            warning: String::new(),
        }
    }

    fn with_flash(mut self, notice: Option<String>, warning: Option<String>) -> Self {
        self.notice = notice.unwrap_or_default();
        self.warning = warning.unwrap_or_default();
        self
    }
}

#[derive(Debug, Clone)]
struct OpportunityRow {
    id: OpportunityId,
    href: String,
    title: String,
    category: String,
    deadline: String,
    status_label: String,
    status_class: String,
    countdown: String,
    countdown_class: String,
    creator: String,
    engagement: u64,
    image_url: String,
    delete_href: String,
}

impl OpportunityRow {
    fn new(record: &Opportunity, scope: ListScope, now: DateTime<Utc>) -> Self {
        let status = record.status_at(now);
        let countdown = DeadlineCountdown::compute(record, now);
        Self {
            id: record.id,
            href: scope.detail_route(record.id).path(),
            title: record.title.clone(),
            category: record.category.display_name().to_string(),
            deadline: format_date(record.deadline),
            status_label: status.label().to_string(),
            status_class: status.css_class().to_string(),
            countdown: countdown.text(),
            countdown_class: countdown.css_class().to_string(),
            creator: record.creator_name.clone().unwrap_or_default(),
            engagement: record.engagement.total,
            image_url: http_url_or_empty(record.image_url.as_deref()),
            delete_href: match scope {
                ListScope::Own => format!("{}/delete", Route::OpportunityDetail(record.id).path()),
                ListScope::Global => String::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct OptionRow {
    value: String,
    label: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct EntryRow {
    rank: u32,
    href: String,
    name: String,
    category: String,
    posts: u64,
    engagement: u64,
    avg: String,
    is_self: bool,
}

impl EntryRow {
    fn new(entry: &LeaderboardEntry, own_id: Option<ModeratorId>) -> Self {
        Self {
            rank: entry.rank,
            href: Route::ModeratorView(entry.mod_id).path(),
            name: entry.name.clone(),
            category: entry.category_name.clone().unwrap_or_default(),
            posts: entry.total_posts,
            engagement: entry.total_engagement,
            avg: format!("{:.1}", entry.avg_engagement),
            is_self: own_id == Some(entry.mod_id),
        }
    }
}

#[derive(Debug, Clone)]
struct RecentRow {
    href: String,
    title: String,
    category: String,
    engagement: u64,
    created: String,
}

#[derive(Debug, Clone)]
struct TagRow {
    id: TagId,
    name: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    email: String,
    error: String,
}

#[derive(Template)]
#[template(path = "message.html")]
struct MessageTemplate {
    chrome: Chrome,
    title: String,
    message: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    chrome: Chrome,
    recent: Vec<OpportunityRow>,
    recent_error: String,
    podium: Vec<EntryRow>,
    own_entry: Vec<EntryRow>,
    board_error: String,
    own_rank: String,
    total_moderators: u64,
    has_stats: bool,
    total_posts: u64,
    verified_posts: u64,
    pending_posts: u64,
    total_engagement: u64,
}

#[derive(Template)]
#[template(path = "opportunities.html")]
struct OpportunitiesTemplate {
    chrome: Chrome,
    heading: String,
    base_path: String,
    global: bool,
    rows: Vec<OpportunityRow>,
    fetched: usize,
    search: String,
    categories: Vec<OptionRow>,
    statuses: Vec<OptionRow>,
    sorts: Vec<OptionRow>,
    deadline: String,
    filters_active: bool,
    truncated: bool,
    categories_missing: bool,
}

#[derive(Template)]
#[template(path = "detail.html")]
struct DetailTemplate {
    chrome: Chrome,
    back_path: String,
    row: OpportunityRow,
    description: String,
    source_url: String,
    eligibility: String,
    provider: String,
    reward: String,
    location: String,
    insights: Vec<String>,
    documents: Vec<String>,
    tags: Vec<String>,
    applied: u64,
    interested: u64,
    saved: u64,
    not_interested: u64,
    can_delete: bool,
    delete_path: String,
}

#[derive(Template)]
#[template(path = "confirm_delete.html")]
struct ConfirmDeleteTemplate {
    chrome: Chrome,
    title: String,
    action_path: String,
    back_path: String,
    error: String,
}

#[derive(Template)]
#[template(path = "create.html")]
struct CreateTemplate {
    chrome: Chrome,
    title: String,
    title_max: usize,
    description: String,
    deadline: String,
    source_url: String,
    eligibility: String,
    provider: String,
    reward: String,
    location: String,
    current_category: String,
    categories: Vec<OptionRow>,
    tags: Vec<TagRow>,
    insights: Vec<String>,
    documents: Vec<String>,
    error: String,
    categories_error: String,
}

#[derive(Template)]
#[template(path = "leaderboard.html")]
struct LeaderboardTemplate {
    chrome: Chrome,
    periods: Vec<OptionRow>,
    period_label: String,
    podium: Vec<EntryRow>,
    rows: Vec<EntryRow>,
    total_moderators: u64,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileTemplate {
    chrome: Chrome,
    own: bool,
    initials: String,
    name: String,
    email: String,
    category: String,
    rank: u32,
    joined: String,
    total_posts: u64,
    verified_posts: u64,
    pending_posts: u64,
    rejected_posts: u64,
    total_engagement: u64,
    avg_engagement: String,
    recent: Vec<RecentRow>,
}

impl ProfileTemplate {
    fn new(chrome: Chrome, profile: &ModeratorProfile, own: bool) -> Self {
        Self {
            chrome,
            own,
            initials: profile.initials(),
            name: profile.name.clone(),
            email: profile.email.clone().unwrap_or_default(),
            category: profile.category_name.clone().unwrap_or_default(),
            rank: profile.rank,
            joined: format_date(profile.joined_at),
            total_posts: profile.stats.total_posts,
            verified_posts: profile.stats.verified_posts,
            pending_posts: profile.stats.pending_posts,
            rejected_posts: profile.stats.rejected_posts,
            total_engagement: profile.stats.total_engagement,
            avg_engagement: format!("{:.1}", profile.stats.avg_engagement_per_post),
            recent: profile
                .recent_posts
                .iter()
                .map(|p| RecentRow {
                    href: if own {
                        Route::OpportunityDetail(p.id).path()
                    } else {
                        Route::GlobalOpportunityDetail(p.id).path()
                    },
                    title: p.title.clone(),
                    category: p.category_name.clone().unwrap_or_default(),
                    engagement: p.engagement,
                    created: format_date(p.created_at),
                })
                .collect(),
        }
    }
}

async fn login_page_handler(jar: CookieJar) -> Response {
    if jar.get(TOKEN_COOKIE).is_some_and(|c| !c.value().is_empty()) {
        return Redirect::to(&Route::Dashboard.path()).into_response();
    }
    render_html(LoginTemplate {
        email: String::new(),
        error: String::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginForm {
    email: String,
    password: String,
}

async fn login_submit_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    let page = match modportal_views::login(&request.client, &form.email, &form.password).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut page = render_html(LoginTemplate {
                email: form.email.trim().to_string(),
                error: err.message,
            });
            *page.status_mut() = StatusCode::UNPROCESSABLE_ENTITY;
            page
        }
    };
    request.finish(jar, Flash::default(), page).await
}

async fn logout_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let request = RequestSession::new(&state, &jar);
    let mut session = SessionContext::new(request.client.clone());
    session.logout().await;
    request
        .finish(jar, Flash::default(), redirect_to_login())
        .await
}

async fn dashboard_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "dashboard");
    let own_id = session.user().map(|u| u.mod_id);

    let data = modportal_views::load_dashboard(&request.client).await;
    let now = Utc::now();
    let (recent, recent_error) = match data.recent_posts {
        Ok(posts) => (
            posts
                .iter()
                .map(|p| OpportunityRow::new(p, ListScope::Own, now))
                .collect(),
            String::new(),
        ),
        Err(err) => (Vec::new(), err.message),
    };
    let (podium, own_entry, own_rank, total_moderators, board_error) = match data.leaderboard {
        Ok(board) => (
            board
                .top_three()
                .iter()
                .map(|e| EntryRow::new(e, own_id))
                .collect(),
            own_id
                .and_then(|id| board.own_entry_outside_podium(id))
                .map(|e| EntryRow::new(e, own_id))
                .into_iter()
                .collect(),
            board
                .current_mod_rank
                .map(|r| format!("#{r}"))
                .unwrap_or_default(),
            board.total_moderators,
            String::new(),
        ),
        Err(err) => (Vec::new(), Vec::new(), String::new(), 0, err.message),
    };

    let stats = session.user().map(|u| u.stats.clone()).unwrap_or_default();
    let page = render_html(DashboardTemplate {
        chrome,
        recent,
        recent_error,
        podium,
        own_entry,
        board_error,
        own_rank,
        total_moderators,
        has_stats: session.user().is_some(),
        total_posts: stats.total_posts,
        verified_posts: stats.verified_posts,
        pending_posts: stats.pending_posts,
        total_engagement: stats.total_engagement,
    });
    request.finish(jar, Flash::default(), page).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListQuery {
    search: Option<String>,
    category: Option<String>,
    status: Option<String>,
    deadline: Option<String>,
    sort: Option<String>,
    notice: Option<String>,
    warning: Option<String>,
}

impl ListQuery {
    /// Unparseable values are treated as unset.
    fn filter(&self) -> (OpportunityFilter, Option<SortDirection>) {
        let filter = OpportunityFilter {
            search: self.search.as_deref().unwrap_or_default().trim().to_string(),
            category: self.category.as_deref().and_then(|c| c.parse().ok()),
            status: self.status.as_deref().and_then(|s| s.parse().ok()),
            deadline: self
                .deadline
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        };
        let sort = self.sort.as_deref().and_then(|s| s.parse().ok());
        (filter, sort)
    }
}

async fn own_list_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<ListQuery>,
) -> Response {
    list_page(&state, jar, query, ListScope::Own).await
}

async fn global_list_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<ListQuery>,
) -> Response {
    list_page(&state, jar, query, ListScope::Global).await
}

async fn list_page(state: &AppState, jar: CookieJar, query: ListQuery, scope: ListScope) -> Response {
    let request = RequestSession::new(state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let active = match scope {
        ListScope::Own => "opportunities",
        ListScope::Global => "global",
    };
    let chrome = Chrome::new(&session, active).with_flash(query.notice.clone(), query.warning.clone());

    let page = match modportal_views::load_opportunity_list(&request.client, scope).await {
        Ok(data) => {
            let (filter, sort) = query.filter();
            let now = Utc::now();
            let rows = data
                .visible(&filter, sort, now)
                .iter()
                .map(|r| OpportunityRow::new(r, scope, now))
                .collect();
            render_html(OpportunitiesTemplate {
                chrome,
                heading: match scope {
                    ListScope::Own => "My Opportunities".to_string(),
                    ListScope::Global => "All Opportunities".to_string(),
                },
                base_path: scope.list_route().path(),
                global: scope == ListScope::Global,
                rows,
                fetched: data.records.len(),
                search: filter.search.clone(),
                categories: category_options(&data.categories, filter.category),
                statuses: status_options(filter.status),
                sorts: sort_options(sort),
                deadline: filter
                    .deadline
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
                filters_active: !filter.is_empty(),
                truncated: data.possibly_truncated,
                categories_missing: data.categories.is_empty(),
            })
        }
        Err(err) => error_page(chrome, &err),
    };
    request.finish(jar, Flash::default(), page).await
}

async fn own_detail_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<OpportunityId>,
) -> Response {
    detail_page(&state, jar, ListScope::Own, id).await
}

async fn global_detail_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<OpportunityId>,
) -> Response {
    detail_page(&state, jar, ListScope::Global, id).await
}

async fn detail_page(state: &AppState, jar: CookieJar, scope: ListScope, id: OpportunityId) -> Response {
    let request = RequestSession::new(state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let active = match scope {
        ListScope::Own => "opportunities",
        ListScope::Global => "global",
    };
    let chrome = Chrome::new(&session, active);

    let page = match modportal_views::load_detail(&request.client, scope, id).await {
        Ok(DetailState::Found(record)) => {
            let now = Utc::now();
            render_html(DetailTemplate {
                chrome,
                back_path: scope.list_route().path(),
                row: OpportunityRow::new(&record, scope, now),
                description: record.description.clone().unwrap_or_default(),
                source_url: http_url_or_empty(record.source_url.as_deref()),
                eligibility: record.eligibility.clone().unwrap_or_default(),
                provider: record.provider.clone().unwrap_or_default(),
                reward: record.reward.clone().unwrap_or_default(),
                location: record.location.clone().unwrap_or_default(),
                insights: record.insights.clone(),
                documents: record.required_documents.clone(),
                tags: record.tags.iter().map(|t| t.name.clone()).collect(),
                applied: record.engagement.applied,
                interested: record.engagement.interested,
                saved: record.engagement.saved,
                not_interested: record.engagement.not_interested,
                can_delete: scope.can_delete(),
                delete_path: format!("{}/delete", Route::OpportunityDetail(id).path()),
            })
        }
        Ok(DetailState::NotFound) => not_found_page(chrome, "Opportunity not found"),
        Err(err) => error_page(chrome, &err),
    };
    request.finish(jar, Flash::default(), page).await
}

async fn confirm_delete_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<OpportunityId>,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "opportunities");
    let page = match modportal_views::load_detail(&request.client, ListScope::Own, id).await {
        Ok(DetailState::Found(record)) => confirm_delete_page(chrome, id, &record.title, String::new()),
        Ok(DetailState::NotFound) => not_found_page(chrome, "Opportunity not found"),
        Err(err) => error_page(chrome, &err),
    };
    request.finish(jar, Flash::default(), page).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeleteForm {
    confirm: String,
    title: String,
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<OpportunityId>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "opportunities");
    let title = if form.title.trim().is_empty() {
        format!("Opportunity #{id}")
    } else {
        form.title.trim().to_string()
    };

    let confirmed = form.confirm == "yes";
    let (flash, page) = match modportal_views::delete_opportunity(&request.client, id, confirmed).await {
        DeleteOutcome::Deleted => (
            Flash::notice("Opportunity deleted"),
            StatusCode::NO_CONTENT.into_response(),
        ),
        DeleteOutcome::ConfirmationRequired => (
            Flash::default(),
            confirm_delete_page(chrome, id, &title, String::new()),
        ),
        DeleteOutcome::Failed { message } => (
            Flash::default(),
            confirm_delete_page(chrome, id, &title, message),
        ),
    };
    request.finish(jar, flash, page).await
}

fn confirm_delete_page(chrome: Chrome, id: OpportunityId, title: &str, error: String) -> Response {
    render_html(ConfirmDeleteTemplate {
        chrome,
        title: title.to_string(),
        action_path: format!("{}/delete", Route::OpportunityDetail(id).path()),
        back_path: Route::OpportunityDetail(id).path(),
        error,
    })
}

async fn create_page_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "create");
    let (categories, categories_error) = match modportal_views::load_create_form(&request.client).await {
        Ok(categories) => (categories, String::new()),
        Err(err) => (Vec::new(), err.message),
    };
    let page = render_create(
        chrome,
        &CreateOpportunityForm::default(),
        &categories,
        String::new(),
        categories_error,
    );
    request.finish(jar, Flash::default(), page).await
}

/// What the user pressed on the create form.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CreateAction {
    Submit,
    AddInsight,
    RemoveInsight(String),
    AddDocument,
    RemoveDocument(String),
    /// Re-render after a category change so the tag list follows it.
    Refresh,
}

impl CreateAction {
    fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some(("remove_insight", v)) => CreateAction::RemoveInsight(v.to_string()),
            Some(("remove_document", v)) => CreateAction::RemoveDocument(v.to_string()),
            _ => match value {
                "add_insight" => CreateAction::AddInsight,
                "add_document" => CreateAction::AddDocument,
                "refresh" => CreateAction::Refresh,
                _ => CreateAction::Submit,
            },
        }
    }
}

#[derive(Debug, Default)]
struct CreateSubmission {
    fields: Vec<(String, String)>,
    image: Option<ImageUpload>,
}

impl CreateSubmission {
    async fn read(mut multipart: Multipart) -> Result<Self, String> {
        let mut submission = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                if !file_name.is_empty() && !bytes.is_empty() {
                    submission.image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            } else {
                let value = field.text().await.map_err(|e| e.to_string())?;
                submission.fields.push((name, value));
            }
        }
        Ok(submission)
    }

    fn value(&self, key: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn action(&self) -> CreateAction {
        CreateAction::parse(self.value("action"))
    }

    /// Rebuilds the form state carried in the page's fields. Tag choices only
    /// survive while the category is the one they were picked under.
    fn form(&self) -> CreateOpportunityForm {
        let mut form = CreateOpportunityForm::default();
        form.title = self.value("title").to_string();
        form.description = self.value("description").to_string();
        form.deadline = NaiveDate::parse_from_str(self.value("deadline"), "%Y-%m-%d").ok();
        form.source_url = self.value("source_url").to_string();
        form.eligibility = self.value("eligibility").to_string();
        form.provider = self.value("provider").to_string();
        form.reward = self.value("reward").to_string();
        form.location = self.value("location").to_string();
        let category: Option<CategoryId> = self.value("category_id").parse().ok();
        let previous: Option<CategoryId> = self.value("previous_category_id").parse().ok();
        form.select_category(category);
        if category.is_some() && category == previous {
            let tags: BTreeSet<TagId> = self.values("tag").filter_map(|t| t.parse().ok()).collect();
            for tag in tags {
                form.toggle_tag(tag);
            }
        }
        for insight in self.values("insight") {
            form.add_insight(insight);
        }
        for document in self.values("document") {
            form.add_document(document);
        }
        form
    }
}

async fn create_submit_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    multipart: Multipart,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let submission = match CreateSubmission::read(multipart).await {
        Ok(submission) => submission,
        Err(err) => {
            warn!(error = %err, "malformed create form");
            return (StatusCode::BAD_REQUEST, Html("Malformed form submission".to_string()))
                .into_response();
        }
    };

    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "create");
    let (categories, categories_error) = match modportal_views::load_create_form(&request.client).await {
        Ok(categories) => (categories, String::new()),
        Err(err) => (Vec::new(), err.message),
    };

    let mut form = submission.form();
    let mut flash = Flash::default();
    let page = match submission.action() {
        CreateAction::AddInsight => {
            form.add_insight(submission.value("new_insight"));
            render_create(chrome, &form, &categories, String::new(), categories_error)
        }
        CreateAction::RemoveInsight(value) => {
            form.remove_insight(&value);
            render_create(chrome, &form, &categories, String::new(), categories_error)
        }
        CreateAction::AddDocument => {
            form.add_document(submission.value("new_document"));
            render_create(chrome, &form, &categories, String::new(), categories_error)
        }
        CreateAction::RemoveDocument(value) => {
            form.remove_document(&value);
            render_create(chrome, &form, &categories, String::new(), categories_error)
        }
        CreateAction::Refresh => {
            render_create(chrome, &form, &categories, String::new(), categories_error)
        }
        CreateAction::Submit => {
            match modportal_views::submit_create(&request.client, &form, &categories, submission.image.clone())
                .await
            {
                Ok(outcome) => {
                    flash = Flash {
                        notice: Some(MSG_CREATED.to_string()),
                        warning: outcome.upload_warning,
                    };
                    StatusCode::NO_CONTENT.into_response()
                }
                Err(err) => {
                    let status = match err {
                        SubmitError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                        SubmitError::Failed(_) | SubmitError::MissingId => StatusCode::BAD_GATEWAY,
                    };
                    let mut page =
                        render_create(chrome, &form, &categories, err.to_string(), categories_error);
                    *page.status_mut() = status;
                    page
                }
            }
        }
    };
    request.finish(jar, flash, page).await
}

fn render_create(
    chrome: Chrome,
    form: &CreateOpportunityForm,
    categories: &[Category],
    error: String,
    categories_error: String,
) -> Response {
    let tags = form
        .available_tags(categories)
        .iter()
        .map(|t| TagRow {
            id: t.id,
            name: t.name.clone(),
            selected: form.is_tag_selected(t.id),
        })
        .collect();
    render_html(CreateTemplate {
        chrome,
        title: form.title.clone(),
        title_max: TITLE_MAX_LEN,
        description: form.description.clone(),
        deadline: form
            .deadline
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        source_url: form.source_url.clone(),
        eligibility: form.eligibility.clone(),
        provider: form.provider.clone(),
        reward: form.reward.clone(),
        location: form.location.clone(),
        current_category: form.category_id.map(|c| c.to_string()).unwrap_or_default(),
        categories: category_options(categories, form.category_id),
        tags,
        insights: form.insights().to_vec(),
        documents: form.required_documents().to_vec(),
        error,
        categories_error,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LeaderboardQuery {
    period: Option<String>,
}

async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "leaderboard");
    let own_id = session.user().map(|u| u.mod_id);
    let period: LeaderboardPeriod = query
        .period
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or_default();

    let page = match modportal_views::load_leaderboard(&request.client, period).await {
        Ok(board) => render_html(leaderboard_template(chrome, &board, own_id)),
        Err(err) => error_page(chrome, &err),
    };
    request.finish(jar, Flash::default(), page).await
}

fn leaderboard_template(chrome: Chrome, board: &Leaderboard, own_id: Option<ModeratorId>) -> LeaderboardTemplate {
    let podium_len = board.top_three().len();
    LeaderboardTemplate {
        chrome,
        periods: LeaderboardPeriod::ALL
            .iter()
            .map(|p| OptionRow {
                value: p.as_str().to_string(),
                label: p.label().to_string(),
                selected: *p == board.period,
            })
            .collect(),
        period_label: board.period.label().to_string(),
        podium: board
            .top_three()
            .iter()
            .map(|e| EntryRow::new(e, own_id))
            .collect(),
        rows: board.entries[podium_len..]
            .iter()
            .map(|e| EntryRow::new(e, own_id))
            .collect(),
        total_moderators: board.total_moderators,
    }
}

async fn profile_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let chrome = Chrome::new(&session, "profile");
    let page = match session.user() {
        Some(profile) => render_html(ProfileTemplate::new(chrome, profile, true)),
        None => match modportal_views::load_profile(&request.client).await {
            Ok(profile) => render_html(ProfileTemplate::new(chrome, &profile, true)),
            Err(err) => error_page(chrome, &err),
        },
    };
    request.finish(jar, Flash::default(), page).await
}

async fn moderator_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(mod_id): Path<ModeratorId>,
) -> Response {
    let request = RequestSession::new(&state, &jar);
    if !request.signed_in() {
        return redirect_to_login();
    }
    let session = SessionContext::load(request.client.clone()).await;
    let own = session.user().is_some_and(|u| u.mod_id == mod_id);
    let chrome = Chrome::new(&session, "leaderboard");
    let page = match modportal_views::load_moderator(&request.client, mod_id).await {
        Ok(Some(profile)) => render_html(ProfileTemplate::new(chrome, &profile, own)),
        Ok(None) => not_found_page(chrome, "Moderator not found"),
        Err(err) => error_page(chrome, &err),
    };
    request.finish(jar, Flash::default(), page).await
}

async fn app_css_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS).into_response()
}

fn category_options(categories: &[Category], selected: Option<CategoryId>) -> Vec<OptionRow> {
    categories
        .iter()
        .map(|c| OptionRow {
            value: c.id.to_string(),
            label: c.name.clone(),
            selected: selected == Some(c.id),
        })
        .collect()
}

fn status_options(selected: Option<StatusFilter>) -> Vec<OptionRow> {
    [
        (StatusFilter::Live, "Live"),
        (StatusFilter::Expired, "Expired"),
        (StatusFilter::Pending, "To be Verified"),
    ]
    .into_iter()
    .map(|(status, label)| OptionRow {
        value: status.as_str().to_string(),
        label: label.to_string(),
        selected: selected == Some(status),
    })
    .collect()
}

fn sort_options(selected: Option<SortDirection>) -> Vec<OptionRow> {
    [
        (SortDirection::Ascending, "Deadline: soonest first"),
        (SortDirection::Descending, "Deadline: latest first"),
    ]
    .into_iter()
    .map(|(direction, label)| OptionRow {
        value: direction.as_str().to_string(),
        label: label.to_string(),
        selected: selected == Some(direction),
    })
    .collect()
}

/// Backend-supplied links end up in `href`/`src`; only web URLs are rendered.
fn http_url_or_empty(value: Option<&str>) -> String {
    let Some(url) = value.map(str::trim) else {
        return String::new();
    };
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        url.to_string()
    } else {
        String::new()
    }
}

fn format_date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|d| d.format("%b %d, %Y").to_string())
        .unwrap_or_default()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "template rendering failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html("Something went wrong while rendering this page.".to_string()),
    )
        .into_response()
}

fn error_page(chrome: Chrome, err: &ViewError) -> Response {
    let status = match err.kind {
        ViewErrorKind::Connectivity | ViewErrorKind::Server => StatusCode::BAD_GATEWAY,
        ViewErrorKind::Validation => StatusCode::BAD_REQUEST,
        ViewErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ViewErrorKind::NotFound => StatusCode::NOT_FOUND,
        ViewErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut page = render_html(MessageTemplate {
        chrome,
        title: "Something went wrong".to_string(),
        message: err.message.clone(),
    });
    *page.status_mut() = status;
    page
}

fn not_found_page(chrome: Chrome, title: &str) -> Response {
    let mut page = render_html(MessageTemplate {
        chrome,
        title: title.to_string(),
        message: modportal_client::MSG_NOT_FOUND.to_string(),
    });
    *page.status_mut() = StatusCode::NOT_FOUND;
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Hits {
        delete: AtomicUsize,
        create: AtomicUsize,
    }

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{addr}")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer good")
    }

    /// Accepts only the token "good"; everything else is a 401.
    fn stub_api(hits: Arc<Hits>) -> Router {
        Router::new()
            .route(
                "/auth/mod/login",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    if body["password"] == "secret" {
                        (StatusCode::OK, axum::Json(json!({"access_token": "good", "token_type": "bearer"})))
                    } else {
                        (StatusCode::UNAUTHORIZED, axum::Json(json!({"detail": "Invalid credentials"})))
                    }
                }),
            )
            .route(
                "/moderator/profile",
                get(|headers: HeaderMap| async move {
                    if authorized(&headers) {
                        (StatusCode::OK, axum::Json(json!({"mod_id": 3, "name": "Ada Lovelace", "rank": 2})))
                    } else {
                        (StatusCode::UNAUTHORIZED, axum::Json(json!({"detail": "expired"})))
                    }
                }),
            )
            .route(
                "/moderator/categories",
                get(|| async {
                    axum::Json(json!({"categories": [
                        {"id": 1, "name": "Scholarship", "tags": [{"id": 10, "name": "STEM"}]}
                    ]}))
                }),
            )
            .route(
                "/moderator/opportunities",
                get(|headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, axum::Json(json!({})));
                    }
                    (StatusCode::OK, axum::Json(json!({"opportunities": [
                        {"id": 1, "title": "Google Generation Scholarship", "expired": true, "category_id": 1},
                        {"id": 2, "title": "Rhodes Scholarship", "is_verified": true, "category_id": 1}
                    ]})))
                })
                .post(|State(hits): State<Arc<Hits>>| async move {
                    hits.create.fetch_add(1, Ordering::SeqCst);
                    axum::Json(json!({"id": 42}))
                }),
            )
            .route(
                "/moderator/opportunities/{id}",
                get(|Path(id): Path<i64>| async move {
                    axum::Json(json!({"id": id, "title": "Rhodes Scholarship", "key_insights": ["Fully funded"]}))
                })
                .delete(|State(hits): State<Arc<Hits>>| async move {
                    hits.delete.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }),
            )
            .route(
                "/moderator/global-opportunities",
                get(|| async {
                    axum::Json(json!({"opportunities": [
                        {"id": 7, "title": "Chevening Scholarship", "category_id": 1, "creator_name": "Grace",
                         "image_url": "javascript:alert(1)"}
                    ]}))
                }),
            )
            .route(
                "/moderator/global-opportunities/{id}",
                get(|Path(id): Path<i64>| async move {
                    axum::Json(json!({
                        "id": id,
                        "title": "Chevening Scholarship",
                        "source_url": "JavaScript:alert(document.cookie)",
                        "image_url": "data:text/html,<script>alert(1)</script>"
                    }))
                }),
            )
            .route(
                "/moderator/leaderboard",
                get(|| async {
                    axum::Json(json!({
                        "period": "all_time",
                        "total_moderators": 4,
                        "current_mod_rank": 2,
                        "leaderboard": [
                            {"rank": 1, "mod_id": 9, "name": "Grace", "total_posts": 12, "total_engagement": 80, "avg_engagement": 6.7},
                            {"rank": 2, "mod_id": 3, "name": "Ada Lovelace", "total_posts": 9, "total_engagement": 40, "avg_engagement": 4.4}
                        ]
                    }))
                }),
            )
            .with_state(hits)
    }

    async fn portal() -> (Router, Arc<Hits>) {
        let hits = Arc::new(Hits::default());
        let base_url = spawn_stub(stub_api(hits.clone())).await;
        let config = WebConfig {
            api: ApiConfig {
                base_url,
                ..ApiConfig::default()
            },
            ..WebConfig::default()
        };
        (app(AppState::new(config).expect("state")), hits)
    }

    fn get_with_token(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, format!("{TOKEN_COOKIE}={token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn location(resp: &Response) -> &str {
        resp.headers()[header::LOCATION].to_str().unwrap()
    }

    fn set_cookie(resp: &Response) -> String {
        resp.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn protected_pages_redirect_without_token() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(Request::builder().uri("/opportunities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
    }

    #[tokio::test]
    async fn login_sets_cookie_and_goes_to_dashboard() {
        let (app, _) = portal().await;
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=ada%40example.org&password=secret"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/");
        assert!(set_cookie(&resp).contains("modportal_token=good"));

        let bad = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=ada%40example.org&password=nope"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(bad).await.contains("Invalid email or password"));
    }

    #[tokio::test]
    async fn expired_token_clears_cookie_and_redirects_to_login() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(get_with_token("/opportunities", "stale"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
        assert!(set_cookie(&resp).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn list_filters_apply_to_fetched_page() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(get_with_token(
                "/opportunities?search=google&status=expired&notice=Opportunity%20created%20successfully",
                "good",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Google Generation Scholarship"));
        assert!(!text.contains("Rhodes Scholarship"));
        assert!(text.contains("Opportunity created successfully"));
        assert!(text.contains("Ada Lovelace"));
    }

    #[tokio::test]
    async fn delete_needs_explicit_confirmation() {
        let (app, hits) = portal().await;
        let unconfirmed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/opportunities/2/delete")
                    .header(header::COOKIE, format!("{TOKEN_COOKIE}=good"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("title=Rhodes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unconfirmed.status(), StatusCode::OK);
        assert_eq!(hits.delete.load(Ordering::SeqCst), 0);

        let confirmed = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/opportunities/2/delete")
                    .header(header::COOKIE, format!("{TOKEN_COOKIE}=good"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("confirm=yes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&confirmed), "/opportunities?notice=Opportunity%20deleted");
        assert_eq!(hits.delete.load(Ordering::SeqCst), 1);
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        body
    }

    fn create_request(fields: &[(&str, &str)]) -> Request<Body> {
        let boundary = "modportal-boundary";
        Request::builder()
            .method("POST")
            .uri("/opportunities/create")
            .header(header::COOKIE, format!("{TOKEN_COOKIE}=good"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(boundary, fields)))
            .unwrap()
    }

    #[tokio::test]
    async fn create_without_insight_is_rejected_locally() {
        let (app, hits) = portal().await;
        let resp = app
            .oneshot(create_request(&[
                ("title", "Rhodes"),
                ("category_id", "1"),
                ("previous_category_id", "1"),
                ("tag", "10"),
                ("description", "Oxford"),
                ("source_url", "https://example.org"),
                ("action", "submit"),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(resp).await.contains("Please add at least one key insight"));
        assert_eq!(hits.create.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_form_actions_rerender_state() {
        let (app, _) = portal().await;
        let resp = app
            .clone()
            .oneshot(create_request(&[
                ("title", "Rhodes"),
                ("insight", "Fully funded"),
                ("new_insight", "Two years"),
                ("action", "add_insight"),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Fully funded"));
        assert!(text.contains("Two years"));

        let created = app
            .oneshot(create_request(&[
                ("title", "Rhodes"),
                ("category_id", "1"),
                ("previous_category_id", "1"),
                ("tag", "10"),
                ("description", "Oxford"),
                ("source_url", "https://example.org"),
                ("insight", "Fully funded"),
                ("action", "submit"),
            ]))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::SEE_OTHER);
        assert!(location(&created).starts_with("/opportunities?notice="));
    }

    #[tokio::test]
    async fn changing_category_drops_selected_tags() {
        let (app, hits) = portal().await;
        let resp = app
            .oneshot(create_request(&[
                ("title", "Rhodes"),
                ("category_id", "2"),
                ("previous_category_id", "1"),
                ("tag", "10"),
                ("description", "Oxford"),
                ("source_url", "https://example.org"),
                ("insight", "Fully funded"),
                ("action", "submit"),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(resp).await.contains("Please select at least one tag"));
        assert_eq!(hits.create.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn own_list_rows_link_to_delete() {
        let (app, _) = portal().await;
        let own = app
            .clone()
            .oneshot(get_with_token("/opportunities", "good"))
            .await
            .unwrap();
        let text = body_text(own).await.replace("&#x2f;", "/");
        assert!(text.contains("href=\"/opportunities/1/delete\""));
        assert!(text.contains("href=\"/opportunities/2/delete\""));

        let global = app
            .oneshot(get_with_token("/global-opportunities", "good"))
            .await
            .unwrap();
        assert_eq!(global.status(), StatusCode::OK);
        let text = body_text(global).await.replace("&#x2f;", "/");
        assert!(text.contains("Chevening Scholarship"));
        assert!(!text.contains("/delete"));
    }

    #[tokio::test]
    async fn non_web_links_are_not_rendered() {
        let (app, _) = portal().await;
        let list = app
            .clone()
            .oneshot(get_with_token("/global-opportunities", "good"))
            .await
            .unwrap();
        assert!(!body_text(list).await.to_ascii_lowercase().contains("javascript:"));

        let detail = app
            .oneshot(get_with_token("/global-opportunities/7", "good"))
            .await
            .unwrap();
        assert_eq!(detail.status(), StatusCode::OK);
        let text = body_text(detail).await;
        assert!(text.contains("Chevening Scholarship"));
        assert!(!text.to_ascii_lowercase().contains("javascript:"));
        assert!(!text.contains("data:text"));
    }

    #[tokio::test]
    async fn leaderboard_marks_current_moderator() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(get_with_token("/leaderboard?period=all_time", "good"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Grace"));
        assert!(text.contains("is-self"));
        assert!(!text.contains("Your position"));
    }

    #[tokio::test]
    async fn dashboard_shows_recent_posts_and_podium() {
        let (app, _) = portal().await;
        let resp = app.oneshot(get_with_token("/", "good")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Rhodes Scholarship"));
        assert!(text.contains("Grace"));
        assert!(text.contains("Your rank: <strong>#2</strong>"));
    }

    #[tokio::test]
    async fn logout_removes_cookie() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::COOKIE, format!("{TOKEN_COOKIE}=good"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
        assert!(set_cookie(&resp).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn stylesheet_is_served() {
        let (app, _) = portal().await;
        let resp = app
            .oneshot(Request::builder().uri("/assets/static/app.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/css; charset=utf-8"
        );
    }

    #[test]
    fn flash_is_url_encoded() {
        let flash = Flash {
            notice: Some("Opportunity created successfully".into()),
            warning: Some("image & more".into()),
        };
        assert_eq!(
            flash.append_to("/opportunities".into()),
            "/opportunities?notice=Opportunity%20created%20successfully&warning=image%20%26%20more"
        );
        assert_eq!(Flash::default().append_to("/".into()), "/");
    }

    #[test]
    fn only_http_links_survive() {
        assert_eq!(
            http_url_or_empty(Some(" https://example.org/apply ")),
            "https://example.org/apply"
        );
        assert_eq!(http_url_or_empty(Some("HTTP://example.org")), "HTTP://example.org");
        assert_eq!(http_url_or_empty(Some("javascript:alert(1)")), "");
        assert_eq!(http_url_or_empty(Some("//evil.example")), "");
        assert_eq!(http_url_or_empty(None), "");
    }

    #[test]
    fn create_action_parsing() {
        assert_eq!(CreateAction::parse("add_insight"), CreateAction::AddInsight);
        assert_eq!(
            CreateAction::parse("remove_document:CV: latest"),
            CreateAction::RemoveDocument("CV: latest".into())
        );
        assert_eq!(CreateAction::parse(""), CreateAction::Submit);
    }
}
