use crate::config::{RedmineConfig, API_KEY_HEADER};
use crate::error::{RedmineError, Result};
use crate::models::{
    Activity, CurrentUser, Issue, IssueStatus, IssueUpdate, Page, Project, TimeEntry,
    TimeEntryCreate, TimeEntryUpdate,
};
use crate::rate_limiter::RateLimiter;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

type Query<'a> = [(&'a str, String)];

#[derive(Clone)]
pub struct RedmineClient {
    http: HttpClient,
    config: RedmineConfig,
    limiter: RateLimiter,
}

impl RedmineClient {
    pub fn new(config: RedmineConfig) -> Result<Self> {
        let limiter = RateLimiter::new(config.cooldown);
        Self::new_with_limiter(config, limiter)
    }

    pub fn new_with_limiter(config: RedmineConfig, limiter: RateLimiter) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(RedmineError::Other("Redmine URL is not configured".to_string()));
        }
        let http = build_http_client(&config)?;
        Ok(Self {
            http,
            config,
            limiter,
        })
    }

    pub fn config(&self) -> &RedmineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.get_with_query(path, &[]).await
    }

    pub async fn get_with_query<T>(&self, path: &str, query: &Query<'_>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::GET, path, query, Option::<&Value>::None)
            .await?;
        Self::parse_json(response).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        Self::parse_json(response).await
    }

    /// PUT requests answer `204 No Content` on success.
    pub async fn put<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send(Method::PUT, path, &[], Some(body)).await?;
        Self::ensure_success(response).await
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<&B>,
    ) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        self.limiter.hit().await;
        let url = self.url_for(path);
        tracing::debug!(%method, %url, "redmine request");
        let mut request = self.http.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }
        Ok(request.send().await?)
    }

    fn url_for(&self, path: &str) -> String {
        let mut base = self.config.api_root();
        base.push_str(path.trim_start_matches('/'));
        base
    }

    async fn parse_json<T>(response: Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(RedmineError::from)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn ensure_success(response: Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn error_from(response: Response) -> RedmineError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "redmine request failed");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            RedmineError::Authentication(format!("Access denied ({}) - {}", status, body.trim()))
        } else {
            RedmineError::http(status, body)
        }
    }

    /// Fetches a single page of a list endpoint.
    pub async fn get_page<T>(
        &self,
        path: &str,
        key: &str,
        query: &Query<'_>,
        offset: u32,
        limit: u32,
    ) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let mut params: Vec<(&str, String)> = query.to_vec();
        params.push(("offset", offset.to_string()));
        params.push(("limit", limit.to_string()));
        let envelope: Value = self.get_with_query(path, &params).await?;
        Page::from_envelope(envelope, key)
    }

    /// Walks every page of a list endpoint, continuing while `total_count > offset + limit`.
    pub async fn fetch_all<T>(&self, path: &str, key: &str, query: &Query<'_>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let limit = self.config.page_size;
        let mut offset = 0;
        let mut items = Vec::new();
        loop {
            let page: Page<T> = self.get_page(path, key, query, offset, limit).await?;
            let done = !page.has_more() || page.items.is_empty();
            offset = page.next_offset();
            items.extend(page.items);
            if done {
                break;
            }
        }
        Ok(items)
    }

    pub async fn current_user(&self) -> Result<CurrentUser> {
        let envelope: Value = self.get("users/current.json").await?;
        unwrap_single(envelope, "user")
    }

    pub async fn get_issue(&self, issue_id: u64) -> Result<Issue> {
        let path = format!("issues/{}.json", issue_id);
        let envelope: Value = self.get(&path).await?;
        unwrap_single(envelope, "issue")
    }

    pub async fn list_issues(&self, query: &IssueQuery, offset: u32, limit: u32) -> Result<Page<Issue>> {
        self.get_page("issues.json", "issues", &query.to_params(), offset, limit)
            .await
    }

    pub async fn all_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>> {
        self.fetch_all("issues.json", "issues", &query.to_params()).await
    }

    pub async fn update_issue(&self, issue_id: u64, update: &IssueUpdate) -> Result<()> {
        let path = format!("issues/{}.json", issue_id);
        let body = serde_json::json!({ "issue": update });
        self.put(&path, &body).await
    }

    pub async fn list_projects(&self, offset: u32, limit: u32) -> Result<Page<Project>> {
        self.get_page("projects.json", "projects", &[], offset, limit)
            .await
    }

    pub async fn all_projects(&self) -> Result<Vec<Project>> {
        self.fetch_all("projects.json", "projects", &[]).await
    }

    pub async fn list_time_entries(
        &self,
        query: &TimeEntryQuery,
        offset: u32,
        limit: u32,
    ) -> Result<Page<TimeEntry>> {
        self.get_page("time_entries.json", "time_entries", &query.to_params(), offset, limit)
            .await
    }

    pub async fn all_time_entries(&self, query: &TimeEntryQuery) -> Result<Vec<TimeEntry>> {
        self.fetch_all("time_entries.json", "time_entries", &query.to_params())
            .await
    }

    pub async fn create_time_entry(&self, entry: &TimeEntryCreate) -> Result<TimeEntry> {
        let body = serde_json::json!({ "time_entry": entry });
        let envelope: Value = self.post("time_entries.json", &body).await?;
        unwrap_single(envelope, "time_entry")
    }

    pub async fn update_time_entry(&self, entry_id: u64, update: &TimeEntryUpdate) -> Result<()> {
        let path = format!("time_entries/{}.json", entry_id);
        let body = serde_json::json!({ "time_entry": update });
        self.put(&path, &body).await
    }

    pub async fn activities(&self) -> Result<Vec<Activity>> {
        let envelope: Value = self.get("enumerations/time_entry_activities.json").await?;
        Ok(Page::from_envelope(envelope, "time_entry_activities")?.items)
    }

    pub async fn statuses(&self) -> Result<Vec<IssueStatus>> {
        let envelope: Value = self.get("issue_statuses.json").await?;
        Ok(Page::from_envelope(envelope, "issue_statuses")?.items)
    }
}

/// Filters for `issues.json`.
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    pub assigned_to_me: bool,
    pub project_id: Option<u64>,
    /// `open`, `closed`, `*` or a status id.
    pub status: Option<String>,
    pub issue_ids: Vec<u64>,
    pub sort: Option<String>,
}

impl IssueQuery {
    /// Open issues assigned to the API key's owner, most recently updated first.
    pub fn assigned_to_me() -> Self {
        Self {
            assigned_to_me: true,
            status: Some("open".to_string()),
            sort: Some("updated_on:desc".to_string()),
            ..Self::default()
        }
    }

    /// Looks up specific issues regardless of status, e.g. the ones with local timers.
    pub fn by_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            issue_ids: ids.into_iter().collect(),
            status: Some("*".to_string()),
            ..Self::default()
        }
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if self.assigned_to_me {
            params.push(("assigned_to_id", "me".to_string()));
        }
        if let Some(project_id) = self.project_id {
            params.push(("project_id", project_id.to_string()));
        }
        if let Some(status) = &self.status {
            params.push(("status_id", status.clone()));
        }
        if !self.issue_ids.is_empty() {
            let ids = self
                .issue_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            params.push(("issue_id", ids));
        }
        if let Some(sort) = &self.sort {
            params.push(("sort", sort.clone()));
        }
        params
    }
}

/// Filters for `time_entries.json`.
#[derive(Debug, Clone, Default)]
pub struct TimeEntryQuery {
    pub issue_id: Option<u64>,
    pub project_id: Option<u64>,
    pub mine: bool,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TimeEntryQuery {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(issue_id) = self.issue_id {
            params.push(("issue_id", issue_id.to_string()));
        }
        if let Some(project_id) = self.project_id {
            params.push(("project_id", project_id.to_string()));
        }
        if self.mine {
            params.push(("user_id", "me".to_string()));
        }
        if let Some(from) = self.from {
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            params.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

/// Unwraps single-resource responses such as `{"issue": {...}}`.
fn unwrap_single<T>(mut envelope: Value, key: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let inner = envelope
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| RedmineError::Serialization(format!("missing `{key}` in response")))?;
    Ok(serde_json::from_value(inner)?)
}

fn build_http_client(config: &RedmineConfig) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();

    let key_name = HeaderName::from_bytes(API_KEY_HEADER.as_bytes())
        .map_err(|err| RedmineError::Other(err.to_string()))?;
    let mut key_value = header_value(config.api_key.trim())?;
    key_value.set_sensitive(true);
    headers.insert(key_name, key_value);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, header_value(&config.user_agent)?);

    HttpClient::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|err| RedmineError::Other(err.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| RedmineError::Other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_query_builds_redmine_params() {
        let params = IssueQuery::assigned_to_me().to_params();
        assert_eq!(
            params,
            vec![
                ("assigned_to_id", "me".to_string()),
                ("status_id", "open".to_string()),
                ("sort", "updated_on:desc".to_string()),
            ]
        );

        let params = IssueQuery::by_ids([3, 1]).to_params();
        assert!(params.contains(&("issue_id", "3,1".to_string())));
        assert!(params.contains(&("status_id", "*".to_string())));
    }

    #[test]
    fn time_entry_query_formats_dates() {
        let query = TimeEntryQuery {
            mine: true,
            from: NaiveDate::from_ymd_opt(2024, 1, 2),
            ..TimeEntryQuery::default()
        };
        assert_eq!(
            query.to_params(),
            vec![("user_id", "me".to_string()), ("from", "2024-01-02".to_string())]
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let result = RedmineClient::new(RedmineConfig::new("  ", "key"));
        assert!(matches!(result, Err(RedmineError::Other(_))));
    }
}
