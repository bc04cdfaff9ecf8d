//! Cloud SQL Admin REST client
//!
//! Implements [`DatabaseApi`] and [`DatabaseUserApi`] against the v1beta4
//! API for one (project, instance) pair. Mutating calls return a long-running
//! operation which is not awaited; the orchestrator treats an accepted
//! request as success.

use async_trait::async_trait;
use flagship_common::{Error, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{Database, DatabaseApi, DatabaseUser, DatabaseUserApi};

/// Public Cloud SQL Admin endpoint
pub const DEFAULT_BASE_URL: &str = "https://sqladmin.googleapis.com/sql/v1beta4";

#[derive(Deserialize)]
struct DatabaseList {
    #[serde(default)]
    items: Vec<Database>,
}

#[derive(Serialize)]
struct InsertDatabase<'a> {
    name: &'a str,
    project: &'a str,
    instance: &'a str,
}

#[derive(Serialize)]
struct InsertUser<'a> {
    name: &'a str,
    password: &'a str,
    project: &'a str,
    instance: &'a str,
}

/// Client for the databases and users of one Cloud SQL instance
#[derive(Clone)]
pub struct SqlAdminClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    instance: String,
    token: String,
}

impl SqlAdminClient {
    /// Client for `project`/`instance` on the public endpoint
    pub fn new(
        http: reqwest::Client,
        project: impl Into<String>,
        instance: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL, project, instance, token)
    }

    /// Client against a different endpoint
    pub fn with_base_url(
        http: reqwest::Client,
        base_url: impl Into<String>,
        project: impl Into<String>,
        instance: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            project: project.into(),
            instance: instance.into(),
            token: token.into(),
        }
    }

    /// URL under the scoped instance. Each segment is percent-encoded on its
    /// own, so a name can never add or remove path levels.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            Error::internal_with_context("sql_admin", format!("invalid base url: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                Error::internal_with_context("sql_admin", "base url cannot carry a path")
            })?
            .pop_if_empty()
            .extend(["projects", self.project.as_str(), "instances", self.instance.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.url(segments)?)
            .bearer_auth(&self.token))
    }

    async fn send(&self, request: RequestBuilder, kind: &str, name: &str) -> Result<Response> {
        let response = request.send().await?;
        check_status(response, kind, name).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: &str,
        name: &str,
    ) -> Result<T> {
        let response = self.send(request, kind, name).await?;
        response
            .json()
            .await
            .map_err(|e| Error::serialization(format!("invalid {} response: {}", kind, e)))
    }
}

async fn check_status(response: Response, kind: &str, name: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::not_found(kind, name));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(status.as_u16(), body));
    }
    Ok(response)
}

#[async_trait]
impl DatabaseApi for SqlAdminClient {
    async fn create_database(&self, name: &str) -> Result<Database> {
        let body = InsertDatabase {
            name,
            project: &self.project,
            instance: &self.instance,
        };
        self.send(
            self.request(Method::POST, &["databases"])?.json(&body),
            "Database",
            name,
        )
        .await?;
        debug!(database = %name, "database insert accepted");
        Ok(Database::named(name))
    }

    async fn get_database(&self, name: &str) -> Result<Database> {
        self.send_json(
            self.request(Method::GET, &["databases", name])?,
            "Database",
            name,
        )
        .await
    }

    async fn list_databases(&self) -> Result<Vec<Database>> {
        let list: DatabaseList = self
            .send_json(self.request(Method::GET, &["databases"])?, "Database", "*")
            .await?;
        Ok(list.items)
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &["databases", name])?,
            "Database",
            name,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseUserApi for SqlAdminClient {
    async fn create_user(&self, name: &str, password: &str) -> Result<DatabaseUser> {
        let body = InsertUser {
            name,
            password,
            project: &self.project,
            instance: &self.instance,
        };
        self.send(
            self.request(Method::POST, &["users"])?.json(&body),
            "DatabaseUser",
            name,
        )
        .await?;
        debug!(user = %name, "user insert accepted");
        Ok(DatabaseUser {
            name: name.to_string(),
            host: None,
            password: Some(password.to_string()),
        })
    }

    async fn get_user(&self, name: &str) -> Result<DatabaseUser> {
        self.send_json(
            self.request(Method::GET, &["users", name])?,
            "DatabaseUser",
            name,
        )
        .await
    }

    async fn delete_user(&self, name: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &["users"])?.query(&[("name", name)]),
            "DatabaseUser",
            name,
        )
        .await?;
        Ok(())
    }
}
