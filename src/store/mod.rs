//! Persistence seam used by controllers and middleware.
//!
//! Records are grouped into three families: user logins, the system log
//! history and notification centre records. Connections are named and owned
//! by [`Databases`]; a request carries the name of the connection it should
//! use, so no handle is ever switched globally.

mod memory;

pub use memory::MemoryStore;

use crate::config::Config;
use crate::error::AppError;
use crate::request::Request;
use crate::utils::now_timestamp;
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLogin {
    pub id: u64,
    pub pl_db_code: Option<String>,
    pub lu_db_code: String,
    pub access_token: String,
    pub last_login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemLogEntry {
    pub id: u64,
    pub lp_plant_db_code: Option<String>,
    /// Display code of the plant, resolved at read time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lp_plant_code: Option<String>,
    pub ip_address: String,
    pub subject: String,
    pub content: String,
    pub module: String,
    pub created_datetime: String,
    pub created_by: String,
}

/// Filters for the system log listing. Empty values do not filter.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub plant_id: Option<String>,
    pub module: Option<String>,
    pub created_by: Option<String>,
    /// `YYYY-MM-DD`, inclusive from midnight.
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, inclusive until the end of the day.
    pub date_to: Option<String>,
    /// Substring of subject or content.
    pub search: Option<String>,
    /// Substring of the client address.
    pub ip_address: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, entry: &SystemLogEntry) -> bool {
        fn given(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(plant) = given(&self.plant_id)
            && entry.lp_plant_db_code.as_deref() != Some(plant)
        {
            return false;
        }
        if let Some(module) = given(&self.module)
            && entry.module != module
        {
            return false;
        }
        if let Some(user) = given(&self.created_by)
            && entry.created_by != user
        {
            return false;
        }
        if let Some(from) = given(&self.date_from)
            && entry.created_datetime.as_str() < format!("{from} 00:00:00").as_str()
        {
            return false;
        }
        if let Some(to) = given(&self.date_to)
            && entry.created_datetime.as_str() > format!("{to} 23:59:59").as_str()
        {
            return false;
        }
        if let Some(search) = given(&self.search) {
            let needle = search.to_lowercase();
            if !entry.subject.to_lowercase().contains(&needle)
                && !entry.content.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(ip) = given(&self.ip_address)
            && !entry.ip_address.contains(ip)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub db_code: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: String,
    pub recipient_list: Value,
    pub lu_department: Value,
    pub lp_plant_db_code: Value,
    /// 1 active, -1 deleted.
    pub status: i64,
    pub created_datetime: String,
    pub created_by: String,
}

/// Listing criteria. Without a status, deleted records are excluded.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
    pub status: Option<i64>,
    pub kind: Option<String>,
    pub search: Option<String>,
}

impl NotificationQuery {
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        let status_ok = match self.status {
            Some(status) => record.status == status,
            None => record.status > -1,
        };
        let kind_ok = self
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .is_none_or(|kind| record.kind == kind);
        let search_ok = self
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .is_none_or(|search| record.title.to_lowercase().contains(&search.to_lowercase()));
        status_ok && kind_ok && search_ok
    }
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct NotificationUpdate {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub recipient_list: Option<Value>,
    pub lu_department: Option<Value>,
    pub lp_plant_db_code: Option<Value>,
    pub status: Option<i64>,
}

impl NotificationUpdate {
    pub fn apply(&self, record: &mut NotificationRecord) {
        if let Some(kind) = &self.kind {
            record.kind = kind.clone();
        }
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
        if let Some(recipients) = &self.recipient_list {
            record.recipient_list = recipients.clone();
        }
        if let Some(department) = &self.lu_department {
            record.lu_department = department.clone();
        }
        if let Some(plant) = &self.lp_plant_db_code {
            record.lp_plant_db_code = plant.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }
}

pub trait Store: Send + Sync {
    fn find_login_by_token(&self, token: &str) -> Result<Option<UserLogin>, AppError>;
    fn find_login_by_user(&self, lu_db_code: &str) -> Result<Option<UserLogin>, AppError>;
    /// Insert and return the assigned id.
    fn create_login(&self, login: UserLogin) -> Result<u64, AppError>;
    /// Replace the record with the same id. `false` when it does not exist.
    fn update_login(&self, login: &UserLogin) -> Result<bool, AppError>;

    fn create_log(&self, entry: SystemLogEntry) -> Result<u64, AppError>;
    /// Newest first.
    fn find_logs(
        &self,
        filter: &LogFilter,
        page: u64,
        limit: u64,
    ) -> Result<Page<SystemLogEntry>, AppError>;

    fn create_notification(&self, record: NotificationRecord) -> Result<u64, AppError>;
    /// Newest first.
    fn find_notifications(
        &self,
        query: &NotificationQuery,
        page: u64,
        limit: u64,
    ) -> Result<Page<NotificationRecord>, AppError>;
    /// Non-deleted record by code.
    fn find_notification(&self, db_code: &str) -> Result<Option<NotificationRecord>, AppError>;
    fn update_notification(
        &self,
        db_code: &str,
        update: &NotificationUpdate,
    ) -> Result<bool, AppError>;
    /// Soft delete (status -1).
    fn delete_notification(&self, db_code: &str) -> Result<bool, AppError>;
}

/// Named connections with a default.
#[derive(Clone)]
pub struct Databases {
    default: String,
    connections: HashMap<String, Arc<dyn Store>>,
}

impl fmt::Debug for Databases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Databases")
            .field("default", &self.default)
            .field("connections", &names)
            .finish()
    }
}

impl Databases {
    pub fn new<S: Into<String>>(default: S) -> Self {
        Self {
            default: default.into(),
            connections: HashMap::new(),
        }
    }

    /// One in-memory store per configured connection.
    pub fn in_memory(config: &Config) -> Self {
        let mut databases = Self::new(config.default_connection.clone());
        for name in &config.connections {
            databases.add(name.clone(), Arc::new(MemoryStore::new()));
        }
        databases
    }

    pub fn add<S: Into<String>>(&mut self, name: S, store: Arc<dyn Store>) -> &mut Self {
        self.connections.insert(name.into(), store);
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Store>, AppError> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::database(format!("Unknown database connection: {name}")))
    }

    /// The connection selected on the request, else the default.
    pub fn for_request(&self, request: &Request) -> Result<Arc<dyn Store>, AppError> {
        let name = request.connection().unwrap_or(&self.default);
        debug!("Using database connection {name}");
        self.get(name)
    }
}

#[derive(Debug, Clone)]
struct TenantEntry {
    connection: String,
    updated_at: String,
}

/// Username to tenant connection map, written by `publicKey` and read by
/// `basic`.
#[derive(Debug, Default)]
pub struct TenantDirectory {
    entries: RwLock<HashMap<String, TenantEntry>>,
}

impl TenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_connection(&self, username: &str, connection: &str) -> Result<(), AppError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::internal("tenant directory lock poisoned"))?;
        entries.insert(
            username.to_string(),
            TenantEntry {
                connection: connection.to_string(),
                updated_at: now_timestamp(),
            },
        );
        debug!("Tenant connection for {username} set to {connection}");
        Ok(())
    }

    pub fn active_connection(&self, username: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(username).map(|entry| entry.connection.clone())
    }

    /// When the username's connection was last recorded.
    pub fn updated_at(&self, username: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(username).map(|entry| entry.updated_at.clone())
    }
}
