use super::{
    LogFilter, NotificationQuery, NotificationRecord, NotificationUpdate, Page, Store,
    SystemLogEntry, UserLogin,
};
use crate::error::AppError;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    logins: Vec<UserLogin>,
    logs: Vec<SystemLogEntry>,
    notifications: Vec<NotificationRecord>,
    next_id: u64,
}

impl Tables {
    fn assign_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-process tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::database("memory store lock poisoned"))
    }
}

/// Newest first by creation time, then by id.
fn paginate<T: Clone>(
    mut rows: Vec<(&str, u64, T)>,
    page: u64,
    limit: u64,
) -> Page<T> {
    rows.sort_by(|a, b| b.0.cmp(a.0).then(b.1.cmp(&a.1)));
    let total = rows.len() as u64;
    let offset = page.saturating_sub(1).saturating_mul(limit);
    let items = rows
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .map(|(_, _, row)| row)
        .collect();
    Page {
        items,
        total,
        page,
        limit,
    }
}

impl Store for MemoryStore {
    fn find_login_by_token(&self, token: &str) -> Result<Option<UserLogin>, AppError> {
        Ok(self
            .tables()?
            .logins
            .iter()
            .find(|login| login.access_token == token)
            .cloned())
    }

    fn find_login_by_user(&self, lu_db_code: &str) -> Result<Option<UserLogin>, AppError> {
        Ok(self
            .tables()?
            .logins
            .iter()
            .find(|login| login.lu_db_code == lu_db_code)
            .cloned())
    }

    fn create_login(&self, mut login: UserLogin) -> Result<u64, AppError> {
        let mut tables = self.tables()?;
        login.id = tables.assign_id();
        let id = login.id;
        tables.logins.push(login);
        Ok(id)
    }

    fn update_login(&self, login: &UserLogin) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        match tables.logins.iter_mut().find(|l| l.id == login.id) {
            Some(existing) => {
                *existing = login.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn create_log(&self, mut entry: SystemLogEntry) -> Result<u64, AppError> {
        let mut tables = self.tables()?;
        entry.id = tables.assign_id();
        let id = entry.id;
        tables.logs.push(entry);
        Ok(id)
    }

    fn find_logs(
        &self,
        filter: &LogFilter,
        page: u64,
        limit: u64,
    ) -> Result<Page<SystemLogEntry>, AppError> {
        let tables = self.tables()?;
        let rows = tables
            .logs
            .iter()
            .filter(|entry| filter.matches(entry))
            .map(|entry| (entry.created_datetime.as_str(), entry.id, entry.clone()))
            .collect();
        Ok(paginate(rows, page, limit))
    }

    fn create_notification(&self, mut record: NotificationRecord) -> Result<u64, AppError> {
        let mut tables = self.tables()?;
        record.id = tables.assign_id();
        let id = record.id;
        tables.notifications.push(record);
        Ok(id)
    }

    fn find_notifications(
        &self,
        query: &NotificationQuery,
        page: u64,
        limit: u64,
    ) -> Result<Page<NotificationRecord>, AppError> {
        let tables = self.tables()?;
        let rows = tables
            .notifications
            .iter()
            .filter(|record| query.matches(record))
            .map(|record| (record.created_datetime.as_str(), record.id, record.clone()))
            .collect();
        Ok(paginate(rows, page, limit))
    }

    fn find_notification(&self, db_code: &str) -> Result<Option<NotificationRecord>, AppError> {
        Ok(self
            .tables()?
            .notifications
            .iter()
            .find(|record| record.db_code == db_code && record.status > -1)
            .cloned())
    }

    fn update_notification(
        &self,
        db_code: &str,
        update: &NotificationUpdate,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        let mut touched = false;
        for record in tables
            .notifications
            .iter_mut()
            .filter(|record| record.db_code == db_code)
        {
            update.apply(record);
            touched = true;
        }
        Ok(touched)
    }

    fn delete_notification(&self, db_code: &str) -> Result<bool, AppError> {
        self.update_notification(
            db_code,
            &NotificationUpdate {
                status: Some(-1),
                ..Default::default()
            },
        )
    }
}
