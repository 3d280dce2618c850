//! SQLite-backed account store with role gating invariants.
//!
//! Passwords are stored only as argon2 hashes. Two structural rules are
//! enforced at the store layer rather than in handlers: the last remaining
//! admin cannot be deleted, and no account may delete itself.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const PAGE_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(i64),
    #[error("username already exists: {0:?}")]
    DuplicateUsername(String),
    #[error("username and password are required")]
    MissingField,
    #[error("you cannot delete your own account")]
    SelfDeletion,
    #[error("at least one admin account must remain")]
    LastAdmin,
    #[error("unknown role {0:?} (expected admin or user)")]
    UnknownRole(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("db: {0}")]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AccountError> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(AccountError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// Per-role account counts for the dashboard.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoleCounts {
    pub admin: usize,
    pub user: usize,
}

pub struct AccountStore {
    conn: Mutex<Connection>,
}

impl AccountStore {
    pub fn open(path: &Path) -> Result<Self, AccountError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AccountError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AccountError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("account store mutex poisoned")
    }

    pub fn create(&self, username: &str, password: &str, role: Role) -> Result<Account, AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::MissingField);
        }
        let hash = hash_password(password)?;

        let conn = self.conn();
        if find_row(&conn, "SELECT id, username, role FROM accounts WHERE username = ?1", params![username])?.is_some() {
            return Err(AccountError::DuplicateUsername(username.to_string()));
        }
        conn.execute(
            "INSERT INTO accounts (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![username, hash, role.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Account {
            id,
            username: username.to_string(),
            role,
        })
    }

    /// Check credentials, returning the account on success.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<Option<Account>, AccountError> {
        let conn = self.conn();
        let row: Option<(i64, String, String, String)> = conn
            .query_row(
                "SELECT id, username, role, password_hash FROM accounts WHERE username = ?1",
                params![username],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((id, username, role, stored_hash)) = row else {
            return Ok(None);
        };
        if !verify_password(password, &stored_hash) {
            return Ok(None);
        }
        Ok(Some(Account {
            id,
            username,
            role: Role::parse(&role)?,
        }))
    }

    pub fn get(&self, id: i64) -> Result<Account, AccountError> {
        find_row(&self.conn(), "SELECT id, username, role FROM accounts WHERE id = ?1", params![id])?
            .ok_or(AccountError::NotFound(id))
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<Account>, AccountError> {
        find_row(
            &self.conn(),
            "SELECT id, username, role FROM accounts WHERE username = ?1",
            params![username],
        )
    }

    /// One page of accounts ordered by id, plus the total count.
    pub fn list(&self, page: usize) -> Result<(Vec<Account>, usize), AccountError> {
        let conn = self.conn();
        let total: usize =
            conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get::<_, i64>(0))? as usize;
        let offset = page.saturating_sub(1) * PAGE_SIZE;
        let mut stmt = conn.prepare(
            "SELECT id, username, role FROM accounts ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let accounts = stmt
            .query_map(params![PAGE_SIZE as i64, offset as i64], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(finish_account)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((accounts, total))
    }

    /// Case-insensitive substring search on usernames.
    pub fn search(&self, query: &str) -> Result<Vec<Account>, AccountError> {
        let conn = self.conn();
        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            "SELECT id, username, role FROM accounts WHERE username LIKE ?1 ORDER BY id",
        )?;
        let accounts = stmt
            .query_map(params![pattern], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(finish_account)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    pub fn role_counts(&self) -> Result<RoleCounts, AccountError> {
        let conn = self.conn();
        let count = |role: &str| -> Result<usize, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM accounts WHERE role = ?1",
                params![role],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as usize)
        };
        Ok(RoleCounts {
            admin: count("admin")?,
            user: count("user")?,
        })
    }

    pub fn update(&self, id: i64, username: &str, role: Role) -> Result<Account, AccountError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AccountError::MissingField);
        }
        let conn = self.conn();
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM accounts WHERE username = ?1 AND id != ?2",
                params![username, id],
                |r| r.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(AccountError::DuplicateUsername(username.to_string()));
        }
        let changed = conn.execute(
            "UPDATE accounts SET username = ?1, role = ?2 WHERE id = ?3",
            params![username, role.as_str(), id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Ok(Account {
            id,
            username: username.to_string(),
            role,
        })
    }

    pub fn set_password(&self, id: i64, password: &str) -> Result<(), AccountError> {
        if password.is_empty() {
            return Err(AccountError::MissingField);
        }
        let hash = hash_password(password)?;
        let changed = self.conn().execute(
            "UPDATE accounts SET password_hash = ?1 WHERE id = ?2",
            params![hash, id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Ok(())
    }

    /// Delete an account on behalf of `acting_username`.
    ///
    /// Rejected when the target is the acting account, or when the target
    /// is the last remaining admin.
    pub fn delete(&self, id: i64, acting_username: &str) -> Result<Account, AccountError> {
        let target = self.get(id)?;
        if target.username == acting_username {
            return Err(AccountError::SelfDeletion);
        }
        if target.role == Role::Admin && self.role_counts()?.admin <= 1 {
            return Err(AccountError::LastAdmin);
        }
        self.conn()
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        tracing::info!(username = %target.username, "account deleted");
        Ok(target)
    }
}

type RawAccount = (i64, String, String);

fn account_from_row(row: &Row<'_>) -> Result<RawAccount, rusqlite::Error> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn finish_account((id, username, role): RawAccount) -> Result<Account, AccountError> {
    Ok(Account {
        id,
        username,
        role: Role::parse(&role)?,
    })
}

fn find_row(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Account>, AccountError> {
    conn.query_row(sql, params, account_from_row)
        .optional()?
        .map(finish_account)
        .transpose()
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AccountError::Hash(e.to_string()))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
