//! Staff accounts.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::info;

use super::{begin_for, finish, not_found, record_error, require_text, trim_opt};
use crate::error::{StorageResult, ValidationError, internal_error};
use crate::postgres::PostgresSessionManager;
use crate::tenant::{ADMIN_PASSWORD_MIN, ADMIN_USERNAME_MIN, TenantContext};

const KIND: &str = "staff";

/// Prefix of generated staff codes; the zero-padded row id follows it.
pub const STAFF_CODE_PREFIX: &str = "STF";

const STAFF_COLUMNS: &str = "id, created_at, updated_at, username, password_hash, staff_code, \
     phone_number, email, first_name, last_name, is_admin";

/// A staff row in a tenant schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Staff {
    /// Row id, unique within the tenant schema.
    pub id: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Login name.
    pub username: String,
    /// bcrypt hash; never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Staff code, e.g. `ADMHOSP001` for the provisioned admin.
    pub staff_code: String,
    /// Phone number, if known.
    pub phone_number: Option<String>,
    /// Email address.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Administrative flag.
    pub is_admin: bool,
}

impl Staff {
    fn from_row(row: &Row) -> StorageResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            staff_code: row.try_get("staff_code")?,
            phone_number: row.try_get("phone_number")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            is_admin: row.try_get("is_admin")?,
        })
    }

    /// Checks `password` against the stored hash. CPU-bound.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

/// Input for creating a staff account.
///
/// Without a staff code, one is generated from the row id (`STF000042`).
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct NewStaff {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub staff_code: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl fmt::Debug for NewStaff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewStaff")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .field("is_admin", &self.is_admin)
            .finish_non_exhaustive()
    }
}

impl NewStaff {
    /// Trims every text field except the password; blank optional fields become `None`.
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            staff_code: trim_opt(self.staff_code),
            phone_number: trim_opt(self.phone_number),
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            ..self
        }
    }

    /// Checks every field without touching storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.chars().count() < ADMIN_USERNAME_MIN {
            return Err(ValidationError::invalid(
                "username",
                format!("must be at least {} characters", ADMIN_USERNAME_MIN),
            ));
        }
        if self.password.chars().count() < ADMIN_PASSWORD_MIN {
            return Err(ValidationError::invalid(
                "password",
                format!("must be at least {} characters", ADMIN_PASSWORD_MIN),
            ));
        }
        validate_email(&self.email)?;
        require_text("first_name", &self.first_name)?;
        require_text("last_name", &self.last_name)
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(ValidationError::invalid("email", "must be an email address"));
    }
    Ok(())
}

/// One column assignment of a partial staff update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffUpdate {
    StaffCode(String),
    PhoneNumber(Option<String>),
    Email(String),
    FirstName(String),
    LastName(String),
    IsAdmin(bool),
}

impl StaffUpdate {
    /// Column this update assigns.
    pub fn column(&self) -> &'static str {
        match self {
            StaffUpdate::StaffCode(_) => "staff_code",
            StaffUpdate::PhoneNumber(_) => "phone_number",
            StaffUpdate::Email(_) => "email",
            StaffUpdate::FirstName(_) => "first_name",
            StaffUpdate::LastName(_) => "last_name",
            StaffUpdate::IsAdmin(_) => "is_admin",
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StaffUpdate::StaffCode(v) | StaffUpdate::FirstName(v) | StaffUpdate::LastName(v) => {
                require_text(self.column(), v)
            }
            StaffUpdate::Email(v) => validate_email(v),
            StaffUpdate::PhoneNumber(_) | StaffUpdate::IsAdmin(_) => Ok(()),
        }
    }

    fn into_param(self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            StaffUpdate::StaffCode(v)
            | StaffUpdate::Email(v)
            | StaffUpdate::FirstName(v)
            | StaffUpdate::LastName(v) => Box::new(v.trim().to_string()),
            StaffUpdate::PhoneNumber(v) => Box::new(trim_opt(v)),
            StaffUpdate::IsAdmin(v) => Box::new(v),
        }
    }
}

/// JSON body of a partial staff update; absent fields are left unchanged.
///
/// The phone number is cleared by sending an empty string. Passwords are not
/// updatable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaffPatch {
    pub staff_code: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: Option<bool>,
}

impl StaffPatch {
    /// The updates this patch describes, in column order.
    pub fn into_updates(self) -> Vec<StaffUpdate> {
        [
            self.staff_code.map(StaffUpdate::StaffCode),
            self.phone_number.map(Some).map(StaffUpdate::PhoneNumber),
            self.email.map(StaffUpdate::Email),
            self.first_name.map(StaffUpdate::FirstName),
            self.last_name.map(StaffUpdate::LastName),
            self.is_admin.map(StaffUpdate::IsAdmin),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Returns true when the patch changes the admin flag.
    pub fn touches_admin_flag(&self) -> bool {
        self.is_admin.is_some()
    }
}

fn update_statement(updates: &[StaffUpdate]) -> Result<String, ValidationError> {
    let columns: Vec<_> = updates.iter().map(StaffUpdate::column).collect();
    super::update_statement("staffs", &columns, STAFF_COLUMNS)
}

/// Staff accounts of the current tenant.
#[derive(Debug, Clone)]
pub struct StaffRepository {
    sessions: Arc<PostgresSessionManager>,
    bcrypt_cost: u32,
}

impl StaffRepository {
    /// Creates a repository over `sessions`.
    pub fn new(sessions: Arc<PostgresSessionManager>) -> Self {
        Self {
            sessions,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Sets the bcrypt cost for new passwords.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Creates a staff account with a bcrypt-hashed password.
    pub async fn create(&self, ctx: &TenantContext, staff: NewStaff) -> StorageResult<Staff> {
        let tenant = ctx.require()?;
        let staff = staff.normalized();
        staff.validate()?;

        let password = staff.password.clone();
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| internal_error(format!("password hashing task failed: {}", e)))?
            .map_err(|e| internal_error(format!("password hashing failed: {}", e)))?;

        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "WITH next AS (SELECT nextval(pg_get_serial_sequence('staffs', 'id'))::int AS id) \
             INSERT INTO staffs (id, username, password_hash, staff_code, phone_number, email, \
             first_name, last_name, is_admin) \
             VALUES ((SELECT id FROM next), $1, $2, \
             COALESCE($3, '{}' || lpad((SELECT id FROM next)::text, 6, '0')), \
             $4, $5, $6, $7, $8) \
             RETURNING {}",
            STAFF_CODE_PREFIX, STAFF_COLUMNS
        );
        let result = async {
            let row = tx
                .client()?
                .query_one(
                    query.as_str(),
                    &[
                        &staff.username,
                        &password_hash,
                        &staff.staff_code,
                        &staff.phone_number,
                        &staff.email,
                        &staff.first_name,
                        &staff.last_name,
                        &staff.is_admin,
                    ],
                )
                .await
                .map_err(record_error(KIND))?;
            Staff::from_row(&row)
        }
        .await;

        let created = finish(tx, result).await?;
        info!(
            schema = %tenant.schema_name,
            staff_code = %created.staff_code,
            is_admin = created.is_admin,
            "Created staff account"
        );
        Ok(created)
    }

    /// A live staff account by id.
    pub async fn get(&self, ctx: &TenantContext, id: i32) -> StorageResult<Staff> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "SELECT {} FROM staffs WHERE id = $1 AND deleted_at IS NULL",
            STAFF_COLUMNS
        );
        let result = async {
            let row = tx
                .query_opt(query.as_str(), &[&id])
                .await?
                .ok_or_else(|| not_found(KIND, id))?;
            Staff::from_row(&row)
        }
        .await;
        finish(tx, result).await
    }

    /// A live staff account by username.
    pub async fn find_by_username(
        &self,
        ctx: &TenantContext,
        username: &str,
    ) -> StorageResult<Option<Staff>> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "SELECT {} FROM staffs WHERE username = $1 AND deleted_at IS NULL",
            STAFF_COLUMNS
        );
        let result = async {
            tx.query_opt(query.as_str(), &[&username])
                .await?
                .as_ref()
                .map(Staff::from_row)
                .transpose()
        }
        .await;
        finish(tx, result).await
    }

    /// All live staff accounts ordered by id.
    pub async fn list(&self, ctx: &TenantContext) -> StorageResult<Vec<Staff>> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "SELECT {} FROM staffs WHERE deleted_at IS NULL ORDER BY id",
            STAFF_COLUMNS
        );
        let result = async {
            tx.query(query.as_str(), &[])
                .await?
                .iter()
                .map(Staff::from_row)
                .collect::<StorageResult<Vec<_>>>()
        }
        .await;
        finish(tx, result).await
    }

    /// Applies `updates` to a live staff account. An empty list returns it unchanged.
    pub async fn update(
        &self,
        ctx: &TenantContext,
        id: i32,
        updates: Vec<StaffUpdate>,
    ) -> StorageResult<Staff> {
        ctx.require()?;
        if updates.is_empty() {
            return self.get(ctx, id).await;
        }

        for update in &updates {
            update.validate()?;
        }
        let statement = update_statement(&updates)?;

        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            updates.into_iter().map(StaffUpdate::into_param).collect();
        params.push(Box::new(id));
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let tx = begin_for(&self.sessions, ctx).await?;
        let result = async {
            let row = tx
                .client()?
                .query_opt(statement.as_str(), &refs)
                .await
                .map_err(record_error(KIND))?
                .ok_or_else(|| not_found(KIND, id))?;
            Staff::from_row(&row)
        }
        .await;
        finish(tx, result).await
    }

    /// Soft-deletes a live staff account.
    pub async fn delete(&self, ctx: &TenantContext, id: i32) -> StorageResult<()> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let result = async {
            let deleted = tx
                .execute(
                    "UPDATE staffs SET deleted_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL",
                    &[&id],
                )
                .await?;
            if deleted == 0 {
                return Err(not_found(KIND, id));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        if let Some(schema) = ctx.schema_name() {
            info!(schema = %schema, id, "Deleted staff account");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(password_hash: String) -> Staff {
        Staff {
            id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            username: "admin1".to_string(),
            password_hash,
            staff_code: "ADMHOSP001".to_string(),
            phone_number: None,
            email: "admin@bangkok.example".to_string(),
            first_name: "Admin".to_string(),
            last_name: "User".to_string(),
            is_admin: true,
        }
    }

    fn new_staff() -> NewStaff {
        serde_json::from_value(serde_json::json!({
            "username": " nurse01 ",
            "password": " secret1",
            "phone_number": "  ",
            "email": "nurse01@bangkok.example",
            "first_name": "Malee",
            "last_name": "Sukjai"
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_password() {
        let staff = staff(bcrypt::hash("secret1", 4).unwrap());
        assert!(staff.verify_password("secret1"));
        assert!(!staff.verify_password("secret2"));
    }

    #[test]
    fn test_verify_password_with_malformed_hash() {
        assert!(!staff("not-a-hash".to_string()).verify_password("secret1"));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(staff("$2b$04$abc".to_string())).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["staff_code"], "ADMHOSP001");
        assert!(json["phone_number"].is_null());
    }

    #[test]
    fn test_new_staff_normalized() {
        let staff = new_staff().normalized();
        assert_eq!(staff.username, "nurse01");
        assert_eq!(staff.password, " secret1");
        assert_eq!(staff.phone_number, None);
        assert_eq!(staff.staff_code, None);
        assert!(!staff.is_admin);
        assert!(staff.validate().is_ok());
    }

    #[test]
    fn test_new_staff_validation() {
        let short_name = NewStaff {
            username: "ab".to_string(),
            ..new_staff().normalized()
        };
        assert!(short_name.validate().is_err());

        let short_password = NewStaff {
            password: "12345".to_string(),
            ..new_staff().normalized()
        };
        assert!(short_password.validate().is_err());

        let bad_email = NewStaff {
            email: "nurse01".to_string(),
            ..new_staff().normalized()
        };
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_new_staff_debug_redacts_password() {
        let debug = format!("{:?}", new_staff());
        assert!(!debug.contains("secret1"));
    }

    #[test]
    fn test_patch_into_updates() {
        let patch: StaffPatch = serde_json::from_value(serde_json::json!({
            "phone_number": "",
            "is_admin": true,
            "last_name": "Rakdee"
        }))
        .unwrap();
        assert!(patch.touches_admin_flag());
        assert_eq!(
            patch.into_updates(),
            vec![
                StaffUpdate::PhoneNumber(Some(String::new())),
                StaffUpdate::LastName("Rakdee".to_string()),
                StaffUpdate::IsAdmin(true),
            ]
        );
    }

    #[test]
    fn test_patch_rejects_password() {
        let patch: Result<StaffPatch, _> =
            serde_json::from_value(serde_json::json!({ "password": "secret9" }));
        assert!(patch.is_err());
    }

    #[test]
    fn test_update_statement() {
        let sql = update_statement(&[
            StaffUpdate::Email("a@b.c".to_string()),
            StaffUpdate::IsAdmin(false),
        ])
        .unwrap();
        assert_eq!(
            sql,
            format!(
                "UPDATE staffs SET email = $1, is_admin = $2, updated_at = NOW() \
                 WHERE id = $3 AND deleted_at IS NULL RETURNING {}",
                STAFF_COLUMNS
            )
        );
    }

    #[test]
    fn test_update_validation() {
        assert!(StaffUpdate::Email("nobody".to_string()).validate().is_err());
        assert!(StaffUpdate::FirstName(" ".to_string()).validate().is_err());
        assert!(StaffUpdate::PhoneNumber(None).validate().is_ok());
    }
}
