//! Patient records.

// Record fields mirror their column names
#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::info;

use super::{begin_for, finish, not_found, record_error, require_text, trim_opt};
use crate::error::{StorageResult, ValidationError, internal_error};
use crate::postgres::PostgresSessionManager;
use crate::tenant::{TenantContext, TenantRegistry};

const KIND: &str = "patient";

/// Oldest accepted age, in years.
pub const MAX_PATIENT_AGE_YEARS: u32 = 150;

const PATIENT_COLUMNS: &str = "id, created_at, updated_at, first_name_th, last_name_th, \
     middle_name_th, first_name_en, last_name_en, middle_name_en, date_of_birth, nick_name_th, \
     nick_name_en, patient_hn, national_id, passport_id, phone_number, email, gender, \
     nationality, blood_grp";

/// Administrative gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "OTHER")]
    Other,
}

impl Gender {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "OTHER",
        }
    }
}

impl FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Gender::Male),
            "F" => Ok(Gender::Female),
            "OTHER" => Ok(Gender::Other),
            other => Err(ValidationError::invalid(
                "gender",
                format!("expected M, F or OTHER, got '{}'", other),
            )),
        }
    }
}

/// ABO blood group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloodGroup {
    A,
    B,
    O,
    AB,
}

impl BloodGroup {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BloodGroup::A => "A",
            BloodGroup::B => "B",
            BloodGroup::O => "O",
            BloodGroup::AB => "AB",
        }
    }
}

impl FromStr for BloodGroup {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(BloodGroup::A),
            "B" => Ok(BloodGroup::B),
            "O" => Ok(BloodGroup::O),
            "AB" => Ok(BloodGroup::AB),
            other => Err(ValidationError::invalid(
                "blood_grp",
                format!("expected A, B, O or AB, got '{}'", other),
            )),
        }
    }
}

/// A patient row in a tenant schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_name_th: String,
    pub last_name_th: String,
    pub middle_name_th: Option<String>,
    pub first_name_en: String,
    pub last_name_en: String,
    pub middle_name_en: Option<String>,
    pub date_of_birth: NaiveDate,
    pub nick_name_th: Option<String>,
    pub nick_name_en: Option<String>,
    pub patient_hn: String,
    pub national_id: Option<String>,
    pub passport_id: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub gender: Gender,
    pub nationality: String,
    pub blood_grp: BloodGroup,
}

impl Patient {
    fn from_row(row: &Row) -> StorageResult<Self> {
        let gender: String = row.try_get("gender")?;
        let blood_grp: String = row.try_get("blood_grp")?;

        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            first_name_th: row.try_get("first_name_th")?,
            last_name_th: row.try_get("last_name_th")?,
            middle_name_th: row.try_get("middle_name_th")?,
            first_name_en: row.try_get("first_name_en")?,
            last_name_en: row.try_get("last_name_en")?,
            middle_name_en: row.try_get("middle_name_en")?,
            date_of_birth: row.try_get("date_of_birth")?,
            nick_name_th: row.try_get("nick_name_th")?,
            nick_name_en: row.try_get("nick_name_en")?,
            patient_hn: row.try_get("patient_hn")?,
            national_id: row.try_get("national_id")?,
            passport_id: row.try_get("passport_id")?,
            phone_number: row.try_get("phone_number")?,
            email: row.try_get("email")?,
            gender: gender
                .parse()
                .map_err(|e: ValidationError| internal_error(e.to_string()))?,
            nationality: row.try_get("nationality")?,
            blood_grp: blood_grp
                .parse()
                .map_err(|e: ValidationError| internal_error(e.to_string()))?,
        })
    }
}

/// Input for registering a patient. The HN is assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPatient {
    pub first_name_th: String,
    pub last_name_th: String,
    #[serde(default)]
    pub middle_name_th: Option<String>,
    pub first_name_en: String,
    pub last_name_en: String,
    #[serde(default)]
    pub middle_name_en: Option<String>,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub nick_name_th: Option<String>,
    #[serde(default)]
    pub nick_name_en: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub passport_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub gender: Gender,
    pub nationality: String,
    pub blood_grp: BloodGroup,
}

impl NewPatient {
    /// Trims every text field; blank optional fields become `None`.
    pub fn normalized(self) -> Self {
        Self {
            first_name_th: self.first_name_th.trim().to_string(),
            last_name_th: self.last_name_th.trim().to_string(),
            middle_name_th: trim_opt(self.middle_name_th),
            first_name_en: self.first_name_en.trim().to_string(),
            last_name_en: self.last_name_en.trim().to_string(),
            middle_name_en: trim_opt(self.middle_name_en),
            nick_name_th: trim_opt(self.nick_name_th),
            nick_name_en: trim_opt(self.nick_name_en),
            national_id: trim_opt(self.national_id),
            passport_id: trim_opt(self.passport_id),
            phone_number: trim_opt(self.phone_number),
            email: trim_opt(self.email),
            nationality: self.nationality.trim().to_string(),
            ..self
        }
    }

    /// Checks required fields and the date of birth against `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
        for (field, value) in [
            ("first_name_th", &self.first_name_th),
            ("last_name_th", &self.last_name_th),
            ("first_name_en", &self.first_name_en),
            ("last_name_en", &self.last_name_en),
            ("nationality", &self.nationality),
        ] {
            require_text(field, value)?;
        }
        validate_date_of_birth(self.date_of_birth, today)
    }
}

/// Rejects dates of birth in the future or more than 150 years before `today`.
pub fn validate_date_of_birth(dob: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    if dob > today {
        return Err(ValidationError::invalid(
            "date_of_birth",
            "must not be in the future",
        ));
    }
    let oldest = today
        .checked_sub_months(Months::new(MAX_PATIENT_AGE_YEARS * 12))
        .unwrap_or(NaiveDate::MIN);
    if dob < oldest {
        return Err(ValidationError::invalid(
            "date_of_birth",
            format!("must be within the last {} years", MAX_PATIENT_AGE_YEARS),
        ));
    }
    Ok(())
}

/// One column assignment of a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientUpdate {
    FirstNameTh(String),
    LastNameTh(String),
    MiddleNameTh(Option<String>),
    FirstNameEn(String),
    LastNameEn(String),
    MiddleNameEn(Option<String>),
    DateOfBirth(NaiveDate),
    NickNameTh(Option<String>),
    NickNameEn(Option<String>),
    NationalId(Option<String>),
    PassportId(Option<String>),
    PhoneNumber(Option<String>),
    Email(Option<String>),
    Gender(Gender),
    Nationality(String),
    BloodGroup(BloodGroup),
}

impl PatientUpdate {
    /// Column this update assigns.
    pub fn column(&self) -> &'static str {
        match self {
            PatientUpdate::FirstNameTh(_) => "first_name_th",
            PatientUpdate::LastNameTh(_) => "last_name_th",
            PatientUpdate::MiddleNameTh(_) => "middle_name_th",
            PatientUpdate::FirstNameEn(_) => "first_name_en",
            PatientUpdate::LastNameEn(_) => "last_name_en",
            PatientUpdate::MiddleNameEn(_) => "middle_name_en",
            PatientUpdate::DateOfBirth(_) => "date_of_birth",
            PatientUpdate::NickNameTh(_) => "nick_name_th",
            PatientUpdate::NickNameEn(_) => "nick_name_en",
            PatientUpdate::NationalId(_) => "national_id",
            PatientUpdate::PassportId(_) => "passport_id",
            PatientUpdate::PhoneNumber(_) => "phone_number",
            PatientUpdate::Email(_) => "email",
            PatientUpdate::Gender(_) => "gender",
            PatientUpdate::Nationality(_) => "nationality",
            PatientUpdate::BloodGroup(_) => "blood_grp",
        }
    }

    fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
        match self {
            PatientUpdate::FirstNameTh(v)
            | PatientUpdate::LastNameTh(v)
            | PatientUpdate::FirstNameEn(v)
            | PatientUpdate::LastNameEn(v)
            | PatientUpdate::Nationality(v) => require_text(self.column(), v),
            PatientUpdate::DateOfBirth(dob) => validate_date_of_birth(*dob, today),
            _ => Ok(()),
        }
    }

    fn into_param(self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            PatientUpdate::FirstNameTh(v)
            | PatientUpdate::LastNameTh(v)
            | PatientUpdate::FirstNameEn(v)
            | PatientUpdate::LastNameEn(v)
            | PatientUpdate::Nationality(v) => Box::new(v.trim().to_string()),
            PatientUpdate::MiddleNameTh(v)
            | PatientUpdate::MiddleNameEn(v)
            | PatientUpdate::NickNameTh(v)
            | PatientUpdate::NickNameEn(v)
            | PatientUpdate::NationalId(v)
            | PatientUpdate::PassportId(v)
            | PatientUpdate::PhoneNumber(v)
            | PatientUpdate::Email(v) => Box::new(trim_opt(v)),
            PatientUpdate::DateOfBirth(v) => Box::new(v),
            PatientUpdate::Gender(v) => Box::new(v.as_str()),
            PatientUpdate::BloodGroup(v) => Box::new(v.as_str()),
        }
    }
}

/// JSON body of a partial update; absent fields are left unchanged.
///
/// Optional text columns are cleared by sending an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatientPatch {
    pub first_name_th: Option<String>,
    pub last_name_th: Option<String>,
    pub middle_name_th: Option<String>,
    pub first_name_en: Option<String>,
    pub last_name_en: Option<String>,
    pub middle_name_en: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub nick_name_th: Option<String>,
    pub nick_name_en: Option<String>,
    pub national_id: Option<String>,
    pub passport_id: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub gender: Option<Gender>,
    pub nationality: Option<String>,
    pub blood_grp: Option<BloodGroup>,
}

impl PatientPatch {
    /// The updates this patch describes, in column order.
    pub fn into_updates(self) -> Vec<PatientUpdate> {
        let optional = |v: String| Some(v);
        [
            self.first_name_th.map(PatientUpdate::FirstNameTh),
            self.last_name_th.map(PatientUpdate::LastNameTh),
            self.middle_name_th.map(optional).map(PatientUpdate::MiddleNameTh),
            self.first_name_en.map(PatientUpdate::FirstNameEn),
            self.last_name_en.map(PatientUpdate::LastNameEn),
            self.middle_name_en.map(optional).map(PatientUpdate::MiddleNameEn),
            self.date_of_birth.map(PatientUpdate::DateOfBirth),
            self.nick_name_th.map(optional).map(PatientUpdate::NickNameTh),
            self.nick_name_en.map(optional).map(PatientUpdate::NickNameEn),
            self.national_id.map(optional).map(PatientUpdate::NationalId),
            self.passport_id.map(optional).map(PatientUpdate::PassportId),
            self.phone_number.map(optional).map(PatientUpdate::PhoneNumber),
            self.email.map(optional).map(PatientUpdate::Email),
            self.gender.map(PatientUpdate::Gender),
            self.nationality.map(PatientUpdate::Nationality),
            self.blood_grp.map(PatientUpdate::BloodGroup),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Builds `UPDATE patients SET ...` for `updates`; the id is the last parameter.
fn update_statement(updates: &[PatientUpdate]) -> Result<String, ValidationError> {
    let columns: Vec<_> = updates.iter().map(PatientUpdate::column).collect();
    super::update_statement("patients", &columns, PATIENT_COLUMNS)
}

/// Escapes `%`, `_` and `\` for use inside an `ILIKE` pattern.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Patient CRUD within the current tenant's schema.
#[derive(Debug, Clone)]
pub struct PatientRepository {
    sessions: Arc<PostgresSessionManager>,
    registry: TenantRegistry,
}

impl PatientRepository {
    pub fn new(sessions: Arc<PostgresSessionManager>, registry: TenantRegistry) -> Self {
        Self { sessions, registry }
    }

    /// Registers a patient and assigns the next HN of the tenant.
    ///
    /// The HN is allocated in its own transaction; a failed insert leaves a
    /// gap in the sequence.
    pub async fn create(&self, ctx: &TenantContext, patient: NewPatient) -> StorageResult<Patient> {
        let tenant = ctx.require()?;
        let patient = patient.normalized();
        patient.validate(Utc::now().date_naive())?;

        let hn = self.registry.generate_hn(&tenant.schema_name).await?;

        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "INSERT INTO patients (first_name_th, last_name_th, middle_name_th, first_name_en, \
             last_name_en, middle_name_en, date_of_birth, nick_name_th, nick_name_en, patient_hn, \
             national_id, passport_id, phone_number, email, gender, nationality, blood_grp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {}",
            PATIENT_COLUMNS
        );
        let result = async {
            let row = tx
                .client()?
                .query_one(
                    query.as_str(),
                    &[
                        &patient.first_name_th,
                        &patient.last_name_th,
                        &patient.middle_name_th,
                        &patient.first_name_en,
                        &patient.last_name_en,
                        &patient.middle_name_en,
                        &patient.date_of_birth,
                        &patient.nick_name_th,
                        &patient.nick_name_en,
                        &hn,
                        &patient.national_id,
                        &patient.passport_id,
                        &patient.phone_number,
                        &patient.email,
                        &patient.gender.as_str(),
                        &patient.nationality,
                        &patient.blood_grp.as_str(),
                    ],
                )
                .await
                .map_err(record_error(KIND))?;
            Patient::from_row(&row)
        }
        .await;

        let created = finish(tx, result).await?;
        info!(schema = %tenant.schema_name, hn = %created.patient_hn, "Registered patient");
        Ok(created)
    }

    /// A live (not soft-deleted) patient by id.
    pub async fn get(&self, ctx: &TenantContext, id: i32) -> StorageResult<Patient> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let query = format!(
            "SELECT {} FROM patients WHERE id = $1 AND deleted_at IS NULL",
            PATIENT_COLUMNS
        );
        let result = async {
            let row = tx
                .query_opt(query.as_str(), &[&id])
                .await?
                .ok_or_else(|| not_found(KIND, id))?;
            Patient::from_row(&row)
        }
        .await;
        finish(tx, result).await
    }

    /// Live patients whose names, HN or identifiers contain `query`
    /// case-insensitively. An empty query lists all live patients.
    pub async fn search(&self, ctx: &TenantContext, query: &str) -> StorageResult<Vec<Patient>> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let query = query.trim();

        let result = async {
            let rows = if query.is_empty() {
                tx.query(
                    format!(
                        "SELECT {} FROM patients WHERE deleted_at IS NULL ORDER BY id",
                        PATIENT_COLUMNS
                    )
                    .as_str(),
                    &[],
                )
                .await?
            } else {
                let pattern = like_pattern(query);
                tx.query(
                    format!(
                        "SELECT {} FROM patients WHERE deleted_at IS NULL AND (\
                         first_name_th ILIKE $1 OR last_name_th ILIKE $1 OR \
                         middle_name_th ILIKE $1 OR first_name_en ILIKE $1 OR \
                         last_name_en ILIKE $1 OR middle_name_en ILIKE $1 OR \
                         patient_hn ILIKE $1 OR national_id ILIKE $1 OR \
                         passport_id ILIKE $1 OR phone_number ILIKE $1) ORDER BY id",
                        PATIENT_COLUMNS
                    )
                    .as_str(),
                    &[&pattern],
                )
                .await?
            };
            rows.iter().map(Patient::from_row).collect::<StorageResult<Vec<_>>>()
        }
        .await;
        finish(tx, result).await
    }

    /// Applies `updates` to a live patient. An empty list returns the patient unchanged.
    pub async fn update(
        &self,
        ctx: &TenantContext,
        id: i32,
        updates: Vec<PatientUpdate>,
    ) -> StorageResult<Patient> {
        ctx.require()?;
        if updates.is_empty() {
            return self.get(ctx, id).await;
        }

        let today = Utc::now().date_naive();
        for update in &updates {
            update.validate(today)?;
        }
        let statement = update_statement(&updates)?;

        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            updates.into_iter().map(PatientUpdate::into_param).collect();
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
            Patient::from_row(&row)
        }
        .await;
        finish(tx, result).await
    }

    /// Soft-deletes a live patient.
    pub async fn delete(&self, ctx: &TenantContext, id: i32) -> StorageResult<()> {
        let tx = begin_for(&self.sessions, ctx).await?;
        let result = async {
            let deleted = tx
                .execute(
                    "UPDATE patients SET deleted_at = NOW(), updated_at = NOW() \
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
            info!(schema = %schema, id, "Deleted patient");
        }
        Ok(())
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
