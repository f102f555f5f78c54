//! PostgreSQL integration tests.
//!
//! These tests run against a real PostgreSQL instance started with
//! testcontainers, so they require Docker.
//!
//! Run with: `cargo test -p his-persistence --features integration`

#![cfg(feature = "integration")]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use his_persistence::error::{
    BackendError, ProvisionStep, ProvisioningError, RecordError, StorageError, TenantError,
};
use his_persistence::postgres::{PostgresBackend, PostgresConfig, PostgresSessionManager};
use his_persistence::records::{
    BloodGroup, Gender, NewPatient, NewStaff, PatientRepository, PatientUpdate, StaffRepository,
    StaffUpdate,
};
use his_persistence::sql::{self, Table};
use his_persistence::tenant::{
    AdminCredentials, NewTenant, SchemaDisposition, SchemaName, SchemaProvisioner, Tenant,
    TenantContext, TenantMigration, TenantRegistry, default_migrations,
};

/// Shared PostgreSQL container reused across all tests in this binary.
struct SharedPg {
    host: String,
    port: u16,
    /// Kept alive for the duration of the test binary; dropped at process exit.
    _container: testcontainers::ContainerAsync<Postgres>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn shared_pg() -> &'static SharedPg {
    SHARED_PG
        .get_or_init(|| async {
            let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
            let container = Postgres::default()
                .with_label("github.run_id", &run_id)
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get host port");

            let host = container
                .get_host()
                .await
                .expect("Failed to get host")
                .to_string();

            let backend = PostgresBackend::new(config(&host, port, 5)).expect("Failed to create backend");
            backend
                .init_schema()
                .await
                .expect("Failed to initialize shared schema");

            SharedPg {
                host,
                port,
                _container: container,
            }
        })
        .await
}

fn config(host: &str, port: u16, max_connections: usize) -> PostgresConfig {
    PostgresConfig {
        host: host.to_string(),
        port,
        dbname: "postgres".to_string(),
        user: "postgres".to_string(),
        password: Some("postgres".to_string()),
        max_connections,
        lock_timeout_ms: 5000,
        ..Default::default()
    }
}

async fn create_backend_with(max_connections: usize) -> PostgresBackend {
    let pg = shared_pg().await;
    PostgresBackend::new(config(&pg.host, pg.port, max_connections))
        .expect("Failed to create PostgresBackend")
}

async fn create_backend() -> PostgresBackend {
    create_backend_with(10).await
}

fn provisioner(backend: &PostgresBackend) -> SchemaProvisioner {
    SchemaProvisioner::new(TenantRegistry::new(backend.clone())).with_bcrypt_cost(4)
}

static NEXT_TENANT: AtomicUsize = AtomicUsize::new(1);

/// A tenant with a code and subdomain unique to this test run.
fn unique_tenant() -> NewTenant {
    let n = NEXT_TENANT.fetch_add(1, Ordering::SeqCst);
    let suffix = format!("{}x{}", std::process::id(), n);
    NewTenant {
        tenant_code: format!("HOSP{}", suffix),
        name: format!("Hospital {}", suffix),
        subdomain: format!("h{}", suffix),
        hospital_name: format!("General Hospital {}", suffix),
        hospital_code: "HOSP0001".to_string(),
        address: Some("1 Rama IV Road, Bangkok".to_string()),
    }
}

fn admin() -> AdminCredentials {
    AdminCredentials::new("admin1", "secret1", "admin@hospital.example")
}

fn context(tenant: &Tenant) -> TenantContext {
    TenantContext::for_tenant(tenant.info().expect("valid schema"))
}

fn new_patient(first_name_en: &str, national_id: Option<&str>) -> NewPatient {
    NewPatient {
        first_name_th: "สมชาย".to_string(),
        last_name_th: "ใจดี".to_string(),
        middle_name_th: None,
        first_name_en: first_name_en.to_string(),
        last_name_en: "Jaidee".to_string(),
        middle_name_en: None,
        date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
        nick_name_th: None,
        nick_name_en: None,
        national_id: national_id.map(str::to_string),
        passport_id: None,
        phone_number: None,
        email: None,
        gender: Gender::Male,
        nationality: "Thai".to_string(),
        blood_grp: BloodGroup::O,
    }
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provision_creates_schema_tables_and_admin() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let new_tenant = unique_tenant();

    let tenant = provisioner.provision(&new_tenant, &admin()).await.unwrap();

    assert_eq!(tenant.schema_name, new_tenant.schema_name().as_str());
    assert!(tenant.is_active);
    assert_eq!(tenant.hn_running, 0);

    let registry = provisioner.registry();
    assert!(registry.schema_exists(&tenant.schema().unwrap()).await.unwrap());
    assert_eq!(
        registry.get_by_subdomain(&new_tenant.subdomain).await.unwrap().id,
        tenant.id
    );

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let staff = StaffRepository::new(sessions)
        .find_by_username(&context(&tenant), "admin1")
        .await
        .unwrap()
        .expect("admin row");
    assert!(staff.is_admin);
    assert_eq!(staff.staff_code, format!("ADM{}", new_tenant.tenant_code));
    assert!(staff.verify_password("secret1"));
}

#[tokio::test]
async fn test_duplicate_provision_leaves_first_tenant_intact() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let new_tenant = unique_tenant();

    let first = provisioner.provision(&new_tenant, &admin()).await.unwrap();

    let err = provisioner.provision(&new_tenant, &admin()).await.unwrap_err();
    assert!(
        matches!(err, StorageError::Tenant(TenantError::DuplicateSchema { .. })),
        "unexpected error: {:?}",
        err
    );

    let other_code_same_subdomain = NewTenant {
        subdomain: new_tenant.subdomain.clone(),
        ..unique_tenant()
    };
    let err = provisioner
        .provision(&other_code_same_subdomain, &admin())
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::Tenant(TenantError::DuplicateSubdomain { .. })),
        "unexpected error: {:?}",
        err
    );
    assert!(
        !provisioner
            .registry()
            .schema_exists(&other_code_same_subdomain.schema_name())
            .await
            .unwrap()
    );

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let staff = StaffRepository::new(sessions)
        .list(&context(&first))
        .await
        .unwrap();
    assert_eq!(staff.len(), 1);
}

fn broken_statements(schema: &SchemaName) -> Vec<String> {
    vec![sql::create_table(schema, Table::Patients, "id SERIAL PRIMARY KEY, broken NOT_A_TYPE")]
}

#[tokio::test]
async fn test_failed_create_tables_rolls_back_everything() {
    let backend = create_backend().await;
    let mut migrations = default_migrations();
    migrations.insert(
        1,
        TenantMigration {
            version: "0001a",
            name: "broken",
            statements: broken_statements,
        },
    );
    let provisioner = provisioner(&backend).with_migrations(migrations);
    let new_tenant = unique_tenant();

    let err = provisioner.provision(&new_tenant, &admin()).await.unwrap_err();
    assert!(
        matches!(
            err,
            StorageError::Provisioning(ProvisioningError::Failed {
                step: ProvisionStep::CreateTables,
                ..
            })
        ),
        "unexpected error: {:?}",
        err
    );

    let registry = provisioner.registry();
    assert!(
        registry
            .find_by_subdomain(&new_tenant.subdomain)
            .await
            .unwrap()
            .is_none()
    );
    assert!(!registry.schema_exists(&new_tenant.schema_name()).await.unwrap());
}

fn slow_failing_statements(_schema: &SchemaName) -> Vec<String> {
    vec!["SELECT pg_sleep(1)".to_string(), "SELECT 1 / 0".to_string()]
}

/// A failed run's cleanup must not drop a schema that a concurrent run of
/// the same tenant code committed in the meantime.
#[tokio::test]
async fn test_failed_run_cleanup_spares_concurrently_committed_schema() {
    let new_tenant = unique_tenant();
    let schema = new_tenant.schema_name();

    // One connection, so the failed run's cleanup has to queue behind `holder`.
    let failing_backend = create_backend_with(1).await;
    let mut migrations = default_migrations();
    migrations.push(TenantMigration {
        version: "9999",
        name: "slow_broken",
        statements: slow_failing_statements,
    });
    let failing = provisioner(&failing_backend).with_migrations(migrations);

    let failed_run = {
        let new_tenant = new_tenant.clone();
        tokio::spawn(async move { failing.provision(&new_tenant, &admin()).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let holder = {
        let backend = failing_backend.clone();
        tokio::spawn(async move {
            let client = backend.get_client().await.expect("pooled connection");
            client.batch_execute("SELECT pg_sleep(1.5)").await.expect("sleep");
        })
    };

    let committed_backend = create_backend().await;
    let committed = provisioner(&committed_backend);
    let committed_run = {
        let new_tenant = new_tenant.clone();
        tokio::spawn(async move { committed.provision(&new_tenant, &admin()).await })
    };

    let err = failed_run.await.unwrap().unwrap_err();
    assert!(
        matches!(
            err,
            StorageError::Provisioning(ProvisioningError::Failed {
                step: ProvisionStep::CreateTables,
                ..
            })
        ),
        "unexpected error: {:?}",
        err
    );
    let tenant = committed_run.await.unwrap().unwrap();
    holder.await.unwrap();
    assert_eq!(tenant.schema_name, schema.as_str());

    let registry = TenantRegistry::new(committed_backend.clone());
    assert_eq!(registry.get_by_schema_name(&schema).await.unwrap().id, tenant.id);
    assert!(registry.schema_exists(&schema).await.unwrap());

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(committed_backend)));
    let staff = StaffRepository::new(sessions)
        .find_by_username(&context(&tenant), "admin1")
        .await
        .unwrap();
    assert!(staff.is_some());
}

#[tokio::test]
async fn test_deprovision_drop_and_preserve() {
    let backend = create_backend().await;
    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let provisioner = provisioner(&backend).with_session_manager(sessions.clone());

    let dropped = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let dropped_schema = dropped.schema().unwrap();
    sessions.session_for(dropped_schema.as_str()).await.unwrap();
    assert_eq!(sessions.cached_len(), 1);

    provisioner
        .deprovision(&dropped_schema, SchemaDisposition::Drop)
        .await
        .unwrap();
    assert!(!provisioner.registry().schema_exists(&dropped_schema).await.unwrap());
    assert_eq!(sessions.cached_len(), 0);

    let kept = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let kept_schema = kept.schema().unwrap();
    provisioner
        .deprovision(&kept_schema, SchemaDisposition::Preserve)
        .await
        .unwrap();
    assert!(provisioner.registry().schema_exists(&kept_schema).await.unwrap());
    assert!(
        provisioner
            .registry()
            .get_by_schema_name(&kept_schema)
            .await
            .unwrap_err()
            .is_tenant_not_found()
    );
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_inactive_tenant_hidden_from_subdomain_lookup() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let new_tenant = unique_tenant();
    let tenant = provisioner.provision(&new_tenant, &admin()).await.unwrap();
    let registry = provisioner.registry();

    let updated = registry.set_active(tenant.id, false).await.unwrap();
    assert!(!updated.is_active);

    let err = registry.get_by_subdomain(&new_tenant.subdomain).await.unwrap_err();
    assert!(err.is_tenant_not_found());

    let found = registry
        .find_by_subdomain(&new_tenant.subdomain)
        .await
        .unwrap()
        .expect("inactive tenant still listed");
    assert!(!found.is_active);
    assert_eq!(
        registry.get_by_schema_name(&tenant.schema().unwrap()).await.unwrap().id,
        tenant.id
    );
}

#[tokio::test]
async fn test_subdomain_lookup_is_case_sensitive() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let new_tenant = unique_tenant();
    provisioner.provision(&new_tenant, &admin()).await.unwrap();

    let upper = new_tenant.subdomain.to_uppercase();
    assert!(
        provisioner
            .registry()
            .find_by_subdomain(&upper)
            .await
            .unwrap()
            .is_none()
    );
}

// ============================================================================
// Sequence allocation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_next_value_is_gap_free() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let registry = provisioner.registry().clone();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let registry = registry.clone();
            let id = tenant.id;
            tokio::spawn(async move { registry.increment_counter(id).await })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    let distinct: HashSet<_> = values.iter().copied().collect();
    assert_eq!(distinct.len(), 20);
    values.sort_unstable();
    assert_eq!(values, (1..=20).collect::<Vec<u64>>());

    assert_eq!(registry.get_by_id(tenant.id).await.unwrap().hn_running, 20);
}

#[tokio::test]
async fn test_generate_hn_sequence() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let schema = tenant.schema().unwrap();

    let registry = provisioner.registry();
    assert_eq!(registry.generate_hn(&schema).await.unwrap(), "HOSP0001-00000001");
    assert_eq!(registry.generate_hn(&schema).await.unwrap(), "HOSP0001-00000002");
}

#[tokio::test]
async fn test_next_value_for_unknown_tenant() {
    let backend = create_backend().await;
    let err = TenantRegistry::new(backend)
        .increment_counter(i64::MAX)
        .await
        .unwrap_err();
    assert!(err.is_tenant_not_found());
}

// ============================================================================
// Session scoping and isolation
// ============================================================================

#[tokio::test]
async fn test_scoped_transaction_pins_search_path() {
    // One pooled connection, so every step below reuses it.
    let backend = create_backend_with(1).await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let schema = tenant.schema().unwrap();

    let sessions = PostgresSessionManager::new(Arc::new(backend.clone()));
    let ctx = sessions.session_for(schema.as_str()).await.unwrap();

    let tx = ctx.begin().await.unwrap();
    assert_eq!(tx.search_path().await.unwrap(), format!("{}, public", schema));
    let row = tx
        .query_one(
            "SELECT n.nspname::text FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.oid = 'patients'::regclass",
            &[],
        )
        .await
        .unwrap();
    let resolved: String = row.get(0);
    assert_eq!(resolved, schema.as_str());
    tx.commit().await.unwrap();

    // The connection went back to the pool with its default search path.
    let client = backend.get_client().await.unwrap();
    let row = client.query_one("SHOW search_path", &[]).await.unwrap();
    let path: String = row.get(0);
    assert!(!path.contains(schema.as_str()), "search path leaked: {}", path);
    let row = client
        .query_one("SELECT to_regclass('patients') IS NULL", &[])
        .await
        .unwrap();
    assert!(row.get::<_, bool>(0));
}

#[tokio::test]
async fn test_dropped_transaction_does_not_return_connection() {
    let backend = create_backend_with(1).await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();

    let sessions = PostgresSessionManager::new(Arc::new(backend.clone()));
    let ctx = sessions
        .session_for(&tenant.schema_name)
        .await
        .unwrap();

    let tx = ctx.begin().await.unwrap();
    drop(tx);

    let client = backend.get_client().await.unwrap();
    let row = client.query_one("SHOW search_path", &[]).await.unwrap();
    let path: String = row.get(0);
    assert!(!path.contains(&tenant.schema_name), "search path leaked: {}", path);
}

#[tokio::test]
async fn test_unknown_schema_fails_bind_and_is_not_cached() {
    let backend = create_backend().await;
    let sessions = PostgresSessionManager::new(Arc::new(backend));

    let err = sessions.session_for("tenant_does_not_exist").await.unwrap_err();
    assert!(
        matches!(err, StorageError::Backend(BackendError::SessionBindFailed { .. })),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(sessions.cached_len(), 0);
}

#[tokio::test]
async fn test_patients_are_isolated_per_tenant() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let bangkok = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let chiang_mai = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let patients = PatientRepository::new(sessions, provisioner.registry().clone());

    let created = patients
        .create(&context(&bangkok), new_patient("Somchai", Some("1100700000001")))
        .await
        .unwrap();
    assert_eq!(created.patient_hn, "HOSP0001-00000001");

    let found = patients.search(&context(&bangkok), "somch").await.unwrap();
    assert_eq!(found.len(), 1);

    let other = patients.search(&context(&chiang_mai), "").await.unwrap();
    assert!(other.is_empty());

    let err = patients
        .get(&context(&chiang_mai), created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::NotFound { .. })));
}

#[tokio::test]
async fn test_patient_lifecycle() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let ctx = context(&tenant);

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let patients = PatientRepository::new(sessions, provisioner.registry().clone());

    let created = patients
        .create(&ctx, new_patient("Somchai", Some("1100700000002")))
        .await
        .unwrap();

    let updated = patients
        .update(
            &ctx,
            created.id,
            vec![
                PatientUpdate::FirstNameEn("Somsak".to_string()),
                PatientUpdate::Email(Some("somsak@example.com".to_string())),
                PatientUpdate::BloodGroup(BloodGroup::AB),
            ],
        )
        .await
        .unwrap();
    assert_eq!(updated.first_name_en, "Somsak");
    assert_eq!(updated.email.as_deref(), Some("somsak@example.com"));
    assert_eq!(updated.blood_grp, BloodGroup::AB);
    assert_eq!(updated.patient_hn, created.patient_hn);

    let err = patients
        .create(&ctx, new_patient("Other", Some("1100700000002")))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::Duplicate { .. })));

    patients.delete(&ctx, created.id).await.unwrap();
    let err = patients.get(&ctx, created.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::NotFound { .. })));
    assert!(patients.search(&ctx, "Somsak").await.unwrap().is_empty());
}

fn new_staff(username: &str) -> NewStaff {
    NewStaff {
        username: username.to_string(),
        password: "secret2".to_string(),
        staff_code: None,
        phone_number: None,
        email: format!("{}@example.com", username),
        first_name: "Suda".to_string(),
        last_name: "Jaidee".to_string(),
        is_admin: false,
    }
}

#[tokio::test]
async fn test_staff_lifecycle() {
    let backend = create_backend().await;
    let provisioner = provisioner(&backend);
    let tenant = provisioner.provision(&unique_tenant(), &admin()).await.unwrap();
    let ctx = context(&tenant);

    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let staff = StaffRepository::new(sessions).with_bcrypt_cost(4);

    // Two accounts without a phone number share the unique column.
    let nurse = staff.create(&ctx, new_staff("nurse01")).await.unwrap();
    let clerk = staff.create(&ctx, new_staff("clerk01")).await.unwrap();
    assert_eq!(nurse.phone_number, None);
    assert_eq!(nurse.staff_code, format!("STF{:06}", nurse.id));
    assert!(!nurse.is_admin);
    assert!(nurse.verify_password("secret2"));

    let err = staff.create(&ctx, new_staff("nurse01")).await.unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::Duplicate { .. })));

    let updated = staff
        .update(
            &ctx,
            nurse.id,
            vec![
                StaffUpdate::PhoneNumber(Some("0812345678".to_string())),
                StaffUpdate::IsAdmin(true),
            ],
        )
        .await
        .unwrap();
    assert_eq!(updated.phone_number.as_deref(), Some("0812345678"));
    assert!(updated.is_admin);
    assert_eq!(staff.get(&ctx, nurse.id).await.unwrap(), updated);

    staff.delete(&ctx, clerk.id).await.unwrap();
    let err = staff.get(&ctx, clerk.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::NotFound { .. })));
    assert!(staff.find_by_username(&ctx, "clerk01").await.unwrap().is_none());

    let err = staff.delete(&ctx, clerk.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Record(RecordError::NotFound { .. })));

    // The provisioned admin plus the remaining nurse.
    assert_eq!(staff.list(&ctx).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_public_context_is_refused_by_repositories() {
    let backend = create_backend().await;
    let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
    let patients = PatientRepository::new(sessions, TenantRegistry::new(backend));

    let err = patients
        .search(&TenantContext::public(), "")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Tenant(TenantError::Required)));
}
