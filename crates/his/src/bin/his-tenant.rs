//! Operator CLI for hospital tenants.
//!
//! Creates, lists, toggles, migrates and removes tenants directly against
//! the shared database. Admin credentials for a new tenant are printed once
//! and cannot be retrieved afterwards.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use his_persistence::postgres::PostgresBackend;
use his_persistence::tenant::{
    ADMIN_PASSWORD_MIN, AdminCredentials, NewTenant, SchemaDisposition, SchemaProvisioner, Tenant,
    TenantRegistry,
};
use his_rest::init_logging;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::info;

const GENERATED_PASSWORD_LEN: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "his-tenant", author, version, about = "Manage hospital tenants", long_about = None)]
struct Cli {
    /// PostgreSQL connection string; falls back to the HIS_PG_* variables
    #[arg(long, env = "HIS_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Log level
    #[arg(long, env = "HIS_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision a tenant schema with its admin account
    Create(CreateArgs),
    /// List registered tenants
    List,
    /// Allow requests for a tenant
    Activate {
        /// Tenant code
        code: String,
    },
    /// Reject requests for a tenant
    Deactivate {
        /// Tenant code
        code: String,
    },
    /// Apply shared migrations and re-apply tenant tables to every tenant
    Migrate,
    /// Remove a tenant
    Drop {
        /// Tenant code
        code: String,
        /// Keep the schema and its data; only the registry row is removed
        #[arg(long)]
        keep_schema: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long, value_name = "CODE")]
    code: String,
    #[arg(long, value_name = "NAME")]
    name: String,
    #[arg(long, value_name = "SUBDOMAIN")]
    subdomain: String,
    #[arg(long, value_name = "NAME")]
    hospital_name: String,
    /// Exactly 8 characters; prefixes every patient HN
    #[arg(long, value_name = "CODE")]
    hospital_code: String,
    #[arg(long, value_name = "ADDRESS")]
    address: Option<String>,
    #[arg(long, value_name = "USERNAME")]
    admin_username: String,
    #[arg(long, value_name = "EMAIL")]
    admin_email: String,
    /// Prompted for when omitted on a terminal
    #[arg(long, env = "HIS_ADMIN_PASSWORD", value_name = "PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
    /// Generate a random admin password instead of prompting
    #[arg(long, conflicts_with = "admin_password")]
    generate_password: bool,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,
}

impl CreateArgs {
    fn new_tenant(&self) -> NewTenant {
        NewTenant {
            tenant_code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            subdomain: self.subdomain.trim().to_string(),
            hospital_name: self.hospital_name.trim().to_string(),
            hospital_code: self.hospital_code.trim().to_string(),
            address: self
                .address
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        }
    }
}

/// How the admin password is obtained.
#[derive(Debug, PartialEq, Eq)]
enum PasswordSource {
    Supplied(String),
    Prompt,
    Generate,
}

fn password_source(args: &CreateArgs, interactive: bool) -> PasswordSource {
    match &args.admin_password {
        Some(password) => PasswordSource::Supplied(password.clone()),
        None if args.generate_password || !interactive => PasswordSource::Generate,
        None => PasswordSource::Prompt,
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn prompt_password() -> anyhow::Result<String> {
    let password = rpassword::prompt_password("Admin password: ")?;
    if password.chars().count() < ADMIN_PASSWORD_MIN {
        bail!("admin password must be at least {} characters", ADMIN_PASSWORD_MIN);
    }
    let confirmation = rpassword::prompt_password("Confirm admin password: ")?;
    if password != confirmation {
        bail!("passwords do not match");
    }
    Ok(password)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn create_backend(database_url: Option<&str>) -> anyhow::Result<PostgresBackend> {
    let backend = match database_url {
        Some(url) => PostgresBackend::from_connection_string(url)?,
        None => PostgresBackend::from_env()?,
    };
    Ok(backend)
}

async fn open_registry(database_url: Option<&str>) -> anyhow::Result<TenantRegistry> {
    let backend = create_backend(database_url)?;
    backend
        .init_schema()
        .await
        .context("failed to prepare the shared schema")?;
    Ok(TenantRegistry::new(backend))
}

async fn create(database_url: Option<&str>, args: CreateArgs) -> anyhow::Result<()> {
    let tenant = args.new_tenant();
    tenant.validate()?;

    let interactive = io::stdin().is_terminal();
    let (password, generated) = match password_source(&args, interactive) {
        PasswordSource::Supplied(password) => (password, false),
        PasswordSource::Prompt => (prompt_password()?, false),
        PasswordSource::Generate => (generate_password(), true),
    };
    let admin = AdminCredentials::new(args.admin_username.trim(), password, args.admin_email.trim());
    admin.validate()?;

    println!("Tenant code:    {}", tenant.tenant_code);
    println!("Name:           {}", tenant.name);
    println!("Schema:         {}", tenant.schema_name());
    println!("Subdomain:      {}", tenant.subdomain);
    println!("Hospital:       {} ({})", tenant.hospital_name, tenant.hospital_code);
    if let Some(address) = &tenant.address {
        println!("Address:        {}", address);
    }
    println!("Admin:          {} <{}>", admin.username, admin.email);

    if !args.yes && !confirm("Provision this tenant?")? {
        println!("Aborted.");
        return Ok(());
    }

    let provisioner = SchemaProvisioner::new(open_registry(database_url).await?);
    let created = provisioner.provision(&tenant, &admin).await?;
    info!(tenant_code = %created.tenant_code, schema = %created.schema_name, "Tenant created");

    println!();
    println!("Tenant {} provisioned in schema {}.", created.tenant_code, created.schema_name);
    println!("Admin username:   {}", admin.username);
    println!("Admin staff code: {}", tenant.admin_staff_code());
    if generated {
        println!("Admin password:   {}", admin.password);
        println!("This password is shown once and cannot be recovered.");
    }
    Ok(())
}

fn print_table(tenants: &[Tenant]) {
    println!(
        "{:>4}  {:<12} {:<24} {:<16} {:<6} {:<9} {:>10}",
        "ID", "CODE", "SCHEMA", "SUBDOMAIN", "ACTIVE", "HOSPITAL", "HN"
    );
    for t in tenants {
        println!(
            "{:>4}  {:<12} {:<24} {:<16} {:<6} {:<9} {:>10}",
            t.id,
            t.tenant_code,
            t.schema_name,
            t.subdomain,
            if t.is_active { "yes" } else { "no" },
            t.hospital_code,
            t.hn_running
        );
    }
}

async fn set_active(database_url: Option<&str>, code: &str, active: bool) -> anyhow::Result<()> {
    let registry = open_registry(database_url).await?;
    let tenant = registry.get_by_code(code).await?;
    let tenant = registry.set_active(tenant.id, active).await?;
    println!(
        "Tenant {} is now {}.",
        tenant.tenant_code,
        if tenant.is_active { "active" } else { "inactive" }
    );
    Ok(())
}

async fn drop_tenant(
    database_url: Option<&str>,
    code: &str,
    keep_schema: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let registry = open_registry(database_url).await?;
    let tenant = registry.get_by_code(code).await?;
    let schema = tenant.schema()?;

    let disposition = if keep_schema {
        SchemaDisposition::Preserve
    } else {
        SchemaDisposition::Drop
    };
    let question = match disposition {
        SchemaDisposition::Drop => format!("Drop tenant {} and schema {} with all its data?", code, schema),
        SchemaDisposition::Preserve => format!("Remove tenant {} and keep schema {}?", code, schema),
    };
    if !yes && !confirm(&question)? {
        println!("Aborted.");
        return Ok(());
    }

    SchemaProvisioner::new(registry)
        .deprovision(&schema, disposition)
        .await?;
    println!("Tenant {} removed.", code);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Command::Create(args) => create(database_url, args).await,
        Command::List => {
            let tenants = open_registry(database_url).await?.list().await?;
            if tenants.is_empty() {
                println!("No tenants.");
            } else {
                print_table(&tenants);
            }
            Ok(())
        }
        Command::Activate { code } => set_active(database_url, &code, true).await,
        Command::Deactivate { code } => set_active(database_url, &code, false).await,
        Command::Migrate => {
            let provisioner = SchemaProvisioner::new(open_registry(database_url).await?);
            let migrated = provisioner.migrate_all().await?;
            println!("Migrated {} tenant schema(s).", migrated);
            Ok(())
        }
        Command::Drop {
            code,
            keep_schema,
            yes,
        } => drop_tenant(database_url, &code, keep_schema, yes).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn create_args(extra: &[&str]) -> CreateArgs {
        let mut args = vec![
            "his-tenant",
            "create",
            "--code",
            "HOSP001",
            "--name",
            " Bangkok General ",
            "--subdomain",
            "bangkok",
            "--hospital-name",
            "Bangkok General Hospital",
            "--hospital-code",
            "HOSP0001",
            "--admin-username",
            "admin1",
            "--admin-email",
            "admin@bangkok.example",
        ];
        args.extend_from_slice(extra);
        match parse(&args).command {
            Command::Create(args) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_create_builds_trimmed_tenant() {
        let tenant = create_args(&["--address", "  "]).new_tenant();
        assert_eq!(tenant.name, "Bangkok General");
        assert_eq!(tenant.address, None);
        assert_eq!(tenant.schema_name().as_str(), "tenant_hosp001");
        assert!(tenant.validate().is_ok());
    }

    #[test]
    fn test_password_source() {
        let supplied = create_args(&["--admin-password", "secret1"]);
        assert_eq!(
            password_source(&supplied, true),
            PasswordSource::Supplied("secret1".to_string())
        );

        let missing = create_args(&[]);
        assert_eq!(password_source(&missing, true), PasswordSource::Prompt);
        assert_eq!(password_source(&missing, false), PasswordSource::Generate);

        let generated = create_args(&["--generate-password"]);
        assert_eq!(password_source(&generated, true), PasswordSource::Generate);
    }

    #[test]
    fn test_password_and_generate_conflict() {
        let result = Cli::try_parse_from([
            "his-tenant",
            "create",
            "--code",
            "HOSP001",
            "--name",
            "n",
            "--subdomain",
            "s",
            "--hospital-name",
            "h",
            "--hospital-code",
            "HOSP0001",
            "--admin-username",
            "admin1",
            "--admin-email",
            "a@b",
            "--admin-password",
            "secret1",
            "--generate-password",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_password() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n"));
    }

    #[test]
    fn test_drop_flags() {
        match parse(&["his-tenant", "drop", "HOSP001", "--keep-schema", "-y"]).command {
            Command::Drop {
                code,
                keep_schema,
                yes,
            } => {
                assert_eq!(code, "HOSP001");
                assert!(keep_schema);
                assert!(yes);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
