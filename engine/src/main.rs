//! envshift - Entry Point
//!
//! Plans, validates and deploys migration packages between two tenant
//! environments given as JSON store snapshots.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use deploy_models::{DeploymentPackage, MigrationUnit, PackageStage};
use record_store::MemoryStore;
use tracing::{error, info};

use envshift::backup::archive;
use envshift::deploy::runner::PackageRunner;
use envshift::filesys::file::File;
use envshift::logs::{init_logging, LogOptions};
use envshift::storage::layout::{StorageLayout, BACKUP_EXTENSION};
use envshift::storage::settings::Settings;
use envshift::utils::version_info;

type CliArgs = HashMap<String, String>;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let mut cli_args: CliArgs = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let layout = cli_args
        .get("home")
        .map(StorageLayout::new)
        .unwrap_or_default();

    let settings = match load_settings(&cli_args, &layout).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "Unable to read settings:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    if let Err(e) = layout.setup().await {
        eprintln!("Failed to create {}: {e}", layout.base_dir.display());
    }
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let command = cli_args.get("command").map(String::as_str).unwrap_or("plan");
    info!("Running {} (version {})", command, version_info().version);
    match execute(command, &cli_args, &settings, &layout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} failed: {:#}", command, e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn load_settings(cli_args: &CliArgs, layout: &StorageLayout) -> Result<Settings> {
    let file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await.context("Reading settings")
}

async fn execute(command: &str, cli_args: &CliArgs, settings: &Settings, layout: &StorageLayout) -> Result<()> {
    match command {
        "plan" => plan(cli_args, settings, layout).await,
        "validate" => validate(cli_args, settings).await,
        "deploy" => deploy(cli_args, settings, layout).await,
        "backup" => backup(cli_args, layout).await,
        "rollback" => rollback(cli_args, settings, layout).await,
        other => bail!("Unknown command: {} (expected plan, validate, deploy, backup or rollback)", other),
    }
}

fn required<'a>(cli_args: &'a CliArgs, key: &str) -> Result<&'a str> {
    cli_args
        .get(key)
        .map(String::as_str)
        .with_context(|| format!("Missing --{}=<file>", key))
}

async fn read_store(path: &str) -> Result<MemoryStore> {
    File::new(path)
        .read_snapshot()
        .await
        .context("Reading store snapshot")
}

async fn write_store(path: &str, store: &MemoryStore) -> Result<()> {
    File::new(path)
        .write_snapshot(store)
        .await
        .context("Writing store snapshot")
}

fn package_file(cli_args: &CliArgs, layout: &StorageLayout, package: &DeploymentPackage) -> File {
    match cli_args.get("package") {
        Some(path) => File::new(path),
        None => layout.package_file(&package.id),
    }
}

async fn read_package(cli_args: &CliArgs) -> Result<(File, DeploymentPackage)> {
    let file = File::new(required(cli_args, "package")?);
    let package = file.read_package().await.context("Reading package")?;
    Ok((file, package))
}

async fn plan(cli_args: &CliArgs, settings: &Settings, layout: &StorageLayout) -> Result<()> {
    let source = read_store(required(cli_args, "source")?).await?;
    let target = read_store(required(cli_args, "target")?).await?;

    let mut runner = PackageRunner::build_package(
        &source,
        settings.selections.clone(),
        settings.options.clone(),
        settings.principal_id.clone(),
    )
    .await?;
    runner.match_targets(&target).await?;
    runner.apply_policy(settings.target_policy)?;

    let package = runner.into_package();
    print_plan(&package);

    let file = package_file(cli_args, layout, &package);
    file.write_package(&package).await?;
    println!("Package saved to {}", file.path().display());
    Ok(())
}

async fn validate(cli_args: &CliArgs, settings: &Settings) -> Result<()> {
    let (_, package) = read_package(cli_args).await?;
    let source = read_store(required(cli_args, "source")?).await?;
    let target = read_store(required(cli_args, "target")?).await?;

    let mut runner = PackageRunner::new(package, settings.principal_id.clone());
    runner.load_payloads(&source).await?;
    runner.validate(&target).await?;
    println!("{}", "Package is valid".green());
    Ok(())
}

async fn deploy(cli_args: &CliArgs, settings: &Settings, layout: &StorageLayout) -> Result<()> {
    let (package_file, package) = read_package(cli_args).await?;
    let source = read_store(required(cli_args, "source")?).await?;
    let target_path = required(cli_args, "target")?;
    let target = read_store(target_path).await?;

    let mut runner = PackageRunner::new(package, settings.principal_id.clone());
    runner.load_payloads(&source).await?;
    let backup_file = match cli_args.get("backup") {
        Some(path) => File::new(path),
        None => layout.backup_file(&runner.package().id),
    };

    let result = runner
        .run(&target, settings.validate_before_deploy, settings.rollback_on_failure)
        .await;

    // The target and the package are saved whether or not the run succeeded
    write_store(target_path, &target).await?;
    let package = runner.into_package();
    package_file.write_package(&package).await?;

    let backup = result?;
    backup_file.write_backup(&backup).await?;
    print_plan(&package);
    println!(
        "{} backup saved to {}",
        "Deployed;".green().bold(),
        backup_file.path().display()
    );
    Ok(())
}

async fn backup(cli_args: &CliArgs, layout: &StorageLayout) -> Result<()> {
    let target = read_store(required(cli_args, "target")?).await?;
    let backup = archive::create_backup(&target).await?;

    let file = match cli_args.get("backup") {
        Some(path) => File::new(path),
        None => layout
            .backups_dir()
            .file(&format!("{}.{}", backup.taken_at.timestamp(), BACKUP_EXTENSION)),
    };
    file.write_backup(&backup).await?;
    println!("Backed up {} kinds to {}", backup.kinds.len(), file.path().display());
    Ok(())
}

async fn rollback(cli_args: &CliArgs, settings: &Settings, layout: &StorageLayout) -> Result<()> {
    let target_path = required(cli_args, "target")?;
    let target = read_store(target_path).await?;
    let backup_file = match cli_args.get("backup") {
        Some(path) => File::new(path),
        None => layout
            .latest_backup()
            .await?
            .context("No --backup=<file> given and no backups saved yet")?,
    };
    info!("Restoring from {}", backup_file.path().display());
    let backup = backup_file.read_backup().await?;

    if cli_args.contains_key("package") {
        let (package_file, package) = read_package(cli_args).await?;
        let mut runner = PackageRunner::new(package, settings.principal_id.clone());
        runner.rollback(&target, &backup).await?;
        package_file.write_package(runner.package()).await?;
    } else {
        archive::rollback(&target, &backup).await?;
    }

    write_store(target_path, &target).await?;
    println!("{} {} kinds", "Restored".yellow().bold(), backup.kinds.len());
    Ok(())
}

fn describe_target(unit: &MigrationUnit) -> String {
    match &unit.target {
        None => "unresolved".red().to_string(),
        Some(target) if target.is_empty_sentinel() => "create".green().to_string(),
        Some(target) => {
            let how = unit
                .targets
                .iter()
                .find(|t| &t.id == target)
                .and_then(|t| serde_json::to_value(t.match_type).ok())
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "chosen".to_string());
            format!("{} {} ({})", "update".yellow(), target, how)
        }
    }
}

fn print_plan(package: &DeploymentPackage) {
    let stage = match package.stage {
        PackageStage::Failed => format!("{:?}", package.stage).red(),
        PackageStage::Deployed => format!("{:?}", package.stage).green(),
        _ => format!("{:?}", package.stage).normal(),
    };
    println!("{} {} [{}]", "Package".bold(), package.id, stage);
    for unit in &package.units {
        let marker = if unit.selected { " " } else { "+" };
        println!(
            "{} {:<16} {:<40} {}",
            marker,
            unit.kind.as_str().cyan(),
            unit.label(),
            describe_target(unit)
        );
    }
}
