//!
//! drivegate CLI
//! -------------
//! Runs single gateway operations against the drives defined in the file named by
//! `DRIVEGATE_CONFIG`. Without a config file a local drive `local` rooted at the
//! current directory is used. The caller is principal `cli` with role `admin`,
//! or the comma-separated roles in `DRIVEGATE_ROLES`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use drivegate::gateway::{
    AccessLevel, BackendType, Drive, DriveItem, Gateway, GatewayConfig, Principal, Query, SecurityRule,
};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} <command> [args]\n\nCommands:\n  ls [-r] [--pattern <regex>] <drive> <path>   list a directory (recursively with -r)\n  stat <drive> <path>                         show one item\n  mkdir <drive> <path>                        create a directory and its ancestors\n  put <drive> <path> <local>                  upload a local file\n  get <drive> <path> <local>                  download to a local file\n  rm <drive> <path>                           delete a file or directory tree\n  cp <drive> <src> <dst>                      copy a file or directory tree\n  mv <drive> <src> <dst>                      rename a file or directory tree\n  head <drive> <path> <n>                     print the first n lines of a file\n  classes <drive>                             list storage classes\n  restore <drive> <path> <days>               rehydrate archived objects\n\nEnvironment:\n  DRIVEGATE_CONFIG   JSON gateway config (global settings and drives)\n  DRIVEGATE_ROLES    comma-separated roles for the CLI principal (default: admin)\n  RUST_LOG           tracing filter (default: info)"
    );
}

fn load_gateway() -> Result<Gateway> {
    let cfg = match env::var("DRIVEGATE_CONFIG") {
        Ok(path) if !path.trim().is_empty() => GatewayConfig::load(Path::new(&path))?,
        _ => {
            let cwd = env::current_dir().context("resolving current directory")?;
            let mut drive = Drive::new("local", BackendType::LocalFilesystem).with_property("root", &cwd.to_string_lossy());
            for level in [AccessLevel::Delete, AccessLevel::Archive, AccessLevel::Restore] {
                drive = drive.with_rule(SecurityRule::include("admin", ".*", level));
            }
            GatewayConfig { drives: vec![drive], ..Default::default() }
        }
    };
    debug!(target: "drivegate::cli", "{} drive(s) configured", cfg.drives.len());
    Ok(Gateway::from_config(cfg)?)
}

fn cli_principal() -> Principal {
    let roles: Vec<String> = env::var("DRIVEGATE_ROLES")
        .ok()
        .map(|s| s.split(',').map(|r| r.trim().to_string()).filter(|r| !r.is_empty()).collect())
        .unwrap_or_default();
    if roles.is_empty() {
        Principal::new("cli", &["admin"])
    } else {
        Principal { id: "cli".to_string(), roles }
    }
}

fn print_item(item: &DriveItem) {
    let kind = if item.is_directory { "d" } else { "-" };
    let modified = item.modified_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_else(|| "-".to_string());
    let class = item.storage_class.as_deref().unwrap_or("");
    let restoring = if item.is_restoring { " (restoring)" } else { "" };
    println!("{} {:>12} {:>19} {:<12} {}{}", kind, item.size_bytes, modified, class, item.path, restoring);
}

/// Positional arguments for a command, failing with its usage line.
fn positional<'a>(args: &'a [String], n: usize, usage: &str) -> Result<&'a [String]> {
    if args.len() != n {
        bail!("usage: {}", usage);
    }
    Ok(args)
}

async fn run(gw: &Gateway, who: &Principal, cmd: &str, args: &[String]) -> Result<()> {
    match cmd {
        "ls" => {
            let mut recursive = false;
            let mut pattern = String::new();
            let mut rest: Vec<String> = Vec::new();
            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "-r" | "--recursive" => recursive = true,
                    "--pattern" => {
                        i += 1;
                        pattern = args.get(i).cloned().ok_or_else(|| anyhow!("--pattern needs a value"))?;
                    }
                    other => rest.push(other.to_string()),
                }
                i += 1;
            }
            let a = positional(&rest, 2, "ls [-r] [--pattern <regex>] <drive> <path>")?;
            let query = Query::new(&a[0], &a[1]).recursive(recursive).pattern(&pattern).placeholders(true);
            for item in gw.find(who, &query).await? {
                print_item(&item);
            }
        }
        "stat" => {
            let a = positional(args, 2, "stat <drive> <path>")?;
            let item = gw.stat(who, &a[0], &a[1]).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        "mkdir" => {
            let a = positional(args, 2, "mkdir <drive> <path>")?;
            print_item(&gw.mkdir(who, &a[0], &a[1]).await?);
        }
        "put" => {
            let a = positional(args, 3, "put <drive> <path> <local>")?;
            print_item(&gw.upload(who, &a[0], &a[1], &PathBuf::from(&a[2])).await?);
        }
        "get" => {
            let a = positional(args, 3, "get <drive> <path> <local>")?;
            gw.download(who, &a[0], &a[1], &PathBuf::from(&a[2])).await?;
        }
        "rm" => {
            let a = positional(args, 2, "rm <drive> <path>")?;
            let report = gw.delete(who, &a[0], &a[1]).await?;
            println!("deleted {} item(s)", report.completed.len());
        }
        "cp" | "mv" => {
            let a = positional(args, 3, "cp|mv <drive> <src> <dst>")?;
            let report = if cmd == "cp" {
                gw.copy(who, &a[0], &a[1], &a[2]).await?
            } else {
                gw.rename(who, &a[0], &a[1], &a[2]).await?
            };
            for p in &report.completed {
                println!("{}", p);
            }
        }
        "head" => {
            let a = positional(args, 3, "head <drive> <path> <n>")?;
            let n: usize = a[2].parse().with_context(|| format!("'{}' is not a line count", a[2]))?;
            for line in gw.preview_lines(who, &a[0], &a[1], n).await?.lines {
                println!("{}", line);
            }
        }
        "classes" => {
            let a = positional(args, 1, "classes <drive>")?;
            for c in gw.storage_classes(&a[0])? {
                let mut flags = Vec::new();
                if c.is_default { flags.push("default"); }
                if c.requires_restore { flags.push("requires restore"); }
                println!("{:<14} {:<28} {}", c.class_id, c.display_name, flags.join(", "));
            }
        }
        "restore" => {
            let a = positional(args, 3, "restore <drive> <path> <days>")?;
            let days: u32 = a[2].parse().with_context(|| format!("'{}' is not a day count", a[2]))?;
            let summary = gw.restore(who, &a[0], &a[1], days).await?;
            for p in &summary.requested {
                println!("restoring {}", p);
            }
            for p in &summary.skipped {
                println!("skipped   {}", p);
            }
        }
        other => bail!("unknown command '{}'", other),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("drivegate").to_string();
    let Some(cmd) = argv.get(1) else {
        print_usage(&program);
        std::process::exit(2);
    };
    if cmd == "-h" || cmd == "--help" || cmd == "help" {
        print_usage(&program);
        return Ok(());
    }

    let gw = load_gateway()?;
    let who = cli_principal();
    info!(target: "drivegate::cli", "{} as {} {:?}", cmd, who.id, who.roles);
    run(&gw, &who, cmd, &argv[2..]).await
}
