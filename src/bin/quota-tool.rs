//
// quota-tool: command-line front end for the disk_quota library.
//
use std::process;

use clap::{App, AppSettings, Arg, SubCommand};

use disk_quota::{DqError, QuotaId, QuotaLimits, QuotaMgr, QuotaType, DEFAULT_MAX_ID};

fn main() {
    env_logger::init();

    let path_arg = || Arg::with_name("path").required(true).help("path on the filesystem");
    let matches = App::new("quota-tool")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage disk quotas on XFS and ext4 filesystems")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("detect")
                .about("Detect the filesystem type of a path")
                .arg(path_arg()),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Set quota limits (block limits in 1K blocks)")
                .arg(path_arg())
                .arg(Arg::with_name("id").required(true))
                .arg(Arg::with_name("bhard").required(true))
                .arg(Arg::with_name("bsoft").required(true))
                .arg(Arg::with_name("ihard").required(true))
                .arg(Arg::with_name("isoft").required(true))
                .arg(type_arg()),
        )
        .subcommand(
            SubCommand::with_name("set-project")
                .about("Set the project ID for a path")
                .arg(path_arg())
                .arg(Arg::with_name("project_id").required(true)),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Get quota information for an id")
                .arg(path_arg())
                .arg(Arg::with_name("id").required(true))
                .arg(type_arg()),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("List all quotas of a given type")
                .arg(path_arg())
                .arg(
                    Arg::with_name("type")
                        .required(true)
                        .help("quota type: user, group or project"),
                )
                .arg(Arg::with_name("max_id").help("upper bound of the scanned id range")),
        )
        .subcommand(
            SubCommand::with_name("test-id")
                .about("Test whether an id has an active quota")
                .arg(path_arg())
                .arg(
                    Arg::with_name("type")
                        .required(true)
                        .help("quota type: user, group or project"),
                )
                .arg(Arg::with_name("id").required(true)),
        )
        .subcommand(
            SubCommand::with_name("remove")
                .about("Remove quota limits for an id")
                .arg(path_arg())
                .arg(Arg::with_name("id").required(true))
                .arg(type_arg()),
        )
        .subcommand(
            SubCommand::with_name("test")
                .about("Run a set/get/update/remove self-check against a live mount")
                .arg(path_arg())
                .arg(Arg::with_name("id").required(true)),
        )
        .get_matches();

    let result = match matches.subcommand() {
        ("detect", Some(sub)) => cmd_detect(sub),
        ("set", Some(sub)) => cmd_set(sub),
        ("set-project", Some(sub)) => cmd_set_project(sub),
        ("get", Some(sub)) => cmd_get(sub),
        ("list", Some(sub)) => cmd_list(sub),
        ("test-id", Some(sub)) => cmd_test_id(sub),
        ("remove", Some(sub)) => cmd_remove(sub),
        ("test", Some(sub)) => cmd_test(sub),
        _ => unreachable!(),
    };

    if let Err(e) = result {
        eprintln!("quota-tool: {}", e);
        process::exit(1);
    }
}

fn type_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("type")
        .short("t")
        .long("type")
        .takes_value(true)
        .help("quota type: user, group or project (default: project)")
}

fn parse_u32(s: &str, what: &str) -> Result<u32, DqError> {
    s.parse()
        .map_err(|_| DqError::InvalidArgument(format!("invalid {} value: {:?}", what, s)))
}

fn parse_u64(s: &str, what: &str) -> Result<u64, DqError> {
    s.parse()
        .map_err(|_| DqError::InvalidArgument(format!("invalid {} value: {:?}", what, s)))
}

fn quota_type(sub: &clap::ArgMatches) -> Result<QuotaType, DqError> {
    sub.value_of("type").unwrap_or("project").parse()
}

fn cmd_detect(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let kind = disk_quota::detect(path)?;
    println!("Filesystem: {}", kind);
    Ok(())
}

fn cmd_set(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let id = parse_u32(sub.value_of("id").unwrap(), "id")?;
    let limits = QuotaLimits {
        block_hard: parse_u64(sub.value_of("bhard").unwrap(), "bhard")?,
        block_soft: parse_u64(sub.value_of("bsoft").unwrap(), "bsoft")?,
        inode_hard: parse_u64(sub.value_of("ihard").unwrap(), "ihard")?,
        inode_soft: parse_u64(sub.value_of("isoft").unwrap(), "isoft")?,
    };
    let qtype = quota_type(sub)?;

    disk_quota::set_quota(path, QuotaId::new(id, qtype), &limits)?;
    println!("quota set for {} id {} on {}", qtype, id, path);
    Ok(())
}

fn cmd_set_project(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let project_id = parse_u32(sub.value_of("project_id").unwrap(), "project ID")?;
    disk_quota::set_project_id(path, project_id)?;
    println!("project ID {} set on {}", project_id, path);
    Ok(())
}

fn cmd_get(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let id = parse_u32(sub.value_of("id").unwrap(), "id")?;
    let qtype = quota_type(sub)?;

    let rec = disk_quota::get_quota(path, QuotaId::new(id, qtype))?;
    println!("ID:               {}", rec.id);
    println!("Type:             {}", rec.qtype);
    println!("Block hard limit: {}", fmt_block_limit(rec.limits.block_hard));
    println!("Block soft limit: {}", fmt_block_limit(rec.limits.block_soft));
    println!("Current blocks:   {} 1K blocks", rec.usage.blocks);
    println!("Inode hard limit: {}", rec.limits.inode_hard);
    println!("Inode soft limit: {}", rec.limits.inode_soft);
    println!("Current inodes:   {}", rec.usage.inodes);
    if rec.usage.block_grace != 0 {
        println!("Block grace ends: {}", rec.usage.block_grace);
    }
    if rec.usage.inode_grace != 0 {
        println!("Inode grace ends: {}", rec.usage.inode_grace);
    }
    Ok(())
}

fn cmd_list(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let qtype: QuotaType = sub.value_of("type").unwrap().parse()?;
    let max_id = match sub.value_of("max_id") {
        Some(s) => parse_u32(s, "max_id")?,
        None => DEFAULT_MAX_ID,
    };

    let records = disk_quota::list_quotas(path, qtype, max_id)?;
    if records.is_empty() {
        println!("no quotas found");
        return Ok(());
    }

    println!(
        "{:>10} {:>14} {:>14} {:>12} {:>12}",
        "ID", "Blocks used", "Block limit", "Inodes used", "Inode limit"
    );
    for rec in &records {
        let block_limit = pick_limit(rec.limits.block_hard, rec.limits.block_soft);
        let inode_limit = pick_limit(rec.limits.inode_hard, rec.limits.inode_soft);
        println!(
            "{:>10} {:>14} {:>14} {:>12} {:>12}",
            rec.id,
            rec.usage.blocks,
            block_limit,
            rec.usage.inodes,
            inode_limit
        );
    }
    println!("total: {} quota(s)", records.len());
    Ok(())
}

fn cmd_test_id(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let qtype: QuotaType = sub.value_of("type").unwrap().parse()?;
    let id = parse_u32(sub.value_of("id").unwrap(), "id")?;

    disk_quota::test_quota(path, QuotaId::new(id, qtype))?;
    println!("quota exists for {} id {}", qtype, id);
    Ok(())
}

fn cmd_remove(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let id = parse_u32(sub.value_of("id").unwrap(), "id")?;
    let qtype = quota_type(sub)?;

    disk_quota::remove_quota(path, QuotaId::new(id, qtype))?;
    println!("quota removed for {} id {}", qtype, id);
    Ok(())
}

// Self-check: set, read back, verify, update, verify, remove, verify.
// Runs against the real mount, so it needs quota accounting enabled and
// enough privilege.
fn cmd_test(sub: &clap::ArgMatches) -> Result<(), DqError> {
    let path = sub.value_of("path").unwrap();
    let id = parse_u32(sub.value_of("id").unwrap(), "id")?;
    let qid = QuotaId::new(id, QuotaType::Project);
    let mgr = QuotaMgr::new(path)?;

    let mut passed = 0;
    let mut failed = 0;
    let mut check = |name: &str, ok: bool, detail: String| {
        if ok {
            println!("PASS {}", name);
            passed += 1;
        } else {
            println!("FAIL {} {}", name, detail);
            failed += 1;
        }
    };

    let first = QuotaLimits {
        block_hard: 1048576,
        block_soft: 921600,
        inode_hard: 100000,
        inode_soft: 90000,
    };
    let r = mgr.set_quota(path, qid, &first);
    check("set quota", r.is_ok(), format!("{:?}", r.err()));

    let rec = mgr.get_quota(path, qid);
    check("get quota", rec.is_ok(), format!("{:?}", rec.as_ref().err()));
    if let Ok(rec) = &rec {
        check(
            "limits match",
            rec.limits == first,
            format!("expected {:?}, got {:?}", first, rec.limits),
        );
    }

    let second = QuotaLimits {
        block_hard: 2097152,
        block_soft: 2048000,
        inode_hard: 200000,
        inode_soft: 180000,
    };
    let r = mgr.set_quota(path, qid, &second);
    check("update quota", r.is_ok(), format!("{:?}", r.err()));
    match mgr.get_quota(path, qid) {
        Ok(rec) => check(
            "updated limits match",
            rec.limits == second,
            format!("expected {:?}, got {:?}", second, rec.limits),
        ),
        Err(e) => check("updated limits match", false, format!("{}", e)),
    }

    let r = mgr.remove_quota(path, qid);
    check("remove quota", r.is_ok(), format!("{:?}", r.err()));
    match mgr.get_quota(path, qid) {
        Ok(rec) => check(
            "limits cleared",
            rec.limits == QuotaLimits::default(),
            format!("got {:?}", rec.limits),
        ),
        Err(e) => check("limits cleared", false, format!("{}", e)),
    }

    println!("{} passed, {} failed", passed, failed);
    if failed > 0 {
        return Err(DqError::InvalidArgument(format!(
            "{} self-check step(s) failed",
            failed
        )));
    }
    Ok(())
}

fn pick_limit(hard: u64, soft: u64) -> String {
    let limit = if hard != 0 { hard } else { soft };
    if limit == 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

fn fmt_block_limit(blocks: u64) -> String {
    if blocks == 0 {
        "unlimited".to_string()
    } else {
        format!("{} 1K blocks ({:.2} GiB)", blocks, blocks as f64 / 1024.0 / 1024.0)
    }
}
