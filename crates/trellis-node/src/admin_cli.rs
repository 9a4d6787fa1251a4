//! trellis-admin CLI tool
//!
//! Drives a running trellis-node over its admin socket.
//!
//! Usage:
//!   trellis-admin register <user_id> [--referrer <id>] [--tier <name>]
//!   trellis-admin invest <investment_id> <user_id> <amount> [status]
//!   trellis-admin place <sponsor_id> <user_id>
//!   trellis-admin deactivate <user_id>
//!   trellis-admin process <investment_id>
//!   trellis-admin post <investment_id>
//!   trellis-admin view <user_id> [max_level]
//!   trellis-admin stats <user_id>
//!   trellis-admin counts <user_id> [max_level]
//!   trellis-admin balance <user_id>
//!   trellis-admin ping

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use trellis_engine::{InvestmentStatus, MatrixTree, PlacementType};
use trellis_matrix::{InvestmentId, UserId};
use trellis_node::{AdminCommand, AdminResponse, NodeConfig};

fn print_usage() {
    eprintln!("trellis-admin - Drive a Trellis node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  trellis-admin register <user_id> [--referrer <id>] [--tier <name>]");
    eprintln!("                                                   Add or update a participant");
    eprintln!("  trellis-admin invest <id> <user_id> <amount> [status]");
    eprintln!("                                                   Record an investment (status defaults to active)");
    eprintln!("  trellis-admin place <sponsor_id> <user_id>       Place a user in the matrix");
    eprintln!("  trellis-admin deactivate <user_id>               Deactivate a position");
    eprintln!("  trellis-admin process <investment_id>            Place investor and post commissions");
    eprintln!("  trellis-admin post <investment_id>               Post commissions");
    eprintln!("  trellis-admin view <user_id> [max_level]         Show the matrix below a user");
    eprintln!("  trellis-admin stats <user_id>                    Window fill statistics");
    eprintln!("  trellis-admin counts <user_id> [max_level]       Members per level");
    eprintln!("  trellis-admin balance <user_id>                  Commission balance");
    eprintln!("  trellis-admin ping                               Check if daemon is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRELLIS_SOCKET    Path to admin socket (default: $TRELLIS_DATA_DIR/admin.sock)");
    eprintln!("  TRELLIS_DATA_DIR  Node data directory (default: ./trellis-data)");
}

/// Socket of the node, resolved the same way the daemon resolves it.
fn get_socket_path() -> PathBuf {
    match NodeConfig::from_env() {
        Ok(config) => config.admin_socket,
        Err(e) => fail(e),
    }
}

fn send_command(cmd: &AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to trellis-node at {:?}: {}\n\
             Is the trellis-node running?",
            socket_path, e
        )
    })?;

    // Send command
    let cmd_json = serde_json::to_string(cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    // Read response
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Required positional argument `index` of `command`.
fn required<T: FromStr>(args: &[String], index: usize, command: &str, name: &str) -> T {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .unwrap_or_else(|_| fail(format!("{} {}: invalid {} {:?}", command, name, name, raw))),
        None => fail(format!("{} requires a {} argument", command, name)),
    }
}

fn optional<T: FromStr>(args: &[String], index: usize, command: &str, name: &str) -> Option<T> {
    args.get(index).map(|_| required(args, index, command, name))
}

fn user(args: &[String], index: usize, command: &str, name: &str) -> UserId {
    UserId(required(args, index, command, name))
}

fn investment(args: &[String], index: usize, command: &str) -> InvestmentId {
    InvestmentId(required(args, index, command, "investment_id"))
}

fn parse_status(raw: &str) -> InvestmentStatus {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .unwrap_or_else(|_| fail(format!("unknown investment status {:?}", raw)))
}

fn parse_register(args: &[String]) -> AdminCommand {
    let user_id = user(args, 2, "register", "user_id");
    let mut referrer_id = None;
    let mut tier = None;

    let mut rest = args[3..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .unwrap_or_else(|| fail(format!("register: {} needs a value", flag)));
        match flag.as_str() {
            "--referrer" => {
                referrer_id = Some(UserId(
                    value
                        .parse()
                        .unwrap_or_else(|_| fail(format!("register: invalid referrer {:?}", value))),
                ))
            }
            "--tier" => tier = Some(value.clone()),
            other => fail(format!("register: unknown option {}", other)),
        }
    }

    AdminCommand::RegisterParticipant {
        user_id,
        referrer_id,
        tier,
    }
}

fn print_tree(tree: &MatrixTree) {
    fn walk(tree: &MatrixTree, index: usize, indent: usize) {
        let Some(node) = tree.node(index) else { return };
        for &child in &node.children {
            let Some(member) = tree.node(child) else { continue };
            let kind = match member.placement_type {
                Some(PlacementType::Spillover) => " (spillover)",
                _ => "",
            };
            println!("{}{}. {}{}", "  ".repeat(indent), member.position, member.user_id, kind);
            walk(tree, child, indent + 1);
        }
    }

    println!("{}", tree.root);
    walk(tree, 0, 1);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = match args[1].as_str() {
        "register" => parse_register(&args),
        "invest" => AdminCommand::RecordInvestment {
            investment_id: investment(&args, 2, "invest"),
            user_id: user(&args, 3, "invest", "user_id"),
            amount: required(&args, 4, "invest", "amount"),
            status: args.get(5).map(|s| parse_status(s)),
        },
        "place" => AdminCommand::Place {
            sponsor_id: user(&args, 2, "place", "sponsor_id"),
            user_id: user(&args, 3, "place", "user_id"),
        },
        "deactivate" => AdminCommand::Deactivate {
            user_id: user(&args, 2, "deactivate", "user_id"),
        },
        "process" => AdminCommand::ProcessInvestment {
            investment_id: investment(&args, 2, "process"),
        },
        "post" => AdminCommand::PostCommissions {
            investment_id: investment(&args, 2, "post"),
        },
        "view" => AdminCommand::MatrixView {
            user_id: user(&args, 2, "view", "user_id"),
            max_level: optional(&args, 3, "view", "max_level"),
        },
        "stats" => AdminCommand::MatrixStatistics {
            user_id: user(&args, 2, "stats", "user_id"),
        },
        "counts" => AdminCommand::DownlineCounts {
            user_id: user(&args, 2, "counts", "user_id"),
            max_level: optional(&args, 3, "counts", "max_level"),
        },
        "balance" => AdminCommand::Balance {
            user_id: user(&args, 2, "balance", "user_id"),
        },
        "ping" => AdminCommand::Ping,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(&cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => fail(error),
            AdminResponse::Position { position, created } => {
                let verb = if created { "Placed" } else { "Already placed" };
                println!(
                    "{} {} under {} (level {}, slot {}, {:?})",
                    verb,
                    position.user_id,
                    position.sponsor_id,
                    position.level,
                    position.position,
                    position.placement_type
                );
            }
            AdminResponse::Commissions { placed, records } => {
                if let Some(position) = placed {
                    println!("Placed {} under {}", position.user_id, position.sponsor_id);
                }
                if records.is_empty() {
                    println!("(no commissions)");
                }
                for record in records {
                    println!(
                        "L{}  {}  {}  {}  ({}%)",
                        record.level, record.referrer_id, record.amount, record.id, record.percentage_applied
                    );
                }
            }
            AdminResponse::View { tree } => print_tree(&tree),
            AdminResponse::Statistics { statistics } => {
                println!("{}", statistics.user_id);
                for level in &statistics.levels {
                    println!("  level {}: {}/{}", level.level, level.members, level.capacity);
                }
                println!(
                    "  {} active, {} available, {:.2}% complete",
                    statistics.active_positions, statistics.available_positions, statistics.completion_percentage
                );
            }
            AdminResponse::Counts { user_id, levels } => {
                println!("{}", user_id);
                for level in levels {
                    println!("  level {}: {}", level.level, level.members);
                }
            }
            AdminResponse::Balance { balance } => {
                println!("{}: {} pending, {} earned", balance.user_id, balance.pending, balance.total_earned);
            }
            AdminResponse::Pong => {
                println!("pong - trellis-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
